use std::io::IsTerminal;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use freshpack_remote::{DownloadProgress, ProgressSink};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

use crate::update_flow::{StageFailure, UpdateOutcome, UpdateStatus};

/// Plain output emits a line per 10% (or per MiB when the size is unknown).
const PLAIN_UNKNOWN_TOTAL_STEP: u64 = 1024 * 1024;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style(force_plain: bool) -> OutputStyle {
    if force_plain || !std::io::stdout().is_terminal() {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    pub(crate) fn print_failure(self, failure: &StageFailure) {
        let line = format!("error: {failure}");
        match self.style {
            OutputStyle::Plain => eprintln!("{line}"),
            OutputStyle::Rich => eprintln!("{}", colorize(error_style(), &line)),
        }
    }

    pub(crate) fn start_download(self, label: &str) -> DownloadReporter {
        let progress_bar = if self.style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} {msg:<10} [{bar:24.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} {eta}",
            ) {
                progress_bar.set_style(style.tick_chars("<^>v ").progress_chars("=>-"));
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        DownloadReporter {
            style: self.style,
            label: label.to_string(),
            progress_bar,
            last_step: None,
            last: None,
        }
    }
}

/// Renders download progress either as an `indicatif` bar or as sparse plain
/// lines.
pub(crate) struct DownloadReporter {
    style: OutputStyle,
    label: String,
    progress_bar: Option<ProgressBar>,
    last_step: Option<u64>,
    last: Option<DownloadProgress>,
}

impl DownloadReporter {
    pub(crate) fn finish(mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };
        progress_bar.finish_and_clear();
        if let Some(progress) = &self.last {
            println!(
                "{}",
                render_download_line(self.style, &self.label, progress)
            );
        }
    }

    fn plain_step(progress: &DownloadProgress) -> u64 {
        match progress.percent() {
            Some(percent) => u64::from(percent / 10),
            None => progress.downloaded / PLAIN_UNKNOWN_TOTAL_STEP,
        }
    }
}

impl ProgressSink for DownloadReporter {
    fn on_progress(&mut self, progress: &DownloadProgress) {
        self.last = Some(*progress);

        if let Some(progress_bar) = &self.progress_bar {
            match progress.total {
                Some(total) if total > 0 => progress_bar.set_length(total),
                _ => progress_bar.unset_length(),
            }
            progress_bar.set_position(progress.downloaded);
            return;
        }

        let step = Self::plain_step(progress);
        if self.last_step.is_some_and(|last| last >= step) {
            return;
        }
        self.last_step = Some(step);
        println!(
            "{}",
            render_download_line(self.style, &self.label, progress)
        );
    }
}

impl Drop for DownloadReporter {
    fn drop(&mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let (badge, badge_style) = match status {
                "ok" => ("[OK]", ok_style()),
                "warn" => ("[WARN]", warn_style()),
                "err" => ("[ERR]", error_style()),
                _ => ("[..]", step_style()),
            };
            format!("{} {message}", colorize(badge_style, badge))
        }
    }
}

pub(crate) fn render_download_line(
    style: OutputStyle,
    label: &str,
    progress: &DownloadProgress,
) -> String {
    let rate = format!("{}/s", HumanBytes(progress.bytes_per_sec as u64));
    let amount = match (progress.percent(), progress.total) {
        (Some(percent), Some(total)) => format!(
            "{percent:>3}% {}/{}",
            HumanBytes(progress.downloaded),
            HumanBytes(total)
        ),
        _ => format!("{}", HumanBytes(progress.downloaded)),
    };

    let label = match style {
        OutputStyle::Plain => label.to_string(),
        OutputStyle::Rich => colorize(progress_label_style(), label),
    };
    format!(
        "{label}: {amount} at {rate} ({})",
        format_elapsed(progress.elapsed)
    )
}

pub(crate) fn format_outcome_lines(outcome: &UpdateOutcome, style: OutputStyle) -> Vec<String> {
    let version = outcome
        .version
        .as_ref()
        .map(|version| format!(" {version}"))
        .unwrap_or_default();

    let headline = match outcome.status {
        UpdateStatus::Installed => {
            let verb = if outcome.replaced_previous {
                "updated"
            } else {
                "installed"
            };
            format!("{verb} {}{version}", outcome.app_name)
        }
        UpdateStatus::UpToDate => format!("{}{version} is up to date", outcome.app_name),
    };

    let mut lines = vec![render_status_line(style, "ok", &headline)];
    lines.push(format!("install_root: {}", outcome.install_root.display()));
    lines.push(format!("executable: {}", outcome.executable.display()));
    if let Some(archive_path) = &outcome.archive_path {
        lines.push(format!(
            "archive: {} ({} bytes)",
            archive_path.display(),
            outcome.downloaded_bytes
        ));
    }
    if let Some(receipt_path) = &outcome.receipt_path {
        lines.push(format!("receipt: {}", receipt_path.display()));
    }
    lines
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn ok_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightGreen.into()))
        .effects(Effects::BOLD)
}

fn warn_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightYellow.into()))
        .effects(Effects::BOLD)
}

fn error_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightRed.into()))
        .effects(Effects::BOLD)
}

fn step_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightBlue.into()))
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
