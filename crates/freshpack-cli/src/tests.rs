use super::*;

use std::io::{Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use freshpack_core::{ErrorKind, UpdaterConfig, UpdaterConfigFile};
use freshpack_installer::UpdateLock;
use freshpack_remote::DownloadProgress;

use crate::config::{merge_config, select_config_file};
use crate::render::{render_download_line, render_status_line, OutputStyle};
use crate::update_flow::{UpdateStage, UpdateStatus};

static TEST_BASE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_base() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_BASE_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "freshpack-cli-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ))
}

fn bind_test_server() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("must bind test server");
    let address = listener.local_addr().expect("must read test server address");
    (listener, format!("http://{address}"))
}

/// Answers one request per connection with the next body, returning the
/// request paths seen.
fn serve(listener: TcpListener, bodies: Vec<Vec<u8>>) -> JoinHandle<Vec<String>> {
    std::thread::spawn(move || {
        let mut paths = Vec::new();
        for body in bodies {
            let (mut stream, _) = listener.accept().expect("must accept test client");
            paths.push(read_request_path(&mut stream));
            let head = format!(
                "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: {}\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
            let _ = stream.flush();
        }
        paths
    })
}

fn read_request_path(stream: &mut TcpStream) -> String {
    let mut request = Vec::new();
    let mut buffer = [0_u8; 1024];
    while !request.windows(4).any(|window| window == b"\r\n\r\n") {
        match stream.read(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(read) => request.extend_from_slice(&buffer[..read]),
        }
    }
    String::from_utf8_lossy(&request)
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or_default()
        .to_string()
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).expect("must start zip entry");
        writer.write_all(data).expect("must write zip entry");
    }
    writer
        .finish()
        .expect("must finish zip fixture")
        .into_inner()
}

fn manifest_json(base_url: &str, size: usize, exe_path: &str, version: Option<&str>) -> Vec<u8> {
    let version = version
        .map(|version| format!(r#","version": "{version}""#))
        .unwrap_or_default();
    format!(
        r#"{{
  "MyApp": {{
    "download_url": "{base_url}/a.zip",
    "zip_name": "a.zip",
    "size": {size},
    "after_extract_name": "MyApp",
    "after_extract_exe_path": "{exe_path}"{version}
  }}
}}"#
    )
    .into_bytes()
}

fn orchestrator(base_url: &str, base: &Path) -> UpdateOrchestrator {
    let mut config = UpdaterConfig::new(format!("{base_url}/manifest.json"), "MyApp", base);
    config.manifest_timeout = Duration::from_secs(10);
    config.download_timeout = Duration::from_secs(10);
    UpdateOrchestrator::new(config)
}

fn run_quiet(
    orchestrator: &UpdateOrchestrator,
    options: UpdateOptions,
    cancel: &CancellationToken,
) -> Result<update_flow::UpdateOutcome, update_flow::StageFailure> {
    let mut sink = |_progress: &DownloadProgress| {};
    orchestrator.run(options, &mut sink, cancel)
}

fn sorted_names(dir: &Path) -> Vec<String> {
    let mut names = std::fs::read_dir(dir)
        .expect("must read dir")
        .map(|entry| {
            entry
                .expect("dir entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect::<Vec<_>>();
    names.sort();
    names
}

fn app_archive() -> Vec<u8> {
    zip_bytes(&[("a/bin/app.exe", b"binary"), ("a/readme.txt", b"docs")])
}

#[test]
fn update_installs_flattened_release_end_to_end() {
    let base = test_base();
    let archive = app_archive();
    let (listener, base_url) = bind_test_server();
    let manifest = manifest_json(&base_url, archive.len(), "./bin/app.exe", Some("1.2.0"));
    let server = serve(listener, vec![manifest, archive.clone()]);

    let orchestrator = orchestrator(&base_url, &base);
    let outcome = run_quiet(&orchestrator, UpdateOptions::default(), &CancellationToken::new())
        .expect("update must succeed");

    let paths = server.join().expect("server thread");
    assert_eq!(paths, vec!["/manifest.json", "/a.zip"]);

    assert_eq!(outcome.status, UpdateStatus::Installed);
    assert_eq!(outcome.install_root, base.join("tools").join("MyApp"));
    assert!(outcome.executable.is_absolute());
    assert!(outcome.executable.is_file());
    assert!(outcome
        .executable
        .ends_with(Path::new("MyApp").join("bin").join("app.exe")));
    assert!(outcome.flattened);
    assert!(!outcome.replaced_previous);
    assert_eq!(outcome.downloaded_bytes, archive.len() as u64);
    assert_eq!(outcome.version.as_deref(), Some("1.2.0"));

    let archive_path = base.join("downloads").join("a.zip");
    assert_eq!(outcome.archive_path.as_deref(), Some(archive_path.as_path()));
    assert_eq!(std::fs::read(&archive_path).expect("must keep archive"), archive);
    assert_eq!(sorted_names(&base.join("tools")), vec!["MyApp"]);

    let receipt = read_install_receipt(orchestrator.layout(), "MyApp")
        .expect("must read receipt")
        .expect("receipt must exist");
    assert_eq!(receipt.version.as_deref(), Some("1.2.0"));
    assert_eq!(receipt.archive_size, archive.len() as u64);
    assert_eq!(receipt.executable, outcome.executable);

    let _ = std::fs::remove_dir_all(&base);
}

#[test]
fn second_update_leaves_single_install_root() {
    let base = test_base();
    let archive = app_archive();

    for _ in 0..2 {
        let (listener, base_url) = bind_test_server();
        let manifest = manifest_json(&base_url, archive.len(), "bin/app.exe", None);
        let server = serve(listener, vec![manifest, archive.clone()]);
        run_quiet(
            &orchestrator(&base_url, &base),
            UpdateOptions::default(),
            &CancellationToken::new(),
        )
        .expect("update must succeed");
        server.join().expect("server thread");
    }

    assert_eq!(sorted_names(&base.join("tools")), vec!["MyApp"]);
    assert_eq!(
        sorted_names(&base.join("tools").join("MyApp")),
        vec!["bin", "readme.txt"]
    );

    let _ = std::fs::remove_dir_all(&base);
}

#[test]
fn failed_validation_restores_previous_install() {
    let base = test_base();
    let previous_root = base.join("tools").join("MyApp");
    std::fs::create_dir_all(previous_root.join("bin")).expect("must seed previous install");
    std::fs::write(previous_root.join("bin").join("app.exe"), b"v1").expect("must seed exe");

    let archive = app_archive();
    let (listener, base_url) = bind_test_server();
    let manifest = manifest_json(&base_url, archive.len(), "bin/missing.exe", None);
    let server = serve(listener, vec![manifest, archive]);

    let failure = run_quiet(
        &orchestrator(&base_url, &base),
        UpdateOptions::default(),
        &CancellationToken::new(),
    )
    .expect_err("validation must fail");
    server.join().expect("server thread");

    assert_eq!(failure.stage, UpdateStage::Validate);
    assert_eq!(failure.source.kind(), ErrorKind::Validation);
    let message = failure.to_string();
    assert!(
        message.starts_with("validate stage failed (validation): expected executable not found:"),
        "unexpected message: {message}"
    );
    assert!(message.contains("missing.exe"));

    assert_eq!(
        std::fs::read(previous_root.join("bin").join("app.exe")).expect("previous exe"),
        b"v1"
    );
    assert!(!previous_root.join("readme.txt").exists());
    assert_eq!(sorted_names(&base.join("tools")), vec!["MyApp"]);

    let _ = std::fs::remove_dir_all(&base);
}

#[test]
fn size_mismatch_fails_download_stage_without_installing() {
    let base = test_base();
    let archive = app_archive();
    let (listener, base_url) = bind_test_server();
    let manifest = manifest_json(&base_url, archive.len() + 1, "bin/app.exe", None);
    let server = serve(listener, vec![manifest, archive]);

    let failure = run_quiet(
        &orchestrator(&base_url, &base),
        UpdateOptions::default(),
        &CancellationToken::new(),
    )
    .expect_err("size mismatch must fail");
    server.join().expect("server thread");

    assert_eq!(failure.stage, UpdateStage::Download);
    assert_eq!(failure.source.kind(), ErrorKind::Integrity);
    assert!(failure.to_string().contains("size mismatch, download corrupted"));
    assert!(!base.join("tools").join("MyApp").exists());
    assert!(!base.join("downloads").join("a.zip").exists());

    let _ = std::fs::remove_dir_all(&base);
}

#[test]
fn unknown_application_fails_manifest_stage() {
    let base = test_base();
    let (listener, base_url) = bind_test_server();
    let server = serve(listener, vec![br#"{"Other": {}}"#.to_vec()]);

    let failure = run_quiet(
        &orchestrator(&base_url, &base),
        UpdateOptions::default(),
        &CancellationToken::new(),
    )
    .expect_err("missing app must fail");
    server.join().expect("server thread");

    assert_eq!(failure.stage, UpdateStage::Manifest);
    assert_eq!(failure.source.kind(), ErrorKind::NotFound);
    assert!(failure.to_string().starts_with("manifest stage failed (not-found):"));

    let _ = std::fs::remove_dir_all(&base);
}

#[test]
fn cancelled_run_reports_cancellation() {
    let base = test_base();
    let archive = app_archive();
    let (listener, base_url) = bind_test_server();
    let manifest = manifest_json(&base_url, archive.len(), "bin/app.exe", None);
    let server = serve(listener, vec![manifest]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let failure = run_quiet(&orchestrator(&base_url, &base), UpdateOptions::default(), &cancel)
        .expect_err("cancelled run must fail");
    server.join().expect("server thread");

    assert!(failure.is_cancelled());
    assert_eq!(failure.stage, UpdateStage::Download);
    assert!(!base.join("tools").join("MyApp").exists());

    let _ = std::fs::remove_dir_all(&base);
}

#[test]
fn skip_if_current_avoids_download() {
    let base = test_base();
    let archive = app_archive();

    let (listener, base_url) = bind_test_server();
    let manifest = manifest_json(&base_url, archive.len(), "bin/app.exe", Some("2.0.0"));
    let server = serve(listener, vec![manifest, archive.clone()]);
    run_quiet(
        &orchestrator(&base_url, &base),
        UpdateOptions::default(),
        &CancellationToken::new(),
    )
    .expect("first update must succeed");
    server.join().expect("server thread");

    let (listener, base_url) = bind_test_server();
    let manifest = manifest_json(&base_url, archive.len(), "bin/app.exe", Some("2.0.0"));
    let server = serve(listener, vec![manifest]);
    let outcome = run_quiet(
        &orchestrator(&base_url, &base),
        UpdateOptions {
            skip_if_current: true,
        },
        &CancellationToken::new(),
    )
    .expect("second update must succeed");

    assert_eq!(server.join().expect("server thread"), vec!["/manifest.json"]);
    assert_eq!(outcome.status, UpdateStatus::UpToDate);
    assert!(outcome.archive_path.is_none());
    assert!(outcome.executable.is_file());

    let _ = std::fs::remove_dir_all(&base);
}

#[test]
fn non_semver_manifest_version_installs_instead_of_skipping() {
    let base = test_base();
    let archive = app_archive();

    for _ in 0..2 {
        let (listener, base_url) = bind_test_server();
        let manifest = manifest_json(&base_url, archive.len(), "bin/app.exe", Some("1.2"));
        let server = serve(listener, vec![manifest, archive.clone()]);
        let outcome = run_quiet(
            &orchestrator(&base_url, &base),
            UpdateOptions {
                skip_if_current: true,
            },
            &CancellationToken::new(),
        )
        .expect("update must succeed");

        assert_eq!(
            server.join().expect("server thread"),
            vec!["/manifest.json", "/a.zip"]
        );
        assert_eq!(outcome.status, UpdateStatus::Installed);
        assert_eq!(outcome.version.as_deref(), Some("1.2"));
    }

    let receipt = read_install_receipt(&AppLayout::new(base.clone()), "MyApp")
        .expect("must read receipt")
        .expect("receipt must exist");
    assert_eq!(receipt.version.as_deref(), Some("1.2"));

    let _ = std::fs::remove_dir_all(&base);
}

#[test]
fn concurrent_update_fails_fast_on_lock() {
    let base = test_base();
    let orchestrator = orchestrator("http://127.0.0.1:9", &base);
    orchestrator
        .layout()
        .ensure_base_dirs()
        .expect("must create dirs");
    let held = UpdateLock::acquire(orchestrator.layout(), "MyApp").expect("must hold lock");

    let failure = run_quiet(&orchestrator, UpdateOptions::default(), &CancellationToken::new())
        .expect_err("locked run must fail");

    assert_eq!(failure.stage, UpdateStage::Prepare);
    assert_eq!(failure.source.kind(), ErrorKind::Locked);

    drop(held);
    let _ = std::fs::remove_dir_all(&base);
}

#[test]
fn merge_config_prefers_flags_over_file() {
    let file = UpdaterConfigFile::from_toml_str(
        r#"
manifest_url = "https://file.example/manifest.json"
app_name = "FileApp"
download_timeout_secs = 60
"#,
    )
    .expect("must parse config");
    let flags = UpdaterConfigFile {
        app_name: Some("FlagApp".to_string()),
        ..UpdaterConfigFile::default()
    };

    let config = merge_config(file, flags, Some(Path::new("/home/u/.freshpack")), None)
        .expect("must merge config");

    assert_eq!(config.manifest_url, "https://file.example/manifest.json");
    assert_eq!(config.app_name, "FlagApp");
    assert_eq!(config.base_dir, PathBuf::from("/home/u/.freshpack/FlagApp"));
    assert_eq!(config.download_timeout, Duration::from_secs(60));
    assert_eq!(config.manifest_timeout, Duration::from_secs(15));
}

#[test]
fn merge_config_requires_manifest_url() {
    let flags = UpdaterConfigFile {
        app_name: Some("MyApp".to_string()),
        ..UpdaterConfigFile::default()
    };
    let err = merge_config(
        UpdaterConfigFile::default(),
        flags,
        Some(Path::new("/tmp")),
        Some(Path::new("/etc/freshpack.toml")),
    )
    .expect_err("missing url must fail");

    let message = err.to_string();
    assert!(message.contains("--manifest-url"), "unexpected error: {message}");
    assert!(message.contains("/etc/freshpack.toml"));
}

#[test]
fn merge_config_rejects_zero_timeout() {
    let flags = UpdaterConfigFile {
        manifest_url: Some("https://x/m.json".to_string()),
        app_name: Some("MyApp".to_string()),
        base_dir: Some(PathBuf::from("/opt/myapp")),
        manifest_timeout_secs: Some(0),
        download_timeout_secs: None,
    };
    let err = merge_config(UpdaterConfigFile::default(), flags, None, None)
        .expect_err("zero timeout must fail");
    assert!(err.to_string().contains("manifest_timeout_secs"));
}

#[test]
fn select_config_file_prefers_flag_then_env_then_existing_default() {
    let root = test_base();
    std::fs::create_dir_all(&root).expect("must create root");

    assert_eq!(
        select_config_file(Some(Path::new("/a.toml")), Some(Path::new("/b.toml")), Some(&root)),
        Some(PathBuf::from("/a.toml"))
    );
    assert_eq!(
        select_config_file(None, Some(Path::new("/b.toml")), Some(&root)),
        Some(PathBuf::from("/b.toml"))
    );
    assert_eq!(select_config_file(None, None, Some(&root)), None);

    std::fs::write(root.join("config.toml"), "app_name = \"MyApp\"\n").expect("must write config");
    assert_eq!(
        select_config_file(None, None, Some(&root)),
        Some(root.join("config.toml"))
    );

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn cli_parses_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "fpk",
        "-vv",
        "update",
        "--skip-if-current",
        "--app",
        "MyApp",
        "--manifest-url",
        "https://x/m.json",
    ])
    .expect("must parse");

    assert_eq!(cli.verbose, 2);
    assert_eq!(cli.app_name.as_deref(), Some("MyApp"));
    assert!(matches!(
        cli.command,
        Commands::Update {
            skip_if_current: true,
            plain: false
        }
    ));
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "installed MyApp 1.2.0"),
        "installed MyApp 1.2.0"
    );
    let rich = render_status_line(OutputStyle::Rich, "ok", "installed MyApp 1.2.0");
    assert!(rich.contains("[OK]"));
    assert!(rich.ends_with(" installed MyApp 1.2.0"));
}

#[test]
fn render_download_line_shows_percent_only_with_known_total() {
    let known = DownloadProgress {
        downloaded: 512,
        total: Some(1024),
        elapsed: Duration::from_millis(1500),
        bytes_per_sec: 0.0,
    };
    let line = render_download_line(OutputStyle::Plain, "download", &known);
    assert!(line.starts_with("download:  50% "), "unexpected line: {line}");
    assert!(line.ends_with("(1.500s)"));

    let unknown = DownloadProgress {
        total: None,
        ..known
    };
    let line = render_download_line(OutputStyle::Plain, "download", &unknown);
    assert!(!line.contains('%'), "unexpected line: {line}");
}

#[test]
fn completion_shell_resolution_falls_back_to_platform_default() {
    assert_eq!(
        resolve_completion_shell(None, Some("/usr/bin/zsh"), false),
        CliCompletionShell::Zsh
    );
    assert_eq!(
        resolve_completion_shell(Some(CliCompletionShell::Fish), Some("/bin/bash"), false),
        CliCompletionShell::Fish
    );
    assert_eq!(
        resolve_completion_shell(None, Some("/bin/tcsh"), true),
        CliCompletionShell::Powershell
    );
    assert_eq!(resolve_completion_shell(None, None, false), CliCompletionShell::Bash);
}

#[test]
fn completions_script_names_binary() {
    let mut script = Vec::new();
    write_completions_script(CliCompletionShell::Bash, "fpk", &mut script)
        .expect("must generate completions");
    let script = String::from_utf8(script).expect("utf-8 script");
    assert!(script.contains("fpk"));
    assert!(script.contains("update"));
}

#[test]
fn doctor_lines_report_layout() {
    let resolved = ResolvedConfig {
        config: UpdaterConfig::new("https://x/m.json", "MyApp", "/opt/myapp"),
        source: None,
    };
    let lines = format_doctor_lines(&resolved);
    assert!(lines.contains(&"app: MyApp".to_string()));
    assert!(lines.contains(&format!(
        "tools: {}",
        Path::new("/opt/myapp").join("tools").display()
    )));
    assert!(lines[0].contains(CONFIG_ENV_VAR));
}
