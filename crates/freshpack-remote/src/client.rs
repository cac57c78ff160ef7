use std::time::Duration;

use reqwest::blocking::Client;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
        .user_agent(concat!("freshpack/", env!("CARGO_PKG_VERSION")))
        .build()
}

pub(crate) fn describe_request_error(err: &reqwest::Error, timeout: Duration) -> String {
    if err.is_timeout() {
        return format!("timed out after {}s", timeout.as_secs());
    }
    if err.is_connect() {
        return format!("connection failed: {err}");
    }
    err.to_string()
}
