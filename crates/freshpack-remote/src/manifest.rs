use std::time::Duration;

use freshpack_core::{AppDescriptor, Manifest, UpdateError, UpdateResult};
use reqwest::blocking::Client;

use crate::client::{build_client, describe_request_error};

/// Retrieves the remote manifest over HTTP(S).
#[derive(Debug, Clone)]
pub struct ManifestFetcher {
    client: Client,
    url: String,
    timeout: Duration,
}

impl ManifestFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> UpdateResult<Self> {
        let url = url.into();
        let client = build_client(timeout).map_err(|err| UpdateError::Network {
            url: url.clone(),
            reason: format!("failed to build HTTP client: {err}"),
        })?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn fetch(&self) -> UpdateResult<Manifest> {
        tracing::debug!(url = %self.url, "fetching manifest");
        let network_error = |reason: String| UpdateError::Network {
            url: self.url.clone(),
            reason,
        };

        let response = self
            .client
            .get(&self.url)
            .send()
            .map_err(|err| network_error(describe_request_error(&err, self.timeout)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(network_error(format!("server returned {status}")));
        }

        let body = response
            .text()
            .map_err(|err| network_error(describe_request_error(&err, self.timeout)))?;
        Manifest::from_json_str(&self.url, &body)
    }

    /// Fetches the manifest and resolves the entry for `app`.
    pub fn fetch_descriptor(&self, app: &str) -> UpdateResult<AppDescriptor> {
        let manifest = self.fetch()?;
        let descriptor = manifest.descriptor(app)?;
        tracing::info!(
            app,
            url = %descriptor.download_url,
            version = ?descriptor.version,
            size = ?descriptor.expected_size(),
            "resolved manifest entry"
        );
        Ok(descriptor)
    }
}
