use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use url::Url;

use crate::config::RemoteServiceOptions;
use crate::error::MhcPredError;

/// An HTTP client that only talks to the hosts of configured prediction services.
///
/// Default headers from [`RemoteServiceOptions`] are attached to every request.
/// Timeouts are applied per request by the caller.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl SandboxClient {
    /// Builds a client whose allowlist holds exactly the host of `options.base_url`.
    pub fn for_service(options: &RemoteServiceOptions) -> Result<Self, MhcPredError> {
        let base = Url::parse(&options.base_url)
            .map_err(|e| MhcPredError::Config(format!("Invalid base URL {}: {}", options.base_url, e)))?;
        let host = base
            .host_str()
            .ok_or_else(|| MhcPredError::Config(format!("Base URL {} has no host", options.base_url)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| MhcPredError::Config(format!("Invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| MhcPredError::Config(format!("Invalid header value for {}: {}", name, e)))?;
            headers.insert(name, value);
        }

        let client = ClientBuilder::new()
            .user_agent(options.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| MhcPredError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let mut allowlist = HashSet::new();
        allowlist.insert(host.to_string());
        Ok(Self { client, allowlist })
    }

    /// Validates if a URL is permitted under the current policy.
    pub fn is_allowed(&self, url: &str) -> bool {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                for allowed in &self.allowlist {
                    if host == allowed || host.ends_with(&format!(".{}", allowed)) {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn post(&self, url: &str) -> Result<reqwest::RequestBuilder, MhcPredError> {
        self.request(reqwest::Method::POST, url)
    }

    pub fn request(&self, method: reqwest::Method, url: &str) -> Result<reqwest::RequestBuilder, MhcPredError> {
        if !self.is_allowed(url) {
            tracing::warn!(url, "blocked request outside service allowlist");
            return Err(MhcPredError::Config(format!(
                "Host not in service allowlist for URL {}",
                url
            )));
        }

        Ok(self.client.request(method, url))
    }
}
