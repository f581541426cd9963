use std::env;
use std::fmt;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};

/// Where the remote authority lives and how to authenticate against it.
#[derive(Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl ApiConfig {
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:5000/api/student";
    pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.trim().is_empty()).then_some(token);
        self
    }

    /// Reads `LEARN_API_BASE_URL`, `LEARN_API_TOKEN` and
    /// `LEARN_API_TIMEOUT_SECS`, falling back to local development defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let base_url =
            env::var("LEARN_API_BASE_URL").unwrap_or_else(|_| Self::DEFAULT_BASE_URL.into());
        let timeout_secs = env::var("LEARN_API_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(Self::DEFAULT_TIMEOUT_SECS);

        let mut config = Self::new(base_url);
        config.timeout = Duration::from_secs(timeout_secs);
        match env::var("LEARN_API_TOKEN") {
            Ok(token) => config.with_token(token),
            Err(_) => config,
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub(crate) fn build_client(&self) -> Result<Client, reqwest::Error> {
        Client::builder().timeout(self.timeout).build()
    }

    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}
