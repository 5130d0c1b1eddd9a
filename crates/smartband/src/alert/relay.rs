//! HTTP notification relay.

use async_trait::async_trait;
use tracing::trace;

use super::{AlertPayload, NotificationTransport, TransportError};
use crate::config::RelayConfig;
use crate::error::{Error, Result};

/// Posts alert payloads as JSON to a messaging relay.
#[derive(Debug, Clone)]
pub struct HttpRelay {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpRelay {
    /// Build a relay client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
        })
    }

    /// Relay endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NotificationTransport for HttpRelay {
    async fn send(&self, payload: &AlertPayload) -> std::result::Result<u16, TransportError> {
        let mut request = self.client.post(&self.url).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        trace!(url = %self.url, "Posting fall alert");
        let response = request.send().await.map_err(classify)?;
        Ok(response.status().as_u16())
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Other(error.to_string())
    }
}
