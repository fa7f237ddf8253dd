use async_trait::async_trait;

use crate::error::BackendError;
use crate::types::Message;

/// A delivery mechanism able to attempt sending one message.
///
/// `Ok(true)` means delivered, `Ok(false)` means the backend declined.
/// An `Err` is a transient failure. The dispatcher treats the latter two
/// the same way: back off, then retry or fail over.
#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    /// Short name used in logs and status details.
    fn name(&self) -> &str;

    async fn attempt(&self, message: &Message) -> Result<bool, BackendError>;
}

#[cfg(feature = "http")]
pub use http::HttpBackend;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::DeliveryBackend;
    use crate::error::BackendError;
    use crate::signing::{signature_headers, DEFAULT_SIGNATURE_HEADER, DEFAULT_TIMESTAMP_HEADER};
    use crate::types::{now_secs, Message};

    /// Relays messages as signed JSON POSTs to a webhook URL.
    pub struct HttpBackend {
        name: String,
        url: String,
        timeout: Duration,
        secret: Option<Vec<u8>>,
        client: reqwest::Client,
    }

    impl HttpBackend {
        /// Defaults: 5 second timeout, unsigned.
        pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                url: url.into(),
                timeout: Duration::from_secs(5),
                secret: None,
                client: reqwest::Client::new(),
            }
        }

        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = timeout;
            self
        }

        /// Sign every request body with HMAC-SHA256.
        pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
            self.secret = Some(secret.into());
            self
        }
    }

    #[async_trait]
    impl DeliveryBackend for HttpBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn attempt(&self, message: &Message) -> Result<bool, BackendError> {
            let body = serde_json::to_vec(message)
                .map_err(|err| BackendError::Rejected(format!("unserializable message: {err}")))?;

            let mut request = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .header("Content-Type", "application/json");

            if let Some(secret) = &self.secret {
                let headers = signature_headers(
                    secret,
                    &body,
                    Some(now_secs()),
                    DEFAULT_SIGNATURE_HEADER,
                    DEFAULT_TIMESTAMP_HEADER,
                );
                request = request.header(headers.signature.0, headers.signature.1);
                if let Some((name, value)) = headers.timestamp {
                    request = request.header(name, value);
                }
            }

            match request.body(body).send().await {
                Ok(resp) if resp.status().is_success() => Ok(true),
                Ok(resp) if resp.status().is_client_error() => {
                    Err(BackendError::Rejected(format!("remote returned {}", resp.status())))
                }
                Ok(resp) => Err(BackendError::Transient(format!("remote returned {}", resp.status()))),
                Err(err) if err.is_timeout() => Err(BackendError::Timeout(self.timeout)),
                Err(err) => Err(BackendError::Transient(err.to_string())),
            }
        }
    }
}
