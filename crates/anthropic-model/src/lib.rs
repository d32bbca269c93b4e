//! A model provider for the Anthropic Messages API.

#[macro_use]
extern crate tracing;

mod config;
mod io;
mod proto;
mod response;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use mime::Mime;
use offer_agent_model::{
    ErrorKind, ModelProvider, ModelProviderError, ModelRequest,
};
use reqwest::{Client, StatusCode, header};

pub use config::{AnthropicConfig, AnthropicConfigBuilder};
use io::{Chunks, Sse};
pub use response::AnthropicResponse;

/// Error type for [`AnthropicProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    fn from_status(status: StatusCode, body: &str) -> Self {
        let kind = match status.as_u16() {
            429 | 529 => ErrorKind::RateLimitExceeded,
            _ => ErrorKind::Other,
        };
        Self::new(format!("HTTP {status}: {body}"), kind)
    }

    fn from_api_error(r#type: &str, message: &str) -> Self {
        let kind = match r#type {
            "rate_limit_error" | "overloaded_error" => {
                ErrorKind::RateLimitExceeded
            }
            _ => ErrorKind::Other,
        };
        Self::new(format!("{}: {message}", r#type), kind)
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Anthropic Messages API model provider.
#[derive(Clone, Debug)]
pub struct AnthropicProvider {
    client: Client,
    config: Arc<AnthropicConfig>,
}

impl AnthropicProvider {
    /// Creates a new `AnthropicProvider` with the given configuration.
    #[inline]
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }
}

impl ModelProvider for AnthropicProvider {
    type Error = Error;
    type Response = AnthropicResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let anthropic_req = proto::create_request(req, &self.config);
        debug!(
            "sending request with {} messages to {}",
            req.messages.len(),
            self.config.model
        );
        let resp_fut = self
            .client
            .post(format!("{}{}", self.config.base_url, "/messages"))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "text/event-stream")
            .json(&anthropic_req)
            .send();

        async move {
            let resp = resp_fut
                .await
                .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                warn!("request rejected with {status}");
                return Err(Error::from_status(status, &body));
            }

            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let is_event_stream = content_type
                .and_then(|v| v.parse().ok())
                .map(|m: Mime| {
                    m.type_() == mime::TEXT && m.subtype() == "event-stream"
                })
                .unwrap_or(false);
            if !is_event_stream {
                return Err(Error::new(
                    format!("Unexpected content type: {content_type:?}"),
                    ErrorKind::Other,
                ));
            }

            // Here we got a successful response.
            let chunks = Chunks::from_response(resp);
            let sse = Sse::new(chunks);
            Ok(AnthropicResponse::from_sse(sse))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::from_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(err.is_transient());
        let err = Error::from_status(StatusCode::from_u16(529).unwrap(), "");
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        let err = Error::from_status(StatusCode::BAD_REQUEST, "bad tool_use");
        assert!(!err.is_transient());
        assert_eq!(err.message(), "HTTP 400 Bad Request: bad tool_use");

        let err = Error::from_api_error("invalid_request_error", "nope");
        assert_eq!(err.kind(), ErrorKind::Other);
    }
}
