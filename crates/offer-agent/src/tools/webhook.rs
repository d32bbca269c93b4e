use std::time::Duration;

use offer_agent_core::tool::{Error as ToolError, ToolResult};
use serde::Serialize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A client of the catalog webhook.
///
/// Every tool is served by `POST {base_url}/{tool_name}` with the tool
/// input as the JSON body. The response body is handed to the model as-is.
#[derive(Clone, Debug)]
pub struct WebhookClient {
    client: reqwest::Client,
    base_url: String,
}

impl WebhookClient {
    /// Creates a client for the webhook at `base_url`.
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Returns the endpoint of a tool.
    #[inline]
    pub fn endpoint(&self, tool_name: &str) -> String {
        format!("{}/{tool_name}", self.base_url)
    }

    /// Calls the endpoint of a tool.
    ///
    /// The returned future doesn't borrow `self`.
    pub fn call<T: Serialize>(
        &self,
        tool_name: &str,
        body: &T,
    ) -> impl Future<Output = ToolResult> + Send + 'static + use<T> {
        let url = self.endpoint(tool_name);
        let req = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(body);
        async move {
            trace!("calling webhook: {url}");
            let resp = req.send().await.map_err(|err| {
                ToolError::network().with_reason(format!("{url}: {err}"))
            })?;

            let status = resp.status();
            if !status.is_success() {
                warn!("webhook {url} responded with {status}");
                return Err(ToolError::upstream_status(status.as_u16()));
            }

            let body = resp.text().await.map_err(|err| {
                ToolError::network().with_reason(format!("{url}: {err}"))
            })?;
            if body.trim().is_empty() {
                return Err(ToolError::execution_error()
                    .with_reason("the catalog returned an empty response"));
            }
            Ok(body)
        }
    }
}
