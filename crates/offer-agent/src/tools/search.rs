use offer_agent_core::tool::{Error as ToolError, Tool, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::WebhookClient;

const MAX_LIMIT: u32 = 50;

/// Input of [`SearchEquipmentTool`].
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchEquipmentInput {
    /// A model code (e.g. `HNVN10`) or a free-text description such as
    /// "pump station 10 m3/d".
    query: String,
    /// Maximum number of results, defaults to 10.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

/// A tool for searching the equipment catalog.
pub struct SearchEquipmentTool {
    webhook: WebhookClient,
    parameter_schema: Value,
}

impl SearchEquipmentTool {
    /// Creates a new search tool backed by the webhook.
    #[inline]
    pub fn new(webhook: WebhookClient) -> Self {
        SearchEquipmentTool {
            webhook,
            parameter_schema: schema_for!(SearchEquipmentInput).to_value(),
        }
    }
}

impl Tool for SearchEquipmentTool {
    type Input = SearchEquipmentInput;

    fn name(&self) -> &str {
        "search_equipment"
    }

    fn description(&self) -> &str {
        r#"
Searches the wastewater equipment catalog by model code or description.
Returns a JSON list of matching items with their codes, names and base prices."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        mut input: SearchEquipmentInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let query = input.query.trim();
        let checked = if query.is_empty() {
            Err(ToolError::invalid_input().with_reason("`query` is empty"))
        } else if input.limit == Some(0) {
            Err(ToolError::invalid_input().with_reason("`limit` must be positive"))
        } else {
            input.query = query.to_owned();
            input.limit = input.limit.map(|limit| limit.min(MAX_LIMIT));
            Ok(self.webhook.call(self.name(), &input))
        };
        async move { checked?.await }
    }
}
