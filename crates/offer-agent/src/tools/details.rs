use offer_agent_core::tool::{Error as ToolError, Tool, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::WebhookClient;

/// Input of [`GetEquipmentDetailsTool`].
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct EquipmentDetailsInput {
    /// Exact equipment code, as returned by `search_equipment`.
    code: String,
}

/// A tool for reading the technical data and price of an equipment item.
pub struct GetEquipmentDetailsTool {
    webhook: WebhookClient,
    parameter_schema: Value,
}

impl GetEquipmentDetailsTool {
    /// Creates a new details tool backed by the webhook.
    #[inline]
    pub fn new(webhook: WebhookClient) -> Self {
        GetEquipmentDetailsTool {
            webhook,
            parameter_schema: schema_for!(EquipmentDetailsInput).to_value(),
        }
    }
}

impl Tool for GetEquipmentDetailsTool {
    type Input = EquipmentDetailsInput;

    fn name(&self) -> &str {
        "get_equipment_details"
    }

    fn description(&self) -> &str {
        r#"
Returns the technical parameters, components and price of one catalog item.
Use the exact code from a `search_equipment` result."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: EquipmentDetailsInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let checked = if input.code.trim().is_empty() {
            Err(ToolError::invalid_input().with_reason("`code` is empty"))
        } else {
            Ok(self.webhook.call(self.name(), &input))
        };
        async move { checked?.await }
    }
}
