//! The reserved interactive choice tool.
//!
//! It is answered locally instead of by a handler: the result carries a
//! boolean marker that makes the loop pause until the user picks a button.

use offer_agent_model::ModelTool;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::Error;
use crate::conversation::{ChoiceOption, InteractiveChoice};

/// Name of the reserved tool.
pub const CHOICE_TOOL_NAME: &str = "present_choices";
const MARKER: &str = "awaiting_user_choice";

/// A button requested by the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChoiceInputOption {
    /// Short text shown on the button.
    pub label: String,
    /// Text sent back when the button is picked, defaults to the label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Input of the interactive choice tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChoiceInput {
    /// The question to ask the user.
    pub prompt: String,
    /// Two or more answers to pick from.
    pub options: Vec<ChoiceInputOption>,
}

pub(crate) fn definition() -> ModelTool {
    ModelTool {
        name: CHOICE_TOOL_NAME.to_owned(),
        description: "Asks the user to pick one of several options with \
            buttons. Use it when the offer can't continue without a decision \
            from the user. The conversation pauses until the user answers."
            .to_owned(),
        input_schema: schema_for!(ChoiceInput).to_value(),
    }
}

/// Answers an invocation of the choice tool with the marker payload.
pub(crate) fn respond(input: &Value) -> Result<String, Error> {
    let input: ChoiceInput = serde_json::from_value(input.clone())
        .map_err(|err| Error::invalid_input().with_reason(format!("{err}")))?;
    if input.options.is_empty() {
        return Err(Error::invalid_input().with_reason("`options` is empty"));
    }
    let mut payload = json!({
        "prompt": input.prompt,
        "options": input.options,
    });
    payload[MARKER] = Value::Bool(true);
    Ok(payload.to_string())
}

/// Detects the choice marker in a tool result payload.
///
/// A marked payload without options is not a usable choice.
pub(crate) fn detect(content: &str) -> Option<InteractiveChoice> {
    let value: Value = serde_json::from_str(content).ok()?;
    if value.get(MARKER).and_then(Value::as_bool) != Some(true) {
        return None;
    }
    let prompt = value
        .get("prompt")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let options = value
        .get("options")
        .cloned()
        .and_then(|options| {
            serde_json::from_value::<Vec<ChoiceInputOption>>(options).ok()
        })
        .unwrap_or_default()
        .into_iter()
        .map(|option| ChoiceOption {
            label: option.label,
            value: option.value,
        })
        .collect::<Vec<_>>();
    if options.is_empty() {
        return None;
    }
    Some(InteractiveChoice {
        prompt,
        options,
        selected: None,
    })
}
