use std::future::ready;
use std::pin::Pin;
use std::sync::Arc;

use offer_agent_model::ModelTool;
use serde_json::Value;
use tracing::Instrument;

use super::{Error, Tool, ToolResult};

type BoxedToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// The object-safe face of a [`Tool`], stored by the dispatcher.
pub(crate) trait ToolObject: Send + Sync + 'static {
    fn definition(&self) -> ModelTool;

    /// Decodes the raw input and starts the invocation. The returned
    /// future doesn't borrow the tool, so it can be spawned.
    fn execute(self: Arc<Self>, input: Value) -> BoxedToolFuture;
}

pub(crate) struct ToolObjectImpl<T: Tool>(pub T);

impl<T: Tool> ToolObject for ToolObjectImpl<T> {
    fn definition(&self) -> ModelTool {
        ModelTool {
            name: self.0.name().to_owned(),
            description: self.0.description().to_owned(),
            input_schema: self.0.parameter_schema().clone(),
        }
    }

    fn execute(self: Arc<Self>, input: Value) -> BoxedToolFuture {
        let name = self.0.name();
        let input: T::Input = match serde_json::from_value(input) {
            Ok(input) => input,
            Err(err) => {
                debug!("rejected input of `{name}`: {err}");
                let err = Error::invalid_input().with_reason(err.to_string());
                return Box::pin(ready(Err(err)));
            }
        };

        let span = debug_span!("tool execute", name);
        Box::pin(self.0.execute(input).instrument(span))
    }
}
