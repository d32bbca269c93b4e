//! Tool call supports.

mod choice;
mod dispatcher;
mod error;
mod object;

use serde::de::DeserializeOwned;
use serde_json::Value;

pub use choice::{CHOICE_TOOL_NAME, ChoiceInput, ChoiceInputOption};
pub use dispatcher::{Dispatcher, ToolOutcome};
pub use error::{Error, ErrorKind};

/// The result of a tool call.
pub type ToolResult = Result<String, Error>;

/// A tool that can be called by the model.
///
/// Tools hold only immutable configuration, such as the webhook client of
/// the catalog. Anything the invocation needs is cloned into the returned
/// future, so invocations of one round run concurrently on their own tasks.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Executes the tool with the given input.
    ///
    /// Errors are reported back to the model as a failure envelope, they
    /// never abort the round. The future may be dropped midway when the
    /// run is cancelled.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static;
}
