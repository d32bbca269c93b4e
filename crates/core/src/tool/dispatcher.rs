use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use offer_agent_model::{ContentBlock, ModelTool, ToolUse};
use serde_json::Value;
use tokio_util::task::AbortOnDropHandle;

use super::object::{ToolObject, ToolObjectImpl};
use super::{CHOICE_TOOL_NAME, Error, Tool, choice};
use crate::conversation::InteractiveChoice;
use crate::transcript::TranscriptEntry;

/// The settled result of one tool invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    /// Identifier of the invocation.
    pub id: String,
    /// Name of the tool.
    pub name: String,
    /// Input of the invocation.
    pub input: Value,
    /// The result payload, a failure envelope if `is_error` is set.
    pub content: String,
    /// Whether the invocation failed.
    pub is_error: bool,
}

impl ToolOutcome {
    fn success(tool_use: &ToolUse, content: String) -> Self {
        Self {
            id: tool_use.id.clone(),
            name: tool_use.name.clone(),
            input: tool_use.input.clone(),
            content,
            is_error: false,
        }
    }

    fn failure(tool_use: &ToolUse, err: &Error) -> Self {
        warn!("tool `{}` ({}) failed: {err}", tool_use.name, tool_use.id);
        Self {
            id: tool_use.id.clone(),
            name: tool_use.name.clone(),
            input: tool_use.input.clone(),
            content: err.to_envelope(&tool_use.name),
            is_error: true,
        }
    }

    /// Returns the interactive choice if this is a successful invocation of
    /// the reserved choice tool.
    ///
    /// Results of other tools never pause the loop, whatever they contain.
    #[inline]
    pub fn interactive_choice(&self) -> Option<InteractiveChoice> {
        if self.is_error || !self.is_choice_tool() {
            return None;
        }
        choice::detect(&self.content)
    }

    /// Returns `true` if this is an invocation of the reserved choice tool.
    #[inline]
    pub fn is_choice_tool(&self) -> bool {
        self.name == CHOICE_TOOL_NAME
    }

    /// Converts this outcome to a result block for the next request.
    #[inline]
    pub fn to_result_block(&self) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: self.id.clone(),
            content: self.content.clone(),
            is_error: self.is_error,
        }
    }

    /// Renders this outcome for the display transcript.
    #[inline]
    pub fn to_transcript_entry(&self) -> TranscriptEntry {
        TranscriptEntry {
            name: self.name.clone(),
            input: self.input.clone(),
            result: Some(self.content.clone()),
        }
    }
}

/// An object that manages the toolset and executes invocations from the
/// model.
#[derive(Default)]
pub struct Dispatcher {
    tools: HashMap<String, Arc<dyn ToolObject>>,
}

impl Dispatcher {
    /// Registers a tool. A tool with the same name is replaced.
    pub fn add_tool<T: Tool>(&mut self, tool: T) {
        let name = tool.name().to_owned();
        if name == CHOICE_TOOL_NAME {
            warn!("`{name}` is reserved, ignoring the tool");
            return;
        }
        self.tools.insert(name, Arc::new(ToolObjectImpl(tool)));
    }

    /// Returns the definitions of every tool, the reserved choice tool
    /// included, ordered by name.
    pub fn definitions(&self) -> Vec<ModelTool> {
        let mut definitions: Vec<ModelTool> = self
            .tools
            .values()
            .map(|tool| tool.definition())
            .chain(std::iter::once(choice::definition()))
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Executes every invocation concurrently and waits for all of them.
    ///
    /// One outcome is returned per invocation, in the same order. Failures
    /// of any sort, panics included, become failure envelopes.
    ///
    /// Dropping the returned future aborts every invocation still running.
    pub async fn dispatch(&self, tool_uses: &[ToolUse]) -> Vec<ToolOutcome> {
        let span = debug_span!("tool dispatch", count = tool_uses.len());
        let handles: Vec<_> = span.in_scope(|| {
            tool_uses
                .iter()
                .map(|tool_use| {
                    // The reserved tool and unknown tools are answered
                    // without spawning.
                    let tool = self.tools.get(&tool_use.name)?;
                    trace!(
                        "spawning a tool ({}) with args: {:?}",
                        tool_use.id, tool_use.input
                    );
                    let fut = Arc::clone(tool).execute(tool_use.input.clone());
                    Some(AbortOnDropHandle::new(tokio::spawn(fut)))
                })
                .collect()
        });

        let results = join_all(handles.into_iter().map(|handle| async move {
            match handle {
                Some(handle) => Some(handle.await),
                None => None,
            }
        }))
        .await;

        tool_uses
            .iter()
            .zip(results)
            .map(|(tool_use, result)| match result {
                Some(Ok(Ok(content))) => ToolOutcome::success(tool_use, content),
                Some(Ok(Err(err))) => ToolOutcome::failure(tool_use, &err),
                Some(Err(join_err)) => {
                    let err = Error::execution_error()
                        .with_reason(format!("tool crashed: {join_err}"));
                    ToolOutcome::failure(tool_use, &err)
                }
                None if tool_use.name == CHOICE_TOOL_NAME => {
                    match choice::respond(&tool_use.input) {
                        Ok(content) => ToolOutcome::success(tool_use, content),
                        Err(err) => ToolOutcome::failure(tool_use, &err),
                    }
                }
                None => {
                    let err = Error::invalid_input().with_reason(format!(
                        "unknown tool `{}`",
                        tool_use.name
                    ));
                    ToolOutcome::failure(tool_use, &err)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::tool::ToolResult;

    static EMPTY_SCHEMA: &Value = &Value::Null;

    #[derive(Deserialize)]
    struct EchoInput {
        text: String,
        #[serde(default)]
        delay_ms: u64,
    }

    struct EchoTool;

    impl Tool for EchoTool {
        type Input = EchoInput;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the text"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        #[allow(clippy::manual_async_fn)]
        fn execute(
            &self,
            input: EchoInput,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            async move {
                tokio::time::sleep(Duration::from_millis(input.delay_ms)).await;
                Ok(input.text)
            }
        }
    }

    struct FailingTool;

    impl Tool for FailingTool {
        type Input = Value;

        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            _input: Value,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Err(Error::network().with_reason("connection refused")))
        }
    }

    struct FlagTool {
        finished: Arc<AtomicBool>,
    }

    impl Tool for FlagTool {
        type Input = Value;

        fn name(&self) -> &str {
            "flag"
        }

        fn description(&self) -> &str {
            "Sets a flag after a while"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        #[allow(clippy::manual_async_fn)]
        fn execute(
            &self,
            _input: Value,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            let finished = Arc::clone(&self.finished);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                finished.store(true, Ordering::SeqCst);
                Ok("done".to_owned())
            }
        }
    }

    struct PanickingTool;

    impl Tool for PanickingTool {
        type Input = Value;

        fn name(&self) -> &str {
            "panicking"
        }

        fn description(&self) -> &str {
            "Panics"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        #[allow(clippy::manual_async_fn)]
        fn execute(
            &self,
            _input: Value,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            async move { panic!("boom") }
        }
    }

    fn tool_use(id: &str, name: &str, input: Value) -> ToolUse {
        ToolUse {
            id: id.to_owned(),
            name: name.to_owned(),
            input,
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut dispatcher = Dispatcher::default();
        dispatcher.add_tool(EchoTool);
        dispatcher.add_tool(FailingTool);
        dispatcher.add_tool(PanickingTool);
        dispatcher
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let uses = vec![
            tool_use("t1", "echo", json!({ "text": "slow", "delay_ms": 20 })),
            tool_use("t2", "failing", json!({})),
            tool_use("t3", "panicking", json!({})),
            tool_use("t4", "echo", json!({ "wrong": true })),
            tool_use("t5", "missing", json!({})),
            tool_use("t6", "echo", json!({ "text": "fast" })),
        ];
        let outcomes = dispatcher().dispatch(&uses).await;

        assert_eq!(outcomes.len(), uses.len());
        let ids: Vec<&str> = outcomes.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3", "t4", "t5", "t6"]);

        assert_eq!(outcomes[0].content, "slow");
        assert!(!outcomes[0].is_error);
        assert_eq!(outcomes[5].content, "fast");
        for outcome in &outcomes[1..5] {
            assert!(outcome.is_error);
            let envelope: Value = serde_json::from_str(&outcome.content).unwrap();
            assert_eq!(envelope["success"], json!(false));
            assert_eq!(envelope["tool_name"], json!(outcome.name));
            assert!(envelope["error"].is_string());
        }
        assert_eq!(
            serde_json::from_str::<Value>(&outcomes[1].content).unwrap()["error"],
            json!("connection refused")
        );
    }

    #[tokio::test]
    async fn test_choice_is_answered_locally() {
        let uses = vec![tool_use(
            "t1",
            CHOICE_TOOL_NAME,
            json!({ "prompt": "Material?", "options": [{ "label": "Plastic" }] }),
        )];
        let outcomes = dispatcher().dispatch(&uses).await;
        assert!(outcomes[0].is_choice_tool());
        let choice = outcomes[0].interactive_choice().unwrap();
        assert_eq!(choice.prompt, "Material?");
    }

    #[tokio::test]
    async fn test_dropped_dispatch_aborts_tools() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut dispatcher = Dispatcher::default();
        dispatcher.add_tool(FlagTool {
            finished: Arc::clone(&finished),
        });
        let uses = vec![tool_use("t1", "flag", json!({}))];

        let mut dispatch = Box::pin(dispatcher.dispatch(&uses));
        // Start the invocation, then give up on it.
        assert!(
            tokio::time::timeout(Duration::from_millis(10), &mut dispatch)
                .await
                .is_err()
        );
        drop(dispatch);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_choice_marker_needs_the_choice_tool() {
        let marker = json!({
            "awaiting_user_choice": true,
            "prompt": "Material?",
            "options": [{ "label": "Plastic" }]
        });
        let uses = vec![tool_use("t1", "echo", json!({ "text": marker.to_string() }))];
        let outcomes = dispatcher().dispatch(&uses).await;
        assert!(!outcomes[0].is_error);
        assert!(outcomes[0].interactive_choice().is_none());
    }

    #[test]
    fn test_definitions() {
        let mut dispatcher = dispatcher();
        dispatcher.add_tool(ReservedTool);
        let names: Vec<String> =
            dispatcher.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["echo", "failing", "panicking", CHOICE_TOOL_NAME]);
    }

    struct ReservedTool;

    impl Tool for ReservedTool {
        type Input = Value;

        fn name(&self) -> &str {
            CHOICE_TOOL_NAME
        }

        fn description(&self) -> &str {
            "Shadows the reserved tool"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            _input: Value,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Ok(String::new()))
        }
    }
}
