//! A local fake model for testing purpose.

mod preset;

use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use offer_agent_model::{
    ContentBlock, ErrorKind, FinalizedTurn, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, StopReason, ToolUse,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    #[allow(dead_code)]
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

enum Step {
    Emit(ModelResponseEvent),
    Fail,
    Hang,
    Disconnect,
}

/// Expands preset events into stream steps and the content blocks of the
/// finalized turn.
fn compile(events: &[PresetEvent]) -> (Vec<Step>, Vec<ContentBlock>) {
    let mut steps = Vec::new();
    let mut content: Vec<ContentBlock> = Vec::new();
    // Whether the last content block is still open for deltas.
    let mut open = false;

    let close = |steps: &mut Vec<Step>, open: &mut bool| {
        if *open {
            steps.push(Step::Emit(ModelResponseEvent::BlockStop));
            *open = false;
        }
    };

    for event in events {
        match event {
            PresetEvent::Thinking(delta) => {
                match content.last_mut() {
                    Some(ContentBlock::Thinking { thinking, .. }) if open => {
                        thinking.push_str(delta);
                    }
                    _ => {
                        close(&mut steps, &mut open);
                        content.push(ContentBlock::Thinking {
                            thinking: delta.clone(),
                            signature: Some("test-signature".to_owned()),
                        });
                        open = true;
                    }
                }
                steps.push(Step::Emit(ModelResponseEvent::ThinkingDelta(
                    delta.clone(),
                )));
            }
            PresetEvent::Text(delta) => {
                match content.last_mut() {
                    Some(ContentBlock::Text { text }) if open => {
                        text.push_str(delta);
                    }
                    _ => {
                        close(&mut steps, &mut open);
                        content.push(ContentBlock::Text {
                            text: delta.clone(),
                        });
                        open = true;
                    }
                }
                steps.push(Step::Emit(ModelResponseEvent::TextDelta(
                    delta.clone(),
                )));
            }
            PresetEvent::ToolUse(tool_use)
            | PresetEvent::GarbledToolUse(tool_use) => {
                close(&mut steps, &mut open);
                let ToolUse { id, name, input } = tool_use.clone();
                steps.push(Step::Emit(ModelResponseEvent::ToolUseStart {
                    id: id.clone(),
                    name: name.clone(),
                }));
                let raw = if matches!(event, PresetEvent::GarbledToolUse(_)) {
                    let mut raw = input.to_string();
                    raw.truncate(raw.len() / 2);
                    raw
                } else {
                    input.to_string()
                };
                for fragment in split_fragments(&raw) {
                    steps.push(Step::Emit(ModelResponseEvent::ToolInputDelta(
                        fragment,
                    )));
                }
                steps.push(Step::Emit(ModelResponseEvent::BlockStop));
                content.push(ContentBlock::ToolUse { id, name, input });
            }
            PresetEvent::Fail => {
                close(&mut steps, &mut open);
                steps.push(Step::Fail);
            }
            PresetEvent::Hang => steps.push(Step::Hang),
            PresetEvent::Disconnect => steps.push(Step::Disconnect),
        }
    }
    close(&mut steps, &mut open);
    (steps, content)
}

/// Splits raw tool input in a few fragments, like network chunking does.
fn split_fragments(raw: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    for (idx, ch) in raw.chars().enumerate() {
        current.push(ch);
        if idx % 7 == 6 {
            fragments.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        fragments.push(current);
    }
    fragments
}

pub struct TestModelResponse {
    steps: Vec<Step>,
    content: Vec<ContentBlock>,
    step_idx: usize,
    response_id: String,
    delay: Duration,
    finished: bool,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };

        if let Some(sleep) = &mut this.sleep {
            let sleep = sleep.as_mut();
            ready!(sleep.poll(cx));
            this.sleep = None;

            let Some(step) = this.steps.get(this.step_idx) else {
                // In case this method is called after completion.
                if this.step_idx == this.steps.len() {
                    this.step_idx += 1;
                    this.finished = true;
                }
                return Poll::Ready(Ok(None));
            };
            match step {
                Step::Emit(event) => {
                    this.step_idx += 1;
                    return Poll::Ready(Ok(Some(event.clone())));
                }
                Step::Fail => {
                    this.step_idx = usize::MAX;
                    return Poll::Ready(Err(Error {
                        message: "stream failed",
                        kind: ErrorKind::Other,
                    }));
                }
                Step::Hang => return Poll::Pending,
                Step::Disconnect => {
                    this.step_idx = usize::MAX;
                    return Poll::Ready(Ok(None));
                }
            }
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }

    fn finalized_turn(&self) -> Option<FinalizedTurn> {
        if !self.finished {
            return None;
        }
        let has_tool_use = self
            .content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse { .. }));
        Some(FinalizedTurn {
            id: self.response_id.clone(),
            content: self.content.clone(),
            stop_reason: Some(if has_tool_use {
                StopReason::ToolUse
            } else {
                StopReason::EndTurn
            }),
        })
    }
}

#[derive(Clone)]
enum ConversationStep {
    UserInput,
    AssistantResponse(PresetResponse, Arc<AtomicU64>),
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the conversation script, which
/// is how the model should respond to a request. The added steps will be
/// selected according to the number of messages in your request, so a tool
/// result turn takes a user input step. If there are no enough steps in the
/// script, an error will be returned.
///
/// Clones share the recorded requests and failure counters.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    conversation_script: Vec<ConversationStep>,
    delay: Option<Duration>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_assistant_response_step(&mut self, preset: PresetResponse) {
        self.conversation_script.push(ConversationStep::AssistantResponse(
            preset,
            Arc::new(AtomicU64::new(0)),
        ));
    }

    #[inline]
    pub fn add_user_input_step(&mut self) {
        self.conversation_script.push(ConversationStep::UserInput);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns every request sent to this provider, in order.
    pub fn recorded_requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn open_response(
        &self,
        req: &ModelRequest,
    ) -> Result<TestModelResponse, Error> {
        let step_idx = req.messages.len();
        let Some(step) = self.conversation_script.get(step_idx) else {
            return Err(Error {
                message: "no enough steps",
                kind: ErrorKind::Other,
            });
        };
        let (preset, attempts) = match step {
            ConversationStep::UserInput => {
                return Err(Error {
                    message: "not an assistant response step",
                    kind: ErrorKind::Moderated,
                });
            }
            ConversationStep::AssistantResponse(preset, attempts) => {
                (preset, attempts)
            }
        };

        let attempt = attempts.fetch_add(1, Ordering::SeqCst);
        match preset.failures {
            Some(0) => {
                return Err(Error {
                    message: "always failing",
                    kind: ErrorKind::RateLimitExceeded,
                });
            }
            Some(failures) if attempt < failures => {
                return Err(Error {
                    message: "failing before success",
                    kind: ErrorKind::RateLimitExceeded,
                });
            }
            _ => {}
        }

        let (steps, content) = compile(&preset.events);
        Ok(TestModelResponse {
            steps,
            content,
            step_idx: 0,
            response_id: format!("msg:{step_idx}"),
            delay: self.delay.unwrap_or(Duration::from_millis(1)),
            finished: false,
            sleep: None,
        })
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(req.clone());
        }
        ready(self.open_response(req))
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use offer_agent_model::{ModelMessage, ModelRequest, ModelTool};
    use serde_json::json;

    use super::*;

    async fn collect_response(
        resp: TestModelResponse,
    ) -> (Vec<ModelResponseEvent>, Option<FinalizedTurn>) {
        let mut resp = pin!(resp);
        let mut events = vec![];
        while let Some(event) = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap()
        {
            events.push(event);
        }
        (events, resp.finalized_turn())
    }

    fn request(messages: Vec<ModelMessage>) -> ModelRequest {
        ModelRequest {
            system: None,
            messages,
            tools: vec![ModelTool {
                name: "search_equipment".to_owned(),
                description: "Searches the catalog".to_owned(),
                input_schema: json!({ "type": "object" }),
            }],
            max_tokens: 1024,
            thinking_budget: None,
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut provider = TestModelProvider::default();
        provider.add_user_input_step();
        provider.add_assistant_response_step(PresetResponse::with_events([
            PresetEvent::Thinking("Need the catalog.".to_owned()),
            PresetEvent::Text("Sure, ".to_owned()),
            PresetEvent::Text("let me look.".to_owned()),
            PresetEvent::ToolUse(ToolUse {
                id: "t1".to_owned(),
                name: "search_equipment".to_owned(),
                input: json!({ "query": "HNVN10" }),
            }),
        ]));

        let req = request(vec![ModelMessage::user_text("Hi")]);
        let resp = provider.send_request(&req).await.unwrap();
        let (events, turn) = collect_response(resp).await;

        let input: String = events
            .iter()
            .filter_map(|e| match e {
                ModelResponseEvent::ToolInputDelta(d) => Some(d.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&input).unwrap(),
            json!({ "query": "HNVN10" })
        );
        let block_stops = events
            .iter()
            .filter(|e| **e == ModelResponseEvent::BlockStop)
            .count();
        assert_eq!(block_stops, 3);

        let turn = turn.unwrap();
        assert_eq!(turn.text(), "Sure, let me look.");
        assert_eq!(turn.thinking(), "Need the catalog.");
        assert_eq!(turn.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(turn.tool_uses().len(), 1);
        assert_eq!(provider.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_garbled_tool_use_keeps_real_input() {
        let mut provider = TestModelProvider::default();
        provider.add_user_input_step();
        provider.add_assistant_response_step(PresetResponse::with_events([
            PresetEvent::GarbledToolUse(ToolUse {
                id: "t1".to_owned(),
                name: "search_equipment".to_owned(),
                input: json!({ "query": "HNVN10" }),
            }),
        ]));

        let req = request(vec![ModelMessage::user_text("Hi")]);
        let resp = provider.send_request(&req).await.unwrap();
        let (events, turn) = collect_response(resp).await;
        let input: String = events
            .iter()
            .filter_map(|e| match e {
                ModelResponseEvent::ToolInputDelta(d) => Some(d.as_str()),
                _ => None,
            })
            .collect();
        assert!(serde_json::from_str::<serde_json::Value>(&input).is_err());
        assert_eq!(
            turn.unwrap().tool_uses()[0].input,
            json!({ "query": "HNVN10" })
        );
    }

    #[tokio::test]
    async fn test_failures_and_disconnect() {
        let mut provider = TestModelProvider::default();
        provider.add_user_input_step();
        provider.add_assistant_response_step(
            PresetResponse::with_events([
                PresetEvent::Text("Hel".to_owned()),
                PresetEvent::Disconnect,
            ])
            .with_failures(1),
        );

        let req = request(vec![ModelMessage::user_text("Hi")]);
        let err = provider.send_request(&req).await.err().unwrap();
        assert!(err.is_transient());

        let resp = provider.send_request(&req).await.unwrap();
        let (events, turn) = collect_response(resp).await;
        assert_eq!(events[0], ModelResponseEvent::TextDelta("Hel".to_owned()));
        assert!(turn.is_none());
        assert_eq!(provider.recorded_requests().len(), 2);
    }
}
