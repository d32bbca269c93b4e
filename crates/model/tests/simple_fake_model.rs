use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::task::{self, Poll, ready};
use std::time::Duration;

use offer_agent_model::{
    ContentBlock, ErrorKind, FinalizedTurn, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
    StopReason,
};
use tokio::time::{Sleep, sleep};

#[derive(Debug)]
struct FakeModelProviderError(ErrorKind);

impl Display for FakeModelProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Error for FakeModelProviderError {}

impl ModelProviderError for FakeModelProviderError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

#[derive(Debug)]
struct FakeModelResponse {
    fake_items: VecDeque<String>,
    emitted: String,
    done: bool,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl FakeModelResponse {
    fn new(input: &str) -> Self {
        let text = format!("You said {}", input);
        let mut fake_items: VecDeque<String> =
            text.split(' ').map(ToString::to_string).collect();
        let count = fake_items.len();
        for (idx, item) in fake_items.iter_mut().enumerate() {
            if idx + 1 < count {
                item.push(' ');
            }
        }
        Self {
            fake_items,
            emitted: String::new(),
            done: false,
            sleep: None,
        }
    }
}

impl ModelResponse for FakeModelResponse {
    type Error = FakeModelProviderError;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };
        if let Some(sleep) = &mut this.sleep {
            let sleep = sleep.as_mut();
            ready!(sleep.poll(cx));
            this.sleep = None;

            if let Some(item) = this.fake_items.pop_front() {
                this.emitted.push_str(&item);
                return Poll::Ready(Ok(Some(ModelResponseEvent::TextDelta(
                    item,
                ))));
            }
            if !this.done {
                this.done = true;
                return Poll::Ready(Ok(Some(ModelResponseEvent::BlockStop)));
            }

            return Poll::Ready(Ok(None));
        }
        this.sleep = Some(Box::pin(sleep(Duration::from_millis(1))));
        Pin::new(this).poll_next_event(cx)
    }

    fn finalized_turn(&self) -> Option<FinalizedTurn> {
        if !self.done {
            return None;
        }
        Some(FinalizedTurn {
            id: "msg_fake".to_owned(),
            content: vec![ContentBlock::Text {
                text: self.emitted.clone(),
            }],
            stop_reason: Some(StopReason::EndTurn),
        })
    }
}

struct FakeModelProvider;

impl ModelProvider for FakeModelProvider {
    type Error = FakeModelProviderError;
    type Response = FakeModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let result = 'blk: {
            let Some(first) = req.messages.first() else {
                break 'blk Err(FakeModelProviderError(ErrorKind::Other));
            };
            Ok(FakeModelResponse::new(&first.text()))
        };
        ready(result)
    }
}

fn request_with(messages: Vec<ModelMessage>) -> ModelRequest {
    ModelRequest {
        system: None,
        messages,
        tools: vec![],
        max_tokens: 1024,
        thinking_budget: None,
    }
}

mod tests {
    use std::future::poll_fn;

    use super::*;

    #[tokio::test]
    async fn test_completion() {
        let provider = FakeModelProvider;
        let req = request_with(vec![ModelMessage::user_text("Good morning")]);
        let mut resp = provider.send_request(&req).await.unwrap();

        assert!(resp.finalized_turn().is_none());

        let mut resp_message = String::new();
        loop {
            let resp_fut =
                poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx));
            match resp_fut.await {
                Ok(Some(event)) => match event {
                    ModelResponseEvent::TextDelta(delta) => {
                        resp_message.push_str(&delta);
                    }
                    ModelResponseEvent::BlockStop => {}
                    _ => unreachable!("unexpected event: {event:?}"),
                },
                Ok(None) => break,
                Err(err) => unreachable!("unexpected error: {err:?}"),
            }
        }

        assert_eq!(resp_message, "You said Good morning");
        let turn = resp.finalized_turn().unwrap();
        assert_eq!(turn.text(), resp_message);
        assert!(turn.tool_uses().is_empty());
    }

    #[tokio::test]
    async fn test_error() {
        let provider = FakeModelProvider;
        let req = request_with(vec![]);
        let result = provider.send_request(&req).await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(!err.is_transient());
    }
}
