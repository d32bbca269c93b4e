use std::pin::Pin;
use std::task::{Context, Poll, ready};

use offer_agent_model::{
    ContentBlock, ErrorKind, FinalizedTurn, ModelResponse, ModelResponseEvent,
    StopReason,
};
use pin_project_lite::pin_project;
use serde_json::Value;

use crate::Error;
use crate::io::Sse;
use crate::proto::{BlockDelta, StartBlock, StreamEvent};

/// A content block being reconstructed from its start event and deltas.
///
/// Blocks are tracked by the index the endpoint assigns them, which makes
/// this reconstruction immune to how the stream is chunked.
#[derive(Debug)]
enum PartialBlock {
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    RedactedThinking(String),
    Text(String),
    ToolUse {
        id: String,
        name: String,
        initial_input: Value,
        input_json: String,
    },
    Ignored,
}

impl PartialBlock {
    fn finish(self) -> Result<Option<ContentBlock>, Error> {
        let block = match self {
            PartialBlock::Thinking {
                thinking,
                signature,
            } => ContentBlock::Thinking {
                thinking,
                signature,
            },
            PartialBlock::RedactedThinking(data) => {
                ContentBlock::RedactedThinking { data }
            }
            PartialBlock::Text(text) => ContentBlock::Text { text },
            PartialBlock::ToolUse {
                id,
                name,
                initial_input,
                input_json,
            } => {
                let input = if input_json.trim().is_empty() {
                    initial_input
                } else {
                    serde_json::from_str(&input_json).map_err(|err| {
                        Error::new(
                            format!("malformed input for tool `{name}`: {err}"),
                            ErrorKind::Other,
                        )
                    })?
                };
                ContentBlock::ToolUse { id, name, input }
            }
            PartialBlock::Ignored => return Ok(None),
        };
        Ok(Some(block))
    }
}

struct PartialState {
    sse: Sse,
    id: Option<String>,
    blocks: Vec<PartialBlock>,
    stop_reason: Option<StopReason>,
    // Set once `message_stop` arrives. A stream that ends without it was
    // cut off and has no finalized turn.
    completed: bool,
}

impl PartialState {
    fn block_mut(&mut self, index: usize) -> Option<&mut PartialBlock> {
        self.blocks.get_mut(index)
    }

    fn start_block(&mut self, index: usize, block: PartialBlock) {
        while self.blocks.len() < index {
            self.blocks.push(PartialBlock::Ignored);
        }
        if index < self.blocks.len() {
            self.blocks[index] = block;
        } else {
            self.blocks.push(block);
        }
    }

    fn finish(self) -> Option<FinalizedTurn> {
        if !self.completed {
            warn!("stream ended before `message_stop`");
            return None;
        }
        let id = self.id?;
        let mut content = Vec::with_capacity(self.blocks.len());
        for block in self.blocks {
            match block.finish() {
                Ok(Some(block)) => content.push(block),
                Ok(None) => {}
                Err(err) => {
                    error!("cannot finalize message {id}: {err}");
                    return None;
                }
            }
        }
        Some(FinalizedTurn {
            id,
            content,
            stop_reason: self.stop_reason,
        })
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct AnthropicResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
        finalized: Option<FinalizedTurn>,
    }
}

impl AnthropicResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            blocks: Vec::new(),
            stop_reason: None,
            completed: false,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
            finalized: None,
        }
    }
}

impl ModelResponse for AnthropicResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, partial_state)) => {
                    *this.next_event_fut = None;
                    *this.finalized = partial_state.finish();
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }

    fn finalized_turn(&self) -> Option<FinalizedTurn> {
        self.finalized.clone()
    }
}

async fn next_event(
    mut partial_state: PartialState,
) -> Result<(Option<ModelResponseEvent>, PartialState), Error> {
    loop {
        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => return Ok((None, partial_state)),
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {:?}", sse_event.event);

        let stream_event = serde_json::from_str::<StreamEvent>(&sse_event.data)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;

        let event = match stream_event {
            StreamEvent::MessageStart { message } => {
                partial_state.id = Some(message.id);
                None
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                StartBlock::Thinking { thinking } => {
                    let event = (!thinking.is_empty())
                        .then(|| ModelResponseEvent::ThinkingDelta(thinking.clone()));
                    partial_state.start_block(
                        index,
                        PartialBlock::Thinking {
                            thinking,
                            signature: None,
                        },
                    );
                    event
                }
                StartBlock::RedactedThinking { data } => {
                    partial_state
                        .start_block(index, PartialBlock::RedactedThinking(data));
                    None
                }
                StartBlock::Text { text } => {
                    let event = (!text.is_empty())
                        .then(|| ModelResponseEvent::TextDelta(text.clone()));
                    partial_state.start_block(index, PartialBlock::Text(text));
                    event
                }
                StartBlock::ToolUse { id, name, input } => {
                    partial_state.start_block(
                        index,
                        PartialBlock::ToolUse {
                            id: id.clone(),
                            name: name.clone(),
                            initial_input: input,
                            input_json: String::new(),
                        },
                    );
                    Some(ModelResponseEvent::ToolUseStart { id, name })
                }
                StartBlock::Unknown => {
                    debug!("ignoring unsupported content block at {index}");
                    partial_state.start_block(index, PartialBlock::Ignored);
                    None
                }
            },
            StreamEvent::ContentBlockDelta { index, delta } => {
                let Some(block) = partial_state.block_mut(index) else {
                    return Err(Error::new(
                        format!("delta for unknown block {index}"),
                        ErrorKind::Other,
                    ));
                };
                apply_delta(block, delta)
            }
            StreamEvent::ContentBlockStop { .. } => {
                Some(ModelResponseEvent::BlockStop)
            }
            StreamEvent::MessageDelta { delta } => {
                if let Some(reason) = delta.stop_reason {
                    partial_state.stop_reason =
                        Some(StopReason::from_wire(&reason));
                }
                None
            }
            StreamEvent::MessageStop => {
                partial_state.completed = true;
                return Ok((None, partial_state));
            }
            StreamEvent::Ping | StreamEvent::Unknown => None,
            StreamEvent::Error { error } => {
                return Err(Error::from_api_error(&error.r#type, &error.message));
            }
        };

        if let Some(event) = event {
            return Ok((Some(event), partial_state));
        }
    }
}

fn apply_delta(
    block: &mut PartialBlock,
    delta: BlockDelta,
) -> Option<ModelResponseEvent> {
    match (block, delta) {
        (
            PartialBlock::Thinking { thinking, .. },
            BlockDelta::ThinkingDelta { thinking: delta },
        ) => {
            thinking.push_str(&delta);
            Some(ModelResponseEvent::ThinkingDelta(delta))
        }
        (
            PartialBlock::Thinking { signature, .. },
            BlockDelta::SignatureDelta { signature: delta },
        ) => {
            signature.get_or_insert_default().push_str(&delta);
            None
        }
        (PartialBlock::Text(text), BlockDelta::TextDelta { text: delta }) => {
            text.push_str(&delta);
            Some(ModelResponseEvent::TextDelta(delta))
        }
        (
            PartialBlock::ToolUse { input_json, .. },
            BlockDelta::InputJsonDelta { partial_json },
        ) => {
            input_json.push_str(&partial_json);
            Some(ModelResponseEvent::ToolInputDelta(partial_json))
        }
        (block, delta) => {
            debug!("ignoring delta {delta:?} for block {block:?}");
            None
        }
    }
}
