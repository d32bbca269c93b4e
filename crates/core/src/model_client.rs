use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use offer_agent_model::{
    FinalizedTurn, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent,
};
use tracing::Instrument;

use crate::Error;

type SendRequestResult = Result<FinalizedTurn, Error>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type OnEvent = Box<dyn FnMut(&ModelResponseEvent) + Send + 'static>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, Duration, OnEvent) -> BoxedSendRequestFuture
        + Send + Sync
>;

const OPEN_RETRY_INITIAL_INTERVAL: Duration = Duration::from_millis(200);

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    open_retry_max_elapsed: Duration,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let provider = Arc::new(provider);
        let handler_fn: HandlerFn =
            Arc::new(move |req, open_retry_max_elapsed, on_event| {
                let provider = Arc::clone(&provider);
                Box::pin(
                    async move {
                        trace!("got a request: {:?}", req);
                        let resp_or_err =
                            open_response(&*provider, &req, open_retry_max_elapsed)
                                .await;
                        handle_response::<P>(resp_or_err, on_event).await
                    }
                    .instrument(trace_span!("model client req")),
                )
            });
        Self {
            handler_fn,
            open_retry_max_elapsed: Duration::ZERO,
        }
    }

    /// Sets how long a rate-limited stream open is retried.
    #[inline]
    pub fn set_open_retry_max_elapsed(&mut self, duration: Duration) {
        self.open_retry_max_elapsed = duration;
    }

    /// Sends a request and waits for the finalized turn.
    ///
    /// Every streamed event is passed to `on_event` before the next one is
    /// polled. Only the stream open is retried, a stream that failed midway
    /// is never sent again.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_event: impl FnMut(&ModelResponseEvent) + Send + 'static,
    ) -> Result<FinalizedTurn, Error> {
        (self.handler_fn)(req, self.open_retry_max_elapsed, Box::new(on_event))
            .await
    }
}

async fn open_response<P: ModelProvider>(
    provider: &P,
    req: &ModelRequest,
    max_elapsed: Duration,
) -> Result<P::Response, P::Error> {
    if max_elapsed.is_zero() {
        return provider.send_request(req).await;
    }

    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(OPEN_RETRY_INITIAL_INTERVAL)
        .with_max_elapsed_time(Some(max_elapsed))
        .build();
    backoff::future::retry_notify(
        policy,
        || {
            let fut = provider.send_request(req);
            async move {
                fut.await.map_err(|err| {
                    if err.is_transient() {
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
            }
        },
        |err: P::Error, after: Duration| {
            warn!("failed to open the response ({err}), retrying in {after:?}");
        },
    )
    .await
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    mut on_event: OnEvent,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(Error::Model(Box::new(err)));
        }
    };

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(Error::Model(Box::new(err)));
            }
        };

        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");
        on_event(&event);
    }

    trace!("finished a request");

    // The finalized turn is the only thing trusted for control flow.
    pinned_resp.finalized_turn().ok_or_else(|| {
        error!("the response ended without a complete message");
        Error::IncompleteResponse
    })
}
