use std::sync::{Arc, Mutex};

use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use crate::cancel::CancelToken;
use crate::conversation::Message;
use crate::error::Error;
use crate::orchestrator::{LoopOutcome, Orchestrator};

type OnIdle = Box<dyn Fn() + Send + Sync>;
type OnOutcome = Box<dyn Fn(Result<LoopOutcome, Error>) + Send + Sync>;

#[derive(Debug)]
enum Command {
    SendMessage(Message),
    RespondToChoice {
        message_id: String,
        option_index: usize,
    },
}

/// A worker that owns the runs of one conversation.
///
/// Inputs are handled one at a time in the order they were sent. An input
/// arriving while a run is active waits in the queue, so no two runs of
/// the conversation ever overlap.
///
/// Dropping the session cancels the active run and discards the queue.
pub struct Session {
    conversation_id: String,
    cmd_tx: mpsc::UnboundedSender<(Command, CancelToken)>,
    cancel: Mutex<CancelToken>,
    kill_tx: watch::Sender<bool>,
}

impl Session {
    /// Creates a builder for a session of the given conversation.
    #[inline]
    pub fn builder<S: Into<String>>(
        orchestrator: Arc<Orchestrator>,
        conversation_id: S,
    ) -> SessionBuilder {
        SessionBuilder {
            orchestrator,
            conversation_id: conversation_id.into(),
            on_idle: None,
            on_outcome: None,
        }
    }

    /// Returns the identifier of the conversation.
    #[inline]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Enqueues a user message.
    pub fn send_message<S: Into<String>>(&self, text: S) {
        self.enqueue(Command::SendMessage(Message::user(text)));
    }

    /// Enqueues the answer to an interactive choice.
    pub fn respond_to_choice<S: Into<String>>(
        &self,
        message_id: S,
        option_index: usize,
    ) {
        self.enqueue(Command::RespondToChoice {
            message_id: message_id.into(),
            option_index,
        });
    }

    /// Cancels the active run and every input queued so far.
    ///
    /// Inputs sent after this call are not affected.
    pub fn cancel(&self) {
        let mut cancel = match self.cancel.lock() {
            Ok(cancel) => cancel,
            Err(poisoned) => poisoned.into_inner(),
        };
        cancel.cancel();
        *cancel = CancelToken::new();
        debug!("cancelled pending runs of {}", self.conversation_id);
    }

    fn enqueue(&self, cmd: Command) {
        let token = match self.cancel.lock() {
            Ok(cancel) => cancel.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if self.cmd_tx.send((cmd, token)).is_err() {
            error!("session worker of {} has stopped", self.conversation_id);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel();
        self.kill_tx.send_replace(true);
    }
}

/// [`Session`] builder.
pub struct SessionBuilder {
    orchestrator: Arc<Orchestrator>,
    conversation_id: String,
    on_idle: Option<OnIdle>,
    on_outcome: Option<OnOutcome>,
}

impl SessionBuilder {
    /// Attaches a callback to be invoked when the queue runs empty.
    #[inline]
    pub fn on_idle(mut self, on_idle: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_idle = Some(Box::new(on_idle));
        self
    }

    /// Attaches a callback to be invoked with the result of every run.
    #[inline]
    pub fn on_outcome(
        mut self,
        on_outcome: impl Fn(Result<LoopOutcome, Error>) + Send + Sync + 'static,
    ) -> Self {
        self.on_outcome = Some(Box::new(on_outcome));
        self
    }

    /// Spawns the worker task and returns the session.
    ///
    /// This must be called within a Tokio runtime.
    pub fn spawn(self) -> Session {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = watch::channel(false);
        let span = debug_span!("session", conversation = %self.conversation_id);
        let conversation_id = self.conversation_id.clone();
        tokio::spawn(run_worker(self, cmd_rx, kill_rx).instrument(span));
        Session {
            conversation_id,
            cmd_tx,
            cancel: Mutex::new(CancelToken::new()),
            kill_tx,
        }
    }
}

async fn run_worker(
    builder: SessionBuilder,
    mut cmd_rx: mpsc::UnboundedReceiver<(Command, CancelToken)>,
    mut kill_rx: watch::Receiver<bool>,
) {
    let SessionBuilder {
        orchestrator,
        conversation_id,
        on_idle,
        on_outcome,
    } = builder;

    debug!("started");
    loop {
        let (cmd, cancel) = select! {
            biased;

            _ = kill_rx.changed() => {
                break;
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    break;
                };
                cmd
            }
        };
        trace!("received command: {cmd:?}");

        let result = match cmd {
            Command::SendMessage(msg) => {
                orchestrator.run(&conversation_id, msg, &cancel).await
            }
            Command::RespondToChoice {
                message_id,
                option_index,
            } => {
                orchestrator
                    .respond_to_choice(
                        &conversation_id,
                        &message_id,
                        option_index,
                        &cancel,
                    )
                    .await
            }
        };
        if let Some(on_outcome) = &on_outcome {
            on_outcome(result);
        }

        if cmd_rx.is_empty() {
            if let Some(on_idle) = &on_idle {
                on_idle();
            }
        }
    }
    debug!("will terminate");
}
