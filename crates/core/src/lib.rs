//! Core logic of the offer agent: the tool-use orchestration loop, history
//! normalization, structural validation, stream classification, tool
//! dispatch and artifact extraction.

#![warn(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

pub mod artifact;
mod cancel;
pub mod classifier;
mod config;
pub mod conversation;
mod error;
mod events;
mod model_client;
pub mod normalizer;
pub mod offer;
mod orchestrator;
mod session;
pub mod store;
pub mod tool;
pub mod transcript;
pub mod validator;

pub use cancel::CancelToken;
pub use config::OrchestratorConfig;
pub use error::Error;
pub use events::{LoopEvent, LoopState};
pub use orchestrator::{LoopOutcome, Orchestrator, OrchestratorBuilder};
pub use session::{Session, SessionBuilder};
pub use validator::StructuralViolation;
