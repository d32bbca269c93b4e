//! An abstraction layer for the LLM endpoint driving the offer agent.
//!
//! This crate establishes the protocol the orchestration core speaks with
//! a hosted model: ordered role-tagged turns made of content blocks, a
//! closed set of streaming events, and the finalized turn the provider
//! materializes once the stream has ended.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that provider implementors should adhere to. The streamed
//! events are meant for live feedback only; anything that drives control
//! flow must be read from [`FinalizedTurn`].

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
