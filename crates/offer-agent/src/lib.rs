//! An out-of-the-box offer agent that assembles the equipment catalog tools
//! and a model provider.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring the offer agent into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod session;
pub mod tools;

pub use session::{SYSTEM_PROMPT, Session, SessionBuilder};

/// Re-exports of [`offer_agent_core`] crate.
pub mod core {
    pub use offer_agent_core::*;
}
