#![warn(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Turning incoming chat messages into replies.
//!
//! The [`PromptAssembler`] packs a conversation's history into a prompt
//! under a token budget. The [`ConversationHandler`] drives one request
//! end to end: lock the conversation, generate, reply, then record the turn
//! in the background.
//!
//! # Ordering
//! Requests for the same conversation are served in arrival order and each
//! one sees every turn recorded before it. Different conversations never
//! wait on each other.

mod handler;
mod prompt;

pub use handler::{
    ConversationHandler, HandlerConfig, INTERNAL_ERROR_REPLY, IncomingMessage,
    NO_RESPONSE_REPLY, OptionError,
};
pub use prompt::{PromptAssembler, PromptConfig, PromptError};
