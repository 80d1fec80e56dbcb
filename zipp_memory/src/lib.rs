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

//! Conversation memories and the locks that guard them.
//!
//! Every conversation owns one [`MemoryGuard`]: a memory behind a FIFO-fair
//! async mutex. The [`MemoryRegistry`] hands out guards by conversation id
//! and saves or restores all memories at process boundaries.

mod guard;
mod registry;

pub use guard::{MemoryGuard, MemoryLock};
pub use registry::MemoryRegistry;
