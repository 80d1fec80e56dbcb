#![deny(
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

pub mod generation;
pub mod memory;
pub mod util;

pub use generation::{GenerationError, GenerationOptions, TextGenerator};
pub use memory::{
    BasicMemory, BasicMemoryFactory, Memory, MemoryError, MemoryFactory, MemoryKind,
    MemoryRecord, Message, NoMemory, NoMemoryFactory, Role, RoleLabels,
};
pub use util::{EstimateMethod, estimate_tokens};
