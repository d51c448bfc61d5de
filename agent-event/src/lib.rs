//! Agent event wire types: closed event enum + JSONL line encoding.
//!
//! This crate defines the shape of a single observability event and its JSONL
//! encoding. It does not depend on arbiter; arbiter's event bus publishes
//! `Event` values and the JSONL sink calls [`to_jsonl_line`].

pub mod event;
pub mod jsonl;

pub use event::{Event, EventType};
pub use jsonl::to_jsonl_line;
