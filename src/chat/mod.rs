//! Chat pipeline
//!
//! - `generator`: one reply, streamed with a buffered fallback
//! - `service`: validation, gating and recording of a turn

pub mod generator;
pub mod service;

pub use generator::{GenerationEvent, GenerationOutcome, GenerationState, Generator};
pub use service::{to_wire, ChatService, ChatSettings, SendOutcome};
