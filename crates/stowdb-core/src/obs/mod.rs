//! Observability boundary.
//!
//! Engine code never logs store traffic or cache behavior ad hoc; it emits
//! `EngineEvent`s into the injected `EventSink`.

pub mod sink;

pub use sink::{EngineEvent, EventSink, NullSink, TracingSink};
