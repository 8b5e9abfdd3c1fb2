use crate::{
    store::{Command, CommandRenderer, PlainRenderer},
    tx::TxId,
};
use std::sync::Arc;

///
/// EngineEvent
///

#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// A command is about to be issued to the store.
    Command { command: Command },
    CacheHit { entity: String },
    CacheMiss { entity: String },
    LazyLoad { entity: String, field: String },
    Commit { tx: TxId, operations: usize },
    Rollback { tx: TxId, discarded: usize },
    CacheCleared { evicted: usize },
}

///
/// EventSink
///

pub trait EventSink: Send + Sync {
    fn record(&self, event: EngineEvent);
}

///
/// NullSink
///

#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&self, _: EngineEvent) {}
}

///
/// TracingSink
///
/// Default sink: forwards events to `tracing`, rendering store commands with
/// the configured renderer.
///

#[derive(Clone)]
pub struct TracingSink {
    renderer: Arc<dyn CommandRenderer>,
}

impl TracingSink {
    #[must_use]
    pub fn new(renderer: Arc<dyn CommandRenderer>) -> Self {
        Self { renderer }
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new(Arc::new(PlainRenderer))
    }
}

impl EventSink for TracingSink {
    fn record(&self, event: EngineEvent) {
        match event {
            EngineEvent::Command { command } => match self.renderer.render(&command) {
                Ok(text) => tracing::trace!(entity = %command.entity, kind = %command.kind, "{text}"),
                Err(err) => tracing::warn!(entity = %command.entity, "command render failed: {err}"),
            },
            EngineEvent::CacheHit { entity } => tracing::trace!(%entity, "cache hit"),
            EngineEvent::CacheMiss { entity } => tracing::trace!(%entity, "cache miss"),
            EngineEvent::LazyLoad { entity, field } => {
                tracing::debug!(%entity, %field, "lazy field materialized");
            }
            EngineEvent::Commit { tx, operations } => {
                tracing::debug!(%tx, operations, "cache commit applied");
            }
            EngineEvent::Rollback { tx, discarded } => {
                tracing::debug!(%tx, discarded, "cache rollback discarded pending entries");
            }
            EngineEvent::CacheCleared { evicted } => tracing::debug!(evicted, "cache cleared"),
        }
    }
}
