use crate::{
    config::EngineConfig,
    crypto::{Cipher, DefaultKeySource, KeySource, ChaChaCipher},
    obs::{EventSink, TracingSink},
    value::OperatorRegistry,
};
use std::{fmt, sync::Arc};

///
/// Services
///
/// Shared collaborators every record of a cache sees: configuration, key
/// resolution, the field cipher, the operator registry and the event sink.
///

#[derive(Clone)]
pub struct Services {
    pub config: Arc<EngineConfig>,
    pub key_source: Arc<dyn KeySource>,
    pub cipher: Arc<dyn Cipher>,
    pub operators: Arc<OperatorRegistry>,
    pub sink: Arc<dyn EventSink>,
}

impl Services {
    /// Defaults with key files resolved against the configured key directory.
    #[must_use]
    pub fn from_config(config: EngineConfig) -> Self {
        let key_source = DefaultKeySource::new(config.crypto.key_dir.clone());

        Self {
            config: Arc::new(config),
            key_source: Arc::new(key_source),
            cipher: Arc::new(ChaChaCipher),
            operators: Arc::new(OperatorRegistry::with_defaults()),
            sink: Arc::new(TracingSink::default()),
        }
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::from_config(EngineConfig::default())
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
