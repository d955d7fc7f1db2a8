//! Named transport factories.
//!
//! A [`TransportRegistry`] is owned by the embedding application. Nothing in
//! this crate consults it; it exists so hosts that select transports by name
//! from configuration can do so without any process-wide state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::TransportConfig;
use crate::error::{Result, RotateError};
use crate::transport::RotatingFileTransport;

/// Name under which [`TransportRegistry::register_defaults`] registers the
/// rotating file transport.
pub const DAILY_ROTATE_FILE: &str = "daily-rotate-file";

/// Builds a transport from a configuration.
pub type TransportFactory =
    Arc<dyn Fn(TransportConfig) -> Result<RotatingFileTransport> + Send + Sync>;

/// Transport factories keyed by name.
#[derive(Default, Clone)]
pub struct TransportRegistry {
    factories: BTreeMap<String, TransportFactory>,
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TransportRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`.
    ///
    /// Returns false, keeping the existing factory, if the name is taken.
    pub fn register(&mut self, name: impl Into<String>, factory: TransportFactory) -> bool {
        let name = name.into();
        if self.factories.contains_key(&name) {
            tracing::debug!(%name, "transport already registered");
            return false;
        }
        self.factories.insert(name, factory);
        true
    }

    /// Registers the built-in transports. Calling it again changes nothing.
    pub fn register_defaults(&mut self) -> &mut Self {
        self.register(
            DAILY_ROTATE_FILE,
            Arc::new(RotatingFileTransport::new) as TransportFactory,
        );
        self
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Returns the registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Builds the transport registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RotateError::Config`] for an unknown name, or whatever the
    /// factory returns.
    pub fn create(&self, name: &str, config: TransportConfig) -> Result<RotatingFileTransport> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RotateError::Config(format!("unknown transport: {name}")))?;
        factory(config)
    }
}
