use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use benchrig_model::Error;

use crate::{ProtocolHandler, Rs232Handler};

/// Builds a fresh handler instance for one workflow.
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn ProtocolHandler> + Send + Sync>;

/// Maps protocol tags (case-insensitive) to handler factories.
///
/// The registry owns construction; handlers are built per workflow rather
/// than shared process-wide. `rs232` and its alias `serial` are registered
/// by default.
pub struct HandlerRegistry {
    factories: RwLock<HashMap<String, HandlerFactory>>,
}

impl HandlerRegistry {
    /// An empty registry with no handlers.
    pub fn empty() -> Self {
        HandlerRegistry {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the built-in RS-232 handler under `rs232` and
    /// `serial`.
    pub fn with_defaults() -> Self {
        let registry = HandlerRegistry::empty();
        let factory: HandlerFactory = Arc::new(|| Arc::new(Rs232Handler::new()));
        registry.register("rs232", factory.clone());
        registry.register("serial", factory);
        registry
    }

    pub fn register(&self, tag: &str, factory: HandlerFactory) {
        self.factories
            .write()
            .insert(tag.to_ascii_lowercase(), factory);
    }

    /// Builds a handler for `tag`, or fails naming the supported tags.
    pub fn create(&self, tag: &str) -> Result<Arc<dyn ProtocolHandler>, Error> {
        let factories = self.factories.read();
        match factories.get(&tag.to_ascii_lowercase()) {
            Some(factory) => Ok(factory()),
            None => {
                let mut supported: Vec<String> = factories.keys().cloned().collect();
                supported.sort();
                Err(Error::ProtocolUnsupported {
                    requested: tag.to_string(),
                    supported,
                })
            }
        }
    }

    pub fn supported(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.factories.read().keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        HandlerRegistry::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_serves_rs232_and_alias() {
        let registry = HandlerRegistry::default();
        assert!(registry.create("rs232").is_ok());
        assert!(registry.create("RS232").is_ok());
        assert!(registry.create("serial").is_ok());
        assert_eq!(registry.supported(), vec!["rs232", "serial"]);
    }

    #[test]
    fn unknown_tag_names_the_supported_set() {
        let registry = HandlerRegistry::default();
        let err = registry.create("can").unwrap_err();
        match err {
            Error::ProtocolUnsupported { requested, supported } => {
                assert_eq!(requested, "can");
                assert_eq!(supported, vec!["rs232", "serial"]);
            }
            other => panic!("expected ProtocolUnsupported, got {other:?}"),
        }
    }

    #[test]
    fn handlers_are_built_per_call() {
        let registry = HandlerRegistry::default();
        let a = registry.create("rs232").unwrap();
        let b = registry.create("rs232").unwrap();
        assert!(!Arc::ptr_eq(&a, &b), "each workflow gets its own handler");
    }
}
