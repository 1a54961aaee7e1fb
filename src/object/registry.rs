//! Object Handler Registry
//!
//! Maps object type names (e.g. "block") to the handler that implements the
//! type on this node. Messages name their target type as the service, so
//! dispatch is a lookup here followed by a match on the operation inside the
//! handler.

use dashmap::DashMap;
use std::sync::Arc;

use super::capability::ObjectHandler;

pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn ObjectHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `handler` under its own object type name, replacing any
    /// previous handler for that type.
    pub fn register(&self, handler: Arc<dyn ObjectHandler>) {
        let name = handler.object_type().to_string();
        self.handlers.insert(name.clone(), handler);

        tracing::info!("Registered object handler: {}", name);
    }

    pub fn get(&self, object_type: &str) -> Option<Arc<dyn ObjectHandler>> {
        self.handlers
            .get(object_type)
            .map(|entry| entry.value().clone())
    }

    pub fn list_handlers(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn has_handler(&self, object_type: &str) -> bool {
        self.handlers.contains_key(object_type)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }
}
