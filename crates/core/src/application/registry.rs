// Handler Registry - closed table of job kinds

use crate::domain::JobKind;
use crate::error::{AppError, Result};
use crate::port::JobHandler;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable `JobKind -> JobHandler` table.
///
/// Built once at startup; an unknown kind is a configuration error reported
/// when the task is about to be claimed, never at firing time.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<HashMap<JobKind, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn resolve(&self, kind: &JobKind) -> Result<Arc<dyn JobHandler>> {
        self.handlers
            .get(kind)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("No handler registered for job kind '{}'", kind)))
    }

    pub fn contains(&self, kind: &JobKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&JobKind> {
        let mut kinds: Vec<&JobKind> = self.handlers.keys().collect();
        kinds.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        kinds
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistryBuilder {
    /// Register a handler. Registering the same kind twice is a
    /// configuration error.
    pub fn register(mut self, kind: impl Into<String>, handler: Arc<dyn JobHandler>) -> Result<Self> {
        let kind = JobKind::new(kind);
        if self.handlers.contains_key(&kind) {
            return Err(AppError::Config(format!(
                "Job kind '{}' registered twice",
                kind
            )));
        }
        self.handlers.insert(kind, handler);
        Ok(self)
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}
