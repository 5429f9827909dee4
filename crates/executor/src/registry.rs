use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use taskbridge_protocol::Params;
use thiserror::Error;

/// A named action a plan step can invoke.
///
/// `previous` is the output of the step directly before this one, or `None`
/// for the first step and after a failed step.
pub trait ActionHandler: Send + Sync {
    fn call(&self, params: &Params, previous: Option<&Value>) -> Result<Value>;
}

impl<F> ActionHandler for F
where
    F: Fn(&Params, Option<&Value>) -> Result<Value> + Send + Sync,
{
    fn call(&self, params: &Params, previous: Option<&Value>) -> Result<Value> {
        self(params, previous)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("action name must not be empty")]
    EmptyName,
    #[error("action '{0}' is already registered")]
    Duplicate(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown action: {0}")]
pub struct ActionNotFound(pub String);

#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, name: impl Into<String>, handler: H) -> Result<(), RegistryError>
    where
        H: ActionHandler + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.handlers.insert(name, Arc::new(handler));
        Ok(())
    }

    /// Registers a closure. Taking the `Fn` bound here lets closure
    /// arguments infer their reference lifetimes.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(&Params, Option<&Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(name, handler)
    }

    pub fn lookup(&self, name: &str) -> Result<&dyn ActionHandler, ActionNotFound> {
        self.handlers
            .get(name)
            .map(|handler| handler.as_ref())
            .ok_or_else(|| ActionNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
