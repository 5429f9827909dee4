//! Plan execution for taskbridge connectors.

pub mod executor;
pub mod registry;
pub mod workflows;

pub use executor::Executor;
pub use registry::{ActionHandler, ActionNotFound, ActionRegistry, RegistryError};
pub use workflows::{builtin_registry, register_builtin_actions, WorkflowSettings};
