//! Built-in workflow actions.

mod weekly;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::registry::{ActionRegistry, RegistryError};

pub use weekly::{summarise_text, GenerateReport, PostSummary, ScanDirectory};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Scanned when a `scan_directory` step carries no `path`.
    pub default_scan_path: PathBuf,
    /// Where `generate_report` writes its markdown. Unset keeps reports in
    /// memory only.
    pub report_dir: Option<PathBuf>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            default_scan_path: PathBuf::from("./demo_projects"),
            report_dir: None,
        }
    }
}

pub fn register_builtin_actions(
    registry: &mut ActionRegistry,
    settings: &WorkflowSettings,
) -> Result<(), RegistryError> {
    registry.register(
        "scan_directory",
        ScanDirectory::new(settings.default_scan_path.clone()),
    )?;
    registry.register("generate_report", GenerateReport::new(settings.report_dir.clone()))?;
    registry.register("post_summary", PostSummary)?;
    registry.register_fn("summarise_text", summarise_text)?;
    Ok(())
}

/// Registry holding only the built-in actions.
pub fn builtin_registry(settings: &WorkflowSettings) -> Result<ActionRegistry, RegistryError> {
    let mut registry = ActionRegistry::new();
    register_builtin_actions(&mut registry, settings)?;
    Ok(registry)
}
