//! Filesystem path containment checks.

use std::fs;
use std::path::{Component, Path, PathBuf};

/// Resolves user-supplied paths and tests them against a set of roots.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    base_dir: PathBuf,
    roots: Vec<String>,
}

impl PathSandbox {
    /// `base_dir` anchors relative paths, both for checked paths and roots.
    pub fn new(base_dir: impl Into<PathBuf>, roots: Vec<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            roots,
        }
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Expands `~`, anchors relative paths and canonicalises as far as the
    /// filesystem allows.
    pub fn resolve(&self, raw: &str) -> PathBuf {
        let expanded = shellexpand::tilde(raw.trim());
        let path = Path::new(expanded.as_ref());
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        };
        safe_canonicalize(&absolute)
    }

    /// True when `raw` resolves inside one of the roots. Matching is by
    /// whole path components, so `/tmp` covers `/tmp/x` but not `/tmpx`.
    pub fn contains(&self, raw: &str) -> bool {
        self.contains_within(raw, &self.roots)
    }

    pub fn contains_within<S: AsRef<str>>(&self, raw: &str, roots: &[S]) -> bool {
        let resolved = self.resolve(raw);
        roots
            .iter()
            .any(|root| resolved.starts_with(self.resolve(root.as_ref())))
    }
}

/// Canonicalises the longest existing ancestor of `path` and re-appends the
/// missing tail, then removes any `.`/`..` left in that tail.
pub fn safe_canonicalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }

    let components: Vec<Component> = path.components().collect();
    for split in (1..components.len()).rev() {
        let head: PathBuf = components[..split].iter().collect();
        if let Ok(mut out) = fs::canonicalize(&head) {
            out.extend(&components[split..]);
            return path_clean::clean(out);
        }
    }

    path_clean::clean(path)
}
