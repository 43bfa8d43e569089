use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// A filesystem location of an array, fragment directory, or file.
///
/// Cloud-storage backends are out of scope; a URI is a thin wrapper over a
/// local path with the join/name helpers the fragment layer needs. URIs
/// order lexicographically by their string form, which is what fragment
/// sorting relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uri(PathBuf);

impl Uri {
    /// Create a URI from a path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Append a path component.
    pub fn join_path(&self, name: &str) -> Uri {
        Uri(self.0.join(name))
    }

    /// The last path component, e.g. the fragment directory name.
    pub fn last_path_part(&self) -> &str {
        self.0
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// The underlying path.
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl Display for Uri {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<&str> for Uri {
    fn from(s: &str) -> Self {
        Uri::new(s)
    }
}

impl From<PathBuf> for Uri {
    fn from(p: PathBuf) -> Self {
        Uri::new(p)
    }
}
