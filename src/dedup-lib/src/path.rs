use crate::{FsError, FsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Absolute, validated path inside a tenant namespace.
///
/// Always starts with `/`. Relative paths, `..`, NUL bytes, empty components
/// and trailing slashes (other than the root itself) are rejected at parse
/// time, so a constructed `FsPath` is always in canonical form and two paths
/// name the same node iff they compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FsPath(String);

impl FsPath {
    pub fn root() -> Self {
        FsPath("/".to_string())
    }

    pub fn parse(s: impl Into<String>) -> FsResult<Self> {
        let s = s.into();
        if s.is_empty() {
            return Err(FsError::InvalidPath("path is empty".to_string()));
        }
        if !s.starts_with('/') {
            return Err(FsError::InvalidPath(format!("path must be absolute: {}", s)));
        }
        if s.contains('\0') {
            return Err(FsError::InvalidPath("path contains NUL byte".to_string()));
        }
        if s.contains("..") {
            return Err(FsError::InvalidPath(format!("path contains '..': {}", s)));
        }
        if s == "/" {
            return Ok(FsPath(s));
        }
        if s.ends_with('/') {
            return Err(FsError::InvalidPath(format!("trailing slash: {}", s)));
        }
        if s.contains("//") {
            return Err(FsError::InvalidPath(format!("empty path component: {}", s)));
        }
        Ok(FsPath(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Parent directory. `None` for the root.
    pub fn parent(&self) -> Option<FsPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(FsPath::root()),
            Some(idx) => Some(FsPath(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Final path component. `None` for the root.
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rfind('/').map(|idx| &self.0[idx + 1..])
    }

    /// Appends a single component.
    pub fn join(&self, name: &str) -> FsResult<FsPath> {
        if name.is_empty() || name.contains('/') {
            return Err(FsError::InvalidPath(format!(
                "invalid path component: {:?}",
                name
            )));
        }
        if self.is_root() {
            FsPath::parse(format!("/{}", name))
        } else {
            FsPath::parse(format!("{}/{}", self.0, name))
        }
    }

    /// Number of components; the root has depth 0.
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches('/').count()
        }
    }

    /// True when `self` equals `prefix` or lies underneath it.
    pub fn starts_with(&self, prefix: &FsPath) -> bool {
        if prefix.is_root() {
            return true;
        }
        self.0 == prefix.0 || self.0.starts_with(&format!("{}/", prefix.0))
    }

    /// Rewrites a path from the `src` subtree into the `dst` subtree.
    pub fn rebase(&self, src: &FsPath, dst: &FsPath) -> FsResult<FsPath> {
        if self.0 == src.0 {
            return Ok(dst.clone());
        }
        let prefix = if src.is_root() {
            "/".to_string()
        } else {
            format!("{}/", src.0)
        };
        let rest = self.0.strip_prefix(&prefix).ok_or_else(|| {
            FsError::InvalidPath(format!("{} is not under {}", self.0, src.0))
        })?;
        if dst.is_root() {
            FsPath::parse(format!("/{}", rest))
        } else {
            FsPath::parse(format!("{}/{}", dst.0, rest))
        }
    }

    /// Suffix after the last `.` of the final component, if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.name()?;
        let idx = name.rfind('.')?;
        if idx == 0 || idx + 1 == name.len() {
            return None;
        }
        Some(&name[idx + 1..])
    }
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FsPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
