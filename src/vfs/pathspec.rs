//! Nested path specifications
//!
//! A path specification addresses a location through a chain of layers: the
//! outermost layer names an OS file (an image or device), each inner layer a
//! location inside the NTFS volume held by the layer before it.

use crate::ntfs::resolver::components;
use serde::{Deserialize, Serialize};

pub use crate::ntfs::collation::CaseMode;

/// Handler that interprets one layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PathType {
    #[default]
    #[serde(rename = "OS")]
    Os,
    #[serde(rename = "NTFS")]
    Ntfs,
}

/// One layer of a path specification, owning the layers nested inside it.
/// Equality is field-wise over the whole chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PathSpec {
    pub pathtype: PathType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Raw NTFS file reference (record number and sequence number)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inode: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_options: Option<CaseMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested_path: Option<Box<PathSpec>>,
}

impl PathSpec {
    pub fn new(pathtype: PathType, path: impl Into<String>) -> Self {
        Self {
            pathtype,
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn os(path: impl Into<String>) -> Self {
        Self::new(PathType::Os, path)
    }

    pub fn ntfs(path: impl Into<String>) -> Self {
        Self::new(PathType::Ntfs, path)
    }

    pub fn with_inode(mut self, inode: u64) -> Self {
        self.inode = Some(inode);
        self
    }

    pub fn with_path_options(mut self, mode: CaseMode) -> Self {
        self.path_options = Some(mode);
        self
    }

    pub fn with_stream_name(mut self, name: impl Into<String>) -> Self {
        self.stream_name = Some(name.into());
        self
    }

    /// Append `inner` below the innermost layer
    pub fn with_nested(mut self, inner: PathSpec) -> Self {
        let nested = match self.nested_path.take() {
            Some(existing) => existing.with_nested(inner),
            None => inner,
        };
        self.nested_path = Some(Box::new(nested));
        self
    }

    /// Layers from outermost to innermost
    pub fn layers(&self) -> Vec<&PathSpec> {
        let mut layers = vec![self];
        let mut current = self;
        while let Some(inner) = current.nested_path.as_deref() {
            layers.push(inner);
            current = inner;
        }
        layers
    }

    pub fn depth(&self) -> usize {
        self.layers().len()
    }

    /// The innermost layer
    pub fn last(&self) -> &PathSpec {
        let mut current = self;
        while let Some(inner) = current.nested_path.as_deref() {
            current = inner;
        }
        current
    }

    /// The outermost `depth` layers, without anything nested below them
    pub fn truncated(&self, depth: usize) -> PathSpec {
        let layers = self.layers();
        let mut kept: Vec<PathSpec> = layers
            .iter()
            .take(depth.max(1))
            .map(|layer| PathSpec {
                nested_path: None,
                ..(*layer).clone()
            })
            .collect();

        let mut spec = kept.pop().unwrap_or_default();
        while let Some(mut outer) = kept.pop() {
            outer.nested_path = Some(Box::new(spec));
            spec = outer;
        }
        spec
    }

    /// Final path component of the innermost layer
    pub fn basename(&self) -> &str {
        self.last()
            .path
            .as_deref()
            .and_then(|path| components(path).last())
            .unwrap_or("")
    }
}
