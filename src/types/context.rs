//! Project context supplied per request to ground the model in a codebase.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// File tree plus currently-open file contents, supplied by the caller and
/// read-only to the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectContext {
    #[serde(default)]
    pub file_tree: Vec<FileSystemNode>,
    #[serde(default)]
    pub file_contents: BTreeMap<String, String>,
}

impl ProjectContext {
    pub fn is_empty(&self) -> bool {
        self.file_tree.is_empty()
    }
}

/// One node of the project file tree.
///
/// Invariant: `path` is the parent's path + "/" + `name`. Children keep
/// insertion order; sorting is a presentation concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileSystemNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileSystemNode>,
}

impl FileSystemNode {
    pub fn file(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: NodeKind::File,
            children: Vec::new(),
        }
    }

    pub fn directory(
        name: impl Into<String>,
        path: impl Into<String>,
        children: Vec<FileSystemNode>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: NodeKind::Directory,
            children,
        }
    }
}

/// Node type discriminator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}
