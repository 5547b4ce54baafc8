//! Expected filesystem trees.
//!
//! Test authors build an [`FsItem`] tree as a literal description of what a
//! directory should contain, then hand it to the tree verifier. Items are
//! immutable once built.

use std::collections::BTreeMap;
use std::path::Path;

use regex::bytes::Regex;

use crate::tree::{self, EntryKind, MatchResult, VerifyPolicy};

/// Errors raised while building an expected tree.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("Directory '{dir}' lists child '{name}' more than once")]
    DuplicateChild { dir: String, name: String },

    #[error("Invalid item name '{0}': must be a single non-empty path component")]
    InvalidName(String),

    #[error("Invalid content pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// What an expected file's bytes must look like.
#[derive(Debug, Clone)]
pub enum FileContent {
    /// The file must exist; its content is not checked.
    Any,
    /// Byte-for-byte equality.
    Exact(Vec<u8>),
    /// The content must match the pattern.
    Pattern(Regex),
}

impl FileContent {
    /// Build a pattern matcher.
    pub fn pattern(pattern: &str) -> Result<Self, TreeError> {
        Ok(Self::Pattern(Regex::new(pattern)?))
    }

    /// Returns true when `actual` satisfies this expectation.
    pub fn matches(&self, actual: &[u8]) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected.as_slice() == actual,
            Self::Pattern(regex) => regex.is_match(actual),
        }
    }

    /// Short human-readable description used in mismatch reports.
    pub fn describe(&self) -> String {
        match self {
            Self::Any => "any content".to_string(),
            Self::Exact(bytes) => format!("{:?}", preview(bytes)),
            Self::Pattern(regex) => format!("content matching /{}/", regex.as_str()),
        }
    }
}

impl From<&str> for FileContent {
    fn from(value: &str) -> Self {
        Self::Exact(value.as_bytes().to_vec())
    }
}

impl From<String> for FileContent {
    fn from(value: String) -> Self {
        Self::Exact(value.into_bytes())
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(value: Vec<u8>) -> Self {
        Self::Exact(value)
    }
}

impl From<&[u8]> for FileContent {
    fn from(value: &[u8]) -> Self {
        Self::Exact(value.to_vec())
    }
}

/// An expected regular file.
#[derive(Debug, Clone)]
pub struct ExpectedFile {
    name: String,
    content: FileContent,
}

impl ExpectedFile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &FileContent {
        &self.content
    }
}

/// An expected directory. Children are keyed by name, so iteration order is
/// sorted and names are unique.
#[derive(Debug, Clone)]
pub struct ExpectedDir {
    name: String,
    children: BTreeMap<String, FsItem>,
}

impl ExpectedDir {
    /// Build a directory, rejecting duplicate or malformed child names.
    pub fn new(
        name: impl Into<String>,
        children: impl IntoIterator<Item = FsItem>,
    ) -> Result<Self, TreeError> {
        let name = name.into();
        let mut map = BTreeMap::new();
        for child in children {
            validate_name(child.name())?;
            let child_name = child.name().to_string();
            if map.insert(child_name.clone(), child).is_some() {
                return Err(TreeError::DuplicateChild {
                    dir: name,
                    name: child_name,
                });
            }
        }
        Ok(Self {
            name,
            children: map,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> impl Iterator<Item = &FsItem> {
        self.children.values()
    }

    pub fn child(&self, name: &str) -> Option<&FsItem> {
        self.children.get(name)
    }
}

/// A node of an expected filesystem tree.
#[derive(Debug, Clone)]
pub enum FsItem {
    File(ExpectedFile),
    Directory(ExpectedDir),
}

impl FsItem {
    /// An expected file with exact (or matcher) content.
    pub fn file(name: impl Into<String>, content: impl Into<FileContent>) -> Self {
        Self::File(ExpectedFile {
            name: name.into(),
            content: content.into(),
        })
    }

    /// An expected file whose content is not checked.
    pub fn any_file(name: impl Into<String>) -> Self {
        Self::File(ExpectedFile {
            name: name.into(),
            content: FileContent::Any,
        })
    }

    /// An expected directory.
    pub fn dir(
        name: impl Into<String>,
        children: impl IntoIterator<Item = FsItem>,
    ) -> Result<Self, TreeError> {
        ExpectedDir::new(name, children).map(Self::Directory)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::File(file) => &file.name,
            Self::Directory(dir) => &dir.name,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Self::File(_) => EntryKind::File,
            Self::Directory(_) => EntryKind::Directory,
        }
    }

    /// Compare this item against the real path, stopping at the first mismatch.
    pub fn verify(&self, actual_path: &Path, policy: VerifyPolicy) -> MatchResult {
        tree::verify_tree(self, actual_path, policy)
    }
}

fn validate_name(name: &str) -> Result<(), TreeError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains(std::path::MAIN_SEPARATOR);
    if invalid {
        return Err(TreeError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Lossy, truncated rendering of file bytes for reports.
pub(crate) fn preview(bytes: &[u8]) -> String {
    const MAX_CHARS: usize = 64;
    let text = String::from_utf8_lossy(bytes);
    if text.chars().count() <= MAX_CHARS {
        return text.into_owned();
    }
    let truncated: String = text.chars().take(MAX_CHARS).collect();
    format!("{truncated}... ({} bytes)", bytes.len())
}
