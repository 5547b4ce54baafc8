//! Structural comparison of an expected [`FsItem`] tree against real disk state.
//!
//! Children are visited in sorted-name order (the union of expected and
//! actual names), so the "first" mismatch is deterministic. Mismatch paths
//! are relative to the actual root; the root itself is reported as `.`.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::fs_item::{ExpectedDir, ExpectedFile, FsItem, TreeError, preview};

/// Comparison policy, applied identically at every depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyPolicy {
    /// When false, any actual entry absent from the expected tree is a mismatch.
    pub allow_extra_items: bool,
}

impl VerifyPolicy {
    /// Every actual entry must be expected.
    pub const EXACT: Self = Self {
        allow_extra_items: false,
    };

    /// Expected entries must exist; unexpected actual entries are ignored.
    pub const SUBSET: Self = Self {
        allow_extra_items: true,
    };
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self::EXACT
    }
}

/// Type of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Directory => write!(f, "directory"),
            Self::Other => write!(f, "special file"),
        }
    }
}

/// Nature of a divergence between expected and actual state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MismatchKind {
    /// Expected entry is absent on disk.
    Missing { expected: EntryKind },
    /// Entry on disk is not in the expected tree.
    Extra { actual: EntryKind },
    /// Regular file whose bytes do not satisfy the expectation.
    ContentDiffers { expected: String, actual: String },
    /// Expected a file but found a directory, or the other way round.
    TypeDiffers {
        expected: EntryKind,
        actual: EntryKind,
    },
    /// Root name does not match the actual root's basename.
    NameDiffers { expected: String, actual: String },
    /// Entry could not be inspected.
    Unreadable { reason: String },
}

impl std::fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing { expected } => write!(f, "missing (expected {expected})"),
            Self::Extra { actual } => write!(f, "unexpected {actual}"),
            Self::ContentDiffers { expected, actual } => {
                write!(f, "content differs (expected {expected}, got {actual:?})")
            }
            Self::TypeDiffers { expected, actual } => {
                write!(f, "type differs (expected {expected}, found {actual})")
            }
            Self::NameDiffers { expected, actual } => {
                write!(f, "name differs (expected '{expected}', found '{actual}')")
            }
            Self::Unreadable { reason } => write!(f, "unreadable ({reason})"),
        }
    }
}

/// One divergence, located by its path relative to the compared root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub path: PathBuf,
    pub kind: MismatchKind,
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.as_os_str().is_empty() {
            write!(f, ".: {}", self.kind)
        } else {
            write!(f, "{}: {}", self.path.display(), self.kind)
        }
    }
}

/// Outcome of a tree comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Match,
    Mismatch(Mismatch),
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }

    pub fn mismatch(&self) -> Option<&Mismatch> {
        match self {
            Self::Match => None,
            Self::Mismatch(mismatch) => Some(mismatch),
        }
    }

    pub fn into_result(self) -> Result<(), Mismatch> {
        match self {
            Self::Match => Ok(()),
            Self::Mismatch(mismatch) => Err(mismatch),
        }
    }
}

/// Compare `expected` against `actual_root`, reporting the first mismatch.
pub fn verify_tree(expected: &FsItem, actual_root: &Path, policy: VerifyPolicy) -> MatchResult {
    let mut walker = Walker::new(policy, true);
    walker.verify_root(expected, actual_root);
    match walker.found.into_iter().next() {
        Some(mismatch) => MatchResult::Mismatch(mismatch),
        None => MatchResult::Match,
    }
}

/// Compare `expected` against `actual_root`, collecting every mismatch.
pub fn verify_tree_all(expected: &FsItem, actual_root: &Path, policy: VerifyPolicy) -> Vec<Mismatch> {
    let mut walker = Walker::new(policy, false);
    walker.verify_root(expected, actual_root);
    walker.found
}

/// Compare the contents of `actual_dir` against `children`.
///
/// The expected root directory takes its name from the basename of
/// `actual_dir`, so only the contents are checked, not where they live.
pub fn verify_directory_contents(
    actual_dir: &Path,
    children: impl IntoIterator<Item = FsItem>,
    policy: VerifyPolicy,
) -> Result<MatchResult, TreeError> {
    let root = match normalize_root(actual_dir) {
        Ok(root) => root,
        Err(err) => {
            return Ok(MatchResult::Mismatch(Mismatch {
                path: PathBuf::new(),
                kind: MismatchKind::Unreadable {
                    reason: err.to_string(),
                },
            }));
        }
    };
    let name = root_name(&root);
    let expected = FsItem::dir(name, children)?;
    Ok(verify_tree(&expected, &root, policy))
}

/// Absolute, lexically normalized form of `path` (trailing separators and
/// `.` components removed, `..` folded).
pub fn normalize_root(path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

fn root_name(root: &Path) -> String {
    root.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn entry_kind(path: &Path) -> io::Result<EntryKind> {
    let metadata = fs::metadata(path)?;
    Ok(if metadata.is_dir() {
        EntryKind::Directory
    } else if metadata.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    })
}

struct Walker {
    policy: VerifyPolicy,
    first_only: bool,
    found: Vec<Mismatch>,
}

impl Walker {
    fn new(policy: VerifyPolicy, first_only: bool) -> Self {
        Self {
            policy,
            first_only,
            found: Vec::new(),
        }
    }

    fn done(&self) -> bool {
        self.first_only && !self.found.is_empty()
    }

    fn report(&mut self, path: &Path, kind: MismatchKind) {
        self.found.push(Mismatch {
            path: path.to_path_buf(),
            kind,
        });
    }

    fn verify_root(&mut self, expected: &FsItem, actual_root: &Path) {
        let root = match normalize_root(actual_root) {
            Ok(root) => root,
            Err(err) => {
                self.report(
                    Path::new(""),
                    MismatchKind::Unreadable {
                        reason: err.to_string(),
                    },
                );
                return;
            }
        };

        let actual_name = root_name(&root);
        if expected.name() != actual_name {
            self.report(
                Path::new(""),
                MismatchKind::NameDiffers {
                    expected: expected.name().to_string(),
                    actual: actual_name,
                },
            );
            if self.done() {
                return;
            }
        }

        self.verify_item(expected, &root, Path::new(""));
    }

    fn verify_item(&mut self, expected: &FsItem, actual: &Path, rel: &Path) {
        let kind = match entry_kind(actual) {
            Ok(kind) => kind,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.report(
                    rel,
                    MismatchKind::Missing {
                        expected: expected.kind(),
                    },
                );
                return;
            }
            Err(err) => {
                self.report(
                    rel,
                    MismatchKind::Unreadable {
                        reason: err.to_string(),
                    },
                );
                return;
            }
        };

        if kind != expected.kind() {
            self.report(
                rel,
                MismatchKind::TypeDiffers {
                    expected: expected.kind(),
                    actual: kind,
                },
            );
            return;
        }

        match expected {
            FsItem::File(file) => self.verify_file(file, actual, rel),
            FsItem::Directory(dir) => self.verify_dir(dir, actual, rel),
        }
    }

    fn verify_file(&mut self, expected: &ExpectedFile, actual: &Path, rel: &Path) {
        if matches!(expected.content(), crate::fs_item::FileContent::Any) {
            return;
        }
        match fs::read(actual) {
            Ok(bytes) if expected.content().matches(&bytes) => {}
            Ok(bytes) => self.report(
                rel,
                MismatchKind::ContentDiffers {
                    expected: expected.content().describe(),
                    actual: preview(&bytes),
                },
            ),
            Err(err) => self.report(
                rel,
                MismatchKind::Unreadable {
                    reason: err.to_string(),
                },
            ),
        }
    }

    fn verify_dir(&mut self, expected: &ExpectedDir, actual: &Path, rel: &Path) {
        let actual_names = match list_names(actual) {
            Ok(names) => names,
            Err(err) => {
                self.report(
                    rel,
                    MismatchKind::Unreadable {
                        reason: err.to_string(),
                    },
                );
                return;
            }
        };

        let mut names: BTreeSet<&str> = actual_names.iter().map(String::as_str).collect();
        names.extend(expected.children().map(FsItem::name));

        for name in names {
            if self.done() {
                return;
            }
            let child_rel = rel.join(name);
            let child_actual = actual.join(name);
            match expected.child(name) {
                Some(child) if actual_names.contains(name) => {
                    self.verify_item(child, &child_actual, &child_rel);
                }
                Some(child) => self.report(
                    &child_rel,
                    MismatchKind::Missing {
                        expected: child.kind(),
                    },
                ),
                None if self.policy.allow_extra_items => {}
                None => {
                    let kind = entry_kind(&child_actual).unwrap_or(EntryKind::Other);
                    self.report(&child_rel, MismatchKind::Extra { actual: kind });
                }
            }
        }
    }
}

fn list_names(dir: &Path) -> io::Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        names.insert(entry?.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}
