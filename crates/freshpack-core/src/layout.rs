use std::ffi::OsString;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    /// Regular files, symlinks and anything else that is not a real directory.
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopLevelEntry {
    pub name: OsString,
    pub kind: EntryKind,
}

impl TopLevelEntry {
    pub fn new(name: impl Into<OsString>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Where the installable content lives inside an extraction directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRoot {
    /// The extraction directory itself.
    Staging,
    /// The single wrapping directory with this name.
    Wrapped(OsString),
}

/// Decides whether an extracted archive wraps its content in one folder.
///
/// Only a listing of exactly one directory is flattened. Zero entries, a
/// single file, or several entries of any kind keep the extraction
/// directory as the root.
pub fn select_source_root(entries: &[TopLevelEntry]) -> SourceRoot {
    match entries {
        [only] if only.kind == EntryKind::Directory => SourceRoot::Wrapped(only.name.clone()),
        _ => SourceRoot::Staging,
    }
}
