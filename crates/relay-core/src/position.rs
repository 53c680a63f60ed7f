//! Source positions and the file-resolver boundary.
//!
//! The editor owns text buffers and keeps positions stable across edits.
//! This module defines the narrow interface the bridge needs from it
//! ([`SourceResolver`] / [`SourceFile`]) plus a disk-backed
//! implementation used when no editor buffer is open.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ropey::Rope;

use crate::error::CoreError;

/// A 0-based line/column position in a source file.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Default,
    serde::Serialize,
    serde::Deserialize,
    Hash,
)]
pub struct Position {
    pub line: usize,
    pub col: usize,
}

impl Position {
    /// Create a new position at the given 0-based line and column.
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }

    /// Build from 1-based editor coordinates. Zero is clamped to the
    /// first line/column.
    pub fn from_one_based(line: u32, col: u32) -> Self {
        Self {
            line: line.saturating_sub(1) as usize,
            col: col.saturating_sub(1) as usize,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.line, self.col)
    }
}

/// An edit-stable location handle issued by a [`SourceFile`].
///
/// The owner of the buffer moves anchors as text is inserted or removed;
/// callers only store them and hand them back to
/// [`SourceFile::resolve_anchor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Anchor {
    offset: usize,
}

impl Anchor {
    /// Anchor at a raw character offset.
    pub fn at(offset: usize) -> Self {
        Self { offset }
    }

    /// The offset this anchor was created at.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Offset/position mapping for one file.
pub trait SourceFile: Send + Sync {
    /// Path of the file.
    fn path(&self) -> &Path;
    /// Number of lines in the file.
    fn line_count(&self) -> usize;
    /// Character offset of a 0-based position.
    fn offset_of(&self, pos: Position) -> Result<usize, CoreError>;
    /// 0-based position of a character offset.
    fn position_of(&self, offset: usize) -> Result<Position, CoreError>;
    /// Create an edit-stable anchor at `offset`.
    fn anchor_at(&self, offset: usize) -> Anchor;
    /// Current offset of a previously issued anchor, if still valid.
    fn resolve_anchor(&self, anchor: &Anchor) -> Option<usize>;
}

/// Resolves project-relative paths into [`SourceFile`] handles.
pub trait SourceResolver: Send + Sync {
    /// Open the file at `path` within `project`.
    fn open(&self, project: &str, path: &Path) -> Result<Arc<dyn SourceFile>, CoreError>;
    /// Language id a project is written in, if known.
    fn project_language(&self, project: &str) -> Option<String>;
    /// Language id for a file, typically by extension.
    fn language_of(&self, path: &Path) -> Option<String>;
}

/// A [`SourceFile`] backed by an immutable rope snapshot.
#[derive(Debug, Clone)]
pub struct RopeSource {
    path: PathBuf,
    rope: Rope,
}

impl RopeSource {
    /// Build from in-memory text.
    pub fn from_text(path: impl Into<PathBuf>, text: &str) -> Self {
        Self {
            path: path.into(),
            rope: Rope::from_str(text),
        }
    }

    /// Load a file from disk.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Err(CoreError::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_text(path, &text))
    }
}

impl SourceFile for RopeSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn line_count(&self) -> usize {
        self.rope.len_lines()
    }

    fn offset_of(&self, pos: Position) -> Result<usize, CoreError> {
        if pos.line >= self.rope.len_lines() {
            return Err(CoreError::OutOfBounds(pos));
        }
        let line = self.rope.line(pos.line);
        // Columns past the end of the line (including the newline) are rejected.
        if pos.col > line.len_chars() {
            return Err(CoreError::OutOfBounds(pos));
        }
        Ok(self.rope.line_to_char(pos.line) + pos.col)
    }

    fn position_of(&self, offset: usize) -> Result<Position, CoreError> {
        if offset > self.rope.len_chars() {
            return Err(CoreError::OffsetOutOfBounds(offset));
        }
        let line = self.rope.char_to_line(offset);
        let col = offset - self.rope.line_to_char(line);
        Ok(Position::new(line, col))
    }

    fn anchor_at(&self, offset: usize) -> Anchor {
        Anchor::at(offset.min(self.rope.len_chars()))
    }

    fn resolve_anchor(&self, anchor: &Anchor) -> Option<usize> {
        (anchor.offset <= self.rope.len_chars()).then_some(anchor.offset)
    }
}

/// Disk-backed [`SourceResolver`] driven by project roots and a file
/// extension → language table.
#[derive(Debug, Clone, Default)]
pub struct FsResolver {
    roots: HashMap<String, PathBuf>,
    project_languages: HashMap<String, String>,
    extensions: HashMap<String, String>,
    fallback_root: Option<PathBuf>,
}

impl FsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root used for projects that were never registered.
    pub fn with_fallback_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.fallback_root = Some(root.into());
        self
    }

    /// Register a project root and optionally its language.
    pub fn add_project(&mut self, name: &str, root: impl Into<PathBuf>, language: Option<&str>) {
        self.roots.insert(name.to_string(), root.into());
        if let Some(lang) = language {
            self.project_languages
                .insert(name.to_string(), lang.to_string());
        }
    }

    /// Map a file extension (without dot) to a language id.
    pub fn add_extension(&mut self, extension: &str, language: &str) {
        self.extensions
            .insert(extension.trim_start_matches('.').to_string(), language.to_string());
    }

    fn root_for(&self, project: &str) -> Result<&Path, CoreError> {
        self.roots
            .get(project)
            .or(self.fallback_root.as_ref())
            .map(PathBuf::as_path)
            .ok_or_else(|| CoreError::UnknownProject(project.to_string()))
    }
}

impl SourceResolver for FsResolver {
    fn open(&self, project: &str, path: &Path) -> Result<Arc<dyn SourceFile>, CoreError> {
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_for(project)?.join(path)
        };
        Ok(Arc::new(RopeSource::load(&full)?))
    }

    fn project_language(&self, project: &str) -> Option<String> {
        self.project_languages.get(project).cloned()
    }

    fn language_of(&self, path: &Path) -> Option<String> {
        let ext = path.extension()?.to_str()?;
        self.extensions.get(ext).cloned()
    }
}
