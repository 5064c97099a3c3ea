//! Model library layout
//!
//! ```text
//! .../models/manifests/registry.<host>/library/<model>/<tag>
//! ```
//!
//! Exactly one segment below `library` names the model; zero or one
//! further segment names the tag file.

use std::path::{Component, Path};

use crate::{WILDCARD_TAG, entity_id};

/// Well-known directory directly above the model directories
pub const LIBRARY_SEGMENT: &str = "library";

/// Position of a path inside the library tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryPath {
    /// `library/<model>`
    Model { model: String },

    /// `library/<model>/<tag>`
    Tag { model: String, tag: String },
}

impl LibraryPath {
    /// Entity identifier; whole-model paths use the wildcard tag
    pub fn entity_id(&self) -> String {
        match self {
            LibraryPath::Model { model } => entity_id(model, WILDCARD_TAG),
            LibraryPath::Tag { model, tag } => entity_id(model, tag),
        }
    }
}

/// Classify `path` relative to the watched `root`.
///
/// Paths outside the root fall back to locating the `library` segment,
/// which also works for paths that no longer exist on disk.
pub fn classify(root: &Path, path: &Path) -> Option<LibraryPath> {
    let segments = match path.strip_prefix(root) {
        Ok(relative) => normal_segments(relative)?,
        Err(_) => segments_after_library(path)?,
    };

    from_segments(&segments)
}

fn from_segments(segments: &[String]) -> Option<LibraryPath> {
    match segments {
        [model] => Some(LibraryPath::Model {
            model: model.clone(),
        }),
        [model, tag] => Some(LibraryPath::Tag {
            model: model.clone(),
            tag: tag.clone(),
        }),
        _ => None,
    }
}

fn normal_segments(relative: &Path) -> Option<Vec<String>> {
    relative
        .components()
        .map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

fn segments_after_library(path: &Path) -> Option<Vec<String>> {
    let segments: Vec<String> = path
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    let library = segments.iter().position(|s| s == LIBRARY_SEGMENT)?;
    Some(segments[library + 1..].to_vec())
}
