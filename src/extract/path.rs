// src/extract/path.rs

//! Path sanitization for archive entries
//!
//! Entry names come from untrusted archives. They are normalized to a path
//! relative to the extraction root before anything touches the filesystem.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Normalize an entry path to a root-relative path
///
/// Leading slashes are stripped (absolute paths are re-rooted) and `.`
/// components dropped. A `..` component is a traversal attempt. An empty
/// result means the root itself.
///
/// ```
/// use pkgbridge::extract::path::sanitize_entry_path;
/// use std::path::PathBuf;
///
/// assert_eq!(sanitize_entry_path("./usr/bin/jq").unwrap(), PathBuf::from("usr/bin/jq"));
/// assert_eq!(sanitize_entry_path("/etc/hosts").unwrap(), PathBuf::from("etc/hosts"));
/// assert!(sanitize_entry_path("usr/../../etc/passwd").is_err());
/// ```
pub fn sanitize_entry_path(raw: &str) -> Result<PathBuf> {
    let relative = raw.trim_start_matches('/');
    let mut normalized = PathBuf::new();

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => return Err(Error::PathTraversal(raw.to_string())),
            Component::Prefix(_) | Component::RootDir => {}
        }
    }

    Ok(normalized)
}

/// Join a sanitized entry path onto `root`
///
/// Every existing ancestor of the entry below `root` is inspected. A symlink
/// among them must resolve under the canonical root, which catches escapes
/// through links written by earlier entries even when the directories after
/// the link do not exist yet. A dangling link is rejected outright. The last
/// component is not followed; writers replace whatever sits there.
pub fn safe_join(root: &Path, raw: &str) -> Result<PathBuf> {
    let relative = sanitize_entry_path(raw)?;
    let joined = root.join(&relative);

    let Ok(canonical_root) = root.canonicalize() else {
        return Ok(joined);
    };
    let escape = || {
        Error::PathTraversal(format!("{} escapes {} through a symlink", raw, root.display()))
    };

    let mut current = root.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => match current.canonicalize() {
                Ok(resolved) if resolved.starts_with(&canonical_root) => {}
                _ => return Err(escape()),
            },
            Ok(_) => {}
            Err(_) => break,
        }
    }

    Ok(joined)
}
