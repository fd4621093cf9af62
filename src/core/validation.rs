//! Validation for file names and container paths
//!
//! File names are opaque byte strings inside a container; the only rules are
//! that they are non-empty and fit in a name slot. Container paths are
//! normalized lexically so that one medium always maps to one registry key.

use crate::error::{PakError, Result};
use crate::record::NAME_CAPACITY;
use std::path::{Component, Path, PathBuf};

/// Validate a file name for storage in a name slot
///
/// # Rules
/// - Must not be empty
/// - UTF-8 encoded length at most 255 bytes
///
/// # Examples
///
/// ```
/// use fhdpak::core::validation::validate_file_name;
///
/// assert!(validate_file_name("textures/hero.png").is_ok());
/// assert!(validate_file_name("").is_err());
/// assert!(validate_file_name(&"x".repeat(256)).is_err());
/// ```
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PakError::EmptyName);
    }

    if name.len() > NAME_CAPACITY {
        return Err(PakError::NameTooLong(name.len()));
    }

    Ok(())
}

/// Normalize a container path into its registry key
///
/// Removes `.` components and folds `..` into the preceding component
/// without touching the filesystem. The result must still name a file.
///
/// # Examples
///
/// ```
/// use fhdpak::core::validation::normalize_container_key;
/// use std::path::Path;
///
/// let key = normalize_container_key(Path::new("data/./paks/../main.pak")).unwrap();
/// assert_eq!(key, Path::new("data/main.pak"));
///
/// assert!(normalize_container_key(Path::new("")).is_err());
/// assert!(normalize_container_key(Path::new("data/..")).is_err());
/// ```
pub fn normalize_container_key(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                normalized.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    normalized.pop();
                    depth -= 1;
                } else if !normalized.has_root() {
                    normalized.push("..");
                }
            }
            Component::Normal(part) => {
                normalized.push(part);
                depth += 1;
            }
        }
    }

    if depth == 0 {
        return Err(PakError::InvalidPath);
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_file_names() {
        assert!(validate_file_name("a").is_ok());
        assert!(validate_file_name("sounds/theme.ogg").is_ok());
        assert!(validate_file_name(&"n".repeat(255)).is_ok());
        assert!(validate_file_name("ünïcödé").is_ok());
    }

    #[test]
    fn test_invalid_file_names() {
        assert!(matches!(validate_file_name(""), Err(PakError::EmptyName)));
        assert!(matches!(
            validate_file_name(&"n".repeat(256)),
            Err(PakError::NameTooLong(256))
        ));
        // 128 two-byte characters
        assert!(validate_file_name(&"é".repeat(128)).is_err());
    }

    #[test]
    fn test_normalize_plain_path() {
        let key = normalize_container_key(Path::new("main.pak")).unwrap();
        assert_eq!(key, Path::new("main.pak"));
    }

    #[test]
    fn test_normalize_dot_components() {
        let key = normalize_container_key(Path::new("./data/./main.pak")).unwrap();
        assert_eq!(key, Path::new("data/main.pak"));

        let key = normalize_container_key(Path::new("data/sub/../main.pak")).unwrap();
        assert_eq!(key, Path::new("data/main.pak"));
    }

    #[test]
    fn test_normalize_absolute_path() {
        let key = normalize_container_key(Path::new("/srv/../srv/paks//main.pak")).unwrap();
        assert_eq!(key, Path::new("/srv/paks/main.pak"));

        // Cannot climb above the root
        let key = normalize_container_key(Path::new("/../main.pak")).unwrap();
        assert_eq!(key, Path::new("/main.pak"));
    }

    #[test]
    fn test_normalize_leading_parent_kept() {
        let key = normalize_container_key(Path::new("../shared/main.pak")).unwrap();
        assert_eq!(key, Path::new("../shared/main.pak"));
    }

    #[test]
    fn test_same_medium_same_key() {
        let a = normalize_container_key(Path::new("data/main.pak")).unwrap();
        let b = normalize_container_key(Path::new("data/x/../main.pak")).unwrap();
        let c = normalize_container_key(Path::new("./data/main.pak")).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_normalize_rejects_non_file() {
        assert!(matches!(
            normalize_container_key(Path::new("")),
            Err(PakError::InvalidPath)
        ));
        assert!(normalize_container_key(Path::new(".")).is_err());
        assert!(normalize_container_key(Path::new("/")).is_err());
        assert!(normalize_container_key(Path::new("data/..")).is_err());
    }
}
