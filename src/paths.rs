//! Confinement of user-supplied paths to a workload root

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Resolve `requested` against `root` without leaving it.
///
/// Absolute paths already under `root` are accepted as-is; any other
/// absolute path is treated as relative to `root`. `..` components that
/// would climb above `root` are rejected. The check is lexical.
pub fn resolve_in_root(root: &Path, requested: &str) -> Result<PathBuf> {
    let requested_path = Path::new(requested);
    let relative = requested_path
        .strip_prefix(root)
        .unwrap_or(requested_path);

    let mut resolved = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(Error::PathOutsideRoot(PathBuf::from(requested)));
                }
            }
        }
    }

    Ok(root.join(resolved))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_and_absolute_forms() {
        let root = Path::new("/srv/a");
        assert_eq!(resolve_in_root(root, "data.txt").unwrap(), root.join("data.txt"));
        assert_eq!(resolve_in_root(root, "/srv/a/x/y").unwrap(), root.join("x/y"));
        assert_eq!(resolve_in_root(root, "/plugins").unwrap(), root.join("plugins"));
        assert_eq!(resolve_in_root(root, "/").unwrap(), root.to_path_buf());
        assert_eq!(resolve_in_root(root, "a/../b").unwrap(), root.join("b"));
    }

    #[test]
    fn test_escape_rejected() {
        let root = Path::new("/srv/a");
        assert!(matches!(
            resolve_in_root(root, "../b"),
            Err(Error::PathOutsideRoot(_))
        ));
        assert!(matches!(
            resolve_in_root(root, "x/../../etc/passwd"),
            Err(Error::PathOutsideRoot(_))
        ));
    }
}
