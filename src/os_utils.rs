//! Utilities pertaining to the filesystem
//!

use camino::Utf8Path;

/// Create a directory path if it does not exist already
///
/// * `label` - used to describe the directory in an error message
///
pub fn create_dir_all(dir: &Utf8Path, label: &str) {
    if !dir.is_dir()
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        panic!("Can't create new {label} directory at '{dir}': {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_dir_all() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = Utf8Path::from_path(dir.path()).unwrap().join("a/b");
        create_dir_all(&dir_path, "test");
        assert!(dir_path.is_dir());

        // Repeat call on an existing directory is a no-op
        create_dir_all(&dir_path, "test");
        assert!(dir_path.is_dir());
    }
}
