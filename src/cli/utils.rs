use simple_error::{SimpleResult, bail};

/// Check a required input filename
///
/// Assumes no logger has been configured yet
///
pub fn check_required_filename(filename: &str, label: &str) -> SimpleResult<()> {
    if filename.is_empty() {
        bail!("Must specify {label} file");
    }
    let path = std::path::Path::new(&filename);
    if !path.exists() {
        bail!("Can't find specified {label} file: '{filename}'");
    }
    if !path.is_file() {
        bail!("Specified {label} file path does not appear to be a file: '{filename}'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_required_filename() {
        let dir = tempfile::tempdir().unwrap();
        let filename = dir.path().join("test.txt");
        std::fs::write(&filename, "x").unwrap();

        assert!(check_required_filename(filename.to_str().unwrap(), "test").is_ok());
        assert!(check_required_filename("", "test").is_err());
        assert!(check_required_filename(dir.path().to_str().unwrap(), "test").is_err());
        assert!(check_required_filename("/nonexistent/test.txt", "test").is_err());
    }
}
