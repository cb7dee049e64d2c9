//! Name safety validation

use crate::error::StorageError;

/// Reject names carrying a path-traversal sequence. Runs on every namespace
/// name and object key/prefix before any storage call.
pub(crate) fn check_name(name: &str) -> Result<(), StorageError> {
    if name.contains("..") {
        return Err(StorageError::invalid_name("name cannot contain '..'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_pass() {
        assert!(check_name("fizz").is_ok());
        assert!(check_name("path/to/file/./here").is_ok());
        assert!(check_name("").is_ok());
    }

    #[test]
    fn test_traversal_is_rejected() {
        let err = check_name("path/../to/a/file").unwrap_err();
        assert_eq!(err.msg, "name cannot contain '..'");
        assert_eq!(err.status, None);

        assert!(check_name("..").is_err());
        assert!(check_name("a..b").is_err());
    }
}
