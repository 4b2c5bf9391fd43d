use std::path::{Component, Path};

use crate::UploadError;

/// Validates that `name` is a single, plain path component.
///
/// Used for client-supplied filenames and upload ids before they are joined
/// onto a storage directory.
///
/// Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`) and `.`
/// - Windows prefix components (`C:`, `\\server`)
/// - Any separator, i.e. more than one component
pub fn validate_file_name(name: &str) -> Result<(), UploadError> {
    if name.is_empty() {
        return Err(UploadError::InvalidArgument("empty file name".into()));
    }
    if name.contains(['/', '\\']) {
        return Err(UploadError::InvalidArgument(format!(
            "path separators not allowed: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::ParentDir), _) => Err(UploadError::InvalidArgument(format!(
            "parent directory traversal not allowed: {name}"
        ))),
        (Some(Component::Prefix(_)), _) => Err(UploadError::InvalidArgument(format!(
            "path prefix not allowed: {name}"
        ))),
        (Some(Component::RootDir), _) => Err(UploadError::InvalidArgument(format!(
            "absolute path not allowed: {name}"
        ))),
        _ => Err(UploadError::InvalidArgument(format!(
            "not a plain file name: {name}"
        ))),
    }
}
