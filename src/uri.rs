//! `file://` URI <-> filesystem path conversion — documents are identified
//! to servers by URI (§3) but the core works in `PathBuf`s everywhere else.

use std::path::{Path, PathBuf};

use crate::error::DaemonError;

pub fn path_to_uri(path: &Path) -> String {
    url::Url::from_file_path(path)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("file://{}", path.display()))
}

pub fn uri_to_path(uri: &str) -> Result<PathBuf, DaemonError> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
        .ok_or_else(|| DaemonError::Protocol(format!("not a file:// URI: {uri}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_absolute_path() {
        let path = Path::new("/tmp/some dir/file.rs");
        let uri = path_to_uri(path);
        assert!(uri.starts_with("file://"));
        let back = uri_to_path(&uri).unwrap();
        assert_eq!(back, path);
    }
}
