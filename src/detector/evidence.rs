//! Blocked-page snapshots

use chrono::Utc;
use std::path::{Path, PathBuf};

/// Writes the body of a blocked page to `<dir>/<session>-<timestamp>.html`
///
/// The directory is created if needed. Returns the written path.
pub async fn write_evidence(dir: &Path, session_id: &str, body: &str) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let file_name = format!(
        "{}-{}.html",
        session_id,
        Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
    );
    let path = dir.join(file_name);
    tokio::fs::write(&path, body).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("evidence");
        let path = write_evidence(&nested, "session-1", "<html>captcha</html>")
            .await
            .unwrap();

        assert!(path.starts_with(&nested));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("session-1-"));
        assert!(name.ends_with(".html"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<html>captcha</html>");
    }
}
