//! Image files: read outgoing images, store received ones under the configured directory.

use std::io;
use std::path::{Path, PathBuf};

pub async fn read_image(path: &Path) -> io::Result<Vec<u8>> {
    tokio::fs::read(path).await
}

/// Write a received image as `<sender>_<uuid>.img`. Incomplete transfers get a `.partial` suffix.
pub async fn save_image(dir: &Path, sender: &str, bytes: &[u8], partial: bool) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let mut name = format!("{}_{}.img", file_safe(sender), uuid::Uuid::new_v4());
    if partial {
        name.push_str(".partial");
    }
    let path = dir.join(name);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

/// Handles come off the network; keep only characters that cannot escape the directory.
fn file_safe(handle: &str) -> String {
    let s: String = handle
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if s.is_empty() {
        "unknown".to_string()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn unsafe_handles_are_flattened() {
        assert_eq!(file_safe("bob"), "bob");
        assert_eq!(file_safe("../etc/passwd"), "___etc_passwd");
        assert_eq!(file_safe(""), "unknown");
    }

    #[tokio::test]
    async fn save_then_read_back() {
        let dir = std::env::temp_dir().join(format!("slcp-images-{}", uuid::Uuid::new_v4()));
        let mut data = vec![0u8; 1000];
        rand::thread_rng().fill_bytes(&mut data);

        let full = save_image(&dir, "bob", &data, false).await.unwrap();
        assert!(full.starts_with(&dir));
        let name = full.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("bob_") && name.ends_with(".img"));
        assert_eq!(read_image(&full).await.unwrap(), data);

        let partial = save_image(&dir, "bob", &data[..10], true).await.unwrap();
        assert!(partial.to_string_lossy().ends_with(".img.partial"));
        assert_ne!(full, partial);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let missing = std::env::temp_dir().join("slcp-no-such-image.img");
        assert!(read_image(&missing).await.is_err());
    }
}
