//! Public image-hosting strategies used to turn a local file into a URL
//! the Cloud API can fetch.
//!
//! Hosts are tried in configured order, each at most once per submission.
//! The first success wins; exhausting the chain is a terminal error and
//! the operator has to host the image themselves.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;

pub mod imgbb;
pub mod postimages;

pub use imgbb::ImgbbHost;
pub use postimages::PostimagesHost;

/// WhatsApp rejects images above 5 MB.
pub const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// A local image read into memory, ready for multipart upload.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

/// Read and sanity-check a local image before any upload is attempted.
pub async fn load_image_file(path: &Path) -> Result<ImageFile> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        bail!(
            "{} does not look like an image (expected one of: {})",
            path.display(),
            IMAGE_EXTENSIONS.join(", ")
        );
    }

    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("failed to stat {}", path.display()))?;
    if metadata.len() > MAX_IMAGE_BYTES {
        bail!(
            "{} is {:.2} MB; WhatsApp images must be at most 5 MB",
            path.display(),
            metadata.len() as f64 / 1024.0 / 1024.0
        );
    }

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("image.png")
        .to_string();

    Ok(ImageFile { bytes, file_name })
}

/// One hosting service that accepts a multipart upload and returns a
/// public URL.
#[async_trait]
pub trait ImageHost: Send + Sync {
    fn name(&self) -> &str;

    async fn upload(&self, image: &ImageFile) -> Result<String>;
}

/// Try each host once, in order. Returns the first hosted URL, or a
/// terminal error naming every host that was attempted.
pub async fn upload_with_fallback(
    hosts: &[Box<dyn ImageHost>],
    image: &ImageFile,
) -> Result<String> {
    let mut attempted = Vec::new();
    for host in hosts {
        match host.upload(image).await {
            Ok(url) => {
                tracing::info!(host = host.name(), url = %url, "image hosted");
                return Ok(url);
            }
            Err(error) => {
                tracing::warn!(host = host.name(), "image upload failed: {error:#}");
                attempted.push(host.name().to_string());
            }
        }
    }
    bail!(
        "every image host failed ({}); host the image yourself and pass --image-url",
        attempted.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubHost {
        name: &'static str,
        url: Option<&'static str>,
    }

    #[async_trait]
    impl ImageHost for StubHost {
        fn name(&self) -> &str {
            self.name
        }

        async fn upload(&self, _image: &ImageFile) -> Result<String> {
            match self.url {
                Some(url) => Ok(url.to_string()),
                None => bail!("service unavailable"),
            }
        }
    }

    fn make_image() -> ImageFile {
        ImageFile {
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
            file_name: "promo.png".into(),
        }
    }

    #[tokio::test]
    async fn first_host_wins_when_it_succeeds() {
        let hosts: Vec<Box<dyn ImageHost>> = vec![
            Box::new(StubHost {
                name: "primary",
                url: Some("https://primary.example/a.png"),
            }),
            Box::new(StubHost {
                name: "secondary",
                url: Some("https://secondary.example/a.png"),
            }),
        ];
        let url = upload_with_fallback(&hosts, &make_image()).await.unwrap();
        assert_eq!(url, "https://primary.example/a.png");
    }

    #[tokio::test]
    async fn falls_back_to_secondary_when_primary_fails() {
        let hosts: Vec<Box<dyn ImageHost>> = vec![
            Box::new(StubHost {
                name: "primary",
                url: None,
            }),
            Box::new(StubHost {
                name: "secondary",
                url: Some("https://secondary.example/a.png"),
            }),
        ];
        let url = upload_with_fallback(&hosts, &make_image()).await.unwrap();
        assert_eq!(url, "https://secondary.example/a.png");
    }

    #[tokio::test]
    async fn exhausted_chain_names_every_host() {
        let hosts: Vec<Box<dyn ImageHost>> = vec![
            Box::new(StubHost {
                name: "primary",
                url: None,
            }),
            Box::new(StubHost {
                name: "secondary",
                url: None,
            }),
        ];
        let error = upload_with_fallback(&hosts, &make_image())
            .await
            .unwrap_err();
        let message = format!("{error}");
        assert!(message.contains("primary, secondary"));
        assert!(message.contains("--image-url"));
    }

    #[tokio::test]
    async fn load_rejects_non_image_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();
        let error = load_image_file(&path).await.unwrap_err();
        assert!(format!("{error}").contains("does not look like an image"));
    }

    #[tokio::test]
    async fn load_rejects_oversized_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        tokio::fs::write(&path, vec![0u8; (MAX_IMAGE_BYTES + 1) as usize])
            .await
            .unwrap();
        let error = load_image_file(&path).await.unwrap_err();
        assert!(format!("{error}").contains("at most 5 MB"));
    }

    #[tokio::test]
    async fn load_reads_valid_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promo.JPG");
        tokio::fs::write(&path, b"\xff\xd8\xff").await.unwrap();
        let image = load_image_file(&path).await.unwrap();
        assert_eq!(image.file_name, "promo.JPG");
        assert_eq!(image.bytes.len(), 3);
    }
}
