//! postimages.org upload backend, the secondary host in the default
//! chain. Needs no API key.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{ImageFile, ImageHost};

pub const DEFAULT_ENDPOINT: &str = "https://postimages.org/json/rr";

pub struct PostimagesHost {
    endpoint: String,
    client: reqwest::Client,
}

impl PostimagesHost {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    url: Option<String>,
}

#[async_trait]
impl ImageHost for PostimagesHost {
    fn name(&self) -> &str {
        "postimages"
    }

    async fn upload(&self, image: &ImageFile) -> Result<String> {
        let part = Part::bytes(image.bytes.clone()).file_name(image.file_name.clone());
        let form = Form::new().part("upload", part);

        let resp = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .context("postimages upload: request failed")?;

        if !resp.status().is_success() {
            bail!("postimages upload failed: {}", resp.status());
        }

        let body: UploadResponse = resp
            .json()
            .await
            .context("postimages upload: invalid response body")?;
        match body.url {
            Some(url) if !url.is_empty() => Ok(url),
            _ => bail!("postimages returned no hosted URL"),
        }
    }
}
