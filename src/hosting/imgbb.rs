//! imgbb.com upload backend, the primary host in the default chain.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{ImageFile, ImageHost};

pub const DEFAULT_ENDPOINT: &str = "https://api.imgbb.com/1/upload";

pub struct ImgbbHost {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl ImgbbHost {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            endpoint,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    success: bool,
    #[serde(default)]
    data: Option<UploadData>,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    url: String,
}

#[async_trait]
impl ImageHost for ImgbbHost {
    fn name(&self) -> &str {
        "imgbb"
    }

    async fn upload(&self, image: &ImageFile) -> Result<String> {
        let part = Part::bytes(image.bytes.clone()).file_name(image.file_name.clone());
        let form = Form::new().part("image", part);

        let resp = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .multipart(form)
            .send()
            .await
            .context("imgbb upload: request failed")?;

        if !resp.status().is_success() {
            bail!("imgbb upload failed: {}", resp.status());
        }

        let body: UploadResponse = resp
            .json()
            .await
            .context("imgbb upload: invalid response body")?;
        match body.data {
            Some(data) if body.success => Ok(data.url),
            _ => bail!("imgbb rejected the upload"),
        }
    }
}
