//! TOML configuration: Cloud API credentials plus image-hosting settings.
//!
//! Lives at `<config-dir>/config.toml`, where the config dir is
//! `$WABLAST_CONFIG_DIR` (tilde-expanded) or `~/.wablast`. Credentials can
//! be overridden per-invocation through `WABLAST_*` environment variables.

use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

use crate::graph;
use crate::hosting::{imgbb, postimages};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Graph API bearer token.
    #[serde(default)]
    pub access_token: String,

    /// The sending phone number's id (the long numeric id, not the number).
    #[serde(default)]
    pub phone_number_id: String,

    /// WhatsApp Business Account id, used for template and phone-number
    /// listings.
    #[serde(default)]
    pub business_account_id: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,

    #[serde(default)]
    pub hosting: HostingConfig,

    /// Where this config was loaded from; never serialized.
    #[serde(skip)]
    pub config_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostingConfig {
    #[serde(default = "default_imgbb_endpoint")]
    pub imgbb_endpoint: String,

    /// Widely-shared anonymous-upload key; replace with your own imgbb key
    /// for anything beyond casual use.
    #[serde(default = "default_imgbb_api_key")]
    pub imgbb_api_key: String,

    #[serde(default = "default_postimages_endpoint")]
    pub postimages_endpoint: String,
}

fn default_api_version() -> String {
    graph::DEFAULT_API_VERSION.to_string()
}

fn default_graph_base_url() -> String {
    graph::DEFAULT_BASE_URL.to_string()
}

fn default_imgbb_endpoint() -> String {
    imgbb::DEFAULT_ENDPOINT.to_string()
}

fn default_imgbb_api_key() -> String {
    "fa3edc579a0f0b27ccf5e24686bcad6b".to_string()
}

fn default_postimages_endpoint() -> String {
    postimages::DEFAULT_ENDPOINT.to_string()
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            imgbb_endpoint: default_imgbb_endpoint(),
            imgbb_api_key: default_imgbb_api_key(),
            postimages_endpoint: default_postimages_endpoint(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            phone_number_id: String::new(),
            business_account_id: String::new(),
            api_version: default_api_version(),
            graph_base_url: default_graph_base_url(),
            hosting: HostingConfig::default(),
            config_path: PathBuf::new(),
        }
    }
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("WABLAST_CONFIG_DIR") {
            if !dir.trim().is_empty() {
                return Ok(PathBuf::from(shellexpand::tilde(&dir).into_owned()));
            }
        }

        let user_dirs = UserDirs::new().context("could not determine the home directory")?;
        Ok(user_dirs.home_dir().join(".wablast"))
    }

    pub async fn load_or_init() -> Result<Self> {
        let config_dir = Self::config_dir()?;
        let config_path = config_dir.join("config.toml");

        fs::create_dir_all(&config_dir)
            .await
            .with_context(|| format!("failed to create config directory {}", config_dir.display()))?;

        if config_path.exists() {
            // Warn if the config file is world-readable (it holds the token)
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = fs::metadata(&config_path).await {
                    if meta.permissions().mode() & 0o004 != 0 {
                        tracing::warn!(
                            "Config file {:?} is world-readable (mode {:o}). \
                             Consider restricting with: chmod 600 {:?}",
                            config_path,
                            meta.permissions().mode() & 0o777,
                            config_path,
                        );
                    }
                }
            }

            let contents = fs::read_to_string(&config_path)
                .await
                .context("failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("failed to parse config file")?;
            config.config_path = config_path.clone();
            config.apply_env_overrides();
            config.validate()?;
            tracing::info!(
                path = %config.config_path.display(),
                initialized = false,
                "Config loaded"
            );
            Ok(config)
        } else {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.save().await?;

            // Restrict permissions on the freshly written file
            #[cfg(unix)]
            {
                use std::{fs::Permissions, os::unix::fs::PermissionsExt};
                let _ = fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
            }

            config.apply_env_overrides();
            config.validate()?;
            tracing::info!(
                path = %config.config_path.display(),
                initialized = true,
                "Config loaded"
            );
            Ok(config)
        }
    }

    /// Environment variables beat the config file for one-off invocations
    /// and CI usage.
    pub fn apply_env_overrides(&mut self) {
        let overrides = [
            ("WABLAST_ACCESS_TOKEN", &mut self.access_token),
            ("WABLAST_PHONE_NUMBER_ID", &mut self.phone_number_id),
            (
                "WABLAST_BUSINESS_ACCOUNT_ID",
                &mut self.business_account_id,
            ),
            ("WABLAST_IMGBB_API_KEY", &mut self.hosting.imgbb_api_key),
        ];
        for (name, field) in overrides {
            if let Ok(value) = std::env::var(name) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    *field = trimmed.to_string();
                }
            }
        }
    }

    /// Catch obviously broken values at load time instead of failing at
    /// arbitrary points mid-batch.
    pub fn validate(&self) -> Result<()> {
        if self.api_version.trim().is_empty() || !self.api_version.starts_with('v') {
            anyhow::bail!(
                "api_version must look like \"v22.0\", got {:?}",
                self.api_version
            );
        }

        if !self.graph_base_url.starts_with("https://") {
            anyhow::bail!("graph_base_url must be https, got {:?}", self.graph_base_url);
        }

        if !self.phone_number_id.is_empty()
            && (self.phone_number_id.len() < 10
                || !self.phone_number_id.chars().all(|c| c.is_ascii_digit()))
        {
            anyhow::bail!(
                "phone_number_id should be the long numeric id from the API setup page, \
                 not the phone number itself"
            );
        }

        if !self.access_token.is_empty() && self.access_token.len() < 50 {
            anyhow::bail!("access_token looks too short; paste the full token");
        }

        if self.hosting.imgbb_endpoint.trim().is_empty()
            || self.hosting.postimages_endpoint.trim().is_empty()
        {
            anyhow::bail!("hosting endpoints must not be empty");
        }

        Ok(())
    }

    pub async fn save(&self) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).context("failed to serialize config to TOML")?;
        fs::write(&self.config_path, contents)
            .await
            .with_context(|| format!("failed to write {}", self.config_path.display()))?;
        Ok(())
    }

    /// True once the operator has supplied both credentials `send` needs.
    pub fn has_credentials(&self) -> bool {
        !self.access_token.is_empty() && !self.phone_number_id.is_empty()
    }
}
