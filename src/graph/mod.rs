//! WhatsApp Business Cloud API (Graph) client.
//!
//! All operations hit `https://graph.facebook.com/<api-version>/...` with
//! bearer-token auth. The base URL is injectable so tests can point the
//! client at a local mock server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::template::TemplateDefinition;
use crate::util::truncate_with_ellipsis;

pub const DEFAULT_BASE_URL: &str = "https://graph.facebook.com";
pub const DEFAULT_API_VERSION: &str = "v22.0";

/// Provider error bodies are logged verbatim up to this many characters.
const MAX_ERROR_CHARS: usize = 500;

/// Graph error code for "template parameter format mismatch".
const PARAM_FORMAT_ERROR_CODE: i64 = 132_012;

// ── Outbound wire payloads ──────────────────────────────────────────────

/// JSON body for `POST /<v>/<phone-number-id>/messages`, discriminated by
/// `type` (`template` | `image`).
#[derive(Debug, Clone, Serialize)]
pub struct MessagePayload {
    pub messaging_product: &'static str,
    pub recipient_type: &'static str,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplatePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<MediaLink>,
}

impl MessagePayload {
    /// A template message; an empty `components` list is omitted from the
    /// wire body entirely (simple mode).
    pub fn template(
        to: &str,
        name: &str,
        language: &str,
        components: Vec<ComponentPayload>,
    ) -> Self {
        Self {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to: to.to_string(),
            kind: "template",
            template: Some(TemplatePayload {
                name: name.to_string(),
                language: LanguageCode {
                    code: language.to_string(),
                },
                components: if components.is_empty() {
                    None
                } else {
                    Some(components)
                },
            }),
            image: None,
        }
    }

    /// A direct image message with an optional caption.
    pub fn image(to: &str, link: &str, caption: Option<&str>) -> Self {
        Self {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to: to.to_string(),
            kind: "image",
            template: None,
            image: Some(MediaLink {
                link: link.to_string(),
                caption: caption
                    .map(str::trim)
                    .filter(|caption| !caption.is_empty())
                    .map(ToString::to_string),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplatePayload {
    pub name: String,
    pub language: LanguageCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<ComponentPayload>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LanguageCode {
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentPayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub parameters: Vec<ComponentParameter>,
}

impl ComponentPayload {
    pub fn header(parameter: ComponentParameter) -> Self {
        Self {
            kind: "header",
            parameters: vec![parameter],
        }
    }

    pub fn body(parameters: Vec<ComponentParameter>) -> Self {
        Self {
            kind: "body",
            parameters,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ComponentParameter {
    Text { text: String },
    Image { image: MediaLink },
    Video { video: MediaLink },
    Document { document: MediaLink },
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaLink {
    pub link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl MediaLink {
    pub fn new(link: &str) -> Self {
        Self {
            link: link.to_string(),
            caption: None,
        }
    }
}

// ── Responses ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

/// What the provider acknowledged for one accepted message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhoneNumberInfo {
    pub id: String,
    #[serde(default)]
    pub display_phone_number: Option<String>,
    #[serde(default)]
    pub verified_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    #[serde(default)]
    data: Vec<T>,
}

/// Outcome of the dummy-send diagnostic probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The endpoint accepted or rejected the payload itself; it is
    /// reachable and the phone number id can send.
    Reachable,
    /// HTTP 404: the phone number id cannot send messages.
    WrongPhoneNumberId,
    Other(String),
}

// ── Seam for the dispatcher ─────────────────────────────────────────────

/// Anything that can deliver one outbound message. The dispatcher fans out
/// over this trait; tests substitute scripted implementations.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, payload: &MessagePayload) -> Result<SendReceipt>;
}

// ── Client ──────────────────────────────────────────────────────────────

pub struct GraphClient {
    base_url: String,
    api_version: String,
    phone_number_id: String,
    business_account_id: String,
    access_token: String,
    client: reqwest::Client,
}

impl GraphClient {
    pub fn new(access_token: String, phone_number_id: String, business_account_id: String) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            phone_number_id,
            business_account_id,
            access_token,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.access_token.clone(),
            config.phone_number_id.clone(),
            config.business_account_id.clone(),
        )
        .with_base_url(&config.graph_base_url)
        .with_api_version(&config.api_version)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_version(mut self, api_version: &str) -> Self {
        self.api_version = api_version.to_string();
        self
    }

    fn node_url(&self, node: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.api_version, node)
    }

    async fn get_node(&self, node: &str, op: &str) -> Result<reqwest::Response> {
        let resp = self
            .client
            .get(self.node_url(node))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .with_context(|| format!("{op}: request failed"))?;

        if !resp.status().is_success() {
            return Err(api_error(op, resp).await);
        }
        Ok(resp)
    }

    /// `GET /<v>/<phone-number-id>`: verifies the credentials and the
    /// phone number id in one round trip.
    pub async fn phone_number_info(&self) -> Result<PhoneNumberInfo> {
        let resp = self
            .get_node(&self.phone_number_id, "phone number lookup")
            .await?;
        resp.json()
            .await
            .context("phone number lookup: invalid response body")
    }

    /// `GET /<v>/<business-account-id>`: business account reachability.
    pub async fn business_account_info(&self) -> Result<serde_json::Value> {
        let resp = self
            .get_node(&self.business_account_id, "business account lookup")
            .await?;
        resp.json()
            .await
            .context("business account lookup: invalid response body")
    }

    /// `GET /<v>/<business-account-id>/phone_numbers`.
    pub async fn list_phone_numbers(&self) -> Result<Vec<PhoneNumberInfo>> {
        let node = format!("{}/phone_numbers", self.business_account_id);
        let resp = self.get_node(&node, "phone number listing").await?;
        let envelope: DataEnvelope<PhoneNumberInfo> = resp
            .json()
            .await
            .context("phone number listing: invalid response body")?;
        Ok(envelope.data)
    }

    /// `GET /<v>/<business-account-id>/message_templates?name=&language=`.
    ///
    /// Returns the first matching template, components included.
    pub async fn find_template(
        &self,
        name: &str,
        language: &str,
    ) -> Result<Option<TemplateDefinition>> {
        let url = self.node_url(&format!("{}/message_templates", self.business_account_id));
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[("name", name), ("language", language)])
            .send()
            .await
            .context("template lookup: request failed")?;

        if !resp.status().is_success() {
            return Err(api_error("template lookup", resp).await);
        }

        let envelope: DataEnvelope<TemplateDefinition> = resp
            .json()
            .await
            .context("template lookup: invalid response body")?;
        Ok(envelope.data.into_iter().next())
    }

    /// `GET /<v>/<business-account-id>/message_templates` unfiltered.
    pub async fn list_templates(&self) -> Result<Vec<TemplateDefinition>> {
        let node = format!("{}/message_templates", self.business_account_id);
        let resp = self.get_node(&node, "template listing").await?;
        let envelope: DataEnvelope<TemplateDefinition> = resp
            .json()
            .await
            .context("template listing: invalid response body")?;
        Ok(envelope.data)
    }

    /// `GET /<v>/<message-id>` for each id, concurrently; one id's failure
    /// does not block the others.
    pub async fn message_statuses(
        &self,
        message_ids: &[String],
    ) -> Vec<(String, Result<serde_json::Value>)> {
        let lookups = message_ids.iter().map(|id| async move {
            let result = async {
                let resp = self.get_node(id, "message status lookup").await?;
                resp.json::<serde_json::Value>()
                    .await
                    .context("message status lookup: invalid response body")
            }
            .await;
            (id.clone(), result)
        });
        futures_util::future::join_all(lookups).await
    }

    /// Dummy `POST /messages` with an unroutable recipient: HTTP 400 means
    /// the endpoint works and merely rejected the payload, HTTP 404 means
    /// the phone number id cannot send.
    pub async fn probe_messages_endpoint(&self) -> Result<ProbeOutcome> {
        let payload = MessagePayload::template("+1234567890", "hello_world", "en_US", Vec::new());
        let resp = self
            .client
            .post(self.node_url(&format!("{}/messages", self.phone_number_id)))
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .context("messages endpoint probe: request failed")?;

        let status = resp.status();
        if status.is_success() || status == reqwest::StatusCode::BAD_REQUEST {
            Ok(ProbeOutcome::Reachable)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Ok(ProbeOutcome::WrongPhoneNumberId)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Ok(ProbeOutcome::Other(format!(
                "{status}: {}",
                extract_error_message(&body)
            )))
        }
    }
}

#[async_trait]
impl MessageSender for GraphClient {
    async fn send_message(&self, payload: &MessagePayload) -> Result<SendReceipt> {
        let url = self.node_url(&format!("{}/messages", self.phone_number_id));
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .context("message send: request failed")?;

        if !resp.status().is_success() {
            return Err(api_error("message send", resp).await);
        }

        let body: SendResponse = resp
            .json()
            .await
            .context("message send: invalid response body")?;
        Ok(SendReceipt {
            message_id: body.messages.into_iter().next().map(|m| m.id),
        })
    }
}

// ── Provider error surfacing ────────────────────────────────────────────

/// Pull the human-readable message out of a Graph error body, preferring
/// `error.error_user_msg` over `error.message`, falling back to the raw
/// (truncated) body.
fn extract_error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|value| value.get("error"));

    let message = error
        .and_then(|error| {
            error
                .get("error_user_msg")
                .or_else(|| error.get("message"))
                .and_then(|message| message.as_str())
        })
        .map(ToString::to_string)
        .unwrap_or_else(|| truncate_with_ellipsis(body.trim(), MAX_ERROR_CHARS));

    match error.and_then(|error| error.get("code")).and_then(serde_json::Value::as_i64) {
        Some(PARAM_FORMAT_ERROR_CODE) => format!(
            "{message} (code {PARAM_FORMAT_ERROR_CODE}: template variables likely need values)"
        ),
        Some(code) => format!("{message} (code {code})"),
        None => message,
    }
}

/// Build an error from a failed Graph response, keeping the provider's own
/// message where one exists.
async fn api_error(op: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    let message = extract_error_message(&body);
    tracing::error!("{op} failed: {status} — {message}");
    anyhow::anyhow!("{op} failed ({status}): {message}")
}
