//! Bulk message dispatch: fail-fast validation, per-recipient concurrent
//! fan-out, and result aggregation.
//!
//! The request struct carries everything the batch needs; credentials live
//! in the [`MessageSender`] implementation. Validation is pure; nothing
//! touches the network until every local check has passed.

use crate::graph::{MessagePayload, MessageSender};
use crate::roster;
use crate::template::{self, TemplateDefinition};

/// One batch submission, assembled by the CLI from flags and config.
#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    pub recipients: Vec<String>,
    pub template_name: String,
    pub template_language: String,
    /// Fetched template structure; `None` outside lookup or in simple mode.
    pub definition: Option<TemplateDefinition>,
    /// Body parameter values, ordered by placeholder index.
    pub bindings: Vec<String>,
    /// The authoritative image URL (uploaded takes precedence over manual).
    pub image_url: Option<String>,
    pub caption: Option<String>,
    /// Send the bare template without components.
    pub simple_mode: bool,
    /// Send a direct image message before (or instead of) the template.
    pub direct_image: bool,
    /// Send only the image message.
    pub image_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no recipients given; pass --to or --roster-file")]
    EmptyRoster,

    #[error("invalid phone numbers (use +<countrycode><digits>): {}", .0.join(", "))]
    InvalidRecipients(Vec<String>),

    #[error("a template name is required unless --image-only is set")]
    MissingTemplateName,

    #[error("{missing} of {expected} template parameter(s) are missing or empty")]
    MissingBindings { expected: usize, missing: usize },

    #[error("the template needs media but no image URL was resolved; upload an image or pass --image-url")]
    MissingImageUrl,

    #[error("--direct-image is set but no image URL was resolved")]
    MissingDirectImageUrl,

    #[error("the template requires a {kind} header but simple mode sends no components; drop --simple and provide the {kind}")]
    SimpleModeMediaConflict { kind: &'static str },
}

impl DispatchRequest {
    /// Fail-fast local validation, run before any network call.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.recipients.is_empty() {
            return Err(ValidationError::EmptyRoster);
        }

        let invalid = roster::invalid_numbers(&self.recipients);
        if !invalid.is_empty() {
            return Err(ValidationError::InvalidRecipients(invalid));
        }

        if self.direct_image && self.image_url.is_none() {
            return Err(ValidationError::MissingDirectImageUrl);
        }

        if self.image_only {
            return Ok(());
        }

        if self.template_name.trim().is_empty() {
            return Err(ValidationError::MissingTemplateName);
        }

        if let Some(kind) = self
            .definition
            .as_ref()
            .and_then(TemplateDefinition::required_header_media)
        {
            if self.simple_mode {
                return Err(ValidationError::SimpleModeMediaConflict {
                    kind: kind.as_str(),
                });
            }
            if self.image_url.is_none() {
                return Err(ValidationError::MissingImageUrl);
            }
        }

        if !self.simple_mode {
            let expected = self
                .definition
                .as_ref()
                .map(TemplateDefinition::placeholders)
                .unwrap_or_default()
                .len();
            if expected > 0 {
                let provided = self
                    .bindings
                    .iter()
                    .filter(|binding| !binding.trim().is_empty())
                    .count();
                if provided < expected {
                    return Err(ValidationError::MissingBindings {
                        expected,
                        missing: expected - provided,
                    });
                }
            }
        }

        Ok(())
    }
}

/// What happened for one recipient.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub recipient: String,
    pub success: bool,
    /// Id of the template message, when one was sent and accepted.
    pub message_id: Option<String>,
    /// Id of the direct image message, when one was sent and accepted.
    pub image_message_id: Option<String>,
    pub error: Option<String>,
}

impl DispatchOutcome {
    fn failure(recipient: &str, image_message_id: Option<String>, error: String) -> Self {
        Self {
            recipient: recipient.to_string(),
            success: false,
            message_id: None,
            image_message_id,
            error: Some(error),
        }
    }
}

/// Aggregated batch result, assembled after every recipient settled.
#[derive(Debug, Default)]
pub struct DispatchSummary {
    pub outcomes: Vec<DispatchOutcome>,
}

impl DispatchSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn failures(&self) -> Vec<&DispatchOutcome> {
        self.outcomes.iter().filter(|o| !o.success).collect()
    }

    /// Every message id the provider handed back, template and image alike.
    pub fn message_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .flat_map(|o| {
                o.message_id
                    .as_deref()
                    .into_iter()
                    .chain(o.image_message_id.as_deref())
            })
            .collect()
    }
}

/// Validate, then fan out one concurrent send per recipient and join all.
///
/// Recipients are isolated: one failure never aborts the others, and the
/// summary is only assembled after every outcome settled. There is no
/// ordering guarantee between recipients and no cancellation once the
/// batch has started.
pub async fn dispatch(
    sender: &dyn MessageSender,
    request: &DispatchRequest,
) -> Result<DispatchSummary, ValidationError> {
    request.validate()?;

    let sends = request
        .recipients
        .iter()
        .map(|recipient| send_to_recipient(sender, request, recipient));
    let outcomes = futures_util::future::join_all(sends).await;

    Ok(DispatchSummary { outcomes })
}

async fn send_to_recipient(
    sender: &dyn MessageSender,
    request: &DispatchRequest,
    recipient: &str,
) -> DispatchOutcome {
    let mut image_message_id = None;

    if request.direct_image {
        // validate() guarantees the URL exists here
        let url = request.image_url.as_deref().unwrap_or_default();
        let payload = MessagePayload::image(recipient, url, request.caption.as_deref());
        match sender.send_message(&payload).await {
            Ok(receipt) => {
                tracing::debug!(recipient, "image message accepted");
                image_message_id = receipt.message_id;
            }
            Err(error) => {
                return DispatchOutcome::failure(recipient, None, format!("{error:#}"));
            }
        }
    }

    if request.image_only {
        return DispatchOutcome {
            recipient: recipient.to_string(),
            success: true,
            message_id: None,
            image_message_id,
            error: None,
        };
    }

    let components = if request.simple_mode {
        Vec::new()
    } else {
        template::build_components(
            request.definition.as_ref(),
            &request.bindings,
            request.image_url.as_deref(),
        )
    };
    let payload = MessagePayload::template(
        recipient,
        &request.template_name,
        &request.template_language,
        components,
    );

    match sender.send_message(&payload).await {
        Ok(receipt) => {
            tracing::debug!(recipient, message_id = ?receipt.message_id, "template message accepted");
            DispatchOutcome {
                recipient: recipient.to_string(),
                success: true,
                message_id: receipt.message_id,
                image_message_id,
                error: None,
            }
        }
        Err(error) => DispatchOutcome::failure(recipient, image_message_id, format!("{error:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SendReceipt;
    use crate::template::{TemplateComponent, TemplateExample};
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts everything except the recipients it is told to fail, and
    /// counts every call so tests can assert "no network was touched".
    struct ScriptedSender {
        fail_for: Vec<&'static str>,
        calls: AtomicUsize,
    }

    impl ScriptedSender {
        fn new(fail_for: Vec<&'static str>) -> Self {
            Self {
                fail_for,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageSender for ScriptedSender {
        async fn send_message(&self, payload: &MessagePayload) -> anyhow::Result<SendReceipt> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_for.contains(&payload.to.as_str()) {
                bail!("(#131030) Recipient phone number not in allowed list");
            }
            Ok(SendReceipt {
                message_id: Some(format!("wamid.{}.{}", payload.kind, payload.to)),
            })
        }
    }

    fn make_request(recipients: &[&str]) -> DispatchRequest {
        DispatchRequest {
            recipients: recipients.iter().map(ToString::to_string).collect(),
            template_name: "order_update".into(),
            template_language: "en_US".into(),
            ..DispatchRequest::default()
        }
    }

    fn media_template() -> TemplateDefinition {
        TemplateDefinition {
            name: "promo".into(),
            language: "en_US".into(),
            status: Some("APPROVED".into()),
            components: vec![TemplateComponent {
                kind: "HEADER".into(),
                format: Some("IMAGE".into()),
                text: None,
                example: None,
            }],
        }
    }

    fn parameterized_template() -> TemplateDefinition {
        TemplateDefinition {
            name: "order_update".into(),
            language: "en_US".into(),
            status: Some("APPROVED".into()),
            components: vec![TemplateComponent {
                kind: "BODY".into(),
                format: None,
                text: Some("Hi {{1}}, your code is {{2}}".into()),
                example: None,
            }],
        }
    }

    #[tokio::test]
    async fn empty_roster_rejected_without_any_send() {
        let sender = ScriptedSender::new(vec![]);
        let request = make_request(&[]);

        let error = dispatch(&sender, &request).await.unwrap_err();
        assert_eq!(error, ValidationError::EmptyRoster);
        assert_eq!(sender.calls(), 0);
    }

    #[tokio::test]
    async fn recipient_without_plus_named_in_error() {
        let sender = ScriptedSender::new(vec![]);
        let request = make_request(&["+4915112345678", "4915187654321"]);

        let error = dispatch(&sender, &request).await.unwrap_err();
        assert_eq!(
            error,
            ValidationError::InvalidRecipients(vec!["4915187654321".into()])
        );
        assert!(format!("{error}").contains("4915187654321"));
        assert_eq!(sender.calls(), 0);
    }

    #[tokio::test]
    async fn one_failure_out_of_three_is_isolated() {
        let sender = ScriptedSender::new(vec!["+2222222222"]);
        let request = make_request(&["+1111111111", "+2222222222", "+3333333333"]);

        let summary = dispatch(&sender, &request).await.unwrap();
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);

        let failures = summary.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].recipient, "+2222222222");
        assert!(failures[0]
            .error
            .as_deref()
            .unwrap()
            .contains("not in allowed list"));
    }

    #[tokio::test]
    async fn successful_sends_carry_message_ids() {
        let sender = ScriptedSender::new(vec![]);
        let request = make_request(&["+1111111111"]);

        let summary = dispatch(&sender, &request).await.unwrap();
        assert_eq!(
            summary.message_ids(),
            vec!["wamid.template.+1111111111"]
        );
    }

    #[tokio::test]
    async fn missing_template_name_rejected() {
        let sender = ScriptedSender::new(vec![]);
        let mut request = make_request(&["+1111111111"]);
        request.template_name = String::new();

        let error = dispatch(&sender, &request).await.unwrap_err();
        assert_eq!(error, ValidationError::MissingTemplateName);
        assert_eq!(sender.calls(), 0);
    }

    #[tokio::test]
    async fn image_only_skips_template_name_requirement() {
        let sender = ScriptedSender::new(vec![]);
        let mut request = make_request(&["+1111111111"]);
        request.template_name = String::new();
        request.direct_image = true;
        request.image_only = true;
        request.image_url = Some("https://img.example/a.png".into());

        let summary = dispatch(&sender, &request).await.unwrap();
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(sender.calls(), 1);
        assert_eq!(
            summary.outcomes[0].image_message_id.as_deref(),
            Some("wamid.image.+1111111111")
        );
        assert!(summary.outcomes[0].message_id.is_none());
    }

    #[tokio::test]
    async fn direct_image_without_url_rejected() {
        let sender = ScriptedSender::new(vec![]);
        let mut request = make_request(&["+1111111111"]);
        request.direct_image = true;

        let error = dispatch(&sender, &request).await.unwrap_err();
        assert_eq!(error, ValidationError::MissingDirectImageUrl);
    }

    #[tokio::test]
    async fn media_template_without_url_rejected() {
        let sender = ScriptedSender::new(vec![]);
        let mut request = make_request(&["+1111111111"]);
        request.definition = Some(media_template());

        let error = dispatch(&sender, &request).await.unwrap_err();
        assert_eq!(error, ValidationError::MissingImageUrl);
    }

    #[tokio::test]
    async fn simple_mode_conflicts_with_required_media() {
        let sender = ScriptedSender::new(vec![]);
        let mut request = make_request(&["+1111111111"]);
        request.definition = Some(media_template());
        request.simple_mode = true;

        let error = dispatch(&sender, &request).await.unwrap_err();
        assert_eq!(
            error,
            ValidationError::SimpleModeMediaConflict { kind: "image" }
        );
    }

    #[tokio::test]
    async fn predefined_media_template_needs_no_url() {
        let sender = ScriptedSender::new(vec![]);
        let mut request = make_request(&["+1111111111"]);
        let mut definition = media_template();
        definition.components[0].example = Some(TemplateExample {
            header_handle: vec!["4::aW1hZ2U=".into()],
        });
        request.definition = Some(definition);

        let summary = dispatch(&sender, &request).await.unwrap();
        assert_eq!(summary.succeeded(), 1);
    }

    #[tokio::test]
    async fn empty_bindings_rejected_when_placeholders_detected() {
        let sender = ScriptedSender::new(vec![]);
        let mut request = make_request(&["+1111111111"]);
        request.definition = Some(parameterized_template());
        request.bindings = vec!["Ada".into(), "  ".into()];

        let error = dispatch(&sender, &request).await.unwrap_err();
        assert_eq!(
            error,
            ValidationError::MissingBindings {
                expected: 2,
                missing: 1
            }
        );
    }

    #[tokio::test]
    async fn simple_mode_skips_binding_requirement() {
        let sender = ScriptedSender::new(vec![]);
        let mut request = make_request(&["+1111111111"]);
        request.definition = Some(parameterized_template());
        request.simple_mode = true;

        let summary = dispatch(&sender, &request).await.unwrap();
        assert_eq!(summary.succeeded(), 1);
    }

    #[tokio::test]
    async fn direct_image_failure_skips_template_send() {
        let sender = ScriptedSender::new(vec!["+1111111111"]);
        let mut request = make_request(&["+1111111111"]);
        request.direct_image = true;
        request.image_url = Some("https://img.example/a.png".into());

        let summary = dispatch(&sender, &request).await.unwrap();
        assert_eq!(summary.failed(), 1);
        // one image attempt, no template attempt for the failed recipient
        assert_eq!(sender.calls(), 1);
    }

    #[tokio::test]
    async fn image_and_template_both_sent_when_direct_image_set() {
        let sender = ScriptedSender::new(vec![]);
        let mut request = make_request(&["+1111111111"]);
        request.direct_image = true;
        request.image_url = Some("https://img.example/a.png".into());

        let summary = dispatch(&sender, &request).await.unwrap();
        assert_eq!(sender.calls(), 2);
        let outcome = &summary.outcomes[0];
        assert_eq!(
            outcome.image_message_id.as_deref(),
            Some("wamid.image.+1111111111")
        );
        assert_eq!(
            outcome.message_id.as_deref(),
            Some("wamid.template.+1111111111")
        );
    }

    #[tokio::test]
    async fn batch_outcome_preserves_roster_order() {
        let sender = ScriptedSender::new(vec![]);
        let request = make_request(&["+1111111111", "+2222222222"]);

        let summary = dispatch(&sender, &request).await.unwrap();
        let recipients: Vec<&str> = summary
            .outcomes
            .iter()
            .map(|o| o.recipient.as_str())
            .collect();
        assert_eq!(recipients, vec!["+1111111111", "+2222222222"]);
    }
}
