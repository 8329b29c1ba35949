//! Message template structure, placeholder detection, and component
//! payload construction.
//!
//! Templates are pre-approved layouts identified by name+language. Their
//! body text may contain numbered placeholders (`{{1}}`, `{{2}}`, ...) and
//! their header may carry media. A header whose media has no predefined
//! `example.header_handle` is *dynamic*: the sender must supply a link at
//! send time.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use crate::graph::{ComponentParameter, ComponentPayload, MediaLink};

/// One template row as returned by `GET .../message_templates`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateDefinition {
    pub name: String,
    pub language: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub components: Vec<TemplateComponent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateComponent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub example: Option<TemplateExample>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateExample {
    #[serde(default)]
    pub header_handle: Vec<String>,
}

/// Media kinds a template header can demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Document,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
        }
    }

    fn from_format(format: &str) -> Option<Self> {
        match format {
            "IMAGE" => Some(MediaKind::Image),
            "VIDEO" => Some(MediaKind::Video),
            "DOCUMENT" => Some(MediaKind::Document),
            _ => None,
        }
    }
}

impl TemplateComponent {
    fn is_header(&self) -> bool {
        self.kind.eq_ignore_ascii_case("HEADER")
    }

    fn is_body(&self) -> bool {
        self.kind.eq_ignore_ascii_case("BODY")
    }

    fn media_kind(&self) -> Option<MediaKind> {
        self.format.as_deref().and_then(MediaKind::from_format)
    }

    /// A header media slot is predefined when the template carries an
    /// example handle; the provider then reuses the stored asset.
    fn has_predefined_media(&self) -> bool {
        self.example
            .as_ref()
            .is_some_and(|example| !example.header_handle.is_empty())
    }
}

impl TemplateDefinition {
    pub fn body_text(&self) -> Option<&str> {
        self.components
            .iter()
            .find(|component| component.is_body())
            .and_then(|component| component.text.as_deref())
    }

    /// Placeholder indices detected in the body text, ascending.
    pub fn placeholders(&self) -> Vec<u32> {
        self.body_text().map(extract_placeholders).unwrap_or_default()
    }

    /// The header media kind, if the template has a media header at all.
    pub fn header_media(&self) -> Option<MediaKind> {
        self.components
            .iter()
            .find(|component| component.is_header())
            .and_then(TemplateComponent::media_kind)
    }

    /// The header media kind when the sender must supply a link at send
    /// time (no predefined example asset).
    pub fn required_header_media(&self) -> Option<MediaKind> {
        self.components
            .iter()
            .find(|component| component.is_header() && component.media_kind().is_some())
            .filter(|component| !component.has_predefined_media())
            .and_then(TemplateComponent::media_kind)
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(\d+)\}\}").unwrap())
}

/// Extract `{{n}}` placeholder indices from template body text,
/// deduplicated and sorted ascending.
pub fn extract_placeholders(text: &str) -> Vec<u32> {
    let mut indices: Vec<u32> = placeholder_regex()
        .captures_iter(text)
        .filter_map(|capture| capture[1].parse().ok())
        .collect();
    indices.sort_unstable();
    indices.dedup();
    indices
}

/// Build the `components` array for a template message payload.
///
/// With a fetched definition: a dynamic media header gets one link
/// parameter from `image_url`, and a body with placeholders gets ordered
/// text parameters from `bindings` (empty bindings are skipped). Without a
/// definition, non-empty bindings still produce a body component so
/// parameterized sends work when the lookup endpoint is unavailable.
/// Returns an empty vec when nothing applies; callers omit the field then.
pub fn build_components(
    definition: Option<&TemplateDefinition>,
    bindings: &[String],
    image_url: Option<&str>,
) -> Vec<ComponentPayload> {
    let Some(definition) = definition else {
        return body_component(bindings).into_iter().collect();
    };

    let mut components = Vec::new();
    for component in &definition.components {
        if component.is_header() && !component.has_predefined_media() {
            if let (Some(kind), Some(url)) = (component.media_kind(), image_url) {
                components.push(ComponentPayload::header(media_parameter(kind, url)));
            }
        } else if component.is_body()
            && component
                .text
                .as_deref()
                .is_some_and(|text| text.contains("{{"))
        {
            components.extend(body_component(bindings));
        }
    }
    components
}

fn media_parameter(kind: MediaKind, url: &str) -> ComponentParameter {
    let link = MediaLink::new(url);
    match kind {
        MediaKind::Image => ComponentParameter::Image { image: link },
        MediaKind::Video => ComponentParameter::Video { video: link },
        MediaKind::Document => ComponentParameter::Document { document: link },
    }
}

fn body_component(bindings: &[String]) -> Option<ComponentPayload> {
    let parameters: Vec<ComponentParameter> = bindings
        .iter()
        .map(|binding| binding.trim())
        .filter(|binding| !binding.is_empty())
        .map(|binding| ComponentParameter::Text {
            text: binding.to_string(),
        })
        .collect();

    if parameters.is_empty() {
        None
    } else {
        Some(ComponentPayload::body(parameters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(format: &str, handles: &[&str]) -> TemplateComponent {
        TemplateComponent {
            kind: "HEADER".into(),
            format: Some(format.into()),
            text: None,
            example: Some(TemplateExample {
                header_handle: handles.iter().map(ToString::to_string).collect(),
            }),
        }
    }

    fn body(text: &str) -> TemplateComponent {
        TemplateComponent {
            kind: "BODY".into(),
            format: None,
            text: Some(text.into()),
            example: None,
        }
    }

    fn make_template(components: Vec<TemplateComponent>) -> TemplateDefinition {
        TemplateDefinition {
            name: "order_update".into(),
            language: "en_US".into(),
            status: Some("APPROVED".into()),
            components,
        }
    }

    #[test]
    fn extracts_two_placeholders_ascending() {
        let indices = extract_placeholders("Hi {{1}}, your code is {{2}}");
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn extracts_placeholders_out_of_order() {
        let indices = extract_placeholders("{{3}} then {{1}} then {{2}}");
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn deduplicates_repeated_placeholders() {
        let indices = extract_placeholders("{{1}} and {{1}} again, plus {{2}}");
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn no_placeholders_in_plain_text() {
        assert!(extract_placeholders("Your order has shipped.").is_empty());
    }

    #[test]
    fn ignores_non_numeric_braces() {
        assert!(extract_placeholders("Hello {{name}}").is_empty());
    }

    #[test]
    fn template_placeholders_come_from_body() {
        let template = make_template(vec![body("Hi {{1}}, code {{2}}")]);
        assert_eq!(template.placeholders(), vec![1, 2]);
    }

    #[test]
    fn required_media_when_no_example_handle() {
        let mut component = header("IMAGE", &[]);
        component.example = None;
        let template = make_template(vec![component]);
        assert_eq!(template.required_header_media(), Some(MediaKind::Image));
    }

    #[test]
    fn no_required_media_with_predefined_handle() {
        let template = make_template(vec![header("IMAGE", &["4::aW1hZ2U="])]);
        assert_eq!(template.required_header_media(), None);
        assert_eq!(template.header_media(), Some(MediaKind::Image));
    }

    #[test]
    fn text_header_is_not_media() {
        let template = make_template(vec![header("TEXT", &[])]);
        assert_eq!(template.header_media(), None);
    }

    #[test]
    fn builds_header_and_body_components() {
        let mut image_header = header("IMAGE", &[]);
        image_header.example = None;
        let template = make_template(vec![image_header, body("Hi {{1}}")]);

        let components = build_components(
            Some(&template),
            &["Ada".to_string()],
            Some("https://img.example/a.png"),
        );

        assert_eq!(components.len(), 2);
        assert_eq!(components[0].kind, "header");
        assert_eq!(components[1].kind, "body");
        assert_eq!(components[1].parameters.len(), 1);
    }

    #[test]
    fn predefined_header_gets_no_parameter() {
        let template = make_template(vec![header("IMAGE", &["4::handle"]), body("No params")]);
        let components =
            build_components(Some(&template), &[], Some("https://img.example/a.png"));
        assert!(components.is_empty());
    }

    #[test]
    fn dynamic_header_without_url_is_skipped() {
        let mut image_header = header("IMAGE", &[]);
        image_header.example = None;
        let template = make_template(vec![image_header]);
        assert!(build_components(Some(&template), &[], None).is_empty());
    }

    #[test]
    fn empty_bindings_are_skipped() {
        let template = make_template(vec![body("Hi {{1}}, code {{2}}")]);
        let bindings = vec!["Ada".to_string(), "  ".to_string()];
        let components = build_components(Some(&template), &bindings, None);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].parameters.len(), 1);
    }

    #[test]
    fn fallback_body_without_definition() {
        let bindings = vec!["Ada".to_string(), "1234".to_string()];
        let components = build_components(None, &bindings, None);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].kind, "body");
        assert_eq!(components[0].parameters.len(), 2);
    }

    #[test]
    fn no_components_without_anything_to_attach() {
        assert!(build_components(None, &[], None).is_empty());
    }

    #[test]
    fn video_header_uses_video_parameter() {
        let mut video_header = header("VIDEO", &[]);
        video_header.example = None;
        let template = make_template(vec![video_header]);
        let components =
            build_components(Some(&template), &[], Some("https://img.example/v.mp4"));
        assert_eq!(components.len(), 1);
        assert!(matches!(
            components[0].parameters[0],
            ComponentParameter::Video { .. }
        ));
    }

    #[test]
    fn deserializes_graph_template_row() {
        let raw = serde_json::json!({
            "name": "order_update",
            "language": "en_US",
            "status": "APPROVED",
            "components": [
                {
                    "type": "HEADER",
                    "format": "IMAGE",
                    "example": { "header_handle": ["4::aW1hZ2U="] }
                },
                { "type": "BODY", "text": "Hi {{1}}, your code is {{2}}" },
                { "type": "FOOTER", "text": "Reply STOP to opt out" }
            ]
        });

        let template: TemplateDefinition = serde_json::from_value(raw).unwrap();
        assert_eq!(template.placeholders(), vec![1, 2]);
        assert_eq!(template.header_media(), Some(MediaKind::Image));
        assert_eq!(template.required_header_media(), None);
    }
}
