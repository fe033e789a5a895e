//! Webhook token generation.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};
use tripwire_trigger::{ArtifactSelection, TemplateValue, TriggerArgs, WebhookToken};
use ulid::Ulid;

/// HTTP method webhook senders use.
pub const WEBHOOK_METHOD: &str = "POST";

/// Generates a fresh URL-safe token with 160 random bits.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(&Ulid::new().to_bytes());
    bytes.extend_from_slice(&Ulid::new().to_bytes());
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Issues token details for a webhook trigger.
///
/// An existing token is kept; only the payload sample is refreshed from the
/// current arguments.
#[must_use]
pub fn issue_token(existing: Option<&WebhookToken>, args: &TriggerArgs) -> WebhookToken {
    WebhookToken {
        token: existing.map_or_else(generate_token, |t| t.token.clone()),
        http_method: WEBHOOK_METHOD.to_string(),
        payload_sample: payload_sample(args),
    }
}

/// Builds a sample JSON body containing every payload path the trigger
/// arguments read, each set to `<name>_placeholder`.
#[must_use]
pub fn payload_sample(args: &TriggerArgs) -> Value {
    let mut sample = Value::Object(Map::new());
    for variable in &args.variables {
        if let TemplateValue::Placeholder(template) = &variable.value {
            for expr in template.expressions() {
                insert_path(&mut sample, expr, &variable.name);
            }
        }
    }
    for binding in &args.artifact_variables {
        if let ArtifactSelection::FromWebhookPayload {
            artifact_server,
            artifact_stream,
            build_number,
            ..
        } = &binding.selection
        {
            let templates = [
                placeholder_of(artifact_server),
                placeholder_of(artifact_stream),
                placeholder_of(build_number),
            ];
            for template in templates.into_iter().flatten() {
                for expr in template.expressions() {
                    insert_path(&mut sample, expr, &binding.name);
                }
            }
        }
    }
    sample
}

fn placeholder_of<T>(value: &TemplateValue<T>) -> Option<&tripwire_trigger::Template> {
    match value {
        TemplateValue::Placeholder(template) => Some(template),
        TemplateValue::Literal(_) => None,
    }
}

fn insert_path(root: &mut Value, path: &str, name: &str) {
    let path = path.strip_prefix("$.").unwrap_or(path);
    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let Value::Object(map) = current else {
            return;
        };
        if segments.peek().is_none() {
            map.entry(segment.to_string())
                .or_insert_with(|| Value::String(format!("{name}_placeholder")));
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}
