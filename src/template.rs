//! Template Expander (spec §4.D): replaces `{{path}}` placeholders using the
//! same path semantics as the filter evaluator. Unresolved paths expand to
//! the empty string — never an error. No escaping: the expanded string is
//! handed verbatim to the dispatcher's shell launcher.

use crate::model::Event;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unterminated '{{{{' placeholder in template")]
    UnterminatedPlaceholder,
}

/// Validate that every `{{` in `template` has a matching `}}` (checked at
/// handler-load time, spec §4.E). Placeholder path *content* is never
/// validated — an unresolved path simply expands to "".
pub fn validate_template(template: &str) -> Result<(), TemplateError> {
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => rest = &after_open[end + 2..],
            None => return Err(TemplateError::UnterminatedPlaceholder),
        }
    }
    Ok(())
}

/// Expand every `{{path}}` in `template` against `event`.
pub fn expand(template: &str, event: &Event) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let path = after_open[..end].trim();
                out.push_str(&event.resolve_path(path));
                rest = &after_open[end + 2..];
            }
            None => {
                // No matching close brace; emit the rest verbatim (defensive —
                // validate_template rejects this at load time).
                out.push_str("{{");
                rest = after_open;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(repo: &str, payload: serde_json::Value) -> Event {
        Event {
            remote_id: 1,
            repo: repo.to_owned(),
            event_type: "check_run".to_owned(),
            action: "completed".to_owned(),
            ref_name: None,
            actor: None,
            summary: String::new(),
            payload,
            delivery_id: "d1".to_owned(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn expands_nested_payload_path() {
        let e = event("o/r", serde_json::json!({"a": {"b": "x"}}));
        assert_eq!(expand("echo {{repo}} {{payload.a.b}}", &e), "echo o/r x");
    }

    #[test]
    fn missing_path_expands_to_empty_string() {
        let e = event("o/r", serde_json::json!({}));
        assert_eq!(expand("echo {{repo}} {{payload.a.b}}", &e), "echo o/r ");
    }

    #[test]
    fn template_without_placeholders_is_unchanged() {
        let e = event("o/r", serde_json::json!({}));
        assert_eq!(expand("echo static", &e), "echo static");
    }

    #[test]
    fn validate_rejects_unterminated_placeholder() {
        assert_eq!(
            validate_template("echo {{repo"),
            Err(TemplateError::UnterminatedPlaceholder)
        );
    }

    #[test]
    fn validate_accepts_balanced_placeholders() {
        assert_eq!(validate_template("echo {{repo}} {{payload.a}}"), Ok(()));
    }
}
