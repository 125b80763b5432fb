//! Filter Evaluator (spec §4.C): a deliberately tiny boolean expression
//! grammar, equality only, no precedence to speak of.
//!
//! ```text
//! expr    := path op literal
//! op      := '==' | '!='
//! path    := IDENT ('.' IDENT)*
//! literal := single-or-double-quoted string
//! ```
//!
//! Parsing happens once, at handler-load time (`Filter::parse`); evaluation
//! (`Filter::eval`) never fails — a missing path resolves to the empty
//! string per spec §4.C, and the grammar has no other failure mode post-parse.
//!
//! Design note (spec §9): this grammar is intentionally not grown. Operator
//! precedence and type coercion are explicitly out of scope.

use crate::model::Event;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
}

/// A single parsed filter expression: `path op literal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    path: String,
    op: Op,
    literal: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("empty filter expression")]
    Empty,
    #[error("expected a path before the operator in '{0}'")]
    MissingPath(String),
    #[error("expected '==' or '!=' in '{0}'")]
    MissingOperator(String),
    #[error("unterminated string literal in '{0}'")]
    UnterminatedLiteral(String),
    #[error("unexpected trailing characters after literal in '{0}'")]
    TrailingInput(String),
}

impl Filter {
    /// Parse a single filter expression. Fails at handler-load time (spec §4.E),
    /// never at match time.
    pub fn parse(expr: &str) -> Result<Self, FilterError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(FilterError::Empty);
        }

        let mut chars = trimmed.char_indices().peekable();
        let path_end = loop {
            match chars.peek() {
                Some(&(i, c)) if c == '=' || c == '!' => break i,
                Some(_) => {
                    chars.next();
                }
                None => {
                    return Err(FilterError::MissingOperator(trimmed.to_owned()));
                }
            }
        };
        let path = trimmed[..path_end].trim();
        if path.is_empty() || !is_valid_path(path) {
            return Err(FilterError::MissingPath(trimmed.to_owned()));
        }

        let rest = trimmed[path_end..].trim_start();
        let (op, after_op) = if let Some(r) = rest.strip_prefix("==") {
            (Op::Eq, r)
        } else if let Some(r) = rest.strip_prefix("!=") {
            (Op::Ne, r)
        } else {
            return Err(FilterError::MissingOperator(trimmed.to_owned()));
        };

        let literal_src = after_op.trim();
        let literal = parse_quoted_literal(literal_src, trimmed)?;

        Ok(Filter {
            path: path.to_owned(),
            op,
            literal,
        })
    }

    /// Evaluate against an event. String-equality on the stringified value at
    /// `self.path`; a missing path resolves to the empty string.
    pub fn eval(&self, event: &Event) -> bool {
        let actual = event.resolve_path(&self.path);
        match self.op {
            Op::Eq => actual == self.literal,
            Op::Ne => actual != self.literal,
        }
    }
}

fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('.').all(|seg| {
            !seg.is_empty()
                && seg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

fn parse_quoted_literal(src: &str, whole_expr: &str) -> Result<String, FilterError> {
    let mut chars = src.chars();
    let quote = match chars.next() {
        Some(c @ ('\'' | '"')) => c,
        _ => return Err(FilterError::UnterminatedLiteral(whole_expr.to_owned())),
    };
    let body = chars.as_str();
    let end = body
        .find(quote)
        .ok_or_else(|| FilterError::UnterminatedLiteral(whole_expr.to_owned()))?;
    let literal = &body[..end];
    let trailing = body[end + 1..].trim();
    if !trailing.is_empty() {
        return Err(FilterError::TrailingInput(whole_expr.to_owned()));
    }
    Ok(literal.to_owned())
}

/// A handler matches when **all** of its filters evaluate true (spec §4.C/§4.E).
pub fn all_match(filters: &[Filter], event: &Event) -> bool {
    filters.iter().all(|f| f.eval(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Event;
    use chrono::Utc;

    fn event_with_payload(event_type: &str, action: &str, payload: serde_json::Value) -> Event {
        Event {
            remote_id: 1,
            repo: "o/r".to_owned(),
            event_type: event_type.to_owned(),
            action: action.to_owned(),
            ref_name: None,
            actor: None,
            summary: String::new(),
            payload,
            delivery_id: "d1".to_owned(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn parses_double_and_single_quoted_literals() {
        assert!(Filter::parse("a.b == 'x'").is_ok());
        assert!(Filter::parse(r#"a.b == "x""#).is_ok());
    }

    #[test]
    fn rejects_empty_expression() {
        assert_eq!(Filter::parse(""), Err(FilterError::Empty));
    }

    #[test]
    fn rejects_unknown_operator() {
        assert!(Filter::parse("payload.conclusion === 'failure'").is_err());
    }

    #[test]
    fn rejects_unterminated_literal() {
        assert!(matches!(
            Filter::parse("payload.conclusion == 'failure"),
            Err(FilterError::UnterminatedLiteral(_))
        ));
    }

    #[test]
    fn matches_nested_payload_field() {
        let filter = Filter::parse("payload.conclusion == 'failure'").unwrap();
        let matching = event_with_payload(
            "check_run",
            "completed",
            serde_json::json!({"conclusion": "failure"}),
        );
        let non_matching = event_with_payload(
            "check_run",
            "completed",
            serde_json::json!({"conclusion": "success"}),
        );
        assert!(filter.eval(&matching));
        assert!(!filter.eval(&non_matching));
    }

    #[test]
    fn missing_path_resolves_to_empty_string() {
        let filter = Filter::parse("payload.missing == ''").unwrap();
        let event = event_with_payload("check_run", "completed", serde_json::json!({}));
        assert!(filter.eval(&event));
    }

    #[test]
    fn not_equal_operator_negates() {
        let filter = Filter::parse("action != 'completed'").unwrap();
        let event = event_with_payload("check_run", "completed", serde_json::json!({}));
        assert!(!filter.eval(&event));
    }

    #[test]
    fn all_match_requires_every_filter() {
        let filters = vec![
            Filter::parse("event_type == 'check_run'").unwrap(),
            Filter::parse("payload.conclusion == 'failure'").unwrap(),
        ];
        let event = event_with_payload(
            "check_run",
            "completed",
            serde_json::json!({"conclusion": "failure"}),
        );
        assert!(all_match(&filters, &event));

        let other = event_with_payload(
            "check_run",
            "completed",
            serde_json::json!({"conclusion": "success"}),
        );
        assert!(!all_match(&filters, &other));
    }
}
