//! Core data types shared by every component: the observed `Event`, the
//! per-repo `Cursor`, per-dispatch `DispatchRecord`, and the static
//! `HandlerConfig`/`RepoConfig` loaded once at startup.
//!
//! `Event` and its siblings mirror the shape of `rt_protocol::ReadEvent` in
//! spirit: plain serde structs, a frozen wire schema, no hidden state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An observed occurrence from the remote event stream.
///
/// Invariants (spec §3): `remote_id` is unique and strictly increasing within
/// the global stream; `(repo, remote_id)` totally orders events per repo;
/// `delivery_id` is unique across all events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Wire name is `id` (spec §6: both the REST/WS payload and the local
    /// event journal key this field `id`); the domain model calls it
    /// `remote_id` to keep it unambiguous next to the local `Cursor`.
    #[serde(rename = "id")]
    pub remote_id: i64,
    pub repo: String,
    pub event_type: String,
    pub action: String,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub delivery_id: String,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Resolve a dotted path against the flat event view / payload tree.
    ///
    /// Top-level names: `event_type`, `action`, `ref`, `actor`, `summary`,
    /// `repo`. `payload.` traverses the JSON payload. A missing path yields
    /// the empty string (spec §4.C/§4.D); never an error.
    pub fn resolve_path(&self, path: &str) -> String {
        let mut segments = path.split('.');
        let head = match segments.next() {
            Some(h) => h,
            None => return String::new(),
        };

        match head {
            "event_type" => self.event_type.clone(),
            "action" => self.action.clone(),
            "ref" => self.ref_name.clone().unwrap_or_default(),
            "actor" => self.actor.clone().unwrap_or_default(),
            "summary" => self.summary.clone(),
            "repo" => self.repo.clone(),
            "payload" => resolve_json_path(&self.payload, segments),
            _ => String::new(),
        }
    }
}

/// Traverse a JSON tree by dotted path segments, stringifying the leaf.
///
/// A missing key, an out-of-range traversal (indexing into a scalar), or a
/// `null` leaf all yield the empty string.
fn resolve_json_path<'a>(
    value: &serde_json::Value,
    segments: impl Iterator<Item = &'a str>,
) -> String {
    let mut current = value;
    for seg in segments {
        match current.get(seg) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    stringify_json(current)
}

/// Stringify a JSON leaf the way the filter evaluator and template expander
/// expect: strings pass through unquoted, everything else renders as compact
/// JSON, `null` is the empty string.
pub fn stringify_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The per-repo high-water mark: the largest `remote_id` for which all events
/// `<= remote_id` have been either dispatched or deliberately skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub repo_remote_id: i64,
}

/// Outcome of one handler dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
    Skipped,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Timeout => "timeout",
            Outcome::Skipped => "skipped",
        }
    }
}

/// Record of one `(event.remote_id, handler.name)` dispatch attempt.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub remote_id: i64,
    pub handler_name: String,
    pub outcome: Outcome,
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Static handler configuration, loaded once at daemon start and immutable
/// for its lifetime.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub name: String,
    pub event_type: String,
    /// Empty string = wildcard on action.
    pub action: String,
    pub command: String,
    pub filters: Vec<String>,
    pub timeout: Duration,
    pub enabled: bool,
}

/// A configured source repository.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub name: String,
    pub path: Option<std::path::PathBuf>,
}
