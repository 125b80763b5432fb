//! Handler Registry (spec §4.E): a loaded, immutable map from `event_type` to
//! the handlers that might fire for it, in declaration order.
//!
//! All validation (filters parse, templates parse, unique names, positive
//! timeout) already happened in [`crate::config`] at load time — by the time
//! a `HandlerRegistry` exists, `Filter::parse`/`validate_template` cannot fail
//! on any of its handlers.

use crate::filter::{all_match, Filter};
use crate::model::{Event, HandlerConfig};
use std::collections::HashMap;

/// Immutable, loaded-once registry of handlers, keyed by `event_type`.
pub struct HandlerRegistry {
    by_event_type: HashMap<String, Vec<CompiledHandler>>,
}

struct CompiledHandler {
    config: HandlerConfig,
    filters: Vec<Filter>,
}

impl HandlerRegistry {
    /// Build a registry from validated handler configs, preserving
    /// declaration order within each `event_type` bucket.
    pub fn new(handlers: Vec<HandlerConfig>) -> Self {
        let mut by_event_type: HashMap<String, Vec<CompiledHandler>> = HashMap::new();
        for config in handlers {
            // Already validated in config.rs; parse cannot fail here.
            let filters = config
                .filters
                .iter()
                .map(|f| Filter::parse(f).expect("filter validated at config load"))
                .collect();
            by_event_type
                .entry(config.event_type.clone())
                .or_default()
                .push(CompiledHandler { config, filters });
        }
        HandlerRegistry { by_event_type }
    }

    /// Enabled handlers whose `(event_type, action)` matches `event`
    /// (wildcard action matches any) and whose filters all pass, in
    /// config-file declaration order.
    pub fn matching<'a>(&'a self, event: &Event) -> Vec<&'a HandlerConfig> {
        let Some(candidates) = self.by_event_type.get(&event.event_type) else {
            return Vec::new();
        };
        candidates
            .iter()
            .filter(|h| h.config.enabled)
            .filter(|h| h.config.action.is_empty() || h.config.action == event.action)
            .filter(|h| all_match(&h.filters, event))
            .map(|h| &h.config)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn handler(name: &str, event_type: &str, action: &str, filters: Vec<&str>) -> HandlerConfig {
        HandlerConfig {
            name: name.to_owned(),
            event_type: event_type.to_owned(),
            action: action.to_owned(),
            command: "echo hi".to_owned(),
            filters: filters.into_iter().map(str::to_owned).collect(),
            timeout: Duration::from_secs(60),
            enabled: true,
        }
    }

    fn event(event_type: &str, action: &str, payload: serde_json::Value) -> Event {
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
    fn matches_wildcard_action() {
        let registry = HandlerRegistry::new(vec![handler("h1", "check_run", "", vec![])]);
        let ev = event("check_run", "completed", serde_json::json!({}));
        assert_eq!(registry.matching(&ev).iter().map(|h| &h.name).collect::<Vec<_>>(), vec!["h1"]);
    }

    #[test]
    fn explicit_action_must_match() {
        let registry = HandlerRegistry::new(vec![handler("h1", "check_run", "queued", vec![])]);
        let ev = event("check_run", "completed", serde_json::json!({}));
        assert!(registry.matching(&ev).is_empty());
    }

    #[test]
    fn disabled_handlers_never_match() {
        let mut h = handler("h1", "check_run", "", vec![]);
        h.enabled = false;
        let registry = HandlerRegistry::new(vec![h]);
        let ev = event("check_run", "completed", serde_json::json!({}));
        assert!(registry.matching(&ev).is_empty());
    }

    #[test]
    fn declaration_order_is_preserved() {
        let registry = HandlerRegistry::new(vec![
            handler("first", "check_run", "", vec![]),
            handler("second", "check_run", "", vec![]),
        ]);
        let ev = event("check_run", "completed", serde_json::json!({}));
        let names: Vec<&str> = registry.matching(&ev).iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn filters_narrow_matches() {
        let registry = HandlerRegistry::new(vec![handler(
            "h1",
            "check_run",
            "",
            vec!["payload.conclusion == 'failure'"],
        )]);
        let failing = event("check_run", "completed", serde_json::json!({"conclusion": "failure"}));
        let passing = event("check_run", "completed", serde_json::json!({"conclusion": "success"}));
        assert_eq!(registry.matching(&failing).len(), 1);
        assert!(registry.matching(&passing).is_empty());
    }

    #[test]
    fn unknown_event_type_yields_no_handlers() {
        let registry = HandlerRegistry::new(vec![handler("h1", "check_run", "", vec![])]);
        let ev = event("workflow_run", "completed", serde_json::json!({}));
        assert!(registry.matching(&ev).is_empty());
    }
}
