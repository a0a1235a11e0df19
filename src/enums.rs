//! Enumeration items and the ways a schema node gets them.
//!
//! Literal `enum` lists are read straight from the schema. Named sources
//! (`enumSource`) go through the application's [`EnumProvider`] first and
//! then through the [`EnumCache`] of asynchronous requests. A missing entry
//! raises an [`EnumRequest`] that the host answers exactly once: the
//! `succeed` / `fail` / `time_out` methods consume the request, and dropping
//! it unanswered counts as a timeout.
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnumItem {
    pub value: Value,
    pub title: String,
}

impl EnumItem {
    /// Title defaults to the value itself (strings unquoted).
    pub fn from_value(value: Value) -> Self {
        let title = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self { value, title }
    }
}

/// Application lookup: enumeration name → items.
pub trait EnumProvider {
    fn items(&self, name: &str) -> Option<Vec<EnumItem>>;
}

impl EnumProvider for IndexMap<String, Vec<EnumItem>> {
    fn items(&self, name: &str) -> Option<Vec<EnumItem>> {
        self.get(name).cloned()
    }
}

impl<F> EnumProvider for F
where
    F: Fn(&str) -> Option<Vec<EnumItem>>,
{
    fn items(&self, name: &str) -> Option<Vec<EnumItem>> {
        self(name)
    }
}

/// Items of a literal `enum`, titled by `enumTitles` when present.
pub fn literal_items(schema: &Map<String, Value>) -> Option<Vec<EnumItem>> {
    let values = schema.get("enum")?.as_array()?;
    let titles = schema.get("enumTitles").and_then(Value::as_array);
    let items = values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let mut item = EnumItem::from_value(value.clone());
            if let Some(title) = titles.and_then(|ts| ts.get(i)).and_then(Value::as_str) {
                item.title = title.to_string();
            }
            item
        })
        .collect();
    Some(items)
}

// ————————————————————————————————————————————————————————————————————————————
// ASYNC CONTRACT
// ————————————————————————————————————————————————————————————————————————————

#[derive(Clone, Debug, PartialEq)]
pub enum EnumState {
    Pending,
    Ready(Vec<EnumItem>),
    Failed(String),
    TimedOut,
}

/// Outcomes of enum requests, shared between the compiler and the host.
#[derive(Clone, Debug, Default)]
pub struct EnumCache(Rc<RefCell<IndexMap<String, EnumState>>>);

impl EnumCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, name: &str) -> Option<EnumState> {
        self.0.borrow().get(name).cloned()
    }

    pub fn ready(&self, name: &str) -> Option<Vec<EnumItem>> {
        match self.0.borrow().get(name) {
            Some(EnumState::Ready(items)) => Some(items.clone()),
            _ => None,
        }
    }

    /// Forget failed and timed-out entries so the next compile asks again.
    pub fn retry_failed(&self) {
        self.0
            .borrow_mut()
            .retain(|_, state| matches!(state, EnumState::Pending | EnumState::Ready(_)));
    }

    /// Start a request unless one is already pending or settled.
    pub fn begin(&self, name: &str, timeout: Duration) -> Option<EnumRequest> {
        let mut states = self.0.borrow_mut();
        if states.contains_key(name) {
            return None;
        }
        states.insert(name.to_string(), EnumState::Pending);
        debug!(name, ?timeout, "enum request raised");
        Some(EnumRequest { name: name.to_string(), timeout, cache: Some(self.clone()) })
    }

    fn settle(&self, name: &str, state: EnumState) {
        self.0.borrow_mut().insert(name.to_string(), state);
    }
}

/// One outstanding enum fetch; the host settles it exactly once.
#[derive(Debug)]
pub struct EnumRequest {
    name: String,
    timeout: Duration,
    /// Taken on settlement.
    cache: Option<EnumCache>,
}

impl EnumRequest {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn succeed(mut self, items: Vec<EnumItem>) {
        debug!(name = %self.name, count = items.len(), "enum request fulfilled");
        self.settle(EnumState::Ready(items));
    }

    pub fn fail(mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(name = %self.name, %message, "enum request failed");
        self.settle(EnumState::Failed(message));
    }

    pub fn time_out(mut self) {
        warn!(name = %self.name, timeout = ?self.timeout, "enum request timed out");
        self.settle(EnumState::TimedOut);
    }

    fn settle(&mut self, state: EnumState) {
        if let Some(cache) = self.cache.take() {
            cache.settle(&self.name, state);
        }
    }
}

impl Drop for EnumRequest {
    fn drop(&mut self) {
        if self.cache.is_some() {
            warn!(name = %self.name, "enum request dropped unanswered, treated as timed out");
            self.settle(EnumState::TimedOut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_items_use_titles_when_given() {
        let schema = json!({"enum": ["a", 2, null], "enumTitles": ["Alpha"]});
        let items = literal_items(schema.as_object().unwrap()).unwrap();
        assert_eq!(items[0].title, "Alpha");
        assert_eq!(items[1].title, "2");
        assert_eq!(items[2].title, "null");
        assert_eq!(items[1].value, json!(2));
    }

    #[test]
    fn requests_settle_once_into_the_cache() {
        let cache = EnumCache::new();
        let request = cache.begin("colors", Duration::from_millis(500)).unwrap();
        assert_eq!(request.name(), "colors");
        assert_eq!(cache.state("colors"), Some(EnumState::Pending));
        // a second compile does not raise a duplicate request
        assert!(cache.begin("colors", Duration::from_millis(500)).is_none());

        request.succeed(vec![EnumItem::from_value(json!("red"))]);
        assert_eq!(cache.ready("colors").unwrap().len(), 1);
    }

    #[test]
    fn failures_can_be_retried() {
        let cache = EnumCache::new();
        cache.begin("a", Duration::from_secs(1)).unwrap().fail("offline");
        cache.begin("b", Duration::from_secs(1)).unwrap().time_out();
        assert_eq!(cache.state("a"), Some(EnumState::Failed("offline".into())));
        assert_eq!(cache.state("b"), Some(EnumState::TimedOut));
        cache.retry_failed();
        assert!(cache.begin("a", Duration::from_secs(1)).is_some());
    }

    #[test]
    fn unanswered_requests_time_out_when_dropped() {
        let cache = EnumCache::new();
        let request = cache.begin("late", Duration::from_millis(10)).unwrap();
        drop(request);
        assert_eq!(cache.state("late"), Some(EnumState::TimedOut));
        cache.retry_failed();
        assert!(cache.state("late").is_none());

        // a settled request keeps its outcome when it goes out of scope
        cache.begin("ok", Duration::from_millis(10)).unwrap().succeed(Vec::new());
        assert_eq!(cache.state("ok"), Some(EnumState::Ready(Vec::new())));
    }

    #[test]
    fn closures_are_providers() {
        let provider = |name: &str| (name == "yes").then(|| vec![EnumItem::from_value(json!(1))]);
        assert!(provider.items("yes").is_some());
        assert!(provider.items("no").is_none());
    }
}
