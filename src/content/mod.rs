//! Content fetch aggregation
//!
//! One fetch per report section, all in flight at once on the current task,
//! joined into a single record keyed by section name. The first failed
//! section fails the whole aggregate and drops the fetches still pending.

#[cfg(feature = "http")]
pub mod http;

use crate::redact::RedactionPolicy;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;

/// Report content keyed by section name. `Value::Null` marks an absent section.
pub type ContentRecord = Map<String, Value>;

/// Source of report section data
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch one section of the current document. Absent content is
    /// `Ok(Value::Null)`, not an error.
    async fn fetch_section(&self, section: &str) -> Result<Value>;
}

/// Fetch every section concurrently and join the results.
///
/// Sections are deduplicated keeping first occurrence. The join fails fast:
/// on the first error the remaining fetches are dropped and the error carries
/// an outcome per section, `"ok"` for those already fetched and `"aborted"`
/// for those still pending.
pub async fn fetch_all(
    store: &dyn ContentStore,
    sections: &[String],
    cancel: &CancellationToken,
) -> Result<ContentRecord> {
    let mut names: Vec<&str> = Vec::with_capacity(sections.len());
    for s in sections {
        if !names.contains(&s.as_str()) {
            names.push(s.as_str());
        }
    }
    debug!("fetching {} content sections", names.len());

    let mut pending: FuturesUnordered<_> = names
        .iter()
        .enumerate()
        .map(|(i, name)| async move { (i, store.fetch_section(name).await) })
        .collect();
    let mut fetched: Vec<Option<Value>> = vec![None; names.len()];

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            next = pending.next() => next,
        };
        let Some((index, result)) = next else { break };
        match result {
            Ok(value) => fetched[index] = Some(value),
            Err(e) => {
                warn!("content fetch for section '{}' failed: {}", names[index], e);
                let outcomes: BTreeMap<String, String> = names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let outcome = if i == index {
                            e.to_string()
                        } else if fetched[i].is_some() {
                            "ok".to_string()
                        } else {
                            "aborted".to_string()
                        };
                        (name.to_string(), outcome)
                    })
                    .collect();
                return Err(Error::ContentFetchFailure {
                    failed: vec![names[index].to_string()],
                    outcomes,
                });
            }
        }
    }

    let mut record = ContentRecord::new();
    for (name, value) in names.iter().zip(fetched) {
        record.insert(name.to_string(), value.unwrap_or(Value::Null));
    }
    Ok(record)
}

/// Fetch all sections and pass the aggregate through the redaction filter.
pub async fn fetch_redacted(
    store: &dyn ContentStore,
    sections: &[String],
    policy: &RedactionPolicy,
    cancel: &CancellationToken,
) -> Result<ContentRecord> {
    let record = fetch_all(store, sections, cancel).await?;
    Ok(policy.redact_record(&record))
}

/// In-memory store for tests and offline exports.
///
/// Unknown sections resolve to `null`.
#[derive(Debug, Clone, Default)]
pub struct MemoryContentStore {
    sections: HashMap<String, Value>,
    failures: HashMap<String, String>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_section(mut self, name: impl Into<String>, value: Value) -> Self {
        self.sections.insert(name.into(), value);
        self
    }

    /// Make fetches of `name` fail with `message`.
    pub fn with_failure(mut self, name: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.insert(name.into(), message.into());
        self
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn fetch_section(&self, section: &str) -> Result<Value> {
        if let Some(msg) = self.failures.get(section) {
            return Err(Error::NetworkError(msg.clone()));
        }
        Ok(self.sections.get(section).cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn aggregates_sections_in_request_order() {
        let store = MemoryContentStore::new()
            .with_section("hero", json!({"title": "Hi"}))
            .with_section("team", json!([1, 2]));
        let record = fetch_all(&store, &names(&["team", "hero", "missing", "team"]), &CancellationToken::new())
            .await
            .unwrap();
        let keys: Vec<&String> = record.keys().collect();
        assert_eq!(keys.len(), 3);
        assert_eq!(record["hero"], json!({"title": "Hi"}));
        assert_eq!(record["missing"], Value::Null);
    }

    #[tokio::test]
    async fn one_failure_fails_the_aggregate_with_diagnostics() {
        let store = MemoryContentStore::new()
            .with_section("hero", json!({}))
            .with_failure("team", "HTTP 503");
        let err = fetch_all(&store, &names(&["hero", "team"]), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            Error::ContentFetchFailure { failed, outcomes } => {
                assert_eq!(failed, vec!["team".to_string()]);
                assert!(["ok", "aborted"].contains(&outcomes["hero"].as_str()));
                assert!(outcomes["team"].contains("HTTP 503"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    /// Section fetches that sleep before answering.
    struct SlowStore {
        inner: MemoryContentStore,
        delays: HashMap<String, Duration>,
    }

    #[async_trait]
    impl ContentStore for SlowStore {
        async fn fetch_section(&self, section: &str) -> Result<Value> {
            if let Some(delay) = self.delays.get(section) {
                tokio::time::sleep(*delay).await;
            }
            self.inner.fetch_section(section).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_does_not_wait_for_slow_sections() {
        let store = SlowStore {
            inner: MemoryContentStore::new()
                .with_section("hero", json!({"title": "Hi"}))
                .with_section("stats", json!([1]))
                .with_failure("team", "HTTP 503"),
            delays: HashMap::from([("hero".to_string(), Duration::from_secs(60))]),
        };

        let started = Instant::now();
        let err = fetch_all(&store, &names(&["hero", "team", "stats"]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(1));
        match err {
            Error::ContentFetchFailure { failed, outcomes } => {
                assert_eq!(failed, vec!["team".to_string()]);
                assert_eq!(outcomes.len(), 3);
                assert_eq!(outcomes["hero"], "aborted");
                assert!(outcomes["team"].contains("HTTP 503"));
                assert!(["ok", "aborted"].contains(&outcomes["stats"].as_str()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sections_are_awaited_when_nothing_fails() {
        let store = SlowStore {
            inner: MemoryContentStore::new().with_section("hero", json!({"title": "Hi"})),
            delays: HashMap::from([("hero".to_string(), Duration::from_secs(60))]),
        };
        let record = fetch_all(&store, &names(&["hero", "team"]), &CancellationToken::new())
            .await
            .unwrap();
        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["hero", "team"]);
        assert_eq!(record["team"], Value::Null);
    }

    #[tokio::test]
    async fn redacted_fetch_applies_policy() {
        let store = MemoryContentStore::new().with_section("hero", json!({"heroImage": "x.png", "title": "T"}));
        let record = fetch_redacted(
            &store,
            &names(&["hero"]),
            &RedactionPolicy::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(record["hero"], json!({"heroImage": "[REDACTED]", "title": "T"}));
    }

    #[tokio::test]
    async fn cancelled_fetch_reports_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let store = MemoryContentStore::new();
        let err = fetch_all(&store, &names(&["hero"]), &token).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
