//! Pod readiness with a per-tick status cache.
//!
//! The cache lives until [`ReadinessProbe::invalidate`] is called. The
//! reconciler invalidates at the start of every trigger, so a status is
//! never reused across reconciliation cycles.

use tracing::debug;

use crate::error::PlatformResult;
use crate::status::{StatusRecord, StatusSelector, StatusSource};

pub struct ReadinessProbe<S> {
    source: S,
    selector: StatusSelector,
    cached: Option<StatusRecord>,
}

impl<S: StatusSource> ReadinessProbe<S> {
    pub fn new(source: S, selector: StatusSelector) -> Self {
        Self {
            source,
            selector,
            cached: None,
        }
    }

    pub fn selector(&self) -> &StatusSelector {
        &self.selector
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Drop the cached status; the next query goes to the platform.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    /// The cached record, fetching it first if necessary.
    ///
    /// A missing record is not cached.
    pub async fn status(&mut self) -> PlatformResult<Option<&StatusRecord>> {
        if self.cached.is_none() {
            match self.source.fetch_status(&self.selector).await? {
                Some(record) => {
                    debug!(unit = %self.selector.unit, pod = %record.name, "status fetched");
                    self.cached = Some(record);
                }
                None => {
                    debug!(unit = %self.selector.unit, "no status record for unit");
                }
            }
        }
        Ok(self.cached.as_ref())
    }

    /// Whether the `ContainersReady` condition is `"True"`.
    pub async fn is_ready(&mut self) -> PlatformResult<bool> {
        Ok(self
            .status()
            .await?
            .is_some_and(StatusRecord::containers_ready))
    }

    /// Whether the instance phase is `Running`.
    pub async fn is_running(&mut self) -> PlatformResult<bool> {
        Ok(self.status().await?.is_some_and(StatusRecord::is_running))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::status::Condition;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakeSource {
        record: Arc<Mutex<Option<StatusRecord>>>,
        fail: Arc<Mutex<bool>>,
        calls: Arc<AtomicUsize>,
    }

    impl StatusSource for FakeSource {
        async fn fetch_status(
            &self,
            _selector: &StatusSelector,
        ) -> PlatformResult<Option<StatusRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail.lock().unwrap() {
                return Err(PlatformError::Unauthorized(401));
            }
            Ok(self.record.lock().unwrap().clone())
        }
    }

    fn ready_record(status: &str) -> StatusRecord {
        StatusRecord {
            name: "zookeeper-0".to_string(),
            phase: Some("Running".to_string()),
            conditions: vec![Condition {
                kind: "ContainersReady".to_string(),
                status: status.to_string(),
            }],
            ..Default::default()
        }
    }

    fn readiness(source: FakeSource) -> ReadinessProbe<FakeSource> {
        ReadinessProbe::new(
            source,
            StatusSelector::new("app", "zookeeper", "keeper.io/unit", "zookeeper/0"),
        )
    }

    #[tokio::test]
    async fn no_record_is_not_ready_and_not_cached() {
        let source = FakeSource::default();
        let mut readiness = readiness(source.clone());
        assert!(!readiness.is_ready().await.unwrap());
        assert!(!readiness.is_running().await.unwrap());
        assert!(!readiness.is_cached());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_condition_is_not_ready() {
        let source = FakeSource::default();
        *source.record.lock().unwrap() = Some(StatusRecord {
            name: "zookeeper-0".to_string(),
            ..Default::default()
        });
        let mut readiness = readiness(source);
        assert!(!readiness.is_ready().await.unwrap());
    }

    #[tokio::test]
    async fn record_is_cached_until_invalidated() {
        let source = FakeSource::default();
        *source.record.lock().unwrap() = Some(ready_record("False"));
        let mut readiness = readiness(source.clone());

        assert!(!readiness.is_ready().await.unwrap());
        *source.record.lock().unwrap() = Some(ready_record("True"));
        // Still the cached record.
        assert!(!readiness.is_ready().await.unwrap());
        assert!(readiness.is_running().await.unwrap());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        readiness.invalidate();
        assert!(readiness.is_ready().await.unwrap());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_failure_propagates() {
        let source = FakeSource::default();
        *source.fail.lock().unwrap() = true;
        let mut readiness = readiness(source);
        let err = readiness.is_ready().await.unwrap_err();
        assert!(matches!(err, PlatformError::Unauthorized(401)));
    }
}
