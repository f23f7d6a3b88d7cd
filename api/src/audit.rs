//! Best-effort audit logging.
//!
//! Nothing in here may fail the calling operation: unresolved identities,
//! duplicate events, re-entrant calls, and insert failures all degrade to a
//! local log line.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use sqlx::PgPool;
use uuid::Uuid;

use parlab_core::audit::{AuditEventType, AuditSource};

/// Identical `(event type, payload)` pairs within this window collapse to a
/// single write.
const DEDUP_WINDOW: Duration = Duration::from_secs(2);
/// Cache ceiling; expired entries are pruned once the map grows past it.
const DEDUP_CAPACITY: usize = 256;
/// One retry for an identity that is not resolved yet when an event fires
/// early in the request.
const IDENTITY_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Shared slot for the acting user's id, filled once authentication
/// completes. Events fired before then get one delayed retry.
#[derive(Clone, Default)]
pub struct IdentityCell(Arc<RwLock<Option<Uuid>>>);

impl IdentityCell {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn known(user_id: Uuid) -> Self {
        Self(Arc::new(RwLock::new(Some(user_id))))
    }

    pub fn set(&self, user_id: Uuid) {
        *self.0.write().expect("identity lock poisoned") = Some(user_id);
    }

    pub fn get(&self) -> Option<Uuid> {
        *self.0.read().expect("identity lock poisoned")
    }
}

/// Single process-wide flag that drops audit writes issued while another
/// write is still in flight. Coarse: no queueing, and concurrent requests
/// can shadow each other within the best-effort contract.
pub struct InFlightFlag(AtomicBool);

impl InFlightFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// A guard when the flag was clear; `None` when a write is running.
    /// Dropping the guard clears the flag.
    pub fn try_acquire(&self) -> Option<InFlightGuard<'_>> {
        if self.0.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(InFlightGuard(&self.0))
        }
    }
}

pub struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Bounded key → last-seen cache backing duplicate suppression.
pub struct DedupCache {
    entries: Mutex<HashMap<String, Instant>>,
    window: Duration,
    capacity: usize,
}

impl DedupCache {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window,
            capacity,
        }
    }

    /// True when the key has not been seen within the window; the sighting
    /// is recorded only then, so a suppressed duplicate keeps the original
    /// timestamp.
    pub fn admit(&self, key: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock().expect("dedup lock poisoned");

        if let Some(last) = entries.get(key) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }

        if entries.len() >= self.capacity {
            let window = self.window;
            entries.retain(|_, last| now.duration_since(*last) < window);
        }
        entries.insert(key.to_string(), now);
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().expect("dedup lock poisoned").len()
    }
}

/// Asynchronous, best-effort event recorder for the `audit_logs` table.
pub struct AuditLogger {
    pool: PgPool,
    dedup: DedupCache,
    in_flight: InFlightFlag,
}

impl AuditLogger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            dedup: DedupCache::new(DEDUP_WINDOW, DEDUP_CAPACITY),
            in_flight: InFlightFlag::new(),
        }
    }

    /// Record one audit event. Every failure path logs locally and returns;
    /// callers never observe an error.
    pub async fn record(
        &self,
        identity: &IdentityCell,
        event_type: AuditEventType,
        correlation_id: &str,
        event_data: serde_json::Value,
        source: AuditSource,
    ) {
        let key = format!("{}:{}", event_type.as_str(), event_data);
        if !self.dedup.admit(&key, Instant::now()) {
            tracing::debug!(
                event_type = event_type.as_str(),
                "skipped duplicate audit event"
            );
            return;
        }

        let Some(_guard) = self.in_flight.try_acquire() else {
            tracing::warn!(
                event_type = event_type.as_str(),
                "dropped audit event while another write is in flight"
            );
            return;
        };

        let Some(user_id) = resolve_identity(identity).await else {
            tracing::warn!(
                event_type = event_type.as_str(),
                "no resolved identity for audit event, skipping"
            );
            return;
        };

        if let Err(e) = sqlx::query(
            "INSERT INTO audit_logs (id, user_id, event_type, event_data, correlation_id, source) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(event_type.as_str())
        .bind(&event_data)
        .bind(correlation_id)
        .bind(source.as_str())
        .execute(&self.pool)
        .await
        {
            tracing::warn!(
                error = %e,
                event_type = event_type.as_str(),
                "failed to write audit event"
            );
        }
    }
}

/// The identity may not be resolved when an event fires early in the request
/// (authentication still running). One delayed retry covers that race.
async fn resolve_identity(identity: &IdentityCell) -> Option<Uuid> {
    if let Some(user_id) = identity.get() {
        return Some(user_id);
    }
    tokio::time::sleep(IDENTITY_RETRY_DELAY).await;
    identity.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_within_window_is_suppressed() {
        let cache = DedupCache::new(Duration::from_secs(2), 16);
        let now = Instant::now();
        let key = r#"experiment_generated:{"experiment_id":"x"}"#;

        assert!(cache.admit(key, now));
        assert!(!cache.admit(key, now + Duration::from_millis(500)));
    }

    #[test]
    fn same_key_after_the_window_is_admitted_again() {
        let cache = DedupCache::new(Duration::from_secs(2), 16);
        let now = Instant::now();

        assert!(cache.admit("k", now));
        assert!(cache.admit("k", now + Duration::from_secs(3)));
    }

    #[test]
    fn distinct_payloads_are_not_collapsed() {
        let cache = DedupCache::new(Duration::from_secs(2), 16);
        let now = Instant::now();

        assert!(cache.admit(r#"llm_request_error:{"code":429}"#, now));
        assert!(cache.admit(r#"llm_request_error:{"code":500}"#, now));
    }

    #[test]
    fn cache_prunes_expired_entries_at_capacity() {
        let cache = DedupCache::new(Duration::from_secs(2), 4);
        let start = Instant::now();
        for i in 0..4 {
            assert!(cache.admit(&format!("k{i}"), start));
        }

        // All four are stale by now; admitting a fifth prunes them.
        let later = start + Duration::from_secs(10);
        assert!(cache.admit("k4", later));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn in_flight_flag_drops_nested_acquisition() {
        let flag = InFlightFlag::new();
        let guard = flag.try_acquire().expect("first acquisition succeeds");
        assert!(flag.try_acquire().is_none());

        drop(guard);
        assert!(flag.try_acquire().is_some());
    }

    #[tokio::test]
    async fn known_identity_resolves_immediately() {
        let user_id = Uuid::now_v7();
        let cell = IdentityCell::known(user_id);
        assert_eq!(resolve_identity(&cell).await, Some(user_id));
    }

    #[tokio::test]
    async fn unresolved_identity_is_skipped_after_one_retry() {
        let cell = IdentityCell::empty();
        assert_eq!(resolve_identity(&cell).await, None);
    }

    #[tokio::test]
    async fn identity_filled_during_the_retry_window_is_picked_up() {
        let cell = IdentityCell::empty();
        let user_id = Uuid::now_v7();

        let writer = cell.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer.set(user_id);
        });

        assert_eq!(resolve_identity(&cell).await, Some(user_id));
    }
}
