//! Certificate issuance coordinator.
//!
//! Turns "eligible" into a persisted certificate exactly once per
//! (user, course) pair. Claims for the same pair serialize on a per-key
//! async mutex; claims for different pairs never block each other. The
//! storage-level uniqueness constraint remains the source of truth: losing
//! the conditional insert is recovered by returning the winning row.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::Certificate;
use crate::snapshot::{self, Eligibility, Grade};
use crate::store::{CertificateStore, CourseCatalog, InsertOutcome, ProgressStore};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// On-demand registry of per-(user, course) claim locks. Entries are
/// created on first contention and dropped once no claim holds or awaits
/// them, so the map only ever holds in-flight keys.
#[derive(Default)]
struct ClaimLocks {
    inner: StdMutex<HashMap<(Uuid, Uuid), Arc<AsyncMutex<()>>>>,
}

impl ClaimLocks {
    fn handle(&self, key: (Uuid, Uuid)) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key).or_default().clone()
    }

    fn release(&self, key: (Uuid, Uuid)) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        // Clones are only handed out under this same map lock, so a strong
        // count of 1 means the map holds the last reference.
        if map.get(&key).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(&key);
        }
    }
}

pub struct CertificateIssuer<S> {
    store: Arc<S>,
    locks: ClaimLocks,
    lock_timeout: Duration,
}

impl<S> CertificateIssuer<S>
where
    S: CourseCatalog + ProgressStore + CertificateStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self::with_lock_timeout(store, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(store: Arc<S>, lock_timeout: Duration) -> Self {
        Self {
            store,
            locks: ClaimLocks::default(),
            lock_timeout,
        }
    }

    /// Claim the certificate for (user, course).
    ///
    /// Idempotent: an already-issued certificate is returned as success.
    /// Fails with `NotEligible` when the completion gates are unmet and
    /// with `Busy` when the per-key lock cannot be acquired within the
    /// bounded wait.
    pub async fn claim(&self, user_id: Uuid, course_id: Uuid) -> EngineResult<Certificate> {
        let key = (user_id, course_id);
        let handle = self.locks.handle(key);
        let guard = match timeout(self.lock_timeout, handle.clone().lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                drop(handle);
                self.locks.release(key);
                return Err(EngineError::Busy);
            }
        };

        let result = self.claim_locked(user_id, course_id).await;

        drop(guard);
        drop(handle);
        self.locks.release(key);
        result
    }

    async fn claim_locked(&self, user_id: Uuid, course_id: Uuid) -> EngineResult<Certificate> {
        // Existence check inside the lock: a concurrent claim may have
        // just issued.
        if let Some(existing) = self.store.get_certificate(user_id, course_id).await? {
            tracing::debug!(%user_id, %course_id, code = %existing.certificate_code,
                "certificate already issued, returning existing");
            return Ok(existing);
        }

        // Never trust a caller-supplied eligibility flag; recompute from
        // current records while holding the lock.
        let snap = snapshot::compute_snapshot(self.store.as_ref(), user_id, course_id).await?;
        let eligibility = Eligibility::evaluate(&snap);
        if !eligibility.eligible {
            return Err(EngineError::NotEligible {
                unmet: eligibility.unmet,
            });
        }

        // A course without quizzes completes on lessons alone; its average
        // is vacuous full marks for grading purposes.
        let average_score = snap.average_quiz_score.unwrap_or(100.0);
        let certificate = Certificate {
            id: Uuid::new_v4(),
            certificate_code: new_certificate_code(),
            user_id,
            course_id,
            grade: Grade::from_score(average_score),
            average_score,
            issued_at: Utc::now(),
        };

        match self.store.insert_certificate_if_absent(&certificate).await? {
            InsertOutcome::Inserted(cert) => {
                tracing::info!(%user_id, %course_id, certificate_id = %cert.id,
                    code = %cert.certificate_code, grade = %cert.grade,
                    "certificate issued");
                Ok(cert)
            }
            InsertOutcome::AlreadyExists(winner) => {
                // Another process won the storage race; their row stands.
                tracing::warn!(%user_id, %course_id, certificate_id = %winner.id,
                    "lost certificate insert race, returning winning row");
                Ok(winner)
            }
        }
    }
}

/// Globally unique, human-shareable code, e.g. `LH-20260827-3F1A9C2B`.
fn new_certificate_code() -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("LH-{}-{}", Utc::now().format("%Y%m%d"), suffix)
}
