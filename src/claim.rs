//! Claim protocol: pick exactly one `wait` job per worker cycle.
//!
//! Workers never talk to each other. Each one:
//! 1. pauses for a random 0..=N seconds so workers started together drift apart,
//! 2. reads the `wait` row with the lowest id (race-prone, claims nothing),
//! 3. issues `UPDATE ... WHERE id = ? AND status = 'wait'` and owns the job
//!    only if exactly one row was affected.
//!
//! Exclusivity comes from step 3 alone; the jitter only lowers the collision
//! rate.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::{JobConnection, JobSnapshot, JobStatus};

/// Per-process random pause generator, seeded once.
#[derive(Debug)]
pub struct Jitter {
    rng: StdRng,
    max_secs: u64,
}

impl Jitter {
    /// Seeded from OS entropy.
    pub fn new(max: Duration) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            max_secs: max.as_secs(),
        }
    }

    /// Deterministic sequence, for tests.
    pub fn with_seed(max: Duration, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            max_secs: max.as_secs(),
        }
    }

    /// Next pause: whole seconds, uniform in `0..=max`.
    pub fn next_delay(&mut self) -> Duration {
        if self.max_secs == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs(self.rng.gen_range(0..=self.max_secs))
    }
}

/// Result of one claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This worker owns the job. The snapshot shows `in-progress`.
    Claimed(JobSnapshot),
    /// Another worker claimed the candidate first.
    Lost { id: u64 },
    /// No `wait` rows.
    Empty,
}

/// Claim protocol state for one worker.
#[derive(Debug)]
pub struct ClaimProtocol {
    jitter: Jitter,
}

impl ClaimProtocol {
    pub fn new(jitter: Jitter) -> Self {
        Self { jitter }
    }

    /// Sleep for a fresh jitter delay. Called before every claim attempt.
    pub async fn pause(&mut self) {
        let delay = self.jitter.next_delay();
        debug!(delay_secs = delay.as_secs(), "Pausing before job search");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Pause, then try to claim.
    pub async fn attempt(
        &mut self,
        conn: &mut dyn JobConnection,
    ) -> Result<ClaimOutcome, DatabaseError> {
        self.pause().await;
        try_claim(conn).await
    }
}

/// Read the lowest-id `wait` job and try to take it with a guarded update.
pub async fn try_claim(conn: &mut dyn JobConnection) -> Result<ClaimOutcome, DatabaseError> {
    let Some(mut candidate) = conn.select_min_wait_job().await? else {
        debug!("No waiting jobs");
        return Ok(ClaimOutcome::Empty);
    };

    match conn.claim(candidate.id).await? {
        1 => {
            candidate.status = JobStatus::InProgress.as_str().to_string();
            info!(job_id = candidate.id, task = %candidate.task, "Claimed job");
            Ok(ClaimOutcome::Claimed(candidate))
        }
        0 => {
            debug!(job_id = candidate.id, "Lost claim race");
            Ok(ClaimOutcome::Lost { id: candidate.id })
        }
        n => Err(DatabaseError::Query(format!(
            "claim of job {} affected {n} rows",
            candidate.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JobStore, LibSqlJobStore, NewJob};

    async fn test_store() -> (tempfile::TempDir, LibSqlJobStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = LibSqlJobStore::open(&tmp.path().join("jobs.db")).await.unwrap();
        (tmp, store)
    }

    #[test]
    fn jitter_stays_in_range() {
        let mut jitter = Jitter::with_seed(Duration::from_secs(5), 7);
        for _ in 0..500 {
            assert!(jitter.next_delay() <= Duration::from_secs(5));
        }
    }

    #[test]
    fn jitter_covers_both_ends() {
        let mut jitter = Jitter::with_seed(Duration::from_secs(5), 42);
        let delays: Vec<u64> = (0..500).map(|_| jitter.next_delay().as_secs()).collect();
        assert!(delays.contains(&0));
        assert!(delays.contains(&5));
    }

    #[test]
    fn zero_max_never_pauses() {
        let mut jitter = Jitter::new(Duration::ZERO);
        assert_eq!(jitter.next_delay(), Duration::ZERO);
    }

    #[tokio::test]
    async fn claims_lowest_waiting_id() {
        let (_tmp, store) = test_store().await;
        // ids 1: done, 2: wait, 3: wait
        store.insert_job(&NewJob::with_status("done")).await.unwrap();
        let wait_a = store.insert_job(&NewJob::waiting("echo a")).await.unwrap();
        store.insert_job(&NewJob::waiting("echo b")).await.unwrap();

        let mut conn = store.connect().await.unwrap();
        match try_claim(conn.as_mut()).await.unwrap() {
            ClaimOutcome::Claimed(job) => {
                assert_eq!(job.id, wait_a);
                assert_eq!(job.state(), Some(JobStatus::InProgress));
            }
            other => panic!("expected a claim, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_when_nothing_waits() {
        let (_tmp, store) = test_store().await;
        store.insert_job(&NewJob::with_status("error")).await.unwrap();

        let mut conn = store.connect().await.unwrap();
        assert_eq!(try_claim(conn.as_mut()).await.unwrap(), ClaimOutcome::Empty);
    }

    #[tokio::test]
    async fn successive_claims_walk_the_queue() {
        let (_tmp, store) = test_store().await;
        let a = store.insert_job(&NewJob::waiting("echo a")).await.unwrap();
        let b = store.insert_job(&NewJob::waiting("echo b")).await.unwrap();

        let mut conn = store.connect().await.unwrap();
        let mut protocol = ClaimProtocol::new(Jitter::new(Duration::ZERO));

        let first = protocol.attempt(conn.as_mut()).await.unwrap();
        let second = protocol.attempt(conn.as_mut()).await.unwrap();
        let third = protocol.attempt(conn.as_mut()).await.unwrap();

        assert!(matches!(first, ClaimOutcome::Claimed(ref j) if j.id == a));
        assert!(matches!(second, ClaimOutcome::Claimed(ref j) if j.id == b));
        assert_eq!(third, ClaimOutcome::Empty);
    }

    #[tokio::test]
    async fn stale_read_loses_the_race() {
        let (_tmp, store) = test_store().await;
        let id = store.insert_job(&NewJob::waiting("true")).await.unwrap();

        let mut slow = store.connect().await.unwrap();
        let mut fast = store.connect().await.unwrap();

        // Both read the same candidate before either updates.
        let seen_by_slow = slow.select_min_wait_job().await.unwrap().unwrap();
        assert_eq!(seen_by_slow.id, id);

        assert!(matches!(
            try_claim(fast.as_mut()).await.unwrap(),
            ClaimOutcome::Claimed(_)
        ));
        assert_eq!(slow.claim(seen_by_slow.id).await.unwrap(), 0);
    }
}
