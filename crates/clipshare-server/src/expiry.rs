//! Per-session idle timers.
//!
//! Each armed timer carries a generation number drawn from a process-wide
//! counter. A timer task that wakes up reports `(code, generation)` to the
//! expiry callback, and the callback may only act after [`ExpiryScheduler::claim`]
//! succeeds for that exact generation. Refreshing or cancelling removes or
//! replaces the entry, so a superseded wake-up can never claim it.
//!
//! Timer state per code: armed → re-armed (refresh) → fired (claim) or
//! cancelled (cancel). Fired and cancelled are terminal; a later refresh arms
//! a brand-new generation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clipshare_core::SessionCode;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Identity of one armed timer.
pub type Generation = u64;

/// Default idle window before an untouched session is deleted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

type ExpireCallback = Arc<dyn Fn(SessionCode, Generation) + Send + Sync>;

struct ArmedTimer {
    generation: Generation,
    handle: JoinHandle<()>,
}

/// Owns at most one live countdown per session code.
pub struct ExpiryScheduler {
    ttl: Duration,
    timers: DashMap<SessionCode, ArmedTimer>,
    next_generation: AtomicU64,
    on_expire: ExpireCallback,
}

impl ExpiryScheduler {
    /// Create a scheduler whose timers call `on_expire(code, generation)`
    /// after `ttl` without a refresh.
    ///
    /// The callback runs on the timer's task and must call [`Self::claim`]
    /// before acting on the expiry.
    pub fn new<F>(ttl: Duration, on_expire: F) -> Self
    where
        F: Fn(SessionCode, Generation) + Send + Sync + 'static,
    {
        Self {
            ttl,
            timers: DashMap::new(),
            next_generation: AtomicU64::new(0),
            on_expire: Arc::new(on_expire),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cancel any timer for `code` and arm a new one. Must be called from
    /// within a Tokio runtime.
    pub fn refresh(&self, code: &SessionCode) -> Generation {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let ttl = self.ttl;
        let on_expire = Arc::clone(&self.on_expire);
        let fired_code = code.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            trace!(code = %fired_code, generation, "expiry timer woke");
            on_expire(fired_code, generation);
        });

        let replaced = self
            .timers
            .insert(code.clone(), ArmedTimer { generation, handle });
        if let Some(previous) = replaced {
            previous.handle.abort();
        }
        trace!(code = %code, generation, "expiry timer armed");
        generation
    }

    /// Cancel the timer for `code`. Returns whether one was armed.
    pub fn cancel(&self, code: &SessionCode) -> bool {
        match self.timers.remove(code) {
            Some((_, timer)) => {
                timer.handle.abort();
                debug!(code = %code, generation = timer.generation, "expiry timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Transition the timer for `code` to fired, but only if `generation` is
    /// still the armed one. At most one caller ever wins a given generation.
    pub fn claim(&self, code: &SessionCode, generation: Generation) -> bool {
        self.timers
            .remove_if(code, |_, timer| timer.generation == generation)
            .is_some()
    }

    /// The currently armed generation for `code`, if any.
    pub fn armed_generation(&self, code: &SessionCode) -> Option<Generation> {
        self.timers.get(code).map(|timer| timer.generation)
    }

    pub fn is_armed(&self, code: &SessionCode) -> bool {
        self.timers.contains_key(code)
    }

    /// Number of armed timers.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Cancel every armed timer. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let codes: Vec<SessionCode> = self.timers.iter().map(|e| e.key().clone()).collect();
        codes.iter().filter(|code| self.cancel(code)).count()
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        for timer in self.timers.iter() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    type Fired = Arc<Mutex<Vec<(SessionCode, Generation)>>>;

    fn code(raw: &str) -> SessionCode {
        SessionCode::parse(raw).unwrap()
    }

    /// Scheduler whose callback claims and records every winning fire.
    fn recording(ttl: Duration) -> (Arc<ExpiryScheduler>, Fired) {
        let fired: Fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let scheduler = Arc::new_cyclic(|weak: &std::sync::Weak<ExpiryScheduler>| {
            let weak = weak.clone();
            ExpiryScheduler::new(ttl, move |code, generation| {
                if let Some(scheduler) = weak.upgrade() {
                    if scheduler.claim(&code, generation) {
                        sink.lock().push((code, generation));
                    }
                }
            })
        });
        (scheduler, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_ttl() {
        let (scheduler, fired) = recording(Duration::from_secs(600));
        let generation = scheduler.refresh(&code("1111"));

        tokio::time::sleep(Duration::from_secs(599)).await;
        assert!(fired.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(*fired.lock(), vec![(code("1111"), generation)]);
        assert!(!scheduler.is_armed(&code("1111")));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_postpones_expiry() {
        let (scheduler, fired) = recording(Duration::from_secs(600));
        let c = code("2222");
        scheduler.refresh(&c);
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(500)).await;
            scheduler.refresh(&c);
        }
        assert!(fired.lock().is_empty());
        assert!(scheduler.is_armed(&c));

        tokio::time::sleep(Duration::from_secs(601)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_fire() {
        let (scheduler, fired) = recording(Duration::from_secs(60));
        let c = code("3333");
        scheduler.refresh(&c);
        assert!(scheduler.cancel(&c));
        assert!(!scheduler.cancel(&c));

        tokio::time::sleep(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert!(fired.lock().is_empty());
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn stale_generation_cannot_claim() {
        let scheduler = ExpiryScheduler::new(Duration::from_secs(600), |_, _| {});
        let c = code("4444");
        let first = scheduler.refresh(&c);
        let second = scheduler.refresh(&c);
        assert_ne!(first, second);

        // A wake-up from the replaced timer arrives late.
        assert!(!scheduler.claim(&c, first));
        assert_eq!(scheduler.armed_generation(&c), Some(second));

        assert!(scheduler.claim(&c, second));
        assert!(!scheduler.claim(&c, second));
        assert!(!scheduler.is_armed(&c));
    }

    #[tokio::test]
    async fn claim_after_cancel_fails() {
        let scheduler = ExpiryScheduler::new(Duration::from_secs(600), |_, _| {});
        let c = code("5555");
        let generation = scheduler.refresh(&c);
        scheduler.cancel(&c);
        assert!(!scheduler.claim(&c, generation));
    }

    #[tokio::test]
    async fn generations_are_unique_across_codes() {
        let scheduler = ExpiryScheduler::new(Duration::from_secs(600), |_, _| {});
        let a = scheduler.refresh(&code("1000"));
        let b = scheduler.refresh(&code("2000"));
        let c = scheduler.refresh(&code("1000"));
        assert!(a < b && b < c);
        assert_eq!(scheduler.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_disarms_everything() {
        let (scheduler, fired) = recording(Duration::from_secs(10));
        for raw in ["1001", "1002", "1003"] {
            scheduler.refresh(&code(raw));
        }
        assert_eq!(scheduler.cancel_all(), 3);
        assert!(scheduler.is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        assert!(fired.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn independent_codes_expire_independently() {
        let (scheduler, fired) = recording(Duration::from_secs(100));
        scheduler.refresh(&code("7001"));
        tokio::time::sleep(Duration::from_secs(50)).await;
        scheduler.refresh(&code("7002"));

        tokio::time::sleep(Duration::from_secs(51)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.lock().len(), 1);
        assert_eq!(fired.lock()[0].0, code("7001"));

        tokio::time::sleep(Duration::from_secs(50)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.lock().len(), 2);
    }
}
