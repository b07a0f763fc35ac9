use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use reading_core::model::SectionId;
use reading_core::scroll::{ScrollCheck, ScrollMetrics, evaluate};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::TrackerConfig;
use crate::progress_store::ProgressStore;

/// Host surface that reports the current scroll geometry.
pub trait Viewport: Send + Sync {
    fn scroll_metrics(&self) -> ScrollMetrics;
}

/// Observable lifecycle of the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Tracking(SectionId),
    Completed(SectionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckTrigger {
    Debounce,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerId(u64);

/// A scheduled check. Only the timer whose id still sits in its session slot
/// may act when it fires.
struct PendingTimer {
    id: TimerId,
    handle: JoinHandle<()>,
}

impl PendingTimer {
    fn cancel(self) {
        self.handle.abort();
    }
}

struct TrackerSession {
    section_id: SectionId,
    has_completed: bool,
    has_observed_scroll: bool,
    debounce: Option<PendingTimer>,
    fallback: Option<PendingTimer>,
}

impl TrackerSession {
    fn slot(&mut self, trigger: CheckTrigger) -> &mut Option<PendingTimer> {
        match trigger {
            CheckTrigger::Debounce => &mut self.debounce,
            CheckTrigger::Fallback => &mut self.fallback,
        }
    }
}

impl Drop for TrackerSession {
    fn drop(&mut self) {
        if let Some(timer) = self.debounce.take() {
            timer.cancel();
        }
        if let Some(timer) = self.fallback.take() {
            timer.cancel();
        }
    }
}

struct TrackerInner {
    config: TrackerConfig,
    store: Arc<ProgressStore>,
    viewport: Arc<dyn Viewport>,
    runtime: Handle,
    session: Mutex<Option<TrackerSession>>,
    next_timer: AtomicU64,
}

impl TrackerInner {
    fn lock_session(&self) -> MutexGuard<'_, Option<TrackerSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule(self: &Arc<Self>, delay: Duration, trigger: CheckTrigger) -> PendingTimer {
        let id = TimerId(self.next_timer.fetch_add(1, Ordering::Relaxed));
        let inner: Weak<Self> = Arc::downgrade(self);
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                inner.run_check(id, trigger).await;
            }
        });
        PendingTimer { id, handle }
    }

    async fn run_check(&self, id: TimerId, trigger: CheckTrigger) {
        let section_id = {
            let mut guard = self.lock_session();
            let Some(session) = guard.as_mut() else {
                return;
            };

            let slot = session.slot(trigger);
            if slot.as_ref().map(|timer| timer.id) != Some(id) {
                debug!(?trigger, "ignoring superseded timer");
                return;
            }
            // Detach rather than abort: this task is the one running.
            *slot = None;

            if trigger == CheckTrigger::Fallback && session.has_observed_scroll {
                return;
            }
            if session.has_completed {
                return;
            }

            match evaluate(self.viewport.scroll_metrics(), &self.config.thresholds) {
                ScrollCheck::TooShort { min_height } => {
                    debug!(
                        section = %session.section_id,
                        min_height,
                        "section too short to judge by scroll position"
                    );
                    return;
                }
                ScrollCheck::InProgress { percent } => {
                    debug!(section = %session.section_id, percent, "section not read yet");
                    return;
                }
                ScrollCheck::Reached { percent } => {
                    session.has_completed = true;
                    info!(section = %session.section_id, percent, ?trigger, "section read");
                    session.section_id.clone()
                }
            }
        };

        if !self.store.complete(&section_id).await {
            debug!(section = %section_id, "store did not record completion");
        }
    }
}

/// Infers that the displayed section has been read from its scroll position.
///
/// One session is live at a time. The host calls `start` when a section
/// becomes visible, forwards scroll events to `on_scroll`, and calls `stop`
/// when the section goes away. Timers run on the runtime handle given at
/// construction, so the host may call in from any thread. Each timer is tied
/// to the slot it was scheduled into, so a timer from an earlier session can
/// never act on a later one.
pub struct ScrollTracker {
    inner: Arc<TrackerInner>,
}

impl ScrollTracker {
    /// Timers are spawned onto `runtime`.
    #[must_use]
    pub fn new(
        store: Arc<ProgressStore>,
        viewport: Arc<dyn Viewport>,
        config: TrackerConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                config,
                store,
                viewport,
                runtime,
                session: Mutex::new(None),
                next_timer: AtomicU64::new(0),
            }),
        }
    }

    /// Begin tracking `section_id`, tearing down any live session first.
    pub fn start(&self, section_id: SectionId) {
        let mut guard = self.inner.lock_session();
        if let Some(previous) = guard.take() {
            debug!(section = %previous.section_id, "start without stop, dropping live session");
            drop(previous);
        }

        let fallback = self
            .inner
            .schedule(self.inner.config.fallback_delay, CheckTrigger::Fallback);
        info!(section = %section_id, "tracking started");
        *guard = Some(TrackerSession {
            section_id,
            has_completed: false,
            has_observed_scroll: false,
            debounce: None,
            fallback: Some(fallback),
        });
    }

    /// Feed one scroll event from the host. Ignored while idle.
    pub fn on_scroll(&self) {
        let mut guard = self.inner.lock_session();
        let Some(session) = guard.as_mut() else {
            return;
        };

        session.has_observed_scroll = true;
        if session.has_completed {
            return;
        }
        if let Some(timer) = session.debounce.take() {
            timer.cancel();
        }
        session.debounce = Some(
            self.inner
                .schedule(self.inner.config.debounce, CheckTrigger::Debounce),
        );
    }

    /// End the live session. Safe to call any number of times.
    pub fn stop(&self) {
        let previous = self.inner.lock_session().take();
        if let Some(session) = previous {
            debug!(section = %session.section_id, "tracking stopped");
        }
    }

    /// Mark the active section unread so it can be studied again.
    ///
    /// The live session stays completed; the next visit can complete it again.
    pub async fn uncomplete_active(&self) -> bool {
        let Some(section_id) = self.active_section() else {
            return false;
        };
        self.inner.store.uncomplete(&section_id).await
    }

    #[must_use]
    pub fn state(&self) -> TrackerState {
        match self.inner.lock_session().as_ref() {
            None => TrackerState::Idle,
            Some(session) if session.has_completed => {
                TrackerState::Completed(session.section_id.clone())
            }
            Some(session) => TrackerState::Tracking(session.section_id.clone()),
        }
    }

    #[must_use]
    pub fn active_section(&self) -> Option<SectionId> {
        self.inner
            .lock_session()
            .as_ref()
            .map(|session| session.section_id.clone())
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.inner.lock_session().is_some()
    }
}

impl Drop for ScrollTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use reading_core::model::ProgressSchema;
    use storage::repository::InMemoryRepository;
    use tokio::time::sleep;

    use crate::config::ProgressConfig;

    struct FakeViewport(Mutex<ScrollMetrics>);

    impl FakeViewport {
        fn new(document: f64, viewport: f64, top: f64) -> Arc<Self> {
            Arc::new(Self(Mutex::new(ScrollMetrics::new(document, viewport, top))))
        }

        fn scroll_to(&self, top: f64) {
            self.0.lock().unwrap().scroll_top = top;
        }
    }

    impl Viewport for FakeViewport {
        fn scroll_metrics(&self) -> ScrollMetrics {
            *self.0.lock().unwrap()
        }
    }

    fn id(raw: &str) -> SectionId {
        SectionId::new(raw).unwrap()
    }

    fn setup(viewport: Arc<FakeViewport>) -> (Arc<ProgressStore>, ScrollTracker) {
        let schema = ProgressSchema::from_keys(1, &["a", "b", "long"]).unwrap();
        let store = Arc::new(ProgressStore::new(
            schema,
            Arc::new(InMemoryRepository::new()),
            ProgressConfig::default(),
        ));
        let tracker = ScrollTracker::new(
            Arc::clone(&store),
            viewport,
            TrackerConfig::default(),
            Handle::current(),
        );
        (store, tracker)
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_completes_section_already_at_bottom() {
        let viewport = FakeViewport::new(1000.0, 500.0, 450.0);
        let (store, tracker) = setup(viewport);

        tracker.start(id("a"));
        sleep(ms(900)).await;
        assert!(!store.is_completed(&id("a")).await);
        assert_eq!(tracker.state(), TrackerState::Tracking(id("a")));

        sleep(ms(200)).await;
        assert!(store.is_completed(&id("a")).await);
        assert_eq!(tracker.state(), TrackerState::Completed(id("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_is_debounced() {
        let viewport = FakeViewport::new(2000.0, 500.0, 0.0);
        let (store, tracker) = setup(viewport.clone());
        tracker.start(id("long"));

        viewport.scroll_to(1500.0);
        tracker.on_scroll();
        sleep(ms(200)).await;
        tracker.on_scroll();
        sleep(ms(200)).await;
        assert!(!store.is_completed(&id("long")).await);

        sleep(ms(150)).await;
        assert!(store.is_completed(&id("long")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_must_be_reached() {
        let viewport = FakeViewport::new(1000.0, 500.0, 300.0);
        let (store, tracker) = setup(viewport.clone());
        tracker.start(id("a"));

        tracker.on_scroll();
        sleep(ms(400)).await;
        assert!(!store.is_completed(&id("a")).await);

        viewport.scroll_to(450.0);
        tracker.on_scroll();
        sleep(ms(400)).await;
        assert!(store.is_completed(&id("a")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn short_pages_never_complete() {
        let viewport = FakeViewport::new(600.0, 500.0, 100.0);
        let (store, tracker) = setup(viewport.clone());
        tracker.start(id("a"));

        sleep(ms(1100)).await;
        for top in [0.0, 50.0, 100.0] {
            viewport.scroll_to(top);
            tracker.on_scroll();
            sleep(ms(400)).await;
        }
        assert!(!store.is_completed(&id("a")).await);
        assert_eq!(tracker.state(), TrackerState::Tracking(id("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_is_skipped_once_user_scrolled() {
        let viewport = FakeViewport::new(2000.0, 500.0, 0.0);
        let (store, tracker) = setup(viewport.clone());
        tracker.start(id("long"));

        tracker.on_scroll();
        sleep(ms(500)).await;
        viewport.scroll_to(1500.0);
        sleep(ms(700)).await;

        assert!(!store.is_completed(&id("long")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_neutralizes_previous_session_timers() {
        let viewport = FakeViewport::new(1000.0, 500.0, 450.0);
        let (store, tracker) = setup(viewport);

        tracker.start(id("a"));
        tracker.on_scroll();
        tracker.start(id("b"));

        sleep(ms(500)).await;
        assert!(!store.is_completed(&id("a")).await);
        assert!(!store.is_completed(&id("b")).await);
        assert_eq!(tracker.state(), TrackerState::Tracking(id("b")));

        // b's own fallback still runs.
        sleep(ms(600)).await;
        assert!(!store.is_completed(&id("a")).await);
        assert!(store.is_completed(&id("b")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_timers_and_is_idempotent() {
        let viewport = FakeViewport::new(1000.0, 500.0, 450.0);
        let (store, tracker) = setup(viewport);

        tracker.stop();
        tracker.start(id("a"));
        tracker.on_scroll();
        sleep(ms(100)).await;
        tracker.stop();
        tracker.stop();

        sleep(ms(1500)).await;
        assert!(!store.is_completed(&id("a")).await);
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert_eq!(tracker.active_section(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_events_while_idle_are_dropped() {
        let viewport = FakeViewport::new(1000.0, 500.0, 450.0);
        let (store, tracker) = setup(viewport);

        tracker.on_scroll();
        sleep(ms(500)).await;
        assert!(!tracker.is_tracking());
        assert_eq!(store.completed_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_fires_once_per_visit() {
        let viewport = FakeViewport::new(1000.0, 500.0, 450.0);
        let (store, tracker) = setup(viewport);
        tracker.start(id("a"));
        tracker.on_scroll();
        sleep(ms(400)).await;
        assert!(store.is_completed(&id("a")).await);

        // A manual override inside the same visit is not undone by more scrolling.
        assert!(tracker.uncomplete_active().await);
        tracker.on_scroll();
        sleep(ms(400)).await;
        assert!(!store.is_completed(&id("a")).await);

        // The next visit can complete it again.
        tracker.stop();
        tracker.start(id("a"));
        tracker.on_scroll();
        sleep(ms(400)).await;
        assert!(store.is_completed(&id("a")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn host_thread_outside_runtime_can_drive_tracker() {
        let viewport = FakeViewport::new(2000.0, 500.0, 0.0);
        let (store, tracker) = setup(viewport.clone());

        std::thread::scope(|scope| {
            scope.spawn(|| {
                tracker.start(id("long"));
                viewport.scroll_to(1500.0);
                tracker.on_scroll();
            });
        });
        assert_eq!(tracker.state(), TrackerState::Tracking(id("long")));

        sleep(ms(400)).await;
        assert!(store.is_completed(&id("long")).await);
        assert_eq!(tracker.state(), TrackerState::Completed(id("long")));
    }

    #[tokio::test(start_paused = true)]
    async fn section_outside_schema_is_never_recorded() {
        let viewport = FakeViewport::new(1000.0, 500.0, 450.0);
        let (store, tracker) = setup(viewport);

        tracker.start(id("unlisted"));
        sleep(ms(1100)).await;

        // The session still finishes its visit, but the store ignores the id.
        assert_eq!(tracker.state(), TrackerState::Completed(id("unlisted")));
        assert!(!store.is_completed(&id("unlisted")).await);
        assert_eq!(store.completed_count().await, 0);
        assert!(!store.snapshot().await.contains(&id("unlisted")));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_tracker_cancels_timers() {
        let viewport = FakeViewport::new(1000.0, 500.0, 450.0);
        let (store, tracker) = setup(viewport);
        tracker.start(id("a"));
        drop(tracker);

        sleep(ms(1500)).await;
        assert!(!store.is_completed(&id("a")).await);
    }
}
