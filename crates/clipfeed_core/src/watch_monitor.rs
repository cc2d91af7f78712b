//! crates/clipfeed_core/src/watch_monitor.rs
//!
//! Watches each user's `WatchCounts` record and fires the initial taste-profile
//! build once the user has watched enough videos.
//!
//! Every monitored user gets one consumer task that handles snapshots in the
//! order the store emits them, so two evaluations for the same user never
//! overlap. The trigger itself is claimed with a conditional update on the
//! store: only the handler whose reset succeeds runs the profile build.
//!
//! A recurring profile refresh (every 50 videos after the first profile) is a
//! planned follow-up. It is not wired in, and how it should reset the counter
//! is still undecided.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::WatchCounts;
use crate::ports::{PortResult, ProfileBuilder, WatchCountStore};

/// Videos a user must watch before their first profile is built.
pub const INITIAL_PROFILE_THRESHOLD: u32 = 10;

/// What a snapshot asks the monitor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Idle,
    InitialProfile,
}

/// Decides whether a snapshot crosses the initial-profile threshold.
pub fn evaluate(counts: &WatchCounts) -> Trigger {
    if counts.last_profile_update.is_none()
        && counts.videos_watched_since_last_profile >= INITIAL_PROFILE_THRESHOLD
    {
        Trigger::InitialProfile
    } else {
        Trigger::Idle
    }
}

/// Lifecycle of one user's monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Uninitialized,
    Monitoring,
    TriggerInFlight,
}

/// What handling one snapshot ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Idle,
    /// The counter moved or another handler already claimed the trigger.
    ClaimLost,
    /// The reset could not be written; the trigger was suppressed.
    ClaimFailed,
    ProfileBuilt,
    /// The trigger was claimed but the profile build failed.
    ProfileFailed,
}

/// One user's consumer task and the sockets holding it open.
#[derive(Default)]
struct Session {
    handle: Option<JoinHandle<()>>,
    connections: usize,
}

impl Session {
    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

pub struct WatchCountMonitor {
    store: Arc<dyn WatchCountStore>,
    profiles: Arc<dyn ProfileBuilder>,
    sessions: Mutex<HashMap<Uuid, Session>>,
    states: Mutex<HashMap<Uuid, MonitorState>>,
}

impl WatchCountMonitor {
    pub fn new(store: Arc<dyn WatchCountStore>, profiles: Arc<dyn ProfileBuilder>) -> Self {
        Self {
            store,
            profiles,
            sessions: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Starts monitoring a user. Calling it again while the session is alive is a no-op.
    ///
    /// Subscribes to the user's record, ensures it exists, evaluates it once,
    /// and then evaluates every later snapshot. If the record cannot be ensured
    /// the error is logged and returned, and no session is started.
    ///
    /// No lock is held across the store round trips. Two concurrent starts for
    /// the same user may both subscribe, but only the first to finish spawns a
    /// consumer; the other drops its stream.
    pub async fn start_monitoring(self: &Arc<Self>, user_id: Uuid) -> PortResult<()> {
        if self.is_running(user_id) {
            debug!(%user_id, "Watch-count monitoring already active");
            return Ok(());
        }

        // Subscribe first: a watch recorded while the record is being ensured
        // is then buffered on the stream instead of lost.
        let mut updates = match self.store.watch_counts(user_id).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(%user_id, error = %e, "Failed to subscribe to watch counts, monitoring aborted");
                return Err(e);
            }
        };
        let initial = match self.store.ensure_watch_counts(user_id).await {
            Ok(counts) => counts,
            Err(e) => {
                error!(%user_id, error = %e, "Failed to initialize watch counts, monitoring aborted");
                return Err(e);
            }
        };

        let mut sessions = self.lock_sessions();
        let session = sessions.entry(user_id).or_default();
        if session.is_running() {
            debug!(%user_id, "Watch-count monitoring started concurrently, dropping duplicate stream");
            return Ok(());
        }

        self.set_state(user_id, MonitorState::Monitoring);
        info!(%user_id, count = initial.videos_watched_since_last_profile, "Watch-count monitoring started");

        let monitor = Arc::clone(self);
        session.handle = Some(tokio::spawn(async move {
            monitor.handle_snapshot(initial).await;
            while let Some(counts) = updates.next().await {
                monitor.handle_snapshot(counts).await;
            }
            info!(%user_id, "Watch-count stream closed");
            monitor.clear_state(user_id);
        }));
        Ok(())
    }

    /// Registers one open connection for the user and makes sure monitoring runs.
    ///
    /// Every successful `attach` must be paired with a `detach`; the session
    /// ends when the last connection detaches.
    pub async fn attach(self: &Arc<Self>, user_id: Uuid) -> PortResult<()> {
        self.lock_sessions().entry(user_id).or_default().connections += 1;
        if let Err(e) = self.start_monitoring(user_id).await {
            self.detach(user_id);
            return Err(e);
        }
        Ok(())
    }

    /// Releases one connection. Stops the user's session once none are left.
    pub fn detach(&self, user_id: Uuid) {
        let last = {
            let mut sessions = self.lock_sessions();
            match sessions.get_mut(&user_id) {
                Some(session) => {
                    session.connections = session.connections.saturating_sub(1);
                    session.connections == 0
                }
                None => false,
            }
        };
        if last {
            self.stop_monitoring(user_id);
        }
    }

    /// Stops a user's session, if any, regardless of open connections.
    pub fn stop_monitoring(&self, user_id: Uuid) {
        let removed = self.lock_sessions().remove(&user_id);
        if let Some(handle) = removed.and_then(|session| session.handle) {
            handle.abort();
            info!(%user_id, "Watch-count monitoring stopped");
        }
        self.clear_state(user_id);
    }

    pub fn state(&self, user_id: Uuid) -> MonitorState {
        self.lock_states()
            .get(&user_id)
            .copied()
            .unwrap_or(MonitorState::Uninitialized)
    }

    /// Number of users with a session entry.
    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    fn is_running(&self, user_id: Uuid) -> bool {
        self.lock_sessions()
            .get(&user_id)
            .is_some_and(Session::is_running)
    }

    /// Evaluates one snapshot and, on a threshold crossing, claims and runs the trigger.
    ///
    /// The reset is written before the profile build starts. A failed reset
    /// suppresses the trigger; the next snapshot will evaluate again.
    pub async fn handle_snapshot(&self, counts: WatchCounts) -> SnapshotOutcome {
        let user_id = counts.user_id;
        if evaluate(&counts) == Trigger::Idle {
            return SnapshotOutcome::Idle;
        }

        let observed = counts.videos_watched_since_last_profile;
        match self
            .store
            .claim_initial_profile(user_id, observed, Utc::now())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(%user_id, observed, "Initial-profile trigger already claimed or counter moved");
                return SnapshotOutcome::ClaimLost;
            }
            Err(e) => {
                error!(%user_id, error = %e, "Failed to reset watch counts, trigger suppressed");
                return SnapshotOutcome::ClaimFailed;
            }
        }

        self.set_state(user_id, MonitorState::TriggerInFlight);
        info!(%user_id, observed, "Watch threshold reached, building initial profile");
        let outcome = match self.profiles.build_initial_profile(user_id).await {
            Ok(()) => {
                info!(%user_id, "Initial profile built");
                SnapshotOutcome::ProfileBuilt
            }
            Err(e) => {
                warn!(%user_id, error = %e, "Initial profile build failed");
                SnapshotOutcome::ProfileFailed
            }
        };
        self.set_state(user_id, MonitorState::Monitoring);
        outcome
    }

    fn set_state(&self, user_id: Uuid, state: MonitorState) {
        self.lock_states().insert(user_id, state);
    }

    fn clear_state(&self, user_id: Uuid) {
        self.lock_states().remove(&user_id);
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<Uuid, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<Uuid, MonitorState>> {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{PortError, WatchCountStream};
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc};

    /// In-memory store. Snapshots pushed through `updates` reach the monitor's stream.
    struct FakeStore {
        record: Mutex<Option<WatchCounts>>,
        claims: Mutex<Vec<(u32, DateTime<Utc>)>>,
        fail_ensure: bool,
        fail_claim: bool,
        updates: Mutex<Option<mpsc::UnboundedReceiver<WatchCounts>>>,
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    impl FakeStore {
        fn new(events: Arc<Mutex<Vec<&'static str>>>) -> (Self, mpsc::UnboundedSender<WatchCounts>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let store = Self {
                record: Mutex::new(None),
                claims: Mutex::new(Vec::new()),
                fail_ensure: false,
                fail_claim: false,
                updates: Mutex::new(Some(rx)),
                events,
            };
            (store, tx)
        }

        fn current(&self) -> Option<WatchCounts> {
            self.record.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WatchCountStore for FakeStore {
        async fn ensure_watch_counts(&self, user_id: Uuid) -> PortResult<WatchCounts> {
            if self.fail_ensure {
                return Err(PortError::Unexpected("store offline".into()));
            }
            let mut record = self.record.lock().unwrap();
            Ok(record.get_or_insert_with(|| WatchCounts::empty(user_id)).clone())
        }

        async fn record_watch(&self, user_id: Uuid) -> PortResult<WatchCounts> {
            let mut record = self.record.lock().unwrap();
            let counts = record.get_or_insert_with(|| WatchCounts::empty(user_id));
            counts.videos_watched_since_last_profile += 1;
            Ok(counts.clone())
        }

        async fn claim_initial_profile(
            &self,
            user_id: Uuid,
            observed_count: u32,
            at: DateTime<Utc>,
        ) -> PortResult<bool> {
            if self.fail_claim {
                return Err(PortError::Unexpected("write rejected".into()));
            }
            let mut record = self.record.lock().unwrap();
            let counts = record.get_or_insert_with(|| WatchCounts::empty(user_id));
            if counts.videos_watched_since_last_profile != observed_count
                || counts.last_profile_update.is_some()
            {
                return Ok(false);
            }
            counts.videos_watched_since_last_profile = 0;
            counts.last_profile_update = Some(at);
            self.claims.lock().unwrap().push((0, at));
            self.events.lock().unwrap().push("reset");
            Ok(true)
        }

        async fn watch_counts(&self, _user_id: Uuid) -> PortResult<WatchCountStream> {
            let rx = self
                .updates
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| PortError::Unexpected("already subscribed".into()))?;
            Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|counts| (counts, rx))
            })))
        }
    }

    struct FakeProfiles {
        calls: Mutex<Vec<Uuid>>,
        fail: bool,
        events: Arc<Mutex<Vec<&'static str>>>,
        built: mpsc::UnboundedSender<Uuid>,
    }

    #[async_trait]
    impl ProfileBuilder for FakeProfiles {
        async fn build_initial_profile(&self, user_id: Uuid) -> PortResult<()> {
            self.calls.lock().unwrap().push(user_id);
            self.events.lock().unwrap().push("build");
            let _ = self.built.send(user_id);
            if self.fail {
                return Err(PortError::Unexpected("llm down".into()));
            }
            Ok(())
        }
    }

    struct Harness {
        monitor: Arc<WatchCountMonitor>,
        store: Arc<FakeStore>,
        profiles: Arc<FakeProfiles>,
        updates: mpsc::UnboundedSender<WatchCounts>,
        built: mpsc::UnboundedReceiver<Uuid>,
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    fn harness(configure: impl FnOnce(&mut FakeStore, &mut FakeProfiles)) -> Harness {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (mut store, updates) = FakeStore::new(events.clone());
        let (built_tx, built) = mpsc::unbounded_channel();
        let mut profiles = FakeProfiles {
            calls: Mutex::new(Vec::new()),
            fail: false,
            events: events.clone(),
            built: built_tx,
        };
        configure(&mut store, &mut profiles);
        let store = Arc::new(store);
        let profiles = Arc::new(profiles);
        let monitor = Arc::new(WatchCountMonitor::new(store.clone(), profiles.clone()));
        Harness {
            monitor,
            store,
            profiles,
            updates,
            built,
            events,
        }
    }

    fn counts(user_id: Uuid, watched: u32) -> WatchCounts {
        WatchCounts {
            user_id,
            videos_watched_since_last_profile: watched,
            last_profile_update: None,
        }
    }

    #[test]
    fn below_threshold_never_triggers() {
        let user = Uuid::new_v4();
        for watched in 0..INITIAL_PROFILE_THRESHOLD {
            assert_eq!(evaluate(&counts(user, watched)), Trigger::Idle);
        }
    }

    #[test]
    fn threshold_triggers_only_without_a_profile() {
        let user = Uuid::new_v4();
        assert_eq!(evaluate(&counts(user, 10)), Trigger::InitialProfile);
        assert_eq!(evaluate(&counts(user, 25)), Trigger::InitialProfile);

        let profiled = WatchCounts {
            last_profile_update: Some(Utc::now()),
            ..counts(user, 30)
        };
        assert_eq!(evaluate(&profiled), Trigger::Idle);
    }

    #[tokio::test]
    async fn crossing_the_threshold_resets_then_builds_once() {
        let h = harness(|_, _| {});
        let user = Uuid::new_v4();
        for _ in 0..9 {
            h.store.record_watch(user).await.unwrap();
        }
        assert_eq!(h.monitor.handle_snapshot(counts(user, 9)).await, SnapshotOutcome::Idle);

        h.store.record_watch(user).await.unwrap();
        let before = Utc::now();
        assert_eq!(
            h.monitor.handle_snapshot(counts(user, 10)).await,
            SnapshotOutcome::ProfileBuilt
        );

        let claims = h.store.claims.lock().unwrap().clone();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].0, 0);
        assert!(claims[0].1 >= before);
        assert_eq!(*h.events.lock().unwrap(), vec!["reset", "build"]);
        assert_eq!(*h.profiles.calls.lock().unwrap(), vec![user]);

        let stored = h.store.current().unwrap();
        assert_eq!(stored.videos_watched_since_last_profile, 0);
        assert!(stored.last_profile_update.is_some());
    }

    #[tokio::test]
    async fn reset_snapshot_does_not_retrigger() {
        let h = harness(|_, _| {});
        let user = Uuid::new_v4();
        h.store.ensure_watch_counts(user).await.unwrap();
        for _ in 0..10 {
            h.store.record_watch(user).await.unwrap();
        }
        h.monitor.handle_snapshot(counts(user, 10)).await;

        let after_reset = h.store.current().unwrap();
        assert_eq!(h.monitor.handle_snapshot(after_reset).await, SnapshotOutcome::Idle);
        assert_eq!(h.profiles.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_snapshot_loses_the_claim() {
        let h = harness(|_, _| {});
        let user = Uuid::new_v4();
        for _ in 0..11 {
            h.store.record_watch(user).await.unwrap();
        }
        // The first snapshot saw 10 but the counter has since moved to 11.
        assert_eq!(
            h.monitor.handle_snapshot(counts(user, 10)).await,
            SnapshotOutcome::ClaimLost
        );
        assert_eq!(
            h.monitor.handle_snapshot(counts(user, 11)).await,
            SnapshotOutcome::ProfileBuilt
        );
        assert_eq!(
            h.monitor.handle_snapshot(counts(user, 11)).await,
            SnapshotOutcome::ClaimLost
        );
        assert_eq!(h.profiles.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_reset_suppresses_the_trigger() {
        let h = harness(|store, _| store.fail_claim = true);
        let user = Uuid::new_v4();
        assert_eq!(
            h.monitor.handle_snapshot(counts(user, 10)).await,
            SnapshotOutcome::ClaimFailed
        );
        assert!(h.profiles.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_build_returns_to_monitoring() {
        let h = harness(|_, profiles| profiles.fail = true);
        let user = Uuid::new_v4();
        for _ in 0..10 {
            h.store.record_watch(user).await.unwrap();
        }
        assert_eq!(
            h.monitor.handle_snapshot(counts(user, 10)).await,
            SnapshotOutcome::ProfileFailed
        );
        assert_eq!(h.monitor.state(user), MonitorState::Monitoring);
    }

    #[tokio::test]
    async fn ensure_failure_aborts_monitoring() {
        let h = harness(|store, _| store.fail_ensure = true);
        let user = Uuid::new_v4();
        assert!(h.monitor.start_monitoring(user).await.is_err());
        assert_eq!(h.monitor.state(user), MonitorState::Uninitialized);
    }

    #[tokio::test]
    async fn live_session_triggers_once_and_start_is_idempotent() {
        let mut h = harness(|_, _| {});
        let user = Uuid::new_v4();

        h.monitor.start_monitoring(user).await.unwrap();
        // A second start must not ensure or subscribe again.
        h.monitor.start_monitoring(user).await.unwrap();
        assert_eq!(h.monitor.state(user), MonitorState::Monitoring);
        assert_eq!(h.store.current(), Some(WatchCounts::empty(user)));

        for _ in 0..10 {
            let snapshot = h.store.record_watch(user).await.unwrap();
            h.updates.send(snapshot).unwrap();
        }
        let built = tokio::time::timeout(Duration::from_secs(2), h.built.recv())
            .await
            .expect("profile build should run")
            .expect("channel open");
        assert_eq!(built, user);

        // The post-reset snapshot arrives after the build.
        let after_reset = h.store.current().unwrap();
        h.updates.send(after_reset).unwrap();
        let again = tokio::time::timeout(Duration::from_millis(100), h.built.recv()).await;
        assert!(again.is_err(), "trigger fired twice");
        assert_eq!(h.profiles.calls.lock().unwrap().len(), 1);

        h.monitor.stop_monitoring(user);
        assert_eq!(h.monitor.state(user), MonitorState::Uninitialized);
    }

    #[tokio::test]
    async fn last_detach_ends_the_session() {
        let h = harness(|_, _| {});
        let user = Uuid::new_v4();

        h.monitor.attach(user).await.unwrap();
        h.monitor.attach(user).await.unwrap();
        assert_eq!(h.monitor.session_count(), 1);

        h.monitor.detach(user);
        assert_eq!(h.monitor.session_count(), 1);
        assert_eq!(h.monitor.state(user), MonitorState::Monitoring);

        h.monitor.detach(user);
        assert_eq!(h.monitor.session_count(), 0);
        assert_eq!(h.monitor.state(user), MonitorState::Uninitialized);

        // Extra detaches are harmless.
        h.monitor.detach(user);
        assert_eq!(h.monitor.session_count(), 0);
    }

    #[tokio::test]
    async fn failed_attach_leaves_no_session() {
        let h = harness(|store, _| store.fail_ensure = true);
        let user = Uuid::new_v4();
        assert!(h.monitor.attach(user).await.is_err());
        assert_eq!(h.monitor.session_count(), 0);
    }

    /// Publishes every write on a broadcast channel, like the Postgres adapter.
    /// `ensure_watch_counts` hands back its snapshot and then lets one more
    /// watch land before returning.
    struct RacingStore {
        record: Mutex<WatchCounts>,
        changes: broadcast::Sender<WatchCounts>,
    }

    #[async_trait]
    impl WatchCountStore for RacingStore {
        async fn ensure_watch_counts(&self, _user_id: Uuid) -> PortResult<WatchCounts> {
            let snapshot = self.record.lock().unwrap().clone();
            self.record_watch(snapshot.user_id).await?;
            Ok(snapshot)
        }

        async fn record_watch(&self, _user_id: Uuid) -> PortResult<WatchCounts> {
            let counts = {
                let mut record = self.record.lock().unwrap();
                record.videos_watched_since_last_profile += 1;
                record.clone()
            };
            let _ = self.changes.send(counts.clone());
            Ok(counts)
        }

        async fn claim_initial_profile(
            &self,
            _user_id: Uuid,
            observed_count: u32,
            at: DateTime<Utc>,
        ) -> PortResult<bool> {
            let mut record = self.record.lock().unwrap();
            if record.videos_watched_since_last_profile != observed_count
                || record.last_profile_update.is_some()
            {
                return Ok(false);
            }
            record.videos_watched_since_last_profile = 0;
            record.last_profile_update = Some(at);
            Ok(true)
        }

        async fn watch_counts(&self, _user_id: Uuid) -> PortResult<WatchCountStream> {
            let rx = self.changes.subscribe();
            Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                loop {
                    match rx.recv().await {
                        Ok(counts) => return Some((counts, rx)),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            })))
        }
    }

    #[tokio::test]
    async fn watch_recorded_during_startup_still_triggers() {
        let user = Uuid::new_v4();
        let (changes, _) = broadcast::channel(16);
        let store = Arc::new(RacingStore {
            record: Mutex::new(counts(user, 9)),
            changes,
        });
        let (built_tx, mut built) = mpsc::unbounded_channel();
        let profiles = Arc::new(FakeProfiles {
            calls: Mutex::new(Vec::new()),
            fail: false,
            events: Arc::new(Mutex::new(Vec::new())),
            built: built_tx,
        });
        let monitor = Arc::new(WatchCountMonitor::new(store.clone(), profiles.clone()));

        monitor.start_monitoring(user).await.unwrap();
        let built_for = tokio::time::timeout(Duration::from_secs(2), built.recv())
            .await
            .expect("the 9 to 10 crossing should trigger a build")
            .expect("channel open");
        assert_eq!(built_for, user);
        assert_eq!(profiles.calls.lock().unwrap().len(), 1);

        let stored = store.record.lock().unwrap().clone();
        assert_eq!(stored.videos_watched_since_last_profile, 0);
        assert!(stored.last_profile_update.is_some());
    }
}
