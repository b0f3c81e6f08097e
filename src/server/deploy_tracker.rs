use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

/// What the tracker knows about a bot's background provisioning task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionTask {
    /// A task is registered and still running.
    InFlight,
    /// A task was registered but has already finished or panicked; the bot
    /// record carries the outcome.
    Finished,
    /// No task was ever registered for this bot.
    None,
}

/// Serializes lifecycle operations per bot id and tracks the fire-and-forget
/// provisioning task spawned on create/start, so a status query can tell
/// "still provisioning" apart from "task lost".
#[derive(Default)]
pub struct DeployTracker {
    locks: DashMap<i32, Arc<Mutex<()>>>,
    user_locks: DashMap<i32, Arc<Mutex<()>>>,
    tasks: DashMap<i32, JoinHandle<()>>,
}

impl DeployTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the per-bot operation lock. A second create/start/stop/
    /// restart/delete on the same bot waits here; operations on other bots
    /// proceed in parallel.
    pub async fn lock_bot(&self, bot_id: i32) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(bot_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Acquires the per-user creation lock. Held across the quota
    /// count-and-insert so two concurrent creates cannot both observe
    /// ceiling minus one and exceed the plan.
    pub async fn lock_user(&self, user_id: i32) -> OwnedMutexGuard<()> {
        let lock = self
            .user_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Registers the background provisioning task for a bot, aborting any
    /// previous one still in flight.
    pub fn track(&self, bot_id: i32, handle: JoinHandle<()>) {
        if let Some(previous) = self.tasks.insert(bot_id, handle) {
            previous.abort();
        }
    }

    pub fn task_state(&self, bot_id: i32) -> ProvisionTask {
        match self.tasks.get(&bot_id) {
            Some(handle) if !handle.is_finished() => ProvisionTask::InFlight,
            Some(_) => ProvisionTask::Finished,
            None => ProvisionTask::None,
        }
    }

    /// Aborts and forgets a bot's task. Used on delete.
    pub fn forget(&self, bot_id: i32) {
        if let Some((_, handle)) = self.tasks.remove(&bot_id) {
            handle.abort();
        }
        self.locks.remove(&bot_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn per_bot_lock_serializes_operations() {
        let tracker = Arc::new(DeployTracker::new());
        let guard = tracker.lock_bot(1).await;

        let tracker2 = tracker.clone();
        let contender = tokio::spawn(async move {
            let _g = tracker2.lock_bot(1).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn per_user_lock_serializes_concurrent_creates() {
        let tracker = Arc::new(DeployTracker::new());
        let guard = tracker.lock_user(10).await;

        let tracker2 = tracker.clone();
        let contender = tokio::spawn(async move {
            let _g = tracker2.lock_user(10).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Bot locks and other users' creates are unaffected.
        let _bot = tracker.lock_bot(10).await;
        let _other = tracker.lock_user(11).await;

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn cross_bot_locks_are_independent() {
        let tracker = DeployTracker::new();
        let _a = tracker.lock_bot(1).await;
        // Must not deadlock.
        let _b = tracker.lock_bot(2).await;
    }

    #[tokio::test]
    async fn task_state_tracks_lifecycle() {
        let tracker = DeployTracker::new();
        assert_eq!(tracker.task_state(1), ProvisionTask::None);

        tracker.track(
            1,
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }),
        );
        assert_eq!(tracker.task_state(1), ProvisionTask::InFlight);

        tracker.forget(1);
        assert_eq!(tracker.task_state(1), ProvisionTask::None);
    }

    #[tokio::test]
    async fn tracking_replacement_aborts_previous() {
        let tracker = DeployTracker::new();
        tracker.track(
            1,
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }),
        );
        tracker.track(1, tokio::spawn(async {}));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(tracker.task_state(1), ProvisionTask::Finished);
    }
}
