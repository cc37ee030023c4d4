//! Single pending timer.
//!
//! `ScheduledCallback` holds at most one armed deadline. Arming again replaces
//! the previous timer (`call_back_at`) or only replaces it when the new
//! deadline is strictly earlier (`call_back_if_earlier`). When the timer fires,
//! the state returns to idle *before* the callback runs, so the callback can arm
//! the next deadline itself.
//!
//! Callbacks are synchronous and run on Tokio's blocking pool, since room sweeps
//! touch storage.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::{runtime::Handle, task::JoinHandle};

/// Longest sleep handed to the Tokio timer. Later deadlines are re-evaluated
/// by whoever re-arms before then.
const MAX_SLEEP: Duration = Duration::from_secs(86_400 * 365 * 30);

type Callback = Box<dyn FnOnce() + Send + 'static>;

enum Slot {
    Idle,
    Armed {
        deadline: DateTime<Utc>,
        generation: u64,
        task: JoinHandle<()>,
    },
}

struct State {
    slot: Slot,
    generation: u64,
}

struct Inner {
    state: Mutex<State>,
    /// Held for the whole duration of a callback; `stop` waits on it.
    firing: Mutex<()>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, generation: u64, f: Callback) {
        let _firing = self.firing.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut state = self.lock_state();
            let current = matches!(
                &state.slot,
                Slot::Armed { generation: armed, .. } if *armed == generation
            );
            if !current {
                // cancelled or re-armed while the timer was waking up
                return;
            }
            state.slot = Slot::Idle;
        }
        f();
    }
}

/// A timer with at most one pending deadline.
pub struct ScheduledCallback {
    inner: Arc<Inner>,
    runtime: Handle,
}

impl ScheduledCallback {
    /// Create an idle callback bound to the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    /// Create an idle callback whose timers run on `runtime`.
    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    slot: Slot::Idle,
                    generation: 0,
                }),
                firing: Mutex::new(()),
            }),
            runtime,
        }
    }

    /// Arm `f` to run at `deadline`, replacing any pending timer.
    pub fn call_back_at<F>(&self, deadline: DateTime<Utc>, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.lock_state();
        self.arm(&mut state, deadline, Box::new(f));
    }

    /// Arm `f` to run after `delay`, replacing any pending timer.
    pub fn call_back_after<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let delta = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
        let deadline = Utc::now()
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.call_back_at(deadline, f);
    }

    /// Arm `f` at `deadline` only if nothing is pending or the pending
    /// deadline is strictly later. Returns whether the timer was replaced.
    pub fn call_back_if_earlier<F>(&self, deadline: DateTime<Utc>, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.lock_state();
        if let Slot::Armed {
            deadline: current, ..
        } = &state.slot
            && *current <= deadline
        {
            return false;
        }
        self.arm(&mut state, deadline, Box::new(f));
        true
    }

    /// Disarm without waiting for a callback that is already running.
    pub fn cancel(&self) {
        let mut state = self.inner.lock_state();
        if let Slot::Armed { task, .. } = std::mem::replace(&mut state.slot, Slot::Idle) {
            task.abort();
        }
    }

    /// Disarm and wait until an in-flight callback has returned.
    ///
    /// Must not be called from inside the callback itself.
    pub fn stop(&self) {
        self.cancel();
        drop(self.inner.firing.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// The pending deadline, if armed.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match &self.inner.lock_state().slot {
            Slot::Armed { deadline, .. } => Some(*deadline),
            Slot::Idle => None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline().is_some()
    }

    fn arm(&self, state: &mut State, deadline: DateTime<Utc>, f: Callback) {
        if let Slot::Armed { task, .. } = std::mem::replace(&mut state.slot, Slot::Idle) {
            task.abort();
        }
        state.generation += 1;
        let generation = state.generation;

        let delay = (deadline - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(MAX_SLEEP);
        let inner = Arc::clone(&self.inner);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tokio::task::spawn_blocking(move || inner.fire(generation, f)).await {
                tracing::error!("Scheduled callback failed: {}", e);
            }
        });

        state.slot = Slot::Armed {
            deadline,
            generation,
            task,
        };
    }
}

impl Default for ScheduledCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScheduledCallback {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::mpsc;

    use super::*;

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - 保留中のタイマーが常に高々 1 つであること
    // - call_back_if_earlier は厳密に早い期限のときだけ置き換えること
    // - 発火前に Idle に戻り、コールバック内から再設定できること
    // - cancel / stop が発火を止め、stop は実行中のコールバックを待つこと
    // ========================================

    const WAIT: Duration = Duration::from_secs(2);

    fn in_millis(ms: i64) -> DateTime<Utc> {
        Utc::now() + TimeDelta::milliseconds(ms)
    }

    #[tokio::test]
    async fn test_call_back_after_fires_once() {
        // テスト項目: call_back_after で設定したコールバックが 1 回だけ呼ばれる
        // given (前提条件):
        let callback = ScheduledCallback::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // when (操作):
        callback.call_back_after(Duration::from_millis(20), move || {
            let _ = tx.send("fired");
        });

        // then (期待する結果):
        let fired = tokio::time::timeout(WAIT, rx.recv()).await.unwrap();
        assert_eq!(fired, Some("fired"));
        assert!(!callback.is_armed());
        // sender was consumed with the callback, so the channel is closed
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_call_back_at_replaces_pending_timer() {
        // テスト項目: call_back_at は既存のタイマーを置き換える
        // given (前提条件):
        let callback = ScheduledCallback::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tx_late = tx.clone();
        callback.call_back_at(in_millis(5_000), move || {
            let _ = tx_late.send("late");
        });

        // when (操作):
        let soon = in_millis(30);
        callback.call_back_at(soon, move || {
            let _ = tx.send("soon");
        });

        // then (期待する結果):
        assert_eq!(callback.deadline(), Some(soon));
        let fired = tokio::time::timeout(WAIT, rx.recv()).await.unwrap();
        assert_eq!(fired, Some("soon"));
        assert_eq!(callback.deadline(), None);
    }

    #[tokio::test]
    async fn test_call_back_if_earlier_keeps_earlier_or_equal_deadline() {
        // テスト項目: call_back_if_earlier は同じか遅い期限では置き換えない
        // given (前提条件):
        let callback = ScheduledCallback::new();
        let first = in_millis(1_000);
        assert!(callback.call_back_if_earlier(first, || {}));

        // when (操作):
        let later = callback.call_back_if_earlier(in_millis(5_000), || {});
        let equal = callback.call_back_if_earlier(first, || {});
        let earlier_deadline = in_millis(500);
        let earlier = callback.call_back_if_earlier(earlier_deadline, || {});

        // then (期待する結果):
        assert!(!later);
        assert!(!equal);
        assert!(earlier);
        assert_eq!(callback.deadline(), Some(earlier_deadline));
        callback.cancel();
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        // テスト項目: cancel したコールバックは呼ばれない
        // given (前提条件):
        let callback = ScheduledCallback::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        callback.call_back_after(Duration::from_millis(30), move || {
            let _ = tx.send(());
        });

        // when (操作):
        callback.cancel();

        // then (期待する結果):
        assert!(!callback.is_armed());
        let result = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        // either still waiting or the dropped sender closed the channel
        assert!(matches!(result, Err(_) | Ok(None)));
    }

    #[tokio::test]
    async fn test_callback_can_rearm_itself() {
        // テスト項目: コールバック内から次のタイマーを設定できる
        // given (前提条件):
        let callback = Arc::new(ScheduledCallback::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let again = Arc::clone(&callback);

        // when (操作):
        callback.call_back_after(Duration::from_millis(10), move || {
            let _ = tx.send("first");
            let tx = tx.clone();
            again.call_back_after(Duration::from_millis(10), move || {
                let _ = tx.send("second");
            });
        });

        // then (期待する結果):
        assert_eq!(
            tokio::time::timeout(WAIT, rx.recv()).await.unwrap(),
            Some("first")
        );
        assert_eq!(
            tokio::time::timeout(WAIT, rx.recv()).await.unwrap(),
            Some("second")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_running_callback() {
        // テスト項目: stop は実行中のコールバックの完了を待つ
        // given (前提条件):
        let callback = ScheduledCallback::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        callback.call_back_after(Duration::from_millis(10), move || {
            std::thread::sleep(Duration::from_millis(300));
            flag.store(true, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        // when (操作):
        callback.stop();

        // then (期待する結果):
        assert!(finished.load(Ordering::SeqCst));
        assert!(!callback.is_armed());
    }
}
