//! 遅延実行キュー（`delay <秒> <コマンド...>`）。
//!
//! メインスレッドが [`Scheduler::schedule`] で投入し、専用ワーカースレッドが
//! 期限の来たものから取り出して実行する。キューは常に期限の昇順に保たれる。
//!
//! ## 同期
//!
//! - キューと停止フラグは 1 つの `Mutex` で保護する
//! - `Condvar` は「キューが変わった」「停止要求」の両方の通知に使う
//! - ワーカーは起床のたびに停止フラグとキューの実状態を確認し直す（spurious wakeup 対策）
//! - 待機は最も近い期限までの `wait_timeout`。キューが空のときだけ無期限に待つ
//! - コマンドの実行はロックを外してから行う
//! - 停止は協調的: フラグを立てて `notify_all` し、`join` する

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

/// キューに同時に置ける遅延コマンド数。
pub const MAX_DELAYED: usize = 100;

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("delay: seconds must be a positive number")]
    NonPositiveDelay,
    #[error("delay: queue is full ({0} commands pending)")]
    QueueFull(usize),
    #[error("delay: missing command")]
    EmptyCommand,
    #[error("delay: {0} seconds is too far in the future")]
    DelayTooLarge(u64),
}

/// 期限付きのコマンド文字列。文字列は実行時に改めてパースする。
#[derive(Debug, Clone, PartialEq)]
pub struct DelayedCommand {
    pub due: Instant,
    pub text: String,
}

// ── DelayQueue ────────────────────────────────────────────────────

/// 期限昇順を保つ有界キュー。同じ期限なら投入順。
#[derive(Debug)]
pub struct DelayQueue {
    entries: Vec<DelayedCommand>,
    capacity: usize,
}

impl DelayQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// 挿入ソートで追加する。満杯なら何もせずエラー。
    pub fn insert(&mut self, cmd: DelayedCommand) -> Result<(), ScheduleError> {
        if self.entries.len() >= self.capacity {
            return Err(ScheduleError::QueueFull(self.entries.len()));
        }
        let pos = self.entries.partition_point(|e| e.due <= cmd.due);
        self.entries.insert(pos, cmd);
        Ok(())
    }

    /// `now` までに期限が来た先頭要素を取り出す。残りの順序は保たれる。
    pub fn take_due(&mut self, now: Instant) -> Option<DelayedCommand> {
        match self.entries.first() {
            Some(first) if first.due <= now => Some(self.entries.remove(0)),
            _ => None,
        }
    }

    /// 最も近い期限。
    pub fn next_due(&self) -> Option<Instant> {
        self.entries.first().map(|e| e.due)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Scheduler ─────────────────────────────────────────────────────

struct State {
    queue: DelayQueue,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

impl Shared {
    /// ワーカーがパニックしてもキューは壊れていないので、ポイズンは無視して続行する。
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 遅延実行ワーカーのハンドル。Drop でも停止と join を行う。
pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// [`MAX_DELAYED`] 枠のキューでワーカーを起動する。`runner` は期限が来た行ごとに
    /// ワーカースレッド上で呼ばれる。
    pub fn start<F>(runner: F) -> io::Result<Self>
    where
        F: Fn(&str) + Send + 'static,
    {
        Self::with_capacity(MAX_DELAYED, runner)
    }

    pub fn with_capacity<F>(capacity: usize, runner: F) -> io::Result<Self>
    where
        F: Fn(&str) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: DelayQueue::new(capacity),
                shutdown: false,
            }),
            changed: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("dsh-delay".to_string())
            .spawn(move || worker_loop(&worker_shared, runner))?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// `delay` 後に `text` を実行するよう登録し、期限を返す。
    pub fn schedule(&self, delay: Duration, text: &str) -> Result<Instant, ScheduleError> {
        if delay.is_zero() {
            return Err(ScheduleError::NonPositiveDelay);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(ScheduleError::EmptyCommand);
        }
        let due = Instant::now()
            .checked_add(delay)
            .ok_or(ScheduleError::DelayTooLarge(delay.as_secs()))?;
        let mut state = self.shared.lock();
        state.queue.insert(DelayedCommand {
            due,
            text: text.to_string(),
        })?;
        log::debug!("scheduled {:?} in {:?} ({} pending)", text, delay, state.queue.len());
        drop(state);
        self.shared.changed.notify_one();
        Ok(due)
    }

    /// 未実行のコマンド数。
    pub fn pending(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// ワーカーを止めて join する。未実行のコマンドは捨てる。2 回目以降は何もしない。
    ///
    /// 実行中の遅延コマンドがあれば、その終了まで戻らない。
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shared.lock().shutdown = true;
        self.shared.changed.notify_all();
        if worker.join().is_err() {
            log::warn!("delay worker panicked");
        }
        log::debug!("delay worker stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<F: Fn(&str)>(shared: &Shared, runner: F) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            return;
        }
        let now = Instant::now();
        if let Some(cmd) = state.queue.take_due(now) {
            drop(state);
            log::debug!("firing delayed command {:?}", cmd.text);
            runner(&cmd.text);
            state = shared.lock();
            continue;
        }
        state = match state.queue.next_due() {
            Some(due) => {
                shared
                    .changed
                    .wait_timeout(state, due.saturating_duration_since(now))
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => shared
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn recording() -> (impl Fn(&str) + Send + 'static, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let runner = move |text: &str| {
            let _ = tx.lock().unwrap().send(text.to_string());
        };
        (runner, rx)
    }

    #[test]
    fn queue_stays_sorted() {
        let base = Instant::now();
        let mut q = DelayQueue::new(10);
        for (secs, text) in [(5, "five"), (1, "one"), (3, "three"), (3, "three-b")] {
            q.insert(DelayedCommand {
                due: base + Duration::from_secs(secs),
                text: text.to_string(),
            })
            .unwrap();
        }
        assert_eq!(q.next_due(), Some(base + Duration::from_secs(1)));

        let later = base + Duration::from_secs(10);
        let order: Vec<String> = std::iter::from_fn(|| q.take_due(later))
            .map(|c| c.text)
            .collect();
        assert_eq!(order, ["one", "three", "three-b", "five"]);
        assert!(q.is_empty());
    }

    #[test]
    fn take_due_respects_time() {
        let base = Instant::now();
        let mut q = DelayQueue::new(4);
        q.insert(DelayedCommand {
            due: base + Duration::from_secs(2),
            text: "later".to_string(),
        })
        .unwrap();
        assert_eq!(q.take_due(base), None);
        assert_eq!(q.len(), 1);
        assert!(q.take_due(base + Duration::from_secs(2)).is_some());
    }

    #[test]
    fn full_queue_rejects() {
        let mut q = DelayQueue::new(2);
        let cmd = DelayedCommand {
            due: Instant::now(),
            text: "x".to_string(),
        };
        q.insert(cmd.clone()).unwrap();
        q.insert(cmd.clone()).unwrap();
        assert_eq!(q.insert(cmd), Err(ScheduleError::QueueFull(2)));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn fires_in_due_order() {
        let (runner, rx) = recording();
        let mut sched = Scheduler::start(runner).unwrap();
        sched.schedule(Duration::from_millis(150), "c").unwrap();
        sched.schedule(Duration::from_millis(50), "a").unwrap();
        sched.schedule(Duration::from_millis(100), "b").unwrap();

        let timeout = Duration::from_secs(5);
        let got: Vec<String> = (0..3).map(|_| rx.recv_timeout(timeout).unwrap()).collect();
        assert_eq!(got, ["a", "b", "c"]);
        assert_eq!(sched.pending(), 0);
        sched.shutdown();
    }

    #[test]
    fn does_not_fire_early() {
        let (runner, rx) = recording();
        let sched = Scheduler::start(runner).unwrap();
        let start = Instant::now();
        sched.schedule(Duration::from_millis(200), "x").unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn shutdown_interrupts_wait() {
        let (runner, rx) = recording();
        let mut sched = Scheduler::start(runner).unwrap();
        sched.schedule(Duration::from_secs(60), "never").unwrap();
        let start = Instant::now();
        sched.shutdown();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(rx.try_recv().is_err());
        // 2 回目は何もしない
        sched.shutdown();
    }

    #[test]
    fn shutdown_waits_for_running_command() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let mut sched = Scheduler::start(move |text: &str| {
            std::thread::sleep(Duration::from_millis(300));
            let _ = tx.lock().unwrap().send(text.to_string());
        })
        .unwrap();
        sched.schedule(Duration::from_millis(10), "slow").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while sched.pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        sched.shutdown();
        assert_eq!(rx.try_recv().unwrap(), "slow");
    }

    #[test]
    fn shutdown_when_idle() {
        let (runner, _rx) = recording();
        let mut sched = Scheduler::start(runner).unwrap();
        let start = Instant::now();
        sched.shutdown();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn rejects_bad_requests() {
        let (runner, _rx) = recording();
        let sched = Scheduler::with_capacity(1, runner).unwrap();
        assert_eq!(
            sched.schedule(Duration::ZERO, "echo hi"),
            Err(ScheduleError::NonPositiveDelay)
        );
        assert_eq!(
            sched.schedule(Duration::from_secs(1), "   "),
            Err(ScheduleError::EmptyCommand)
        );
        sched.schedule(Duration::from_secs(30), "echo a").unwrap();
        assert_eq!(
            sched.schedule(Duration::from_secs(30), "echo b"),
            Err(ScheduleError::QueueFull(1))
        );
        assert_eq!(sched.pending(), 1);
    }

    #[test]
    fn overflowing_delay_is_rejected() {
        let (runner, _rx) = recording();
        let sched = Scheduler::start(runner).unwrap();
        let secs = i64::MAX as u64;
        assert_eq!(
            sched.schedule(Duration::from_secs(secs), "echo hi"),
            Err(ScheduleError::DelayTooLarge(secs))
        );
        assert_eq!(
            sched.schedule(Duration::MAX, "echo hi"),
            Err(ScheduleError::DelayTooLarge(u64::MAX))
        );
        assert_eq!(sched.pending(), 0);
    }
}
