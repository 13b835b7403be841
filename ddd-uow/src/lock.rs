//! 锁协调器（LockCoordinator）
//!
//! 为整个工作单元提供互斥访问，同步与异步调用方共享同一把锁：
//! - 同步等待者挂在 `Condvar` 上，阻塞当前线程；
//! - 异步等待者挂在 `tokio::sync::Notify` 上，挂起任务而不阻塞工作线程，
//!   唤醒顺序大体遵循 FIFO；
//! - 超时一律以 `false` 返回，不产生错误，重试/退避策略交给调用方；
//! - 不可重入：同一线程在同步持有期间再次阻塞获取会得到 `LockReentrancy` 错误。
//!
use crate::error::{UowError, UowResult};
use std::pin::pin;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct LockState {
    held: bool,
    // 仅记录同步获取者，异步任务可能在线程间迁移
    holder: Option<ThreadId>,
}

#[derive(Debug)]
pub struct LockCoordinator {
    owner: u64,
    state: Mutex<LockState>,
    condvar: Condvar,
    notify: Notify,
}

impl LockCoordinator {
    pub fn new(owner: u64) -> Self {
        Self {
            owner,
            state: Mutex::new(LockState::default()),
            condvar: Condvar::new(),
            notify: Notify::new(),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state().held
    }

    /// 阻塞直到获得锁，返回作用域守卫
    pub fn acquire(&self) -> UowResult<LockGuard<'_>> {
        self.lock()?;
        Ok(LockGuard { coordinator: self })
    }

    /// 非阻塞获取，成功则返回守卫
    pub fn try_acquire(&self) -> Option<LockGuard<'_>> {
        self.try_lock().then(|| LockGuard { coordinator: self })
    }

    pub fn try_acquire_for(&self, timeout: Duration) -> Option<LockGuard<'_>> {
        self.try_lock_for(timeout)
            .then(|| LockGuard { coordinator: self })
    }

    pub fn try_lock(&self) -> bool {
        let mut state = self.state();
        Self::take(&mut state, Some(thread::current().id()))
    }

    pub fn try_lock_for(&self, timeout: Duration) -> bool {
        let state = self.state();
        let (mut state, _) = self
            .condvar
            .wait_timeout_while(state, timeout, |s| s.held)
            .unwrap_or_else(PoisonError::into_inner);
        Self::take(&mut state, Some(thread::current().id()))
    }

    /// 非作用域的显式加锁，需与 `release` 成对使用
    pub fn lock(&self) -> UowResult<()> {
        let me = thread::current().id();
        let state = self.state();
        if state.held && state.holder == Some(me) {
            return Err(UowError::LockReentrancy {
                unit_of_work: self.owner,
            });
        }

        if state.held {
            tracing::debug!(unit_of_work = self.owner, "waiting for unit of work lock");
        }
        let mut state = self
            .condvar
            .wait_while(state, |s| s.held)
            .unwrap_or_else(PoisonError::into_inner);
        Self::take(&mut state, Some(me));
        Ok(())
    }

    /// 释放锁；未持有时调用为错误
    pub fn release(&self) -> UowResult<()> {
        {
            let mut state = self.state();
            if !state.held {
                return Err(UowError::LockNotHeld {
                    unit_of_work: self.owner,
                });
            }
            state.held = false;
            state.holder = None;
        }

        self.condvar.notify_one();
        self.notify.notify_one();
        Ok(())
    }

    pub async fn acquire_async(&self) -> LockGuard<'_> {
        self.lock_async().await;
        LockGuard { coordinator: self }
    }

    pub async fn try_acquire_async(&self, timeout: Duration) -> Option<LockGuard<'_>> {
        self.try_lock_async(timeout)
            .await
            .then(|| LockGuard { coordinator: self })
    }

    /// 异步加锁：挂起任务直到获得锁
    pub async fn lock_async(&self) {
        loop {
            let mut notified = pin!(self.notify.notified());
            // 先登记再检查，避免检查与等待之间的释放被错过
            notified.as_mut().enable();

            let acquired = Self::take(&mut self.state(), None);
            if acquired {
                return;
            }
            tracing::debug!(unit_of_work = self.owner, "waiting for unit of work lock");
            notified.await;
        }
    }

    pub async fn try_lock_async(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.lock_async())
            .await
            .is_ok()
    }

    fn take(state: &mut LockState, holder: Option<ThreadId>) -> bool {
        if state.held {
            return false;
        }
        state.held = true;
        state.holder = holder;
        true
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 锁守卫：任意路径离开作用域时恰好释放一次
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard<'a> {
    coordinator: &'a LockCoordinator,
}

impl LockGuard<'_> {
    /// 显式提前释放
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.coordinator.release() {
            tracing::warn!(error = %err, "lock guard released an unlocked coordinator");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn guard_releases_on_drop() {
        let lock = LockCoordinator::new(1);
        {
            let _guard = lock.acquire().unwrap();
            assert!(lock.is_locked());
            assert!(!lock.try_lock());
        }
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
        lock.release().unwrap();
    }

    #[test]
    fn release_when_free_is_an_error() {
        let lock = LockCoordinator::new(4);
        match lock.release().unwrap_err() {
            UowError::LockNotHeld { unit_of_work } => assert_eq!(unit_of_work, 4),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn blocking_reacquire_on_same_thread_is_rejected() {
        let lock = LockCoordinator::new(2);
        let _guard = lock.acquire().unwrap();
        assert!(matches!(
            lock.lock(),
            Err(UowError::LockReentrancy { unit_of_work: 2 })
        ));
    }

    #[test]
    fn try_lock_for_times_out_while_held() {
        let lock = Arc::new(LockCoordinator::new(1));
        lock.lock().unwrap();

        let waiter = {
            let lock = lock.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let ok = lock.try_lock_for(Duration::from_millis(50));
                (ok, started.elapsed())
            })
        };

        let (ok, elapsed) = waiter.join().unwrap();
        assert!(!ok);
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(1000));
        lock.release().unwrap();
    }

    #[test]
    fn blocked_thread_wakes_on_release() {
        let lock = Arc::new(LockCoordinator::new(1));
        lock.lock().unwrap();

        let waiter = {
            let lock = lock.clone();
            thread::spawn(move || {
                let _guard = lock.acquire().unwrap();
            })
        };

        thread::sleep(Duration::from_millis(20));
        lock.release().unwrap();
        waiter.join().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn mutual_exclusion_across_threads() {
        let lock = LockCoordinator::new(1);
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        let _guard = lock.acquire().unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(!lock.is_locked());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn async_waiter_resumes_after_sync_release() {
        let lock = Arc::new(LockCoordinator::new(1));
        lock.lock().unwrap();

        let task = {
            let lock = lock.clone();
            tokio::spawn(async move {
                let _guard = lock.acquire_async().await;
                true
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        lock.release().unwrap();
        assert!(task.await.unwrap());
        assert!(!lock.is_locked());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn try_lock_async_times_out_then_succeeds() {
        let lock = LockCoordinator::new(1);
        let guard = lock.acquire_async().await;

        let started = Instant::now();
        assert!(!lock.try_lock_async(Duration::from_millis(30)).await);
        assert!(started.elapsed() >= Duration::from_millis(30));

        drop(guard);
        let guard = lock.try_acquire_async(Duration::from_millis(30)).await;
        assert!(guard.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn async_waiters_are_mutually_exclusive() {
        let lock = Arc::new(LockCoordinator::new(1));
        let counter = Arc::new(AtomicUsize::new(0));
        let mut set = tokio::task::JoinSet::new();

        for _ in 0..32 {
            let lock = lock.clone();
            let counter = counter.clone();
            set.spawn(async move {
                let _guard = lock.acquire_async().await;
                let before = counter.load(Ordering::SeqCst);
                tokio::task::yield_now().await;
                counter.store(before + 1, Ordering::SeqCst);
            });
        }
        while let Some(res) = set.join_next().await {
            res.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }
}
