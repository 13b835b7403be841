//! 环境上下文（Ambient Context）
//!
//! 让调用链深处的代码无需逐层传参即可拿到“当前工作单元”：
//! - 异步调用链：`scope(uow, fut)` 基于 `tokio::task_local!`，跟随 future 在工作线程间迁移；
//! - 同步调用链：`enter(uow)` 返回作用域守卫，基于线程局部栈，守卫不可跨线程移动；
//! - 两者同时存在时，以最近进入的作用域为准；作用域退出后恢复到进入前的值；
//! - `spawn` 将当前工作单元带入新任务，独立启动的任务不会自动继承。
//!
//! 同步守卫不应跨越 `.await` 持有，异步代码请使用 `scope`。
//!
use crate::error::{UowError, UowResult};
use crate::unit_of_work::UnitOfWork;
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;

#[derive(Clone)]
struct AmbientEntry {
    seq: u64,
    unit: Arc<UnitOfWork>,
}

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

fn next_seq() -> u64 {
    NEXT_SEQ.fetch_add(1, Ordering::Relaxed)
}

tokio::task_local! {
    static TASK_CURRENT: AmbientEntry;
}

thread_local! {
    static THREAD_STACK: RefCell<Vec<AmbientEntry>> = const { RefCell::new(Vec::new()) };
}

/// 当前调用链上的工作单元；不在任何作用域内时为 `None`
pub fn current() -> Option<Arc<UnitOfWork>> {
    let task = TASK_CURRENT.try_with(|e| e.clone()).ok();
    let thread = THREAD_STACK.with(|stack| stack.borrow().last().cloned());

    let entry = match (task, thread) {
        (Some(t), Some(s)) => Some(if s.seq > t.seq { s } else { t }),
        (t, s) => t.or(s),
    };
    entry.map(|e| e.unit)
}

pub fn require_current() -> UowResult<Arc<UnitOfWork>> {
    current().ok_or(UowError::NoCurrentUnitOfWork)
}

/// 进入同步作用域，守卫释放时恢复进入前的工作单元
pub fn enter(unit: Arc<UnitOfWork>) -> AmbientScope {
    let seq = next_seq();
    tracing::trace!(unit_of_work = unit.id(), "ambient scope entered");
    THREAD_STACK.with(|stack| stack.borrow_mut().push(AmbientEntry { seq, unit }));
    AmbientScope {
        seq,
        _not_send: PhantomData,
    }
}

/// 在异步作用域内执行 `fut`
pub async fn scope<F>(unit: Arc<UnitOfWork>, fut: F) -> F::Output
where
    F: Future,
{
    let entry = AmbientEntry {
        seq: next_seq(),
        unit,
    };
    TASK_CURRENT.scope(entry, fut).await
}

/// 启动新任务，并让其继承当前工作单元
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current() {
        Some(unit) => tokio::spawn(scope(unit, fut)),
        None => tokio::spawn(fut),
    }
}

/// 同步作用域守卫
#[must_use = "the ambient scope ends as soon as the guard is dropped"]
pub struct AmbientScope {
    seq: u64,
    _not_send: PhantomData<*const ()>,
}

impl Drop for AmbientScope {
    fn drop(&mut self) {
        THREAD_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(pos) = stack.iter().rposition(|e| e.seq == self.seq) else {
                return;
            };
            if pos + 1 != stack.len() {
                tracing::warn!(
                    unit_of_work = stack[pos].unit.id(),
                    "ambient scope exited out of order"
                );
            }
            stack.remove(pos);
        });
    }
}
