//! 资源缓存（ResourceCache）
//!
//! 每个工作单元一份，按种类记忆化单一存活实例：
//! - 每个种类一个独立槽位，槽位内双重检查，确保并发下只创建一次；
//! - 不同种类互不阻塞，分片锁只在取槽位时短暂持有；
//! - 创建中的种类与等待者构成等待图，等待会闭合环路时报告循环依赖，
//!   同一线程的递归创建与跨线程的相互依赖均不会死锁；
//! - 记录创建序号，快照与清空按创建顺序返回。
//!
use crate::error::{UowError, UowResult};
use crate::factory::ResourceInstance;
use crate::kind::ResourceKind;
use dashmap::DashMap;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

#[derive(Clone)]
struct CachedEntry {
    seq: u64,
    resource: ResourceInstance,
}

type Slot = Arc<Mutex<Option<CachedEntry>>>;

/// 等待图：种类 → 正在创建它的线程，线程 → 它正在等待的种类
#[derive(Default)]
struct CreationGraph {
    creators: HashMap<TypeId, ThreadId>,
    waiting: HashMap<ThreadId, TypeId>,
}

impl CreationGraph {
    /// `me` 等待 `kind` 是否会闭合一条等待环
    fn closes_cycle(&self, kind: TypeId, me: ThreadId) -> bool {
        let mut next = kind;
        for _ in 0..=self.waiting.len() {
            let Some(&creator) = self.creators.get(&next) else {
                return false;
            };
            if creator == me {
                return true;
            }
            match self.waiting.get(&creator) {
                Some(&k) => next = k,
                None => return false,
            }
        }
        false
    }
}

pub struct ResourceCache {
    owner: u64,
    slots: DashMap<TypeId, Slot>,
    graph: Mutex<CreationGraph>,
    seq: AtomicU64,
}

impl ResourceCache {
    /// `owner` 为所属工作单元 ID，仅用于循环依赖报告与日志
    pub fn new(owner: u64) -> Self {
        Self {
            owner,
            slots: DashMap::new(),
            graph: Mutex::new(CreationGraph::default()),
            seq: AtomicU64::new(0),
        }
    }

    /// 命中则返回缓存实例，否则调用 `create` 创建、登记并返回
    pub fn get_or_create<F>(&self, kind: ResourceKind, create: F) -> UowResult<ResourceInstance>
    where
        F: FnOnce() -> UowResult<ResourceInstance>,
    {
        let me = thread::current().id();
        let slot = self.slot(kind.id());

        // 先登记等待边再阻塞：闭合环路的一方总能看到完整的等待链
        {
            let mut graph = self.graph();
            if graph.closes_cycle(kind.id(), me) {
                return Err(UowError::CircularDependency {
                    kind: kind.name(),
                    unit_of_work: self.owner,
                });
            }
            graph.waiting.insert(me, kind.id());
        }

        let mut cell = lock(&slot);
        {
            let mut graph = self.graph();
            graph.waiting.remove(&me);
            if cell.is_none() {
                graph.creators.insert(kind.id(), me);
            }
        }
        if let Some(entry) = cell.as_ref() {
            return Ok(entry.resource.clone());
        }

        let resource = {
            let _frame = CreationFrame {
                cache: self,
                kind: kind.id(),
                creator: me,
            };
            create()?
        };

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        *cell = Some(CachedEntry {
            seq,
            resource: resource.clone(),
        });
        tracing::debug!(
            unit_of_work = self.owner,
            kind = kind.name(),
            category = %resource.category(),
            "resource created"
        );

        Ok(resource)
    }

    pub fn get(&self, kind: ResourceKind) -> Option<ResourceInstance> {
        let slot = self.slots.get(&kind.id()).map(|s| s.value().clone())?;
        let cell = lock(&slot);
        cell.as_ref().map(|e| e.resource.clone())
    }

    pub fn contains(&self, kind: ResourceKind) -> bool {
        self.get(kind).is_some()
    }

    /// 移出单个种类的缓存实例（不负责释放）
    pub fn take(&self, kind: ResourceKind) -> Option<ResourceInstance> {
        let slot = self.slots.get(&kind.id()).map(|s| s.value().clone())?;
        let mut cell = lock(&slot);
        cell.take().map(|e| e.resource)
    }

    /// 移出所有满足条件的实例，按创建顺序返回
    pub fn take_where<P>(&self, predicate: P) -> Vec<ResourceInstance>
    where
        P: Fn(&ResourceInstance) -> bool,
    {
        let mut taken: Vec<CachedEntry> = Vec::new();
        for slot in self.slots() {
            let mut cell = lock(&slot);
            if cell.as_ref().is_some_and(|e| predicate(&e.resource)) {
                taken.extend(cell.take());
            }
        }
        taken.sort_by_key(|e| e.seq);
        taken.into_iter().map(|e| e.resource).collect()
    }

    pub fn drain(&self) -> Vec<ResourceInstance> {
        self.take_where(|_| true)
    }

    /// 当前缓存实例的快照，按创建顺序
    pub fn snapshot(&self) -> Vec<ResourceInstance> {
        let mut entries: Vec<CachedEntry> = self
            .slots()
            .iter()
            .filter_map(|slot| lock(slot).clone())
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.resource).collect()
    }

    pub fn len(&self) -> usize {
        self.slots().iter().filter(|s| lock(s).is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: TypeId) -> Slot {
        if let Some(slot) = self.slots.get(&id) {
            return slot.value().clone();
        }
        self.slots.entry(id).or_default().value().clone()
    }

    fn graph(&self) -> MutexGuard<'_, CreationGraph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // 先收集槽位再逐个加锁，避免持有分片读锁时等待进行中的创建
    fn slots(&self) -> Vec<Slot> {
        self.slots.iter().map(|e| e.value().clone()).collect()
    }
}

fn lock(slot: &Slot) -> MutexGuard<'_, Option<CachedEntry>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 创建进行中的登记；结束（含失败）时移出等待图
struct CreationFrame<'a> {
    cache: &'a ResourceCache,
    kind: TypeId,
    creator: ThreadId,
}

impl Drop for CreationFrame<'_> {
    fn drop(&mut self) {
        let mut graph = self.cache.graph();
        if graph.creators.get(&self.kind) == Some(&self.creator) {
            graph.creators.remove(&self.kind);
        }
    }
}
