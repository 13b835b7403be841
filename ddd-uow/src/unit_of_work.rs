//! 工作单元（Unit of Work）
//!
//! 一次业务操作期间资源的拥有者与协调者：
//! - 按种类惰性创建并缓存数据上下文、仓储与服务，每种至多一个存活实例；
//! - 属性包承载租户、关联 ID 等环境元数据，`fork` 时按值复制；
//! - 锁协调器提供覆盖整个工作单元的同步/异步互斥；
//! - `save_changes` 依创建顺序要求各数据上下文持久化，首个失败原样返回；
//! - 状态机 `Active → Disposed`，释放幂等，释放后除 `is_disposed` 外的操作均快速失败。
//!
use crate::ambient::{self, AmbientScope};
use crate::error::{UowError, UowResult};
use crate::factory::{ResourceFactory, ResourceInstance};
use crate::interceptor::ResourceInterceptor;
use crate::kind::{EntityRepositoryKind, ResourceCategory, ResourceKind};
use crate::lock::{LockCoordinator, LockGuard};
use crate::property_bag::{self, PropertyBag};
use crate::resource::{DataContext, Entity, EntityRepository, Repository};
use crate::resource_cache::ResourceCache;
use bon::Builder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// 工作单元配置
#[derive(Builder, Clone, Debug)]
pub struct UnitOfWorkOptions {
    /// 未显式释放即被丢弃时，是否在 `Drop` 中兜底释放资源
    #[builder(default = true)]
    pub dispose_on_drop: bool,
    /// 诊断标签，出现在日志与 `Debug` 输出中
    #[builder(into)]
    pub label: Option<String>,
}

impl Default for UnitOfWorkOptions {
    fn default() -> Self {
        Self {
            dispose_on_drop: true,
            label: None,
        }
    }
}

pub struct UnitOfWork {
    id: u64,
    parent_id: Option<u64>,
    factory: Arc<dyn ResourceFactory>,
    interceptors: Vec<Arc<dyn ResourceInterceptor>>,
    options: UnitOfWorkOptions,
    cache: ResourceCache,
    properties: PropertyBag,
    lock: LockCoordinator,
    disposed: AtomicBool,
}

#[bon::bon]
impl UnitOfWork {
    /// 创建根工作单元
    #[builder]
    pub fn new(
        factory: Arc<dyn ResourceFactory>,
        #[builder(default)] interceptors: Vec<Arc<dyn ResourceInterceptor>>,
        #[builder(default)] properties: PropertyBag,
        #[builder(default)] options: UnitOfWorkOptions,
    ) -> Arc<Self> {
        Arc::new(Self::construct(
            None,
            factory,
            interceptors,
            properties,
            options,
        ))
    }
}

impl UnitOfWork {
    fn construct(
        parent_id: Option<u64>,
        factory: Arc<dyn ResourceFactory>,
        interceptors: Vec<Arc<dyn ResourceInterceptor>>,
        properties: PropertyBag,
        options: UnitOfWorkOptions,
    ) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            unit_of_work = id,
            parent = parent_id,
            label = options.label.as_deref(),
            "unit of work created"
        );

        Self {
            id,
            parent_id,
            factory,
            interceptors,
            options,
            cache: ResourceCache::new(id),
            properties,
            lock: LockCoordinator::new(id),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    pub fn label(&self) -> Option<&str> {
        self.options.label.as_deref()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// 当前调用链上的工作单元，见 [`ambient::current`]
    pub fn current() -> Option<Arc<UnitOfWork>> {
        ambient::current()
    }

    /// 以自身进入同步环境作用域
    pub fn enter(self: &Arc<Self>) -> AmbientScope {
        ambient::enter(self.clone())
    }

    /// 以自身作为环境工作单元执行 `fut`
    pub async fn scope<F: Future>(self: &Arc<Self>, fut: F) -> F::Output {
        ambient::scope(self.clone(), fut).await
    }

    fn ensure_active(&self) -> UowResult<()> {
        if self.is_disposed() {
            return Err(UowError::Disposed {
                unit_of_work: self.id,
            });
        }
        Ok(())
    }

    // ---- 资源访问 ----

    pub fn get_data_context<T: DataContext>(&self) -> UowResult<Arc<T>> {
        self.resolve_typed::<T>(ResourceKind::of::<T>(), ResourceCategory::DataContext)
    }

    pub fn get_repository<T: Repository>(&self) -> UowResult<Arc<T>> {
        self.resolve_typed::<T>(ResourceKind::of::<T>(), ResourceCategory::Repository)
    }

    /// 实体 `E`（主键 `K`）的泛型仓储，与其他种类共用同一缓存
    pub fn get_entity_repository<E, K>(&self) -> UowResult<Arc<dyn EntityRepository<E, K>>>
    where
        E: 'static,
        K: 'static,
    {
        let repo = self.resolve_typed::<Arc<dyn EntityRepository<E, K>>>(
            ResourceKind::of::<EntityRepositoryKind<E, K>>(),
            ResourceCategory::Repository,
        )?;
        Ok(Arc::clone(&*repo))
    }

    /// 以实体自身声明的标识类型作为主键类型，等价于 `get_entity_repository::<E, E::Id>()`
    pub fn get_default_entity_repository<E: Entity>(
        &self,
    ) -> UowResult<Arc<dyn EntityRepository<E, E::Id>>> {
        self.get_entity_repository::<E, E::Id>()
    }

    pub fn get_service<T: Send + Sync + 'static>(&self) -> UowResult<Arc<T>> {
        self.resolve_typed::<T>(ResourceKind::of::<T>(), ResourceCategory::Service)
    }

    pub fn is_cached<T: ?Sized + 'static>(&self) -> bool {
        self.cache.contains(ResourceKind::of::<T>())
    }

    /// 已缓存资源的种类名，按创建顺序
    pub fn cached_kinds(&self) -> Vec<&'static str> {
        self.cache
            .snapshot()
            .iter()
            .map(|r| r.kind().name())
            .collect()
    }

    fn resolve_typed<T: Send + Sync + 'static>(
        &self,
        kind: ResourceKind,
        category: ResourceCategory,
    ) -> UowResult<Arc<T>> {
        let resource = self.resolve(kind, category)?;
        resource
            .downcast::<T>()
            .ok_or_else(|| UowError::KindMismatch {
                kind: kind.name(),
                expected: category.as_str(),
                registered: resource.category().as_str(),
            })
    }

    fn resolve(&self, kind: ResourceKind, category: ResourceCategory) -> UowResult<ResourceInstance> {
        self.ensure_active()?;

        let resource = self.cache.get_or_create(kind, || self.create(kind, category))?;
        if resource.category() != category {
            return Err(UowError::KindMismatch {
                kind: kind.name(),
                expected: category.as_str(),
                registered: resource.category().as_str(),
            });
        }

        // 与并发的 dispose 交错时，不让新实例滞留在已释放的缓存中
        if self.is_disposed() {
            if let Some(stale) = self.cache.take(kind) {
                self.dispose_resource(&stale);
            }
            return Err(UowError::Disposed {
                unit_of_work: self.id,
            });
        }

        Ok(resource)
    }

    fn create(&self, kind: ResourceKind, category: ResourceCategory) -> UowResult<ResourceInstance> {
        let created = match category {
            ResourceCategory::DataContext => self.factory.create_data_context(self, kind)?,
            ResourceCategory::Repository => self.factory.create_data_repository(self, kind)?,
            ResourceCategory::Service => self.factory.create_service_instance(self, kind)?,
        };

        // 未进入缓存的实例由这里负责释放
        if created.kind() != kind || created.category() != category {
            self.dispose_resource(&created);
            return Err(UowError::KindMismatch {
                kind: kind.name(),
                expected: category.as_str(),
                registered: created.category().as_str(),
            });
        }

        for interceptor in &self.interceptors {
            if let Err(err) = interceptor.on_resource_created(self, &created) {
                tracing::debug!(
                    unit_of_work = self.id,
                    kind = kind.name(),
                    interceptor = interceptor.name(),
                    "resource rejected by interceptor"
                );
                self.dispose_resource(&created);
                return Err(err);
            }
        }

        Ok(created)
    }

    // ---- 属性 ----

    pub fn get_property<T: DeserializeOwned>(&self, key: &str) -> UowResult<T> {
        self.ensure_active()?;
        self.properties.get(key)
    }

    /// 不存在（或类型不符，记录告警）时返回 `default`
    pub fn get_property_or<T: DeserializeOwned>(&self, key: &str, default: T) -> UowResult<T> {
        self.ensure_active()?;
        Ok(self.properties.get_or(key, default))
    }

    pub fn try_get_property<T: DeserializeOwned>(&self, key: &str) -> UowResult<Option<T>> {
        self.ensure_active()?;
        Ok(self.properties.try_get(key))
    }

    /// 写入属性；身份相关键的值变化时驱逐身份相关资源
    pub fn set_property<T: Serialize>(&self, key: &str, value: T) -> UowResult<()> {
        self.ensure_active()?;
        let previous = self.properties.set(key, value)?;

        if self.is_identity_key(key) && previous != self.properties.get_value(key) {
            self.evict_identity_scoped()?;
        }
        Ok(())
    }

    pub fn remove_property(&self, key: &str) -> UowResult<()> {
        self.ensure_active()?;
        let removed = self.properties.remove(key);

        if removed.is_some() && self.is_identity_key(key) {
            self.evict_identity_scoped()?;
        }
        Ok(())
    }

    pub fn property_keys(&self) -> UowResult<Vec<String>> {
        self.ensure_active()?;
        Ok(self.properties.keys())
    }

    fn is_identity_key(&self, key: &str) -> bool {
        let key = property_bag::normalize(key);
        self.interceptors
            .iter()
            .flat_map(|i| i.identity_keys().iter())
            .any(|k| property_bag::normalize(k) == key)
    }

    // ---- 驱逐 ----

    /// 驱逐并释放单个种类的缓存资源；返回是否存在
    pub fn evict<T: ?Sized + 'static>(&self) -> UowResult<bool> {
        self.ensure_active()?;
        match self.cache.take(ResourceKind::of::<T>()) {
            Some(resource) => {
                self.dispose_resource(&resource);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 驱逐并释放所有数据上下文与仓储；返回驱逐数量
    pub fn evict_identity_scoped(&self) -> UowResult<usize> {
        self.ensure_active()?;
        let evicted = self
            .cache
            .take_where(|r| r.category().is_identity_scoped());

        for resource in evicted.iter().rev() {
            self.dispose_resource(resource);
        }
        if !evicted.is_empty() {
            tracing::debug!(
                unit_of_work = self.id,
                count = evicted.len(),
                "identity scoped resources evicted"
            );
        }
        Ok(evicted.len())
    }

    // ---- 保存 ----

    /// 依创建顺序要求每个数据上下文持久化；首个失败即停止并原样返回
    pub fn save_changes(&self) -> UowResult<()> {
        self.ensure_active()?;
        for context in self.data_contexts() {
            context.save_changes()?;
        }
        Ok(())
    }

    pub async fn save_changes_async(&self) -> UowResult<()> {
        self.ensure_active()?;
        for context in self.data_contexts() {
            context.save_changes_async().await?;
        }
        Ok(())
    }

    fn data_contexts(&self) -> Vec<Arc<dyn DataContext>> {
        self.cache
            .snapshot()
            .iter()
            .filter_map(|r| r.as_data_context().cloned())
            .collect()
    }

    // ---- 派生 ----

    /// 派生子工作单元：共享工厂与拦截器，缓存为空，属性按值复制
    pub fn fork(&self) -> UowResult<Arc<UnitOfWork>> {
        self.ensure_active()?;
        Ok(Arc::new(Self::construct(
            Some(self.id),
            self.factory.clone(),
            self.interceptors.clone(),
            self.properties.clone(),
            self.options.clone(),
        )))
    }

    // ---- 锁 ----

    pub fn acquire_lock(&self) -> UowResult<LockGuard<'_>> {
        self.ensure_active()?;
        self.lock.acquire()
    }

    pub fn try_acquire_lock(&self) -> UowResult<Option<LockGuard<'_>>> {
        self.ensure_active()?;
        Ok(self.lock.try_acquire())
    }

    pub fn try_acquire_lock_for(&self, timeout: Duration) -> UowResult<Option<LockGuard<'_>>> {
        self.ensure_active()?;
        Ok(self.lock.try_acquire_for(timeout))
    }

    pub fn try_lock(&self) -> UowResult<bool> {
        self.ensure_active()?;
        Ok(self.lock.try_lock())
    }

    pub fn try_lock_for(&self, timeout: Duration) -> UowResult<bool> {
        self.ensure_active()?;
        Ok(self.lock.try_lock_for(timeout))
    }

    pub fn lock(&self) -> UowResult<()> {
        self.ensure_active()?;
        self.lock.lock()
    }

    pub fn release(&self) -> UowResult<()> {
        self.ensure_active()?;
        self.lock.release()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    pub async fn acquire_lock_async(&self) -> UowResult<LockGuard<'_>> {
        self.ensure_active()?;
        Ok(self.lock.acquire_async().await)
    }

    pub async fn try_acquire_lock_async(
        &self,
        timeout: Duration,
    ) -> UowResult<Option<LockGuard<'_>>> {
        self.ensure_active()?;
        Ok(self.lock.try_acquire_async(timeout).await)
    }

    pub async fn try_lock_async(&self, timeout: Duration) -> UowResult<bool> {
        self.ensure_active()?;
        Ok(self.lock.try_lock_async(timeout).await)
    }

    pub async fn lock_async(&self) -> UowResult<()> {
        self.ensure_active()?;
        self.lock.lock_async().await;
        Ok(())
    }

    // ---- 释放 ----

    /// 释放所有缓存资源并进入 `Disposed`；重复调用无副作用
    ///
    /// 单个资源释放失败只记录告警，不影响其余资源的释放。
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let resources = self.cache.drain();
        let failed = resources
            .iter()
            .rev()
            .filter(|r| !self.dispose_resource(r))
            .count();

        tracing::debug!(
            unit_of_work = self.id,
            released = resources.len(),
            failed,
            "unit of work disposed"
        );
    }

    fn dispose_resource(&self, resource: &ResourceInstance) -> bool {
        match resource.dispose() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    unit_of_work = self.id,
                    kind = resource.kind().name(),
                    error = %err,
                    "resource dispose failed"
                );
                false
            }
        }
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.options.dispose_on_drop && !self.is_disposed() {
            if !self.cache.is_empty() {
                tracing::warn!(
                    unit_of_work = self.id,
                    "unit of work dropped without dispose"
                );
            }
            self.dispose();
        }
    }
}

impl Debug for UnitOfWork {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("parent_id", &self.parent_id)
            .field("label", &self.options.label)
            .field("disposed", &self.is_disposed())
            .field("cached", &self.cache.len())
            .field("properties", &self.properties.len())
            .finish()
    }
}
