//! 资源工厂（Resource Factory）
//!
//! - `ResourceFactory`：工作单元消费的外部协作者接口，按类别创建资源；
//! - `ResourceInstance`：类型擦除后的资源实例，同时保留生命周期视图；
//! - `ResourceRegistry`：基于“种类 → 工厂函数”表的默认实现，启动时注册，
//!   重复注册同一种类在注册期即报告歧义，而非在运行期猜测。
//!
use crate::error::{UowError, UowResult};
use crate::kind::{EntityRepositoryKind, ResourceCategory, ResourceKind};
use crate::resource::{DataContext, EntityRepository, Repository};
use crate::tenant::TenantAware;
use crate::unit_of_work::UnitOfWork;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::{Any, TypeId};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

type AnyArc = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
enum Lifecycle {
    DataContext(Arc<dyn DataContext>),
    Repository(Arc<dyn Repository>),
    Service,
}

/// 类型擦除的资源实例
#[derive(Clone)]
pub struct ResourceInstance {
    kind: ResourceKind,
    instance: AnyArc,
    lifecycle: Lifecycle,
}

impl ResourceInstance {
    pub fn data_context<T: DataContext>(value: Arc<T>) -> Self {
        Self {
            kind: ResourceKind::of::<T>(),
            instance: value.clone(),
            lifecycle: Lifecycle::DataContext(value),
        }
    }

    pub fn repository<T: Repository>(value: Arc<T>) -> Self {
        Self {
            kind: ResourceKind::of::<T>(),
            instance: value.clone(),
            lifecycle: Lifecycle::Repository(value),
        }
    }

    /// 以 `EntityRepositoryKind<E, K>` 作为种类登记，对外暴露为 `dyn EntityRepository<E, K>`
    pub fn entity_repository<E, K, R>(value: Arc<R>) -> Self
    where
        E: 'static,
        K: 'static,
        R: EntityRepository<E, K>,
    {
        let erased: Arc<dyn EntityRepository<E, K>> = value.clone();
        Self {
            kind: ResourceKind::of::<EntityRepositoryKind<E, K>>(),
            instance: Arc::new(erased),
            lifecycle: Lifecycle::Repository(value),
        }
    }

    pub fn service<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            kind: ResourceKind::of::<T>(),
            instance: value,
            lifecycle: Lifecycle::Service,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn category(&self) -> ResourceCategory {
        match self.lifecycle {
            Lifecycle::DataContext(_) => ResourceCategory::DataContext,
            Lifecycle::Repository(_) => ResourceCategory::Repository,
            Lifecycle::Service => ResourceCategory::Service,
        }
    }

    pub fn as_data_context(&self) -> Option<&Arc<dyn DataContext>> {
        match &self.lifecycle {
            Lifecycle::DataContext(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn as_repository(&self) -> Option<&Arc<dyn Repository>> {
        match &self.lifecycle {
            Lifecycle::Repository(repo) => Some(repo),
            _ => None,
        }
    }

    pub fn as_tenant_aware(&self) -> Option<&dyn TenantAware> {
        match &self.lifecycle {
            Lifecycle::DataContext(ctx) => ctx.as_tenant_aware(),
            Lifecycle::Repository(repo) => repo.as_tenant_aware(),
            Lifecycle::Service => None,
        }
    }

    pub(crate) fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.instance.clone().downcast::<T>().ok()
    }

    pub(crate) fn dispose(&self) -> UowResult<()> {
        match &self.lifecycle {
            Lifecycle::DataContext(ctx) => ctx.dispose(),
            Lifecycle::Repository(repo) => repo.dispose(),
            Lifecycle::Service => Ok(()),
        }
    }
}

impl Debug for ResourceInstance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceInstance")
            .field("kind", &self.kind.name())
            .field("category", &self.category())
            .finish()
    }
}

/// 资源工厂：工作单元在缓存未命中时委托其创建资源
///
/// 对同一 `(owner, kind)` 的调用应当是确定的；无法构造或存在歧义时返回构造错误。
pub trait ResourceFactory: Send + Sync + 'static {
    fn create_data_context(
        &self,
        owner: &UnitOfWork,
        kind: ResourceKind,
    ) -> UowResult<ResourceInstance>;

    fn create_data_repository(
        &self,
        owner: &UnitOfWork,
        kind: ResourceKind,
    ) -> UowResult<ResourceInstance>;

    fn create_service_instance(
        &self,
        owner: &UnitOfWork,
        kind: ResourceKind,
    ) -> UowResult<ResourceInstance>;
}

type CreateFn = Arc<dyn Fn(&UnitOfWork) -> UowResult<ResourceInstance> + Send + Sync>;

struct Registration {
    name: &'static str,
    category: ResourceCategory,
    create: CreateFn,
}

/// 基于注册表的资源工厂
/// - 通过 TypeId 注册不同种类对应的工厂函数
/// - 工厂函数可借助传入的工作单元解析自身依赖
#[derive(Default)]
pub struct ResourceRegistry {
    entries: DashMap<TypeId, Registration>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册数据上下文
    pub fn register_data_context<T, F>(&self, f: F) -> UowResult<()>
    where
        T: DataContext,
        F: Fn(&UnitOfWork) -> UowResult<T> + Send + Sync + 'static,
    {
        self.insert(
            ResourceKind::of::<T>(),
            ResourceCategory::DataContext,
            Arc::new(move |uow: &UnitOfWork| {
                Ok(ResourceInstance::data_context(Arc::new(f(uow)?)))
            }),
        )
    }

    /// 注册仓储
    pub fn register_repository<T, F>(&self, f: F) -> UowResult<()>
    where
        T: Repository,
        F: Fn(&UnitOfWork) -> UowResult<T> + Send + Sync + 'static,
    {
        self.insert(
            ResourceKind::of::<T>(),
            ResourceCategory::Repository,
            Arc::new(move |uow: &UnitOfWork| {
                Ok(ResourceInstance::repository(Arc::new(f(uow)?)))
            }),
        )
    }

    /// 注册实体 `E`（主键 `K`）的泛型仓储实现
    pub fn register_entity_repository<E, K, R, F>(&self, f: F) -> UowResult<()>
    where
        E: 'static,
        K: 'static,
        R: EntityRepository<E, K>,
        F: Fn(&UnitOfWork) -> UowResult<R> + Send + Sync + 'static,
    {
        self.insert(
            ResourceKind::of::<EntityRepositoryKind<E, K>>(),
            ResourceCategory::Repository,
            Arc::new(move |uow: &UnitOfWork| {
                Ok(ResourceInstance::entity_repository::<E, K, R>(Arc::new(
                    f(uow)?,
                )))
            }),
        )
    }

    /// 注册任意服务
    pub fn register_service<T, F>(&self, f: F) -> UowResult<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&UnitOfWork) -> UowResult<T> + Send + Sync + 'static,
    {
        self.insert(
            ResourceKind::of::<T>(),
            ResourceCategory::Service,
            Arc::new(move |uow: &UnitOfWork| {
                Ok(ResourceInstance::service(Arc::new(f(uow)?)))
            }),
        )
    }

    pub fn is_registered<T: ?Sized + 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// 已注册的种类名列表（只读视图）
    pub fn registered_kinds(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.value().name).collect()
    }

    fn insert(
        &self,
        kind: ResourceKind,
        category: ResourceCategory,
        create: CreateFn,
    ) -> UowResult<()> {
        match self.entries.entry(kind.id()) {
            Entry::Occupied(_) => Err(UowError::AmbiguousKind { kind: kind.name() }),
            Entry::Vacant(slot) => {
                slot.insert(Registration {
                    name: kind.name(),
                    category,
                    create,
                });
                Ok(())
            }
        }
    }

    fn create(
        &self,
        owner: &UnitOfWork,
        kind: ResourceKind,
        expected: ResourceCategory,
    ) -> UowResult<ResourceInstance> {
        // 先取出工厂函数并释放分片锁，工厂函数可能递归解析其他种类
        let create = {
            let Some(reg) = self.entries.get(&kind.id()) else {
                return Err(UowError::KindNotRegistered { kind: kind.name() });
            };
            if reg.category != expected {
                return Err(UowError::KindMismatch {
                    kind: kind.name(),
                    expected: expected.as_str(),
                    registered: reg.category.as_str(),
                });
            }
            reg.create.clone()
        };

        create(owner)
    }
}

impl ResourceFactory for ResourceRegistry {
    fn create_data_context(
        &self,
        owner: &UnitOfWork,
        kind: ResourceKind,
    ) -> UowResult<ResourceInstance> {
        self.create(owner, kind, ResourceCategory::DataContext)
    }

    fn create_data_repository(
        &self,
        owner: &UnitOfWork,
        kind: ResourceKind,
    ) -> UowResult<ResourceInstance> {
        self.create(owner, kind, ResourceCategory::Repository)
    }

    fn create_service_instance(
        &self,
        owner: &UnitOfWork,
        kind: ResourceKind,
    ) -> UowResult<ResourceInstance> {
        self.create(owner, kind, ResourceCategory::Service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Orders;
    impl DataContext for Orders {
        fn save_changes(&self) -> UowResult<()> {
            Ok(())
        }
    }

    struct Clock;

    #[test]
    fn duplicate_registration_is_ambiguous() {
        let registry = ResourceRegistry::new();
        registry.register_data_context(|_| Ok(Orders)).unwrap();

        let err = registry.register_data_context(|_| Ok(Orders)).unwrap_err();
        assert!(err.is_construction());
        match err {
            UowError::AmbiguousKind { kind } => assert!(kind.ends_with("Orders")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn registered_kinds_lists_every_entry() {
        let registry = ResourceRegistry::new();
        registry.register_data_context(|_| Ok(Orders)).unwrap();
        registry.register_service(|_| Ok(Clock)).unwrap();

        let mut kinds = registry.registered_kinds();
        kinds.sort_unstable();
        assert_eq!(kinds.len(), 2);
        assert!(registry.is_registered::<Orders>());
        assert!(registry.is_registered::<Clock>());
        assert!(!registry.is_registered::<String>());
    }

    #[test]
    fn instance_exposes_category_and_downcast() {
        let inst = ResourceInstance::data_context(Arc::new(Orders));
        assert_eq!(inst.category(), ResourceCategory::DataContext);
        assert!(inst.as_data_context().is_some());
        assert!(inst.as_repository().is_none());
        assert!(inst.downcast::<Orders>().is_some());
        assert!(inst.downcast::<Clock>().is_none());

        let svc = ResourceInstance::service(Arc::new(Clock));
        assert_eq!(svc.category(), ResourceCategory::Service);
        assert!(svc.as_tenant_aware().is_none());
        assert!(svc.dispose().is_ok());
    }
}
