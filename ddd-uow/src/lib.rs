//! DDD 工作单元基础库（ddd-uow）
//!
//! 面向一次业务操作的资源生命周期协调层，提供：
//! - 按类型惰性创建、线程安全记忆化的资源缓存（`resource_cache`）
//! - 覆盖整个工作单元的同步/异步互斥与超时（`lock`）
//! - 无需逐层传参即可获取“当前工作单元”的环境上下文（`ambient`）
//! - 属性包与派生（`fork`）协议，子工作单元按值继承元数据、独享资源
//! - 资源创建拦截与身份相关属性变化时的缓存失效（`interceptor`、`tenant`）
//!
//! 具体的数据访问实现（ORM、连接池等）不在本 crate 范围内，
//! 通过 `ResourceFactory` 与 `DataContext`/`Repository` 协议接入。
//!
//! 典型用法：
//! 1. 启动时在 `ResourceRegistry` 中注册数据上下文、仓储与服务的工厂函数；
//! 2. 每次业务操作以 `UnitOfWork::builder()` 创建根工作单元，或对当前工作单元 `fork`；
//! 3. 通过 `scope`/`enter` 使其成为环境工作单元，调用链深处以 `current()` 获取；
//! 4. 结束时 `save_changes_async` 并 `dispose`。
//!
pub mod ambient;
pub mod error;
pub mod factory;
pub mod interceptor;
pub mod kind;
pub mod lock;
pub mod property_bag;
pub mod resource;
pub mod resource_cache;
pub mod tenant;
pub mod unit_of_work;

pub use ambient::{current, require_current};
pub use error::{UowError, UowResult};
pub use factory::{ResourceFactory, ResourceInstance, ResourceRegistry};
pub use interceptor::ResourceInterceptor;
pub use kind::{ResourceCategory, ResourceKind};
pub use lock::{LockCoordinator, LockGuard};
pub use property_bag::{PropertyBag, PropertyEntry};
pub use resource::{DataContext, Entity, EntityRepository, Repository};
pub use tenant::{TENANT_ID_KEY, TenantAware, TenantFilter, TenantScope};
pub use unit_of_work::{UnitOfWork, UnitOfWorkOptions};
