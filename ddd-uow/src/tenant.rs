//! 租户过滤（TenantFilter）
//!
//! 身份相关特化的默认实现：
//! - 新建的租户感知资源（`TenantAware`）按工作单元上的 `TenantId` 打标签；
//! - 切换租户（`initialize_tenant_filter`）会驱逐已缓存的数据上下文与仓储，
//!   避免继续返回旧租户的实例；
//! - 派生（`fork`）时租户随属性按值复制，拦截器共享。
//!
use crate::error::UowResult;
use crate::factory::{ResourceFactory, ResourceInstance};
use crate::interceptor::ResourceInterceptor;
use crate::unit_of_work::UnitOfWork;
use std::sync::Arc;

/// 工作单元上的租户属性键
pub const TENANT_ID_KEY: &str = "TenantId";

/// 租户感知资源
pub trait TenantAware: Send + Sync {
    /// 以给定租户初始化过滤条件；`None` 表示未指定租户
    fn apply_tenant(&self, tenant_id: Option<&str>);

    fn tenant_id(&self) -> Option<String>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TenantFilter;

impl ResourceInterceptor for TenantFilter {
    fn name(&self) -> &'static str {
        "tenant_filter"
    }

    fn on_resource_created(&self, owner: &UnitOfWork, resource: &ResourceInstance) -> UowResult<()> {
        let Some(target) = resource.as_tenant_aware() else {
            return Ok(());
        };

        let tenant = owner.try_get_property::<String>(TENANT_ID_KEY)?;
        tracing::debug!(
            unit_of_work = owner.id(),
            kind = resource.kind().name(),
            tenant = tenant.as_deref().unwrap_or("<none>"),
            "tenant filter applied"
        );
        target.apply_tenant(tenant.as_deref());
        Ok(())
    }

    fn identity_keys(&self) -> &[&'static str] {
        &[TENANT_ID_KEY]
    }
}

/// 工作单元上的租户操作
pub trait TenantScope {
    /// 设置（或切换）当前租户；租户变化时已缓存的数据上下文与仓储被驱逐
    fn initialize_tenant_filter(&self, tenant_id: &str) -> UowResult<()>;

    fn clear_tenant_filter(&self) -> UowResult<()>;

    fn tenant_id(&self) -> UowResult<Option<String>>;
}

impl TenantScope for UnitOfWork {
    fn initialize_tenant_filter(&self, tenant_id: &str) -> UowResult<()> {
        self.set_property(TENANT_ID_KEY, tenant_id)
    }

    fn clear_tenant_filter(&self) -> UowResult<()> {
        self.remove_property(TENANT_ID_KEY)
    }

    fn tenant_id(&self) -> UowResult<Option<String>> {
        self.try_get_property(TENANT_ID_KEY)
    }
}

/// 创建带租户过滤的根工作单元
pub fn tenant_unit_of_work(
    factory: Arc<dyn ResourceFactory>,
    tenant_id: &str,
) -> UowResult<Arc<UnitOfWork>> {
    let uow = UnitOfWork::builder()
        .factory(factory)
        .interceptors(vec![Arc::new(TenantFilter) as Arc<dyn ResourceInterceptor>])
        .build();
    uow.initialize_tenant_filter(tenant_id)?;
    Ok(uow)
}
