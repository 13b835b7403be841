use bon::Builder;
use ddd_uow::{TenantScope, UnitOfWork, UowResult};
use serde::{Deserialize, Serialize};

/// 工作单元属性键：关联追踪 ID
pub const CORRELATION_ID_KEY: &str = "CorrelationId";
/// 工作单元属性键：执行者 ID
pub const ACTOR_ID_KEY: &str = "ActorId";
/// 工作单元属性键：幂等键
pub const IDEMPOTENCY_KEY: &str = "IdempotencyKey";

/// 应用层上下文（Application Context）
///
/// 承载一次应用层调用所需的横切信息，例如：
/// - 关联追踪 `correlation_id`、执行者类型/ID；
/// - 租户 `tenant_id`：分发时写入工作单元，驱动租户过滤；
/// - 幂等键（`idempotency_key`）：用于在基础设施层实现请求幂等。
///
/// 典型用法：
/// ```rust
/// use ddd_application::context::AppContext;
///
/// let ctx = AppContext::builder()
///     .correlation_id("cor-123")
///     .actor_type("user")
///     .actor_id("u-1")
///     .tenant_id("acme")
///     .idempotency_key("idem-xyz")
///     .build();
/// assert_eq!(ctx.tenant_id(), Some("acme"));
/// ```
#[derive(Builder, Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppContext {
    /// 关联ID
    #[builder(into)]
    correlation_id: Option<String>,
    /// 执行者类型（如用户、系统等）
    #[builder(into)]
    actor_type: Option<String>,
    /// 执行者ID
    #[builder(into)]
    actor_id: Option<String>,
    /// 租户ID
    #[builder(into)]
    tenant_id: Option<String>,
    /// 幂等键（可选）：为空则由上层或基础设施决定是否参与幂等
    #[builder(into)]
    idempotency_key: Option<String>,
}

impl AppContext {
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn actor_type(&self) -> Option<&str> {
        self.actor_type.as_deref()
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    /// 将上下文中已提供的字段写入工作单元属性
    ///
    /// 未提供的字段不覆盖既有属性（派生单元从父级继承的值保持不变）。
    /// 租户经由 `TenantScope` 写入，已缓存的身份相关资源随之失效。
    pub fn apply_to(&self, uow: &UnitOfWork) -> UowResult<()> {
        if let Some(v) = self.correlation_id() {
            uow.set_property(CORRELATION_ID_KEY, v)?;
        }
        if let Some(v) = self.actor_id() {
            uow.set_property(ACTOR_ID_KEY, v)?;
        }
        if let Some(v) = self.idempotency_key() {
            uow.set_property(IDEMPOTENCY_KEY, v)?;
        }
        if let Some(v) = self.tenant_id() {
            uow.initialize_tenant_filter(v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddd_uow::ResourceRegistry;
    use std::sync::Arc;

    #[test]
    fn apply_to_seeds_only_present_fields() {
        let uow = UnitOfWork::builder()
            .factory(Arc::new(ResourceRegistry::new()))
            .build();
        uow.set_property(ACTOR_ID_KEY, "system").unwrap();

        let ctx = AppContext::builder()
            .correlation_id("cor-1")
            .tenant_id("acme")
            .build();
        ctx.apply_to(&uow).unwrap();

        assert_eq!(
            uow.get_property::<String>(CORRELATION_ID_KEY).unwrap(),
            "cor-1"
        );
        assert_eq!(uow.get_property::<String>(ACTOR_ID_KEY).unwrap(), "system");
        assert_eq!(uow.tenant_id().unwrap().as_deref(), Some("acme"));
        assert!(uow.try_get_property::<String>(IDEMPOTENCY_KEY).unwrap().is_none());
    }
}
