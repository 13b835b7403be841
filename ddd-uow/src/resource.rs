//! 工作单元托管的资源协议
//!
//! 协调层对数据上下文与仓储只做最小假设：
//! - 数据上下文：同步/异步“持久化待提交变更”以及释放；
//! - 仓储：释放；持久化经由其所属的数据上下文完成；
//! - 可选的租户感知能力（`TenantAware`），供特化钩子在创建时打标签。
//!
use crate::error::UowResult;
use crate::tenant::TenantAware;
use async_trait::async_trait;

/// 数据上下文（Data Context）
#[async_trait]
pub trait DataContext: Send + Sync + 'static {
    /// 同步持久化待提交的变更
    fn save_changes(&self) -> UowResult<()>;

    /// 异步持久化；默认退化为同步实现
    async fn save_changes_async(&self) -> UowResult<()> {
        self.save_changes()
    }

    /// 释放底层连接等资源，工作单元释放或驱逐时调用
    fn dispose(&self) -> UowResult<()> {
        Ok(())
    }

    fn as_tenant_aware(&self) -> Option<&dyn TenantAware> {
        None
    }
}

/// 仓储（Repository）
pub trait Repository: Send + Sync + 'static {
    fn dispose(&self) -> UowResult<()> {
        Ok(())
    }

    fn as_tenant_aware(&self) -> Option<&dyn TenantAware> {
        None
    }
}

/// 声明了标识类型的实体；解析泛型仓储时可省略主键类型
pub trait Entity: 'static {
    type Id: 'static;
}

/// 泛型实体仓储：按实体类型 `E` 与主键类型 `K` 区分
pub trait EntityRepository<E, K>: Repository {
    fn find(&self, key: &K) -> UowResult<Option<E>>;

    fn add(&self, entity: E) -> UowResult<()>;

    fn remove(&self, key: &K) -> UowResult<bool>;
}
