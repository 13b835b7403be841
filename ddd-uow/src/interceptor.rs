//! 资源拦截器（特化钩子）
//!
//! 在数据上下文/仓储创建后、放入缓存前介入，用于初始化身份相关状态（如租户）。
//! 拦截器声明的身份相关属性键一旦在已有资源的情况下发生变化，
//! 工作单元会驱逐并释放所有数据上下文与仓储，后续访问将重新创建。
//!
use crate::error::UowResult;
use crate::factory::ResourceInstance;
use crate::unit_of_work::UnitOfWork;

pub trait ResourceInterceptor: Send + Sync + 'static {
    /// 拦截器的稳定名称，用于日志
    fn name(&self) -> &'static str;

    /// 新建资源的回调；返回错误时该资源不会进入缓存
    fn on_resource_created(
        &self,
        _owner: &UnitOfWork,
        _resource: &ResourceInstance,
    ) -> UowResult<()> {
        Ok(())
    }

    /// 身份相关的属性键（大小写不敏感）
    fn identity_keys(&self) -> &[&'static str] {
        &[]
    }
}
