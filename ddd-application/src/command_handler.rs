use crate::{command::Command, context::AppContext, error::AppError};
use async_trait::async_trait;
use ddd_uow::UnitOfWork;

/// 命令处理器
///
/// `uow` 为本次分发的工作单元，处理器通过它获取数据上下文与仓储；
/// 保存与释放由总线负责，处理器无需自行调用。
#[async_trait]
pub trait CommandHandler<C>: Send + Sync
where
    C: Command,
{
    async fn handle(&self, ctx: &AppContext, uow: &UnitOfWork, cmd: C) -> Result<(), AppError>;
}
