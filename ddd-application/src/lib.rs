//! 应用层：以工作单元为边界的命令调度
//!
//! 每次命令分发都运行在独立的工作单元中：
//! - 存在环境工作单元时派生子单元（嵌套命令），否则创建根单元；
//! - 将 `AppContext` 的横切信息写入工作单元属性；
//! - 处理器成功后按配置保存，最终释放本次创建的工作单元。
pub mod command;
pub mod command_bus;
pub mod command_handler;
pub mod context;
pub mod error;
pub mod inmemory_command_bus;

pub use command::Command;
pub use command_bus::CommandBus;
pub use command_handler::CommandHandler;
pub use context::AppContext;
pub use error::AppError;
pub use inmemory_command_bus::{CommandBusConfig, InMemoryCommandBus};
