use crate::{
    command::Command, command_bus::CommandBus, command_handler::CommandHandler,
    context::AppContext, error::AppError,
};
use async_trait::async_trait;
use bon::Builder;
use dashmap::DashMap;
use ddd_uow::{ResourceFactory, ResourceInterceptor, UnitOfWork, UnitOfWorkOptions};
use std::any::{Any, TypeId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type CmdHandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

type CmdHandlerFn = Arc<
    dyn for<'a> Fn(Box<dyn Any + Send>, &'a AppContext, &'a UnitOfWork) -> CmdHandlerFuture<'a>
        + Send
        + Sync,
>;

/// 命令总线的工作单元策略
#[derive(Builder, Clone, Copy, Debug)]
pub struct CommandBusConfig {
    /// 处理器成功后是否保存工作单元中的数据上下文
    #[builder(default = true)]
    pub save_on_success: bool,
    /// 存在环境工作单元时是否派生子单元；关闭则总是创建根单元
    #[builder(default = true)]
    pub fork_ambient: bool,
}

impl Default for CommandBusConfig {
    fn default() -> Self {
        Self {
            save_on_success: true,
            fork_ambient: true,
        }
    }
}

/// 基于内存的 CommandBus 实现
/// - 通过 TypeId 注册不同 Command 对应的 Handler
/// - 运行时以类型擦除（Any）方式进行调度
/// - 每次分发都在一个新的工作单元中执行，并在结束时释放
pub struct InMemoryCommandBus {
    handlers: DashMap<TypeId, (&'static str, CmdHandlerFn)>,
    factory: Arc<dyn ResourceFactory>,
    interceptors: Vec<Arc<dyn ResourceInterceptor>>,
    config: CommandBusConfig,
}

#[bon::bon]
impl InMemoryCommandBus {
    #[builder]
    pub fn new(
        factory: Arc<dyn ResourceFactory>,
        #[builder(default)] interceptors: Vec<Arc<dyn ResourceInterceptor>>,
        #[builder(default)] config: CommandBusConfig,
    ) -> Self {
        Self {
            handlers: DashMap::new(),
            factory,
            interceptors,
            config,
        }
    }
}

impl InMemoryCommandBus {
    /// 注册命令处理器；同一命令重复注册返回错误
    pub fn register<C, H>(&self, handler: Arc<H>) -> Result<(), AppError>
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        let key = TypeId::of::<C>();
        if self.handlers.contains_key(&key) {
            return Err(AppError::AlreadyRegisteredCommand { command: C::NAME });
        }

        let f: CmdHandlerFn = {
            let handler = handler.clone();

            Arc::new(move |boxed_cmd, ctx, uow| {
                let handler = handler.clone();

                Box::pin(async move {
                    // 正常情况下这里的 downcast 永远不会失败（键与闭包同一泛型 C）
                    match boxed_cmd.downcast::<C>() {
                        Ok(cmd) => handler.handle(ctx, uow, *cmd).await,
                        Err(_) => Err(AppError::TypeMismatch {
                            expected: C::NAME,
                            found: "unknown",
                        }),
                    }
                })
            })
        };

        self.handlers.insert(key, (C::NAME, f));
        Ok(())
    }

    /// 已注册的命令名称
    pub fn registered_commands(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.iter().map(|e| e.value().0).collect();
        names.sort_unstable();
        names
    }

    pub fn config(&self) -> CommandBusConfig {
        self.config
    }

    /// 为一次分发开启工作单元
    fn begin<C: Command>(&self, ctx: &AppContext) -> Result<Arc<UnitOfWork>, AppError> {
        let parent = self
            .config
            .fork_ambient
            .then(UnitOfWork::current)
            .flatten()
            .filter(|p| !p.is_disposed());

        let uow = match parent {
            Some(parent) => parent.fork()?,
            None => UnitOfWork::builder()
                .factory(self.factory.clone())
                .interceptors(self.interceptors.clone())
                .options(UnitOfWorkOptions::builder().label(C::NAME).build())
                .build(),
        };

        if let Err(e) = ctx.apply_to(&uow) {
            uow.dispose();
            return Err(e.into());
        }
        Ok(uow)
    }
}

#[async_trait]
impl CommandBus for InMemoryCommandBus {
    async fn dispatch<C: Command>(&self, ctx: &AppContext, cmd: C) -> Result<(), AppError> {
        let Some(f) = self.handlers.get(&TypeId::of::<C>()).map(|h| h.value().1.clone()) else {
            return Err(AppError::HandlerNotFound(C::NAME));
        };

        let uow = self.begin::<C>(ctx)?;
        tracing::debug!(
            command = C::NAME,
            unit_of_work = uow.id(),
            parent = uow.parent_id(),
            correlation_id = ctx.correlation_id(),
            "dispatching command"
        );

        let mut result = uow.scope((f)(Box::new(cmd), ctx, &*uow)).await;
        if result.is_ok() && self.config.save_on_success {
            result = uow.save_changes_async().await.map_err(AppError::from);
        }

        if let Err(e) = &result {
            tracing::warn!(command = C::NAME, unit_of_work = uow.id(), error = %e, "command failed");
        }
        uow.dispose();
        result
    }
}
