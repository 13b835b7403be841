use async_trait::async_trait;
use ddd_application::{
    AppContext, AppError, Command, CommandBus, CommandHandler, InMemoryCommandBus,
};
use ddd_uow::{
    DataContext, EntityRepository, Repository, ResourceInterceptor, ResourceRegistry, TenantAware,
    TenantFilter, TenantScope, UnitOfWork, UowResult,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct Account {
    id: String,
    balance: i64,
}

/// 跨工作单元共享的“数据库”：按 (租户, 账户) 存放余额
type Store = Arc<Mutex<HashMap<(String, String), i64>>>;

/// 数据上下文：暂存变更，保存时写入共享存储
struct LedgerContext {
    store: Store,
    tenant: Mutex<Option<String>>,
    staged: Mutex<HashMap<String, Option<i64>>>,
}

impl LedgerContext {
    fn new(store: Store) -> Self {
        Self {
            store,
            tenant: Mutex::new(None),
            staged: Mutex::new(HashMap::new()),
        }
    }

    fn tenant(&self) -> String {
        self.tenant
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| "public".to_string())
    }
}

impl TenantAware for LedgerContext {
    fn apply_tenant(&self, tenant_id: Option<&str>) {
        *self.tenant.lock().unwrap() = tenant_id.map(str::to_string);
    }

    fn tenant_id(&self) -> Option<String> {
        self.tenant.lock().unwrap().clone()
    }
}

impl DataContext for LedgerContext {
    fn save_changes(&self) -> UowResult<()> {
        let tenant = self.tenant();
        let mut store = self.store.lock().unwrap();
        for (id, balance) in self.staged.lock().unwrap().drain() {
            let key = (tenant.clone(), id);
            match balance {
                Some(b) => store.insert(key, b),
                None => store.remove(&key),
            };
        }
        Ok(())
    }

    fn as_tenant_aware(&self) -> Option<&dyn TenantAware> {
        Some(self)
    }
}

/// 账户仓储：依赖同一工作单元中的 `LedgerContext`
struct AccountRepository {
    ctx: Arc<LedgerContext>,
}

impl Repository for AccountRepository {}

impl EntityRepository<Account, String> for AccountRepository {
    fn find(&self, key: &String) -> UowResult<Option<Account>> {
        if let Some(staged) = self.ctx.staged.lock().unwrap().get(key) {
            return Ok((*staged).map(|balance| Account {
                id: key.clone(),
                balance,
            }));
        }
        let store = self.ctx.store.lock().unwrap();
        Ok(store
            .get(&(self.ctx.tenant(), key.clone()))
            .map(|balance| Account {
                id: key.clone(),
                balance: *balance,
            }))
    }

    fn add(&self, entity: Account) -> UowResult<()> {
        self.ctx
            .staged
            .lock()
            .unwrap()
            .insert(entity.id, Some(entity.balance));
        Ok(())
    }

    fn remove(&self, key: &String) -> UowResult<bool> {
        let existed = self.find(key)?.is_some();
        self.ctx.staged.lock().unwrap().insert(key.clone(), None);
        Ok(existed)
    }
}

struct OpenAccount {
    id: String,
    initial_balance: i64,
}
impl Command for OpenAccount {
    const NAME: &'static str = "OpenAccount";
}

struct Deposit {
    id: String,
    amount: i64,
}
impl Command for Deposit {
    const NAME: &'static str = "Deposit";
}

struct OpenAccountHandler;

#[async_trait]
impl CommandHandler<OpenAccount> for OpenAccountHandler {
    async fn handle(
        &self,
        _ctx: &AppContext,
        uow: &UnitOfWork,
        cmd: OpenAccount,
    ) -> Result<(), AppError> {
        let repo = uow.get_entity_repository::<Account, String>()?;
        if repo.find(&cmd.id)?.is_some() {
            return Err(AppError::Validation(format!("account {} already opened", cmd.id)));
        }
        repo.add(Account {
            id: cmd.id,
            balance: cmd.initial_balance,
        })?;
        Ok(())
    }
}

struct DepositHandler;

#[async_trait]
impl CommandHandler<Deposit> for DepositHandler {
    async fn handle(&self, _ctx: &AppContext, uow: &UnitOfWork, cmd: Deposit) -> Result<(), AppError> {
        let repo = uow.get_entity_repository::<Account, String>()?;
        let mut account = repo
            .find(&cmd.id)?
            .ok_or_else(|| AppError::NotFound(cmd.id.clone()))?;
        account.balance += cmd.amount;
        repo.add(account)?;
        Ok(())
    }
}

fn registry(store: Store) -> anyhow::Result<ResourceRegistry> {
    let registry = ResourceRegistry::new();
    registry.register_data_context(move |_| Ok(LedgerContext::new(store.clone())))?;
    registry.register_entity_repository::<Account, String, _, _>(|uow: &UnitOfWork| {
        Ok(AccountRepository {
            ctx: uow.get_data_context::<LedgerContext>()?,
        })
    })?;
    Ok(registry)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let store: Store = Arc::default();
    let factory = Arc::new(registry(store.clone())?);
    let interceptors: Vec<Arc<dyn ResourceInterceptor>> = vec![Arc::new(TenantFilter)];

    let bus = InMemoryCommandBus::builder()
        .factory(factory.clone())
        .interceptors(interceptors.clone())
        .build();
    bus.register::<OpenAccount, _>(Arc::new(OpenAccountHandler))?;
    bus.register::<Deposit, _>(Arc::new(DepositHandler))?;

    // 两个租户各自开户，互不可见
    for tenant in ["acme", "globex"] {
        let ctx = AppContext::builder()
            .correlation_id(format!("open-{tenant}"))
            .actor_id("u-1")
            .tenant_id(tenant)
            .build();
        bus.dispatch(
            &ctx,
            OpenAccount {
                id: "acc-1".into(),
                initial_balance: 1000,
            },
        )
        .await?;
    }

    let acme = AppContext::builder().tenant_id("acme").build();
    bus.dispatch(
        &acme,
        Deposit {
            id: "acc-1".into(),
            amount: 500,
        },
    )
    .await?;

    // 重复开户：处理器失败，不保存
    if let Err(e) = bus
        .dispatch(
            &acme,
            OpenAccount {
                id: "acc-1".into(),
                initial_balance: 0,
            },
        )
        .await
    {
        tracing::info!(error = %e, "rejected");
    }

    // 同一工作单元内切换租户：已缓存的数据上下文被驱逐并按新租户重建
    let uow = UnitOfWork::builder()
        .factory(factory)
        .interceptors(interceptors)
        .build();
    uow.initialize_tenant_filter("acme")?;
    let acc = "acc-1".to_string();
    let balance = uow
        .get_entity_repository::<Account, String>()?
        .find(&acc)?
        .map(|a| a.balance);
    tracing::info!(tenant = "acme", balance = ?balance, "loaded");

    uow.initialize_tenant_filter("globex")?;
    let balance = uow
        .get_entity_repository::<Account, String>()?
        .find(&acc)?
        .map(|a| a.balance);
    tracing::info!(tenant = "globex", balance = ?balance, "loaded");

    // 派生：继承属性，资源独立
    let child = uow.fork()?;
    tracing::info!(
        parent = uow.id(),
        child = child.id(),
        tenant = ?child.tenant_id()?,
        cached = ?child.cached_kinds(),
        "forked"
    );
    child.dispose();
    uow.dispose();

    let mut rows: Vec<_> = store.lock().unwrap().clone().into_iter().collect();
    rows.sort();
    for ((tenant, id), balance) in rows {
        println!("{tenant}/{id}: {balance}");
    }
    Ok(())
}
