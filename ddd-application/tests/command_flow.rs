use async_trait::async_trait;
use ddd_application::context::{ACTOR_ID_KEY, CORRELATION_ID_KEY};
use ddd_application::{
    AppContext, AppError, Command, CommandBus, CommandHandler, CommandBusConfig,
    InMemoryCommandBus,
};
use ddd_uow::{
    DataContext, ResourceInterceptor, ResourceRegistry, TenantAware, TenantFilter, TenantScope,
    UnitOfWork, UowResult,
};
use std::sync::{Arc, Mutex, Weak};

#[derive(Default)]
struct Orders {
    tenant: Mutex<Option<String>>,
    rows: Mutex<Vec<String>>,
}

impl TenantAware for Orders {
    fn apply_tenant(&self, tenant_id: Option<&str>) {
        *self.tenant.lock().unwrap() = tenant_id.map(str::to_string);
    }

    fn tenant_id(&self) -> Option<String> {
        self.tenant.lock().unwrap().clone()
    }
}

impl DataContext for Orders {
    fn save_changes(&self) -> UowResult<()> {
        Ok(())
    }

    fn as_tenant_aware(&self) -> Option<&dyn TenantAware> {
        Some(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Seen {
    unit_of_work: u64,
    parent: Option<u64>,
    ambient: Option<u64>,
    tenant: Option<String>,
    correlation_id: Option<String>,
    actor_id: Option<String>,
    context_tenant: Option<String>,
}

fn observe(uow: &UnitOfWork) -> UowResult<Seen> {
    let orders = uow.get_data_context::<Orders>()?;
    Ok(Seen {
        unit_of_work: uow.id(),
        parent: uow.parent_id(),
        ambient: UnitOfWork::current().map(|u| u.id()),
        tenant: uow.tenant_id()?,
        correlation_id: uow.try_get_property(CORRELATION_ID_KEY)?,
        actor_id: uow.try_get_property(ACTOR_ID_KEY)?,
        context_tenant: orders.tenant_id(),
    })
}

struct PlaceOrder {
    sku: String,
}
impl Command for PlaceOrder {
    const NAME: &'static str = "PlaceOrder";
}

struct ReserveStock;
impl Command for ReserveStock {
    const NAME: &'static str = "ReserveStock";
}

struct PlaceOrderHandler {
    bus: Weak<InMemoryCommandBus>,
    seen: Arc<Mutex<Vec<Seen>>>,
}

#[async_trait]
impl CommandHandler<PlaceOrder> for PlaceOrderHandler {
    async fn handle(&self, ctx: &AppContext, uow: &UnitOfWork, cmd: PlaceOrder) -> Result<(), AppError> {
        uow.get_data_context::<Orders>()?
            .rows
            .lock()
            .unwrap()
            .push(cmd.sku);
        self.seen.lock().unwrap().push(observe(uow)?);

        match self.bus.upgrade() {
            Some(bus) => bus.dispatch(ctx, ReserveStock).await,
            None => Err(AppError::Infra("bus dropped".into())),
        }
    }
}

struct ReserveStockHandler {
    seen: Arc<Mutex<Vec<Seen>>>,
}

#[async_trait]
impl CommandHandler<ReserveStock> for ReserveStockHandler {
    async fn handle(&self, _ctx: &AppContext, uow: &UnitOfWork, _cmd: ReserveStock) -> Result<(), AppError> {
        self.seen.lock().unwrap().push(observe(uow)?);
        Ok(())
    }
}

fn setup(config: CommandBusConfig) -> (Arc<InMemoryCommandBus>, Arc<Mutex<Vec<Seen>>>) {
    let registry = ResourceRegistry::new();
    registry
        .register_data_context(|_| Ok(Orders::default()))
        .unwrap();

    let bus = Arc::new(
        InMemoryCommandBus::builder()
            .factory(Arc::new(registry))
            .interceptors(vec![Arc::new(TenantFilter) as Arc<dyn ResourceInterceptor>])
            .config(config)
            .build(),
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    bus.register::<PlaceOrder, _>(Arc::new(PlaceOrderHandler {
        bus: Arc::downgrade(&bus),
        seen: seen.clone(),
    }))
    .unwrap();
    bus.register::<ReserveStock, _>(Arc::new(ReserveStockHandler { seen: seen.clone() }))
        .unwrap();
    (bus, seen)
}

fn acme_ctx() -> AppContext {
    AppContext::builder()
        .correlation_id("cor-42")
        .actor_id("u-7")
        .tenant_id("acme")
        .build()
}

#[tokio::test]
async fn nested_command_runs_in_a_forked_unit() {
    let (bus, seen) = setup(CommandBusConfig::default());
    bus.dispatch(
        &acme_ctx(),
        PlaceOrder {
            sku: "sku-1".into(),
        },
    )
    .await
    .unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    let (outer, inner) = (&seen[0], &seen[1]);

    assert_eq!(outer.parent, None);
    assert_eq!(outer.ambient, Some(outer.unit_of_work));
    assert_eq!(inner.parent, Some(outer.unit_of_work));
    assert_eq!(inner.ambient, Some(inner.unit_of_work));

    for s in [outer, inner] {
        assert_eq!(s.tenant.as_deref(), Some("acme"));
        assert_eq!(s.context_tenant.as_deref(), Some("acme"));
        assert_eq!(s.correlation_id.as_deref(), Some("cor-42"));
        assert_eq!(s.actor_id.as_deref(), Some("u-7"));
    }
    assert_eq!(UnitOfWork::current().map(|u| u.id()), None);
}

#[tokio::test]
async fn without_forking_every_dispatch_gets_a_root_unit() {
    let config = CommandBusConfig::builder().fork_ambient(false).build();
    let (bus, seen) = setup(config);
    bus.dispatch(
        &acme_ctx(),
        PlaceOrder {
            sku: "sku-2".into(),
        },
    )
    .await
    .unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen[1].parent, None);
    assert_ne!(seen[0].unit_of_work, seen[1].unit_of_work);
}

#[tokio::test]
async fn dispatch_inside_an_ambient_unit_forks_it() {
    let (bus, seen) = setup(CommandBusConfig::default());
    let registry = ResourceRegistry::new();
    registry
        .register_data_context(|_| Ok(Orders::default()))
        .unwrap();
    let request = UnitOfWork::builder().factory(Arc::new(registry)).build();
    request.initialize_tenant_filter("globex").unwrap();

    request
        .scope(bus.dispatch(&AppContext::default(), ReserveStock))
        .await
        .unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen[0].parent, Some(request.id()));
    assert_eq!(seen[0].tenant.as_deref(), Some("globex"));
    assert!(!request.is_disposed());
}
