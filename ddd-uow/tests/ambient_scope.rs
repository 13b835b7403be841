use ddd_uow::{DataContext, ResourceRegistry, UnitOfWork, UowError, UowResult, ambient};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

struct Journal;

impl DataContext for Journal {
    fn save_changes(&self) -> UowResult<()> {
        Ok(())
    }
}

fn factory() -> Arc<ResourceRegistry> {
    let registry = ResourceRegistry::new();
    registry.register_data_context(|_| Ok(Journal)).unwrap();
    Arc::new(registry)
}

fn current_id() -> Option<u64> {
    UnitOfWork::current().map(|u| u.id())
}

// 调用链深处：不接收工作单元参数
fn deep_call() -> UowResult<Arc<Journal>> {
    ambient::require_current()?.get_data_context::<Journal>()
}

#[test]
fn three_nested_scopes_restore_in_lifo_order() {
    let root = UnitOfWork::builder().factory(factory()).build();
    let child = root.fork().unwrap();
    let grandchild = child.fork().unwrap();

    assert_eq!(current_id(), None);
    {
        let _r = root.enter();
        assert_eq!(current_id(), Some(root.id()));
        {
            let _c = child.enter();
            assert_eq!(current_id(), Some(child.id()));
            {
                let _g = grandchild.enter();
                assert_eq!(current_id(), Some(grandchild.id()));
            }
            assert_eq!(current_id(), Some(child.id()));
        }
        assert_eq!(current_id(), Some(root.id()));
    }
    assert_eq!(current_id(), None);
}

#[test]
fn deep_calls_see_the_entered_unit() {
    let root = UnitOfWork::builder().factory(factory()).build();
    assert!(matches!(deep_call(), Err(UowError::NoCurrentUnitOfWork)));

    let _scope = root.enter();
    let journal = deep_call().unwrap();
    assert!(Arc::ptr_eq(
        &journal,
        &root.get_data_context::<Journal>().unwrap()
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn async_nested_scopes_follow_the_task() {
    let root = UnitOfWork::builder().factory(factory()).build();
    let root_id = root.id();

    let observed = root
        .scope(async {
            let outer = current_id();
            let child = ambient::require_current().unwrap().fork().unwrap();
            let child_id = child.id();

            let inner = child
                .scope(async {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    current_id()
                })
                .await;

            (outer, inner, child_id, current_id())
        })
        .await;

    assert_eq!(observed.0, Some(root_id));
    assert_eq!(observed.1, Some(observed.2));
    assert_eq!(observed.3, Some(root_id));
    assert_eq!(current_id(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fan_out_keeps_each_chain_isolated() {
    let mut set = JoinSet::new();

    for _ in 0..24 {
        let uow = UnitOfWork::builder().factory(factory()).build();
        set.spawn(async move {
            let expected = uow.id();
            uow.scope(async move {
                for _ in 0..3 {
                    tokio::task::yield_now().await;
                    if current_id() != Some(expected) {
                        return false;
                    }
                }
                // 子任务经由 ambient::spawn 继承
                ambient::spawn(async move { current_id() == Some(expected) })
                    .await
                    .unwrap_or(false)
            })
            .await
        });
    }

    while let Some(res) = set.join_next().await {
        assert!(res.unwrap());
    }
}
