use std::any::{TypeId, type_name};
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

/// 资源种类（Resource Kind）
///
/// 以 `TypeId` 作为缓存与注册的键，`name` 仅用于日志与错误信息。
#[derive(Clone, Copy, Debug)]
pub struct ResourceKind {
    id: TypeId,
    name: &'static str,
}

impl ResourceKind {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ResourceKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResourceKind {}

impl Hash for ResourceKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// 资源类别：决定资源是否参与 `save_changes` 以及租户等身份失效
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceCategory {
    DataContext,
    Repository,
    Service,
}

impl ResourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceCategory::DataContext => "data_context",
            ResourceCategory::Repository => "repository",
            ResourceCategory::Service => "service",
        }
    }

    /// 身份相关属性变化时需要被驱逐的类别
    pub fn is_identity_scoped(&self) -> bool {
        matches!(
            self,
            ResourceCategory::DataContext | ResourceCategory::Repository
        )
    }
}

impl Display for ResourceCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 泛型实体仓储的种类标记：`(实体, 主键)` 组合即为一个独立的资源种类
pub struct EntityRepositoryKind<E, K>(std::marker::PhantomData<fn() -> (E, K)>);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Orders;
    struct Customers;

    #[test]
    fn kinds_compare_by_type_identity() {
        assert_eq!(ResourceKind::of::<Orders>(), ResourceKind::of::<Orders>());
        assert_ne!(ResourceKind::of::<Orders>(), ResourceKind::of::<Customers>());

        let set: HashSet<ResourceKind> = [
            ResourceKind::of::<Orders>(),
            ResourceKind::of::<Orders>(),
            ResourceKind::of::<Customers>(),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn entity_repository_kinds_differ_by_key_type() {
        assert_ne!(
            ResourceKind::of::<EntityRepositoryKind<Orders, String>>(),
            ResourceKind::of::<EntityRepositoryKind<Orders, u64>>()
        );
        assert!(ResourceKind::of::<Orders>().name().ends_with("Orders"));
    }
}
