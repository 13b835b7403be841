//! 工作单元统一错误定义
//!
//! 覆盖资源构造、生命周期、属性访问与锁协调的最小必要集合；
//! 外部资源（数据上下文/仓储）自身的失败通过 `Resource` 原样透传。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum UowError {
    // --- 资源构造 ---
    #[error("resource kind not registered: kind={kind}")]
    KindNotRegistered { kind: &'static str },
    #[error("ambiguous resource kind: kind={kind} already has a creation strategy")]
    AmbiguousKind { kind: &'static str },
    #[error("resource kind mismatch: kind={kind}, expected={expected}, registered={registered}")]
    KindMismatch {
        kind: &'static str,
        expected: &'static str,
        registered: &'static str,
    },
    #[error("circular resource dependency: kind={kind}, unit_of_work={unit_of_work}")]
    CircularDependency {
        kind: &'static str,
        unit_of_work: u64,
    },

    // --- 生命周期 ---
    #[error("unit of work {unit_of_work} used after dispose")]
    Disposed { unit_of_work: u64 },
    #[error("no unit of work is active in the current call chain")]
    NoCurrentUnitOfWork,

    // --- 属性 ---
    #[error("property not found: key={key}")]
    PropertyNotFound { key: String },
    #[error("property type mismatch: key={key}, expected={expected}, reason={reason}")]
    PropertyTypeMismatch {
        key: String,
        expected: &'static str,
        reason: String,
    },
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    // --- 锁 ---
    #[error("unit of work {unit_of_work} lock released while not held")]
    LockNotHeld { unit_of_work: u64 },
    #[error("unit of work {unit_of_work} lock is not re-entrant")]
    LockReentrancy { unit_of_work: u64 },

    // --- 外部资源 ---
    #[error(transparent)]
    Resource(#[from] anyhow::Error),
}

impl UowError {
    /// 是否为资源构造类错误（未注册/歧义/类别不符/循环依赖）
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            UowError::KindNotRegistered { .. }
                | UowError::AmbiguousKind { .. }
                | UowError::KindMismatch { .. }
                | UowError::CircularDependency { .. }
        )
    }
}

/// 统一 Result 类型别名
pub type UowResult<T> = Result<T, UowError>;
