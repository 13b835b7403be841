//! 属性包（PropertyBag）
//!
//! 工作单元上附带的环境元数据（如租户、关联 ID、特性开关）：
//! - 键大小写不敏感，保留首次写入时的原始拼写用于展示；
//! - 值以 `serde_json::Value` 存储，按需反序列化为目标类型，转换失败即类型不匹配；
//! - `Clone` 产生按值拷贝的快照，之后两份互不影响。
//!
use crate::error::{UowError, UowResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::type_name;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// 属性条目：(键, 值)
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyEntry {
    key: String,
    value: Value,
}

impl PropertyEntry {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

#[derive(Debug, Default)]
pub struct PropertyBag {
    entries: RwLock<HashMap<String, PropertyEntry>>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入属性，已存在则静默覆盖；返回旧值
    pub fn set<T: Serialize>(&self, key: &str, value: T) -> UowResult<Option<Value>> {
        let value = serde_json::to_value(value)?;
        Ok(self.set_value(key, value))
    }

    pub fn set_value(&self, key: &str, value: Value) -> Option<Value> {
        let mut entries = self.write();
        match entries.get_mut(&normalize(key)) {
            Some(entry) => Some(std::mem::replace(&mut entry.value, value)),
            None => {
                entries.insert(
                    normalize(key),
                    PropertyEntry {
                        key: key.to_string(),
                        value,
                    },
                );
                None
            }
        }
    }

    /// 读取属性：不存在或类型不匹配均返回错误
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> UowResult<T> {
        let Some(value) = self.get_value(key) else {
            return Err(UowError::PropertyNotFound {
                key: key.to_string(),
            });
        };

        serde_json::from_value(value).map_err(|e| UowError::PropertyTypeMismatch {
            key: key.to_string(),
            expected: type_name::<T>(),
            reason: e.to_string(),
        })
    }

    /// 读取属性：不存在返回 `None`；类型不匹配记录告警并返回 `None`
    pub fn try_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.get::<T>(key) {
            Ok(value) => Some(value),
            Err(UowError::PropertyNotFound { .. }) => None,
            Err(err) => {
                tracing::warn!(key, error = %err, "property value ignored");
                None
            }
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.try_get(key).unwrap_or(default)
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.read().get(&normalize(key)).map(|e| e.value.clone())
    }

    /// 删除属性；不存在时为空操作
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().remove(&normalize(key)).map(|e| e.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(&normalize(key))
    }

    pub fn keys(&self) -> Vec<String> {
        self.read().values().map(|e| e.key.clone()).collect()
    }

    pub fn entries(&self) -> Vec<PropertyEntry> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PropertyEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, PropertyEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for PropertyBag {
    fn clone(&self) -> Self {
        Self {
            entries: RwLock::new(self.read().clone()),
        }
    }
}

impl FromIterator<(String, Value)> for PropertyBag {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let bag = PropertyBag::new();
        for (key, value) in iter {
            bag.set_value(&key, value);
        }
        bag
    }
}

pub(crate) fn normalize(key: &str) -> String {
    key.to_lowercase()
}
