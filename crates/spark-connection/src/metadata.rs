//! 连接附属元数据容器。
//!
//! 以 `TypeId` 为键的类型化映射，承载身份、声明、协议特性等协作方数据。连接协调器只负责
//! 保存与交还，从不检查或修改其中的内容。

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use parking_lot::RwLock;

type Entry = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct Extensions {
    entries: RwLock<HashMap<TypeId, Entry>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入值，返回同类型的旧值。
    pub fn insert<T>(&self, value: T) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let previous = self
            .entries
            .write()
            .insert(TypeId::of::<T>(), Arc::new(value));
        previous.and_then(|entry| entry.downcast::<T>().ok())
    }

    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let entry = self.entries.read().get(&TypeId::of::<T>()).cloned()?;
        entry.downcast::<T>().ok()
    }

    pub fn remove<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let entry = self.entries.write().remove(&TypeId::of::<T>())?;
        entry.downcast::<T>().ok()
    }

    pub fn contains<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.entries.read().contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct UserClaims(&'static str);

    #[test]
    fn values_are_keyed_by_type() {
        let extensions = Extensions::new();
        assert!(extensions.insert(UserClaims("alice")).is_none());
        assert!(extensions.insert(7_u32).is_none());

        let replaced = extensions.insert(UserClaims("bob"));
        assert_eq!(replaced.as_deref(), Some(&UserClaims("alice")));
        assert_eq!(extensions.get::<UserClaims>().as_deref(), Some(&UserClaims("bob")));
        assert_eq!(extensions.len(), 2);

        assert_eq!(extensions.remove::<u32>().as_deref(), Some(&7));
        assert!(!extensions.contains::<u32>());
    }
}
