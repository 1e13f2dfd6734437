use std::any::{Any, TypeId};

use crate::util::constant_ahash_hashmap;

/// Typed per-frame storage for handing graph handles between the setup code of different passes.
///
/// Holds at most one value per type and is dropped together with its builder.
pub struct Blackboard {
    map: ahash::HashMap<TypeId, Box<dyn Any + Send>>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self {
            map: constant_ahash_hashmap(),
        }
    }
    /// Stores `value`, the type must not be present yet.
    #[track_caller]
    pub fn create<T: Any + Send>(&mut self, value: T) -> &mut T {
        let previous = self.map.insert(TypeId::of::<T>(), Box::new(value));
        assert!(
            previous.is_none(),
            "Blackboard already contains a value of type '{}'",
            std::any::type_name::<T>()
        );
        self.get_mut::<T>().unwrap()
    }
    pub fn get<T: Any + Send>(&self) -> Option<&T> {
        let any = self.map.get(&TypeId::of::<T>())?;
        any.downcast_ref::<T>()
    }
    pub fn get_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        let any = self.map.get_mut(&TypeId::of::<T>())?;
        any.downcast_mut::<T>()
    }
    pub fn get_or_insert_with<T: Any + Send, F: FnOnce() -> T>(&mut self, fun: F) -> &mut T {
        let any = self
            .map
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(fun()));
        // the entry is keyed by the type id of T
        any.downcast_mut::<T>().unwrap()
    }
    pub fn clear(&mut self) {
        self.map.clear();
    }
}

impl Default for Blackboard {
    fn default() -> Self {
        Self::new()
    }
}
