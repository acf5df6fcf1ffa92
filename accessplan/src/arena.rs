/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Generation-checked storage for planning objects.
//!
//! Every object created during one planning pass (scalars, predicates, order
//! specifications, rows, candidates, relations) is registered in a
//! [`Registry`] and referred to by a copyable [`Id`]. Erasing an object bumps
//! the slot's generation, so a stale id is detected instead of aliasing a
//! newer object.

use crate::error::{PlanError, PlanResult};
use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use typed_generational_arena::{Index, NonzeroGeneration, StandardArena};

pub type Key<T> = Index<T, usize, NonzeroGeneration<usize>>;

/// Checked handle to an object of a [`Registry<T>`]
pub struct Id<T> {
    key: Key<T>,
}

impl<T> Id<T> {
    fn new(key: Key<T>) -> Self {
        Self { key }
    }

    /// Slot number, stable for the lifetime of the object
    pub fn slot(&self) -> usize {
        self.key.arr_idx()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Id<T> {}
impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl<T> Eq for Id<T> {}
impl<T> Hash for Id<T> {
    // the generation is not hashable, equal ids still share a slot
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.arr_idx().hash(state)
    }
}
impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.key.arr_idx() as u64)
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.key.arr_idx())
    }
}

pub struct Registry<T> {
    arena: StandardArena<T>,
    kind: &'static str,
    erased: usize,
}

impl<T> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            arena: StandardArena::new(),
            kind,
            erased: 0,
        }
    }

    pub fn register(&mut self, value: T) -> Id<T> {
        Id::new(self.arena.insert(value))
    }

    pub fn get(&self, id: Id<T>) -> PlanResult<&T> {
        self.arena.get(id.key).ok_or_else(|| {
            PlanError::unexpected(format!("{} {:?} is not registered", self.kind, id))
        })
    }

    pub fn get_mut(&mut self, id: Id<T>) -> PlanResult<&mut T> {
        let kind = self.kind;
        self.arena
            .get_mut(id.key)
            .ok_or_else(|| PlanError::unexpected(format!("{} {:?} is not registered", kind, id)))
    }

    /// Removes the object; erasing twice is an internal error
    pub fn erase(&mut self, id: Id<T>) -> PlanResult<T> {
        match self.arena.remove(id.key) {
            Some(value) => {
                self.erased += 1;
                Ok(value)
            }
            None => Err(PlanError::unexpected(format!(
                "{} {:?} erased twice",
                self.kind, id
            ))),
        }
    }

    pub fn contains(&self, id: Id<T>) -> bool {
        self.arena.contains(id.key)
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }

    /// Number of objects erased so far
    pub fn erased(&self) -> usize {
        self.erased
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let mut registry = Registry::new("value");
        let id = registry.register(42);
        assert_eq!(*registry.get(id).unwrap(), 42);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_erased_id_is_rejected() {
        let mut registry = Registry::new("value");
        let id = registry.register("a");
        assert_eq!(registry.erase(id).unwrap(), "a");
        assert!(registry.get(id).is_err());
        assert!(registry.erase(id).is_err());
        assert_eq!(registry.erased(), 1);
    }

    #[test]
    fn test_reused_slot_does_not_alias() {
        let mut registry = Registry::new("value");
        let old = registry.register(1);
        registry.erase(old).unwrap();
        let new = registry.register(2);
        assert_eq!(old.slot(), new.slot());
        assert_ne!(old, new);
        assert!(registry.get(old).is_err());
        assert_eq!(*registry.get(new).unwrap(), 2);
    }

    #[test]
    fn test_id_serializes_as_its_slot() {
        let mut registry = Registry::new("value");
        registry.register("a");
        let id = registry.register("b");
        let json = serde_json::to_value(vec![id]).unwrap();
        assert_eq!(json, serde_json::json!([id.slot() as u64]));
    }
}
