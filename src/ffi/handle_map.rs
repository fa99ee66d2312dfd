//! Generational handle tables
//!
//! Objects the host refers to (devices, async tasks, host-side callback
//! instances) are stored in a [`HandleMap`] and named by a `u64` handle
//! instead of a raw address. A handle packs three fields:
//!
//! ```text
//!  63      56 55                32 31                 0
//! +----------+--------------------+--------------------+
//! |   tag    |     generation     |     index + 1      |
//! +----------+--------------------+--------------------+
//! ```
//!
//! The tag catches a handle passed to the wrong table, the generation
//! catches use after free, and the `+1` keeps 0 from ever being valid.

use parking_lot::RwLock;
use thiserror::Error;

/// Handle lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("null handle")]
    Null,

    #[error("handle {handle:#018x} belongs to table {found}, expected table {expected}")]
    WrongKind { handle: u64, expected: u8, found: u8 },

    #[error("unknown handle {0:#018x}")]
    Unknown(u64),

    #[error("stale handle {0:#018x}: the object was already freed")]
    Stale(u64),

    #[error("handle table is full ({0} live entries)")]
    Exhausted(usize),
}

/// Result type for handle operations.
pub type HandleResult<T> = Result<T, HandleError>;

const INDEX_BITS: u32 = 32;
const GENERATION_BITS: u32 = 24;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;
const TAG_SHIFT: u32 = INDEX_BITS + GENERATION_BITS;

/// Table tags.
pub mod tags {
    pub const FUTURE: u8 = 0x01;
    pub const TELIO: u8 = 0x02;
    pub const EVENT_CB: u8 = 0x11;
    pub const LOGGER_CB: u8 = 0x12;
    pub const PROTECT_CB: u8 = 0x13;
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

struct Inner<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

/// Concurrent generational map from `u64` handles to values.
pub struct HandleMap<T> {
    tag: u8,
    max_entries: usize,
    inner: RwLock<Inner<T>>,
}

impl<T> HandleMap<T> {
    /// Create an empty table.
    pub fn new(tag: u8) -> Self {
        Self::with_capacity_limit(tag, u32::MAX as usize - 1)
    }

    /// Create an empty table that refuses more than `max_entries` live values.
    pub fn with_capacity_limit(tag: u8, max_entries: usize) -> Self {
        Self {
            tag,
            max_entries,
            inner: RwLock::new(Inner {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    fn encode(&self, index: u32, generation: u32) -> u64 {
        ((self.tag as u64) << TAG_SHIFT)
            | (((generation & GENERATION_MASK) as u64) << INDEX_BITS)
            | (index as u64 + 1)
    }

    fn decode(&self, handle: u64) -> HandleResult<(usize, u32)> {
        if handle == 0 {
            return Err(HandleError::Null);
        }
        let found = (handle >> TAG_SHIFT) as u8;
        if found != self.tag {
            return Err(HandleError::WrongKind {
                handle,
                expected: self.tag,
                found,
            });
        }
        let raw_index = (handle & u32::MAX as u64) as u32;
        if raw_index == 0 {
            return Err(HandleError::Unknown(handle));
        }
        let generation = ((handle >> INDEX_BITS) as u32) & GENERATION_MASK;
        Ok(((raw_index - 1) as usize, generation))
    }

    fn check<'a>(&self, inner: &'a Inner<T>, handle: u64) -> HandleResult<&'a T> {
        let (index, generation) = self.decode(handle)?;
        let slot = inner.slots.get(index).ok_or(HandleError::Unknown(handle))?;
        match &slot.value {
            Some(value) if slot.generation == generation => Ok(value),
            _ => Err(HandleError::Stale(handle)),
        }
    }

    /// Store a value and return its handle.
    pub fn insert(&self, value: T) -> HandleResult<u64> {
        let mut inner = self.inner.write();
        if inner.live >= self.max_entries {
            return Err(HandleError::Exhausted(inner.live));
        }

        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(inner.slots.len())
                    .map_err(|_| HandleError::Exhausted(inner.live))?;
                inner.slots.push(Slot {
                    generation: 1,
                    value: None,
                });
                index
            }
        };

        let slot = &mut inner.slots[index as usize];
        slot.value = Some(value);
        let generation = slot.generation;
        inner.live += 1;
        Ok(self.encode(index, generation))
    }

    /// Run `f` against the value behind `handle` under the read lock.
    pub fn with<R>(&self, handle: u64, f: impl FnOnce(&T) -> R) -> HandleResult<R> {
        let inner = self.inner.read();
        self.check(&inner, handle).map(f)
    }

    /// Remove the value and invalidate its handle.
    pub fn remove(&self, handle: u64) -> HandleResult<T> {
        let mut inner = self.inner.write();
        self.check(&inner, handle)?;
        let (index, _) = self.decode(handle)?;

        let slot = &mut inner.slots[index];
        let value = slot.value.take().ok_or(HandleError::Stale(handle))?;
        slot.generation = next_generation(slot.generation);
        inner.free.push(index as u32);
        inner.live -= 1;
        Ok(value)
    }

    /// Remove the value only if `removable` accepts it.
    pub fn remove_if(&self, handle: u64, removable: impl FnOnce(&T) -> bool) -> HandleResult<Option<T>> {
        let mut inner = self.inner.write();
        let value = self.check(&inner, handle)?;
        if !removable(value) {
            return Ok(None);
        }
        let (index, _) = self.decode(handle)?;
        let slot = &mut inner.slots[index];
        let value = slot.value.take();
        slot.generation = next_generation(slot.generation);
        inner.free.push(index as u32);
        inner.live -= 1;
        Ok(value)
    }

    pub fn contains(&self, handle: u64) -> bool {
        let inner = self.inner.read();
        self.check(&inner, handle).is_ok()
    }

    pub fn len(&self) -> usize {
        self.inner.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every value and invalidate every outstanding handle.
    pub fn clear(&self) -> Vec<T> {
        let mut inner = self.inner.write();
        let mut drained = Vec::with_capacity(inner.live);
        let mut freed = Vec::new();
        for (index, slot) in inner.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                slot.generation = next_generation(slot.generation);
                drained.push(value);
                freed.push(index as u32);
            }
        }
        inner.free.extend(freed);
        inner.live = 0;
        drained
    }
}

impl<T: Clone> HandleMap<T> {
    /// Clone the value out so it can be used without holding the lock.
    pub fn get(&self, handle: u64) -> HandleResult<T> {
        self.with(handle, T::clone)
    }
}

fn next_generation(generation: u32) -> u32 {
    match (generation + 1) & GENERATION_MASK {
        0 => 1,
        g => g,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let map = HandleMap::new(tags::TELIO);
        let h = map.insert("device".to_string()).unwrap();
        assert_ne!(h, 0);
        assert_eq!(map.get(h).unwrap(), "device");
        assert_eq!(map.len(), 1);

        assert_eq!(map.remove(h).unwrap(), "device");
        assert!(map.is_empty());
        assert!(!map.contains(h));
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let map = HandleMap::new(tags::FUTURE);
        let first = map.insert(1u32).unwrap();
        map.remove(first).unwrap();
        let second = map.insert(2u32).unwrap();

        // Same slot, new generation.
        assert_eq!(first & 0xffff_ffff, second & 0xffff_ffff);
        assert_ne!(first, second);
        assert_eq!(map.get(first), Err(HandleError::Stale(first)));
        assert_eq!(map.get(second).unwrap(), 2);
    }

    #[test]
    fn test_null_and_wrong_table() {
        let devices = HandleMap::new(tags::TELIO);
        let futures: HandleMap<u8> = HandleMap::new(tags::FUTURE);
        let h = devices.insert(()).unwrap();

        assert_eq!(futures.get(0), Err(HandleError::Null));
        assert!(matches!(
            futures.get(h),
            Err(HandleError::WrongKind { expected: tags::FUTURE, found: tags::TELIO, .. })
        ));
    }

    #[test]
    fn test_double_remove_is_stale() {
        let map = HandleMap::new(tags::EVENT_CB);
        let h = map.insert(5i64).unwrap();
        map.remove(h).unwrap();
        assert_eq!(map.remove(h), Err(HandleError::Stale(h)));
    }

    #[test]
    fn test_capacity_limit() {
        let map = HandleMap::with_capacity_limit(tags::TELIO, 2);
        map.insert(1).unwrap();
        map.insert(2).unwrap();
        assert_eq!(map.insert(3), Err(HandleError::Exhausted(2)));
    }

    #[test]
    fn test_remove_if_keeps_rejected() {
        let map = HandleMap::new(tags::FUTURE);
        let h = map.insert(10).unwrap();
        assert_eq!(map.remove_if(h, |v| *v > 100).unwrap(), None);
        assert!(map.contains(h));
        assert_eq!(map.remove_if(h, |v| *v == 10).unwrap(), Some(10));
        assert!(!map.contains(h));
    }

    #[test]
    fn test_clear_invalidates_everything() {
        let map = HandleMap::new(tags::LOGGER_CB);
        let a = map.insert('a').unwrap();
        let b = map.insert('b').unwrap();
        let drained = map.clear();
        assert_eq!(drained.len(), 2);
        assert!(!map.contains(a));
        assert!(!map.contains(b));
        assert!(map.insert('c').is_ok());
    }

    #[test]
    fn test_generation_wraps_to_one() {
        assert_eq!(next_generation(GENERATION_MASK), 1);
        assert_eq!(next_generation(1), 2);
    }
}
