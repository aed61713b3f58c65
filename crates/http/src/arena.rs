//! Generational slot map used for connections, sockets and timers.
//!
//! A [`Handle`] is an index plus the generation of the slot when it was handed out. Freeing a slot
//! bumps its generation, so a handle kept after the value was removed no longer resolves.

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Packs the handle into a single integer, e.g. for a `mio::Token`.
    pub fn to_bits(self) -> usize {
        ((self.generation as usize) << 32) | self.index as usize
    }

    pub fn from_bits(bits: usize) -> Self {
        Self { index: (bits & 0xFFFF_FFFF) as u32, generation: (bits >> 32) as u32 }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index)
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Free { generation: u32, next_free: Option<u32> },
}

pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new(), free_head: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> Handle {
        self.insert_with(|_| value)
    }

    /// Inserts a value built from its own handle.
    pub fn insert_with(&mut self, f: impl FnOnce(Handle) -> T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let (generation, next_free) = match slot {
                Slot::Free { generation, next_free } => (*generation, *next_free),
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            self.free_head = next_free;
            let handle = Handle { index, generation };
            *slot = Slot::Occupied { generation, value: f(handle) };
            handle
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            let handle = Handle { index, generation: 0 };
            self.slots.push(Slot::Occupied { generation: 0, value: f(handle) });
            handle
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        match self.slots.get(handle.index())? {
            Slot::Occupied { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        match self.slots.get_mut(handle.index())? {
            Slot::Occupied { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Removes the value; a stale or unknown handle is a no-op.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {}
            _ => return None,
        }
        let next = Slot::Free { generation: handle.generation.wrapping_add(1), next_free: self.free_head };
        let Slot::Occupied { value, .. } = std::mem::replace(slot, next) else {
            return None;
        };
        self.free_head = Some(handle.index);
        self.len -= 1;
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied { generation, value } => {
                Some((Handle { index: index as u32, generation: *generation }, value))
            }
            Slot::Free { .. } => None,
        })
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.iter().map(|(handle, _)| handle).collect()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena").field("len", &self.len).field("slots", &self.slots.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        arena.remove(a);
        let c = arena.insert(3);
        assert_eq!(c.index(), a.index());
        assert_ne!(c.generation(), a.generation());
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.get(c), Some(&3));
    }

    #[test]
    fn test_bits_round_trip() {
        let mut arena = Arena::new();
        let a = arena.insert(());
        arena.remove(a);
        let b = arena.insert(());
        assert_eq!(Handle::from_bits(b.to_bits()), b);
    }

    #[test]
    fn test_insert_with_sees_own_handle() {
        let mut arena = Arena::new();
        let h = arena.insert_with(|h| h.index() * 10);
        assert_eq!(arena.get(h), Some(&0));
        assert_eq!(arena.iter().count(), 1);
    }
}
