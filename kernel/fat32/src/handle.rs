//! Fixed-capacity handle tables.
//!
//! Every slot carries a generation that is bumped when the slot is released,
//! so an id kept after `close` can never reach the handle that reuses its slot.

use crate::error::FsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HandleId {
    index: usize,
    generation: u32,
}

/// An open file, as returned by `open` and `create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub(crate) HandleId);

/// An open directory, as returned by `opendir`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirId(pub(crate) HandleId);

struct Slot<T> {
    generation: u32,
    item: Option<T>,
}

pub(crate) struct HandlePool<T, const N: usize> {
    slots: [Slot<T>; N],
}

impl<T, const N: usize> HandlePool<T, N> {
    pub fn new() -> Self {
        Self { slots: core::array::from_fn(|_| Slot { generation: 0, item: None }) }
    }

    pub fn capacity(&self) -> usize { N }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.item.is_some()).count()
    }

    pub fn has_free(&self) -> bool {
        self.slots.iter().any(|slot| slot.item.is_none())
    }

    /// Lease the lowest free slot.
    pub fn insert(&mut self, item: T) -> Result<HandleId, FsError> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.item.is_none())
            .ok_or(FsError::NoFreeHandles)?;
        slot.item = Some(item);
        Ok(HandleId { index, generation: slot.generation })
    }

    fn slot(&self, id: HandleId) -> Option<&Slot<T>> {
        self.slots.get(id.index).filter(|slot| slot.generation == id.generation)
    }

    pub fn get(&self, id: HandleId) -> Result<&T, FsError> {
        self.slot(id).and_then(|slot| slot.item.as_ref()).ok_or(FsError::NotOpen)
    }

    pub fn get_mut(&mut self, id: HandleId) -> Result<&mut T, FsError> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.item.as_mut())
            .ok_or(FsError::NotOpen)
    }

    /// Release the slot and hand back what it held.
    pub fn remove(&mut self, id: HandleId) -> Result<T, FsError> {
        let slot = self
            .slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .ok_or(FsError::NotOpen)?;
        let item = slot.item.take().ok_or(FsError::NotOpen)?;
        slot.generation = slot.generation.wrapping_add(1);
        Ok(item)
    }

    /// Release every slot, yielding the items that were open.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.slots.iter_mut().filter_map(|slot| {
            let item = slot.item.take()?;
            slot.generation = slot.generation.wrapping_add(1);
            Some(item)
        })
    }
}
