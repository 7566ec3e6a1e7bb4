use crate::error::StorageError;
use crate::types::{PAGE_HEADER_SIZE, PAGE_SIZE, SLOT_SIZE};

use super::page::{Page, read_u16};

/// Slot array start: right after the common page header.
const DATA_OFFSET: usize = PAGE_HEADER_SIZE;

/// How a cell of a given size fits a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    /// The gap between the slot array and the cell area is large enough.
    Contiguous,
    /// Enough bytes are free in total, but only after [`SlottedPage::defragment`].
    AfterDefragment,
    No,
}

/// Read-only view of a slotted page.
///
/// Slot array starts after the page header and grows forward. Each slot is 4
/// bytes: `(cell_offset: u16, cell_length: u16)` in little-endian. A slot with
/// offset 0 is dead and can be reused by a later insert.
///
/// Slot indexes are stable: a live cell keeps its index for its whole life,
/// across removals of other cells and across defragmentation. Cell data starts
/// at the end of the page and grows backward.
pub struct SlottedPageRef<'a> {
    page: &'a Page,
}

impl<'a> SlottedPageRef<'a> {
    pub fn new(page: &'a Page) -> Self {
        Self { page }
    }

    /// Number of slots, dead ones included.
    pub fn slot_count(&self) -> usize {
        self.page.entry_count() as usize
    }

    fn read_slot(&self, slot_index: usize) -> (u16, u16) {
        slot_entry(self.page, slot_index)
    }

    /// Return the cell data for `slot_index`, or `None` if the slot is dead
    /// or out of range.
    pub fn cell(&self, slot_index: usize) -> Option<&'a [u8]> {
        if slot_index >= self.slot_count() {
            return None;
        }
        let (offset, length) = self.read_slot(slot_index);
        if offset == 0 {
            return None;
        }
        let start = offset as usize;
        Some(&self.page.data()[start..start + length as usize])
    }

    /// Indexes of all live slots, ascending.
    pub fn live_slots(&self) -> Vec<u16> {
        (0..self.slot_count())
            .filter(|&i| self.read_slot(i).0 != 0)
            .map(|i| i as u16)
            .collect()
    }

    /// Bytes between the end of the slot array and the start of cell data.
    pub fn free_space(&self) -> usize {
        let slot_end = DATA_OFFSET + self.slot_count() * SLOT_SIZE;
        (self.page.free_space_offset() as usize).saturating_sub(slot_end)
    }

    /// Bytes that would be contiguous after a defragmentation.
    pub fn total_free(&self) -> usize {
        let live: usize = (0..self.slot_count())
            .map(|i| self.read_slot(i))
            .filter(|(offset, _)| *offset != 0)
            .map(|(_, length)| length as usize)
            .sum();
        PAGE_SIZE - DATA_OFFSET - self.slot_count() * SLOT_SIZE - live
    }

    fn has_dead_slot(&self) -> bool {
        (0..self.slot_count()).any(|i| self.read_slot(i).0 == 0)
    }

    /// Bytes an insert of `len` consumes, including a new slot entry if no
    /// dead slot can be reused.
    pub fn needed(&self, len: usize) -> usize {
        if self.has_dead_slot() {
            len
        } else {
            len + SLOT_SIZE
        }
    }

    pub fn fit(&self, len: usize) -> Fit {
        let needed = self.needed(len);
        if self.free_space() >= needed {
            Fit::Contiguous
        } else if self.total_free() >= needed {
            Fit::AfterDefragment
        } else {
            Fit::No
        }
    }
}

fn slot_entry(page: &Page, slot_index: usize) -> (u16, u16) {
    let base = DATA_OFFSET + slot_index * SLOT_SIZE;
    let buf = page.data();
    (read_u16(buf, base), read_u16(buf, base + 2))
}

/// Mutable slotted page operations.
pub struct SlottedPage<'a> {
    page: &'a mut Page,
}

impl<'a> SlottedPage<'a> {
    pub fn new(page: &'a mut Page) -> Self {
        Self { page }
    }

    pub fn view(&self) -> SlottedPageRef<'_> {
        SlottedPageRef::new(self.page)
    }

    fn write_slot(&mut self, slot_index: usize, offset: u16, length: u16) {
        let base = DATA_OFFSET + slot_index * SLOT_SIZE;
        let buf = self.page.data_mut();
        buf[base..base + 2].copy_from_slice(&offset.to_le_bytes());
        buf[base + 2..base + 4].copy_from_slice(&length.to_le_bytes());
    }

    /// Mutable access to a live cell, for in-place field updates.
    pub fn cell_mut(&mut self, slot_index: usize) -> Option<&mut [u8]> {
        if slot_index >= self.page.entry_count() as usize {
            return None;
        }
        let (offset, length) = slot_entry(self.page, slot_index);
        if offset == 0 {
            return None;
        }
        let start = offset as usize;
        Some(&mut self.page.data_mut()[start..start + length as usize])
    }

    /// Insert a cell, reusing the lowest dead slot if there is one.
    /// Returns the slot index.
    pub fn insert(&mut self, data: &[u8]) -> Result<u16, StorageError> {
        let view = self.view();
        let count = view.slot_count();
        let reuse = (0..count).find(|&i| slot_entry(self.page, i).0 == 0);
        let needed = data.len() + if reuse.is_some() { 0 } else { SLOT_SIZE };
        if view.free_space() < needed {
            return Err(StorageError::PageFull {
                page_id: self.page.page_id(),
                needed,
            });
        }

        let cell_offset = self.page.free_space_offset() as usize - data.len();
        self.page.data_mut()[cell_offset..cell_offset + data.len()].copy_from_slice(data);

        let slot_index = reuse.unwrap_or(count);
        self.write_slot(slot_index, cell_offset as u16, data.len() as u16);
        if reuse.is_none() {
            self.page.set_entry_count(count as u32 + 1);
        }
        self.page.set_free_space_offset(cell_offset as u32);
        Ok(slot_index as u16)
    }

    /// Mark a slot dead. Trailing dead slots are trimmed from the slot array;
    /// an empty page gets its whole cell area back.
    pub fn remove(&mut self, slot_index: usize) {
        let count = self.page.entry_count() as usize;
        if slot_index >= count {
            return;
        }
        self.write_slot(slot_index, 0, 0);

        let mut new_count = count;
        while new_count > 0 && slot_entry(self.page, new_count - 1).0 == 0 {
            new_count -= 1;
        }
        self.page.set_entry_count(new_count as u32);
        if new_count == 0 {
            self.page.set_free_space_offset(PAGE_SIZE as u32);
        }
    }

    /// Compact live cells towards the end of the page. Every live cell keeps
    /// its slot index; only its byte offset changes.
    pub fn defragment(&mut self) {
        let count = self.page.entry_count() as usize;
        let mut live: Vec<(usize, Vec<u8>)> = Vec::new();
        for i in 0..count {
            let (offset, length) = slot_entry(self.page, i);
            if offset != 0 {
                let start = offset as usize;
                live.push((i, self.page.data()[start..start + length as usize].to_vec()));
            }
        }

        let mut write_offset = PAGE_SIZE;
        for (slot_index, cell) in &live {
            write_offset -= cell.len();
            self.page.data_mut()[write_offset..write_offset + cell.len()].copy_from_slice(cell);
            self.write_slot(*slot_index, write_offset as u16, cell.len() as u16);
        }

        let slot_end = DATA_OFFSET + count * SLOT_SIZE;
        self.page.data_mut()[slot_end..write_offset].fill(0);
        self.page.set_free_space_offset(write_offset as u32);
    }
}
