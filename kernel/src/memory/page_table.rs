// kernel/src/memory/page_table.rs
//
// Per-process page table. One entry per virtual page, grown on demand;
// a page is resident iff VALID is set and a frame is recorded, and has
// backing storage iff a disk block is recorded.

use bitflags::bitflags;

use crate::machine::Tick;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PteFlags: u8 {
        /// The page has a resident frame.
        const VALID = 1 << 0;
        /// The resident copy differs from the disk copy (if any).
        const DIRTY = 1 << 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageTableEntry {
    pub flags: PteFlags,
    pub frame: Option<usize>,
    pub disk_block: Option<usize>,
    /// Tick of the last access the kernel observed (fault-in or
    /// kernel-mediated user access). Drives LRU victim selection.
    pub last_use: Option<Tick>,
}

impl PageTableEntry {
    pub fn is_resident(&self) -> bool {
        self.flags.contains(PteFlags::VALID) && self.frame.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageTable {
    entries: Vec<PageTableEntry>,
}

impl PageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, page: usize) -> Option<&PageTableEntry> {
        self.entries.get(page)
    }

    /// Entry for `page`, growing the table with invalid entries as
    /// needed.
    pub fn entry_mut(&mut self, page: usize) -> &mut PageTableEntry {
        if page >= self.entries.len() {
            self.entries.resize_with(page + 1, PageTableEntry::default);
        }
        &mut self.entries[page]
    }

    /// Frame backing `page`, if the page is resident.
    pub fn resident_frame(&self, page: usize) -> Option<usize> {
        self.entry(page).filter(|e| e.is_resident())?.frame
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &PageTableEntry)> {
        self.entries.iter().enumerate()
    }

    /// Drop every mapping. Frames and disk blocks must have been
    /// released by the caller first.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Words of secondary storage this table holds blocks for.
    pub fn backed_pages(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.disk_block.is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_on_demand() {
        let mut pt = PageTable::new();
        assert!(pt.entry(3).is_none());
        pt.entry_mut(3).frame = Some(7);
        pt.entry_mut(3).flags.insert(PteFlags::VALID);
        assert_eq!(pt.resident_frame(3), Some(7));
        // intermediate pages exist but are invalid
        assert!(pt.entry(1).is_some());
        assert_eq!(pt.resident_frame(1), None);
    }

    #[test]
    fn residency_requires_valid_and_frame() {
        let mut pt = PageTable::new();
        pt.entry_mut(0).frame = Some(2);
        assert_eq!(pt.resident_frame(0), None);
        pt.entry_mut(0).flags.insert(PteFlags::VALID);
        assert_eq!(pt.resident_frame(0), Some(2));
    }

    #[test]
    fn backed_pages_counts_disk_blocks() {
        let mut pt = PageTable::new();
        pt.entry_mut(0).disk_block = Some(0);
        pt.entry_mut(4).disk_block = Some(10);
        assert_eq!(pt.backed_pages(), 2);
    }
}
