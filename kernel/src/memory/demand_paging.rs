// kernel/src/memory/demand_paging.rs
//
// The page-fault path and the kernel's only way into user memory.
// Fault service is linearizable with the faulting instruction: it
// runs to completion inside the trap, and the process retries the
// same PC afterwards. Kernel accesses to user memory (the SPAWN
// string copy, image loading) drive faults to completion first, so
// the handler itself can never fault.

use log::debug;
use thiserror::Error;

use crate::config::{PAGE_SIZE, PAGE_TRANSFER_COST, Replacement};
use crate::machine::{DeviceBus, MachineError, Memory, ProgramLoader, Tick, Word};
use crate::memory::page_table::PteFlags;
use crate::memory::{frame_base, page_of, page_offset};
use crate::os::Os;
use crate::process::Pid;

#[derive(Debug, Error)]
pub enum FaultError {
    /// No frame exists at all (misconfigured machine).
    #[error("no physical frame available")]
    NoFrame,
    /// The victim page could not be given backing storage.
    #[error("secondary memory exhausted")]
    OutOfSecondary,
    /// The accessed string is not NUL-terminated printable words.
    #[error("malformed string in user memory")]
    BadString,
    #[error("no process with that pid")]
    NoSuchProcess,
    #[error(transparent)]
    Machine(#[from] MachineError),
}

impl<M: Memory, B: DeviceBus, L: ProgramLoader> Os<M, B, L> {
    /// Service a fault on `page` of the process in `slot`: find a
    /// frame (evicting if needed), bring the page in from its disk
    /// block or zero-fill it, and charge the transfer to the clock
    /// debt. One `PAGE_TRANSFER_COST` charge covers the whole
    /// service.
    pub(crate) fn handle_page_fault(&mut self, slot: usize, page: usize) -> Result<(), FaultError> {
        let now = self.now();
        let pid = self.table.slot(slot).pid;

        if self.table.slot(slot).page_table.resident_frame(page).is_some() {
            return Ok(());
        }
        debug!("pid {pid}: fault on page {page}");

        let frame = match self.frames.find_free() {
            Some(frame) => frame,
            None => self.select_victim().ok_or(FaultError::NoFrame)?,
        };

        if let Some((victim_pid, victim_page)) = self.frames.owner(frame) {
            self.evict_page(frame, victim_pid, victim_page)?;
            self.metrics.evictions += 1;
        }

        let block = self
            .table
            .slot(slot)
            .page_table
            .entry(page)
            .and_then(|e| e.disk_block);
        for i in 0..PAGE_SIZE {
            let word = match block {
                Some(base) => self.secondary.word(base + i),
                None => 0,
            };
            self.mem.write(frame_base(frame) + i, word)?;
        }

        let pte = self.table.slot_mut(slot).page_table.entry_mut(page);
        pte.flags = PteFlags::VALID;
        pte.frame = Some(frame);
        pte.last_use = Some(now);
        self.frames.assign(frame, pid, page);

        self.transfer_debt += PAGE_TRANSFER_COST;
        self.metrics.page_faults += 1;
        self.metrics.transfer_cost += Tick::from(PAGE_TRANSFER_COST);
        self.table.slot_mut(slot).metrics.page_faults += 1;
        Ok(())
    }

    /// Replacement victim according to the configured policy.
    fn select_victim(&self) -> Option<usize> {
        match self.replacement {
            Replacement::Fifo => self.frames.select_victim_fifo(),
            Replacement::Lru => {
                let table = &self.table;
                self.frames.select_victim_lru(|pid, page| {
                    let slot = table.find_by_pid(pid)?;
                    table.slot(slot).page_table.entry(page)?.last_use
                })
            }
        }
    }

    /// Push the page owning `frame` out to secondary storage. The
    /// copy is skipped when a clean disk copy already exists.
    fn evict_page(&mut self, frame: usize, pid: Pid, page: usize) -> Result<(), FaultError> {
        let slot = self.table.find_by_pid(pid).ok_or(FaultError::NoSuchProcess)?;
        let (old_block, dirty) = {
            let entry = self
                .table
                .slot(slot)
                .page_table
                .entry(page)
                .ok_or(FaultError::NoSuchProcess)?;
            (entry.disk_block, entry.flags.contains(PteFlags::DIRTY))
        };

        let block = match old_block {
            Some(base) => base,
            None => self
                .secondary
                .alloc(PAGE_SIZE)
                .ok_or(FaultError::OutOfSecondary)?,
        };
        if dirty || old_block.is_none() {
            for i in 0..PAGE_SIZE {
                let word = self.mem.read(frame_base(frame) + i)?;
                self.secondary.set_word(block + i, word);
            }
        }

        let pte = self.table.slot_mut(slot).page_table.entry_mut(page);
        pte.flags = PteFlags::empty();
        pte.frame = None;
        pte.disk_block = Some(block);
        self.frames.evict(frame);
        debug!("evicted pid {pid} page {page} from frame {frame}");
        Ok(())
    }

    /// Make `page` resident, faulting it in if needed.
    fn ensure_resident(&mut self, slot: usize, page: usize) -> Result<(), FaultError> {
        if self.table.slot(slot).page_table.resident_frame(page).is_none() {
            self.handle_page_fault(slot, page)?;
        }
        Ok(())
    }

    /// Translate a user virtual address, faulting the page in and
    /// stamping its use.
    fn user_to_phys(&mut self, slot: usize, vaddr: usize, write: bool) -> Result<usize, FaultError> {
        let page = page_of(vaddr);
        self.ensure_resident(slot, page)?;
        let now = self.now();
        let pte = self.table.slot_mut(slot).page_table.entry_mut(page);
        pte.last_use = Some(now);
        if write {
            pte.flags.insert(PteFlags::DIRTY);
        }
        let frame = pte.frame.ok_or(FaultError::NoFrame)?;
        Ok(frame_base(frame) + page_offset(vaddr))
    }

    pub(crate) fn user_read(&mut self, slot: usize, vaddr: usize) -> Result<Word, FaultError> {
        let addr = self.user_to_phys(slot, vaddr, false)?;
        Ok(self.mem.read(addr)?)
    }

    pub(crate) fn user_write(
        &mut self,
        slot: usize,
        vaddr: usize,
        value: Word,
    ) -> Result<(), FaultError> {
        let addr = self.user_to_phys(slot, vaddr, true)?;
        self.mem.write(addr, value)?;
        Ok(())
    }

    /// One word of `pid`'s memory, via the paging path. This is the
    /// access seam the simulated MMU drives; it services misses and
    /// refreshes the LRU stamp on hits.
    pub fn read_user_word(&mut self, pid: Pid, vaddr: usize) -> Result<Word, FaultError> {
        let slot = self.table.find_by_pid(pid).ok_or(FaultError::NoSuchProcess)?;
        self.user_read(slot, vaddr)
    }

    /// Write counterpart of [`Os::read_user_word`]; marks the page
    /// dirty.
    pub fn write_user_word(&mut self, pid: Pid, vaddr: usize, value: Word) -> Result<(), FaultError> {
        let slot = self.table.find_by_pid(pid).ok_or(FaultError::NoSuchProcess)?;
        self.user_write(slot, vaddr, value)
    }

    /// Copy a NUL-terminated string out of user memory, pre-touching
    /// pages as needed. Words outside 0..=255 or a missing terminator
    /// make the string malformed.
    pub(crate) fn copy_str_from_user(
        &mut self,
        slot: usize,
        vaddr: usize,
    ) -> Result<String, FaultError> {
        let mut out = String::new();
        for i in 0..crate::config::MAX_PROGRAM_NAME {
            let word = self.user_read(slot, vaddr + i)?;
            if !(0..=255).contains(&word) {
                return Err(FaultError::BadString);
            }
            if word == 0 {
                return Ok(out);
            }
            out.push(word as u8 as char);
        }
        Err(FaultError::BadString)
    }
}
