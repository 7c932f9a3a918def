// kernel/src/os.rs
//
// The kernel object. Owns the machine collaborators and every
// subsystem; the only way in after boot is `on_trap` (in
// `interrupts`). Syscall handlers live in `process::syscall` and the
// page-fault path in `memory::demand_paging`, all as impl blocks on
// this type.

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::config::{
    MAX_PROCESSES, NUM_FRAMES, PAGE_SIZE, Replacement, SECONDARY_MEM_SIZE, SchedulerKind,
};
use crate::machine::layout::{
    CLOCK_INSTR, KBD_DATA, KBD_STATUS, MEM_TOTAL, NUM_TERMINALS, SCR_DATA, SCR_STATUS,
    terminal_base,
};
use crate::machine::{DeviceBus, MachineError, Memory, ProgramLoader, Tick, Word};
use crate::memory::{FrameManager, SecondaryStore};
use crate::metrics::{GlobalMetrics, SystemReport};
use crate::process::scheduler::Scheduler;
use crate::process::{BlockReason, Pcb, Pid, ProcessState, ProcessTable};

/// Why SPAWN could not produce a child.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("process table full")]
    TableFull,
    #[error(transparent)]
    Load(MachineError),
    #[error("image load failed: {0}")]
    ImageLoad(crate::memory::FaultError),
}

pub struct Os<M: Memory, B: DeviceBus, L: ProgramLoader> {
    pub(crate) mem: M,
    pub(crate) bus: B,
    pub(crate) loader: L,
    pub(crate) table: ProcessTable,
    pub(crate) sched: Scheduler,
    pub(crate) frames: FrameManager,
    pub(crate) secondary: SecondaryStore,
    pub(crate) replacement: Replacement,
    pub(crate) metrics: GlobalMetrics,
    /// Simulated instructions owed to page transfers; folded into the
    /// next clock-timer reload.
    pub(crate) transfer_debt: Word,
    pub(crate) internal_error: bool,
    pub(crate) shutdown: bool,
    pub(crate) report: Option<SystemReport>,
}

impl<M: Memory, B: DeviceBus, L: ProgramLoader> Os<M, B, L> {
    pub fn new(mem: M, bus: B, loader: L, sched: SchedulerKind, replacement: Replacement) -> Self {
        if mem.size() < MEM_TOTAL {
            warn!(
                "primary memory has {} words, kernel layout expects {}",
                mem.size(),
                MEM_TOTAL
            );
        }
        Self {
            mem,
            bus,
            loader,
            table: ProcessTable::new(MAX_PROCESSES),
            sched: Scheduler::new(sched),
            frames: FrameManager::new(NUM_FRAMES),
            secondary: SecondaryStore::new(SECONDARY_MEM_SIZE),
            replacement,
            metrics: GlobalMetrics::default(),
            transfer_debt: 0,
            internal_error: false,
            shutdown: false,
            report: None,
        }
    }

    // -- inspection --------------------------------------------------

    pub fn metrics(&self) -> &GlobalMetrics {
        &self.metrics
    }

    /// The final report, present once PID 1 has been killed.
    pub fn report(&self) -> Option<&SystemReport> {
        self.report.as_ref()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn has_failed(&self) -> bool {
        self.internal_error
    }

    pub fn running_pid(&self) -> Option<Pid> {
        self.sched.current().map(|slot| self.table.slot(slot).pid)
    }

    pub fn process(&self, pid: Pid) -> Option<&Pcb> {
        self.table.find_by_pid(pid).map(|slot| self.table.slot(slot))
    }

    pub fn process_table(&self) -> &ProcessTable {
        &self.table
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    pub fn frames(&self) -> &FrameManager {
        &self.frames
    }

    pub fn secondary(&self) -> &SecondaryStore {
        &self.secondary
    }

    pub fn mem(&self) -> &M {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    // -- time --------------------------------------------------------

    /// Current tick, read from the instruction counter device.
    pub(crate) fn now(&mut self) -> Tick {
        match self.bus.read(CLOCK_INSTR) {
            Ok(t) => Tick::from(t),
            Err(e) => {
                error!("failed to read instruction clock: {e}");
                self.internal_error = true;
                0
            }
        }
    }

    // -- process lifecycle -------------------------------------------

    /// Load `name` and admit it as a new READY process. Shared by boot
    /// (init) and the SPAWN syscall.
    pub(crate) fn create_process(&mut self, name: &str) -> Result<Pid, SpawnError> {
        let slot = self.table.find_free().ok_or(SpawnError::TableFull)?;
        let prog = self.loader.load(name).map_err(SpawnError::Load)?;
        let now = self.now();
        let pid = self.table.alloc_pid();
        let terminal = terminal_base(slot % NUM_TERMINALS);
        *self.table.slot_mut(slot) = Pcb::new(pid, terminal, prog.start as Word, now);

        // copy the image in through the paging path, faulting pages in
        // as we go
        for (i, &word) in prog.words.iter().enumerate() {
            if let Err(e) = self.user_write(slot, prog.start + i, word) {
                warn!("pid {pid}: loading `{name}` failed: {e}");
                self.release_resources(slot);
                *self.table.slot_mut(slot) = Pcb::default();
                return Err(SpawnError::ImageLoad(e));
            }
        }

        self.metrics.created += 1;
        self.sched.admit(slot);
        info!(
            "created pid {pid} running `{name}` (entry {}, terminal {terminal})",
            prog.start
        );
        Ok(pid)
    }

    /// Block the running process in `slot` for `reason`.
    pub(crate) fn block_current(&mut self, slot: usize, reason: BlockReason) {
        let now = self.now();
        let pcb = self.table.slot_mut(slot);
        pcb.block = reason;
        pcb.set_state(ProcessState::Blocked, now);
        debug!("pid {} blocked ({reason:?})", pcb.pid);
    }

    /// KILL semantics: mark TERMINATED and hand the corpse to a waiter
    /// if one is already blocked on it; otherwise it stays TERMINATED
    /// until some later WAIT reaps it.
    pub(crate) fn kill_process(&mut self, slot: usize) {
        let now = self.now();
        let pid = self.table.slot(slot).pid;
        self.table.slot_mut(slot).set_state(ProcessState::Terminated, now);
        info!("pid {pid} terminated");
        if self.wake_one_waiter(pid) {
            self.reap(slot);
        }
    }

    /// Process-fatal path (CPU error, invalid syscall, unserviceable
    /// fault, device failure on its behalf): the process dies and its
    /// resources come back immediately, waiter or not.
    pub(crate) fn fatal_terminate(&mut self, slot: usize) {
        let now = self.now();
        let pid = self.table.slot(slot).pid;
        self.table.slot_mut(slot).set_state(ProcessState::Terminated, now);
        warn!("pid {pid} killed by the kernel");
        self.wake_one_waiter(pid);
        self.reap(slot);
    }

    /// Wake at most one process blocked waiting for `pid`; its WAIT
    /// returns 0.
    pub(crate) fn wake_one_waiter(&mut self, pid: Pid) -> bool {
        let now = self.now();
        for i in 0..self.table.capacity() {
            let pcb = self.table.slot(i);
            if pcb.state == ProcessState::Blocked && pcb.block == BlockReason::WaitPid(pid) {
                let waiter = self.table.slot_mut(i);
                waiter.ctx.a = 0;
                waiter.block = BlockReason::None;
                waiter.set_state(ProcessState::Ready, now);
                debug!("pid {} resumed, pid {pid} collected", waiter.pid);
                self.sched.admit(i);
                return true;
            }
        }
        false
    }

    /// TERMINATED -> FREE: give back frames and disk blocks.
    pub(crate) fn reap(&mut self, slot: usize) {
        let now = self.now();
        let pid = self.table.slot(slot).pid;
        self.release_resources(slot);
        self.table.slot_mut(slot).set_state(ProcessState::Free, now);
        debug!("pid {pid} reaped");
    }

    pub(crate) fn release_resources(&mut self, slot: usize) {
        let pid = self.table.slot(slot).pid;
        self.frames.release_all(pid);
        let blocks: Vec<usize> = self
            .table
            .slot(slot)
            .page_table
            .iter()
            .filter_map(|(_, e)| e.disk_block)
            .collect();
        for base in blocks {
            self.secondary.free(base, PAGE_SIZE);
        }
        let pcb = self.table.slot_mut(slot);
        pcb.page_table.clear();
        pcb.block = BlockReason::None;
    }

    /// PID 1 died: close the books, build the report, request halt.
    pub(crate) fn finish_run(&mut self) {
        let now = self.now();
        self.metrics.close_idle(now);
        let report = SystemReport::build(&self.table, &self.metrics, now);
        info!("init terminated, shutting down\n{report}");
        self.report = Some(report);
        self.shutdown = true;
    }

    // -- pending I/O -------------------------------------------------

    /// Probe the devices every BLOCKED-on-I/O process is waiting for
    /// and complete the operations that became possible. Runs between
    /// IRQ handling and scheduling on every trap; completions are
    /// admitted in slot order, which keeps runs reproducible.
    pub(crate) fn sweep_pending_io(&mut self) {
        let now = self.now();
        for slot in 0..self.table.capacity() {
            if self.table.slot(slot).state != ProcessState::Blocked {
                continue;
            }
            match self.table.slot(slot).block {
                BlockReason::IoRead(term) => match self.bus.read(term + KBD_STATUS) {
                    Err(e) => {
                        warn!("keyboard status probe failed: {e}");
                        self.fatal_terminate(slot);
                    }
                    Ok(0) => {}
                    Ok(_) => match self.bus.read(term + KBD_DATA) {
                        Err(e) => {
                            warn!("keyboard read failed: {e}");
                            self.fatal_terminate(slot);
                        }
                        Ok(data) => {
                            let pcb = self.table.slot_mut(slot);
                            pcb.ctx.a = data;
                            pcb.block = BlockReason::None;
                            pcb.set_state(ProcessState::Ready, now);
                            debug!("pid {} unblocked by keyboard input", pcb.pid);
                            self.sched.admit(slot);
                        }
                    },
                },
                BlockReason::IoWrite(term) => match self.bus.read(term + SCR_STATUS) {
                    Err(e) => {
                        warn!("screen status probe failed: {e}");
                        self.fatal_terminate(slot);
                    }
                    Ok(0) => {}
                    Ok(_) => {
                        let datum = self.table.slot(slot).ctx.x;
                        match self.bus.write(term + SCR_DATA, datum) {
                            Err(e) => {
                                warn!("screen write failed: {e}");
                                self.fatal_terminate(slot);
                            }
                            Ok(()) => {
                                let pcb = self.table.slot_mut(slot);
                                pcb.ctx.a = 0;
                                pcb.block = BlockReason::None;
                                pcb.set_state(ProcessState::Ready, now);
                                debug!("pid {} unblocked by screen", pcb.pid);
                                self.sched.admit(slot);
                            }
                        }
                    }
                },
                _ => {}
            }
        }
    }
}
