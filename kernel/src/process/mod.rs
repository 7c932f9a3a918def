// kernel/src/process/mod.rs
//
// Process control blocks and the fixed-size process table. Every
// state transition goes through `Pcb::set_state`, which is the single
// producer of the per-state residency metrics.

pub mod scheduler;
pub mod syscall;

use std::fmt;

use crate::machine::{Tick, Word};
use crate::memory::PageTable;

/// Process identifier. Monotonically assigned, never reused within a
/// run; `Pid(0)` marks a table slot that has never held a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Pid(pub Word);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    #[default]
    Free,
    Ready,
    Running,
    Blocked,
    Terminated,
}

impl ProcessState {
    pub const COUNT: usize = 5;

    pub fn index(self) -> usize {
        match self {
            Self::Free => 0,
            Self::Ready => 1,
            Self::Running => 2,
            Self::Blocked => 3,
            Self::Terminated => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Free => "FREE",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Blocked => "BLOCKED",
            Self::Terminated => "TERMINATED",
        }
    }
}

/// Why a BLOCKED process is blocked, with the datum needed to resolve
/// the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockReason {
    #[default]
    None,
    /// Waiting for the keyboard of the terminal at this device base.
    IoRead(usize),
    /// Waiting for the screen of the terminal at this device base.
    IoWrite(usize),
    /// Waiting for this process to terminate.
    WaitPid(Pid),
}

/// CPU registers saved across traps.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuContext {
    pub pc: Word,
    pub a: Word,
    pub x: Word,
    pub err: Word,
}

/// Per-process accounting, updated on every state transition.
#[derive(Debug, Clone, Default)]
pub struct ProcMetrics {
    pub created_at: Tick,
    pub finished_at: Option<Tick>,
    pub preemptions: u32,
    pub page_faults: u32,
    /// Entry count per state, indexed by `ProcessState::index`.
    pub state_entries: [u32; ProcessState::COUNT],
    /// Accumulated ticks per state, same indexing.
    pub state_ticks: [Tick; ProcessState::COUNT],
    pub last_change: Tick,
    pub last_ready: Tick,
    /// Total ticks spent READY; divided by the number of dispatches
    /// this yields the mean response time.
    pub ready_total: Tick,
}

#[derive(Debug, Clone, Default)]
pub struct Pcb {
    pub pid: Pid,
    pub state: ProcessState,
    /// Device base of the owning terminal.
    pub terminal: usize,
    pub ctx: CpuContext,
    pub block: BlockReason,
    /// Scheduling priority in [0, 1]; lower is better.
    pub priority: f32,
    pub page_table: PageTable,
    pub metrics: ProcMetrics,
}

impl Pcb {
    /// Fresh READY process, the state a slot gets from spawn or boot.
    pub fn new(pid: Pid, terminal: usize, entry: Word, now: Tick) -> Self {
        let mut metrics = ProcMetrics {
            created_at: now,
            last_change: now,
            last_ready: now,
            ..ProcMetrics::default()
        };
        metrics.state_entries[ProcessState::Ready.index()] = 1;
        Self {
            pid,
            state: ProcessState::Ready,
            terminal,
            ctx: CpuContext {
                pc: entry,
                ..CpuContext::default()
            },
            block: BlockReason::None,
            priority: 0.5,
            page_table: PageTable::new(),
            metrics,
        }
    }

    /// Move to `new` at time `now`, charging the time spent in the old
    /// state and counting the entry into the new one.
    pub fn set_state(&mut self, new: ProcessState, now: Tick) {
        let old = self.state;
        if old == new {
            return;
        }

        let elapsed = now - self.metrics.last_change;
        if elapsed > 0 {
            self.metrics.state_ticks[old.index()] += elapsed;
        }

        self.state = new;
        self.metrics.state_entries[new.index()] += 1;
        self.metrics.last_change = now;

        if new == ProcessState::Ready {
            self.metrics.last_ready = now;
        }
        if old == ProcessState::Ready && new == ProcessState::Running {
            self.metrics.ready_total += now - self.metrics.last_ready;
        }
        if matches!(new, ProcessState::Terminated | ProcessState::Free)
            && self.metrics.finished_at.is_none()
            && old != ProcessState::Free
        {
            self.metrics.finished_at = Some(now);
        }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self.state, ProcessState::Free | ProcessState::Terminated)
    }
}

/// Fixed-size arena of PCBs. Slots are stationary; cross-references
/// use PIDs and are resolved through `find_by_pid`.
#[derive(Debug)]
pub struct ProcessTable {
    slots: Vec<Pcb>,
    next_pid: Word,
}

impl ProcessTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Pcb::default(); capacity],
            next_pid: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, idx: usize) -> &Pcb {
        &self.slots[idx]
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut Pcb {
        &mut self.slots[idx]
    }

    pub fn slots(&self) -> &[Pcb] {
        &self.slots
    }

    pub fn alloc_pid(&mut self) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        pid
    }

    /// First FREE slot, if any.
    pub fn find_free(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|p| p.state == ProcessState::Free)
    }

    /// Slot of the non-FREE process with this pid.
    pub fn find_by_pid(&self, pid: Pid) -> Option<usize> {
        self.slots
            .iter()
            .position(|p| p.state != ProcessState::Free && p.pid == pid)
    }

    /// Slot of a process that can still be killed: neither FREE nor
    /// already TERMINATED.
    pub fn find_live(&self, pid: Pid) -> Option<usize> {
        self.slots.iter().position(|p| p.is_live() && p.pid == pid)
    }
}
