// kernel/src/config.rs
//
// Global simulation parameters. Everything here is a compile-time
// constant; the two runtime choices (scheduler, replacement policy)
// are picked once when the kernel is created.

/// Instructions executed between two clock interrupts.
pub const CLOCK_INTERVAL: i32 = 50;

/// Clock interrupts a process may consume before it is preempted.
pub const QUANTUM_TOTAL: i32 = 3;

/// Fixed size of the process table.
pub const MAX_PROCESSES: usize = 8;

/// Size of the pageable primary memory, in words.
pub const PRIMARY_MEM_SIZE: usize = 200;

/// Size of one virtual page / physical frame, in words.
pub const PAGE_SIZE: usize = 10;

/// Secondary memory is this many times larger than primary memory.
pub const SECONDARY_FACTOR: usize = 4;

/// Size of the secondary memory, in words.
pub const SECONDARY_MEM_SIZE: usize = PRIMARY_MEM_SIZE * SECONDARY_FACTOR;

/// Number of physical frames managed by the frame manager.
pub const NUM_FRAMES: usize = PRIMARY_MEM_SIZE / PAGE_SIZE;

/// Simulated instructions charged for moving one page between primary
/// and secondary memory.
pub const PAGE_TRANSFER_COST: i32 = 30;

/// Longest program name SPAWN will copy out of user memory.
pub const MAX_PROGRAM_NAME: usize = 100;

/// Page replacement policy used when no frame is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Replacement {
    #[default]
    Lru,
    Fifo,
}

/// Scheduling strategy, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerKind {
    #[default]
    RoundRobin,
    Priority,
}
