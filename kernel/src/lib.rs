//! Core of an educational operating-system simulator: the kernel that
//! runs on a simulated CPU/memory/device substrate and multiplexes it
//! among user processes.
//!
//! Everything happens through [`Os::on_trap`]: the trap stub saves the
//! CPU registers to fixed memory cells and calls in with an IRQ code;
//! the kernel saves the interrupted context, handles the IRQ, resolves
//! pending I/O, schedules (round-robin or priority), and restores the
//! chosen context. Virtual memory is demand-paged over a small primary
//! memory, with FIFO or LRU replacement and a bitmap-allocated
//! secondary store backing evicted pages.

pub mod config;
pub mod interrupts;
pub mod machine;
pub mod memory;
pub mod metrics;
pub mod os;
pub mod process;

pub use config::{Replacement, SchedulerKind};
pub use interrupts::{Irq, ResumeDecision};
pub use machine::{DeviceBus, MachineError, Memory, Program, ProgramLoader, Tick, Word};
pub use memory::FaultError;
pub use metrics::SystemReport;
pub use os::Os;
pub use process::{Pid, ProcessState};
