// Shared harness for the end-to-end scenarios. The tests play the
// part of the simulated CPU: they advance the instruction counter,
// deliver clock interrupts when the timer runs out, and raise
// syscall / cpu-error traps on behalf of the running process.

#![allow(dead_code)]

use kernel::config::PAGE_SIZE;
use kernel::machine::layout::{
    MEM_TOTAL, REG_A, REG_ERR, REG_FAULT_ADDR, REG_X, TRAP_STUB_PROGRAM, TRAP_VECTOR,
};
use kernel::machine::sim::{ArrayMemory, MachineBus, ProgramStore};
use kernel::machine::{cpu_err, Memory, Word};
use kernel::process::syscall::Syscall;
use kernel::process::ProcessState;
use kernel::{Irq, Os, Replacement, ResumeDecision, SchedulerKind};

pub type Sim = Os<ArrayMemory, MachineBus, ProgramStore>;

/// Program store seeded with the trap stub every boot needs.
pub fn base_store() -> ProgramStore {
    let mut store = ProgramStore::new();
    store.insert(TRAP_STUB_PROGRAM, TRAP_VECTOR, vec![0; 4]);
    store
}

/// Image words with a NUL-terminated `name` planted at `at`.
pub fn image_with_name(len: usize, at: usize, name: &str) -> Vec<Word> {
    let mut words = vec![0; len];
    for (i, b) in name.bytes().chain(std::iter::once(0)).enumerate() {
        words[at + i] = Word::from(b);
    }
    words
}

pub fn boot(store: ProgramStore, sched: SchedulerKind, replacement: Replacement) -> Sim {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut os = Os::new(
        ArrayMemory::new(MEM_TOTAL),
        MachineBus::new(),
        store,
        sched,
        replacement,
    );
    assert_eq!(os.on_trap(Irq::Reset.code()), ResumeDecision::Resume);
    os
}

/// Raise a syscall trap for the running process.
pub fn syscall(os: &mut Sim, id: Syscall, x: Word) -> ResumeDecision {
    os.mem_mut().write(REG_A, id.code()).unwrap();
    os.mem_mut().write(REG_X, x).unwrap();
    os.on_trap(Irq::Syscall.code())
}

/// Raise a page-missing CPU error for the running process.
pub fn page_fault(os: &mut Sim, vaddr: Word) -> ResumeDecision {
    os.mem_mut().write(REG_ERR, cpu_err::PAGE_MISSING).unwrap();
    os.mem_mut().write(REG_FAULT_ADDR, vaddr).unwrap();
    os.on_trap(Irq::CpuError.code())
}

/// Burn `n` instructions of CPU time for whatever is running,
/// delivering clock interrupts as the timer expires. Stops early when
/// nothing is runnable or the run is over.
pub fn run_cpu(os: &mut Sim, mut n: Word) {
    while n > 0 {
        if os.running_pid().is_none() || os.is_shutdown() || os.has_failed() {
            return;
        }
        let step = os.bus().timer.clamp(1, n);
        os.bus_mut().advance(step);
        n -= step;
        if os.bus().timer <= 0 {
            os.on_trap(Irq::Clock.code());
        }
    }
}

/// Run exactly one timer window and deliver its clock interrupt.
/// Returns how many instructions elapsed.
pub fn run_one_clock(os: &mut Sim) -> Word {
    let step = os.bus().timer.max(1);
    os.bus_mut().advance(step);
    os.on_trap(Irq::Clock.code());
    step
}

/// The structural invariants that must hold after every trap.
pub fn assert_invariants(os: &Sim) {
    let slots = os.process_table().slots();

    // at most one RUNNING process
    let running = slots
        .iter()
        .filter(|p| p.state == ProcessState::Running)
        .count();
    assert!(running <= 1, "more than one RUNNING process");

    // the RR queue is exactly the READY set
    if os.scheduler().kind() == SchedulerKind::RoundRobin {
        let mut queued: Vec<usize> = os.scheduler().ready_slots().collect();
        queued.sort_unstable();
        let ready: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, p)| p.state == ProcessState::Ready)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(queued, ready, "ready queue out of sync with table");
    }

    // every owned frame maps back through its owner's page table
    for (frame, pid, page) in os.frames().iter_owned() {
        let pcb = os.process(pid).expect("frame owned by unknown pid");
        assert_eq!(
            pcb.page_table.resident_frame(page),
            Some(frame),
            "frame ownership does not match page table"
        );
    }

    // used disk words equal the pages holding blocks
    let backed: usize = slots.iter().map(|p| p.page_table.backed_pages()).sum();
    assert_eq!(
        os.secondary().used_words(),
        backed * PAGE_SIZE,
        "disk bitmap out of sync with page tables"
    );

    // per-process time accounting balances
    let now = i64::from(os.bus().instr_count);
    for p in slots.iter().filter(|p| p.pid.0 != 0 && p.is_live()) {
        let accumulated: i64 = p.metrics.state_ticks.iter().sum();
        assert_eq!(
            accumulated + (now - p.metrics.last_change),
            now - p.metrics.created_at,
            "metric balance broken for pid {}",
            p.pid
        );
    }
}
