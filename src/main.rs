// Demo driver: assembles the reference machine substrate, boots the
// kernel, and plays the part of the CPU for a small canned workload
// (init prints a banner, spawns a child, waits for it, then shuts the
// system down). Run with RUST_LOG=debug to watch the kernel work.

use std::collections::{HashMap, VecDeque};

use kernel::machine::layout::{
    INIT_PROGRAM, MEM_TOTAL, REG_A, REG_X, TRAP_STUB_PROGRAM, TRAP_VECTOR,
};
use kernel::machine::sim::{ArrayMemory, MachineBus, ProgramStore};
use kernel::process::syscall::Syscall;
use kernel::{Irq, Memory, Os, Replacement, SchedulerKind, Word};

type Sim = Os<ArrayMemory, MachineBus, ProgramStore>;

/// One step of a scripted process.
enum Action {
    /// Burn CPU for this many instructions.
    Cpu(Word),
    /// WRITE syscall with this datum.
    Write(Word),
    /// SPAWN syscall; the name lives at this virtual address.
    Spawn(Word),
    /// WAIT syscall on this pid.
    Wait(Word),
    /// KILL(0).
    Exit,
}

fn programs() -> ProgramStore {
    let mut store = ProgramStore::new();
    store.insert(TRAP_STUB_PROGRAM, TRAP_VECTOR, vec![0; 4]);

    // init carries the child's name at virtual address 10
    let mut init = vec![0; 16];
    for (i, b) in b"child\0".iter().enumerate() {
        init[10 + i] = Word::from(*b);
    }
    store.insert(INIT_PROGRAM, 0, init);
    store.insert("child", 0, vec![0; 4]);
    store
}

fn syscall(os: &mut Sim, id: Syscall, x: Word) {
    os.mem_mut()
        .write(REG_A, id.code())
        .expect("register cell write");
    os.mem_mut().write(REG_X, x).expect("register cell write");
    os.on_trap(Irq::Syscall.code());
}

/// Let the running process burn `n` instructions, delivering clock
/// interrupts as the timer expires.
fn run_cpu(os: &mut Sim, mut n: Word) {
    while n > 0 && !os.is_shutdown() && !os.has_failed() && os.running_pid().is_some() {
        let step = os.bus().timer.clamp(1, n);
        os.bus_mut().advance(step);
        n -= step;
        if os.bus().timer <= 0 {
            os.on_trap(Irq::Clock.code());
        }
    }
}

fn main() {
    env_logger::init();

    let mut os = Sim::new(
        ArrayMemory::new(MEM_TOTAL),
        MachineBus::new(),
        programs(),
        SchedulerKind::RoundRobin,
        Replacement::Lru,
    );
    os.on_trap(Irq::Reset.code());

    let mut scripts: HashMap<Word, VecDeque<Action>> = HashMap::new();
    scripts.insert(
        1,
        VecDeque::from([
            Action::Cpu(120),
            Action::Write(Word::from(b's')),
            Action::Write(Word::from(b'o')),
            Action::Write(Word::from(b'\n')),
            Action::Spawn(10),
            Action::Wait(2),
            Action::Exit,
        ]),
    );
    scripts.insert(
        2,
        VecDeque::from([Action::Cpu(60), Action::Write(Word::from(b'!')), Action::Exit]),
    );

    while !os.is_shutdown() && !os.has_failed() {
        let Some(pid) = os.running_pid() else {
            // nothing runnable; in a real machine we would sleep for
            // the next device interrupt
            break;
        };
        let Some(action) = scripts.get_mut(&pid.0).and_then(VecDeque::pop_front) else {
            break;
        };
        match action {
            Action::Cpu(n) => run_cpu(&mut os, n),
            Action::Write(w) => syscall(&mut os, Syscall::Write, w),
            Action::Spawn(addr) => syscall(&mut os, Syscall::Spawn, addr),
            Action::Wait(pid) => syscall(&mut os, Syscall::Wait, pid),
            Action::Exit => syscall(&mut os, Syscall::Kill, 0),
        }
    }

    let screen: String = os
        .bus()
        .terminal(0)
        .output
        .iter()
        .map(|&w| char::from(w as u8))
        .collect();
    println!("terminal A wrote: {screen:?}");

    match os.report() {
        Some(report) => println!("{report}"),
        None => println!("simulation ended without a report"),
    }
}
