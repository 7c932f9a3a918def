// Priority scheduling: an I/O-bound process converges toward the
// favored end of the priority range and wins the CPU from a
// CPU-bound sibling at every quantum boundary after it unblocks.

mod common;

use common::{assert_invariants, base_store, boot, image_with_name, run_one_clock, syscall};
use kernel::config::QUANTUM_TOTAL;
use kernel::machine::layout::INIT_PROGRAM;
use kernel::process::syscall::Syscall;
use kernel::process::ProcessState;
use kernel::{Pid, Replacement, SchedulerKind};

const IO_CHILD: Pid = Pid(2);
const CPU_CHILD: Pid = Pid(3);

#[test]
fn io_bound_child_converges_and_preempts() {
    let mut store = base_store();
    store.insert(INIT_PROGRAM, 0, image_with_name(16, 10, "child"));
    store.insert("child", 0, vec![0; 3]);
    let mut os = boot(store, SchedulerKind::Priority, Replacement::Lru);

    syscall(&mut os, Syscall::Spawn, 10);
    syscall(&mut os, Syscall::Spawn, 10);
    assert_eq!(os.process(Pid(1)).unwrap().ctx.a, CPU_CHILD.0);
    // init steps aside until the io child dies (it never does here)
    syscall(&mut os, Syscall::Wait, IO_CHILD.0);
    assert_eq!(os.process(Pid(1)).unwrap().state, ProcessState::Blocked);

    // both children start at 0.5; the tie breaks to the lower slot,
    // so the io child runs first
    assert_eq!(os.running_pid(), Some(IO_CHILD));

    // the io child READs from its terminal; a key shows up roughly
    // every 200 ticks, so every READ blocks first
    let mut blocks = 0;
    let mut next_key = 200;
    let mut guard = 0;
    while blocks < 3 {
        guard += 1;
        assert!(guard < 10_000, "io child never settled into its rhythm");
        if os.process(IO_CHILD).unwrap().state == ProcessState::Blocked
            && os.bus().instr_count >= next_key
        {
            // terminal B belongs to slot 1
            os.bus_mut().terminal_mut(1).input.push_back(7);
            next_key += 200;
        }
        match os.running_pid() {
            Some(pid) if pid == IO_CHILD => {
                syscall(&mut os, Syscall::Read, 0);
                if os.process(IO_CHILD).unwrap().state == ProcessState::Blocked {
                    blocks += 1;
                }
            }
            _ => {
                run_one_clock(&mut os);
            }
        }
        assert_invariants(&os);
    }

    // three zero-usage turns: 0.5 -> 0.25 -> 0.125 -> 0.0625
    let io = os.process(IO_CHILD).unwrap();
    assert!(io.priority < 0.1, "io priority was {}", io.priority);
    assert!(io.priority >= 0.0);

    // the sibling has been burning full quanta; its priority went the
    // other way
    let cpu = os.process(CPU_CHILD).unwrap();
    assert!(cpu.priority > io.priority);
    assert!(cpu.priority <= 1.0);

    // feed one more key: the io child unblocks and takes the CPU at
    // the sibling's next quantum boundary
    assert_eq!(os.running_pid(), Some(CPU_CHILD));
    os.bus_mut().terminal_mut(1).input.push_back(9);
    let mut clocks = 0;
    while os.running_pid() != Some(IO_CHILD) {
        run_one_clock(&mut os);
        clocks += 1;
        assert!(
            clocks <= QUANTUM_TOTAL + 1,
            "io child failed to preempt the sibling"
        );
    }
    // the completed READ delivered the key
    assert_eq!(os.process(IO_CHILD).unwrap().ctx.a, 9);
    assert_invariants(&os);
}
