// Demand-paging stress: LRU victim selection, fault accounting, disk
// conservation, and content fidelity across eviction.

mod common;

use common::{assert_invariants, base_store, boot, page_fault, run_cpu, Sim};
use kernel::config::{CLOCK_INTERVAL, PAGE_SIZE, PAGE_TRANSFER_COST};
use kernel::machine::layout::INIT_PROGRAM;
use kernel::{Pid, Replacement, ResumeDecision, SchedulerKind, Word};

/// Boot with an empty init image so nothing is resident yet and every
/// fault in the test is one we drove ourselves.
fn boot_empty(replacement: Replacement) -> Sim {
    let mut store = base_store();
    store.insert(INIT_PROGRAM, 0, vec![]);
    boot(store, SchedulerKind::RoundRobin, replacement)
}

fn tick(os: &mut Sim) {
    os.bus_mut().instr_count += 1;
}

/// Sequential touch of pages 0..30 over 20 frames, then a re-touch of
/// page 0: 30 page-ins with 10 evictions, the re-touch misses (LRU
/// already evicted page 0), and every fault costs one page transfer.
#[test]
fn lru_sequential_touch_accounting() {
    let mut os = boot_empty(Replacement::Lru);
    assert_eq!(os.metrics().page_faults, 0);
    assert_eq!(os.frames().count_free(), 20);

    for page in 0..30 {
        tick(&mut os);
        let decision = page_fault(&mut os, (page * PAGE_SIZE) as Word);
        assert_eq!(decision, ResumeDecision::Resume);
    }
    assert_eq!(os.metrics().page_faults, 30);
    assert_eq!(os.metrics().evictions, 10);
    assert_eq!(os.frames().count_free(), 0);
    assert_invariants(&os);

    // pages 0..9 were the least recently used and are gone
    let init = os.process(Pid(1)).unwrap();
    for page in 0..10 {
        assert_eq!(init.page_table.resident_frame(page), None);
        assert!(init.page_table.entry(page).unwrap().disk_block.is_some());
    }

    // the re-touch of page 0 is a miss and evicts page 10, the oldest
    // survivor
    tick(&mut os);
    assert_eq!(page_fault(&mut os, 0), ResumeDecision::Resume);
    let init = os.process(Pid(1)).unwrap();
    assert!(init.page_table.resident_frame(0).is_some());
    assert_eq!(init.page_table.resident_frame(10), None);

    assert_eq!(os.metrics().page_faults, 31);
    assert_eq!(os.metrics().evictions, 11);
    assert_eq!(
        os.metrics().transfer_cost,
        31 * i64::from(PAGE_TRANSFER_COST)
    );
    assert_eq!(os.process(Pid(1)).unwrap().metrics.page_faults, 31);

    // 11 evicted pages hold disk blocks of one page each
    assert_eq!(os.secondary().used_words(), 11 * PAGE_SIZE);
    assert_invariants(&os);
}

/// Evicted contents come back bit-exact on the next fault.
#[test]
fn eviction_round_trips_page_contents() {
    let mut os = boot_empty(Replacement::Lru);

    tick(&mut os);
    os.write_user_word(Pid(1), 5, 1234).unwrap();
    os.write_user_word(Pid(1), 9, -7).unwrap();

    // flood the remaining frames so page 0 becomes the LRU victim
    for page in 1..=20 {
        tick(&mut os);
        os.read_user_word(Pid(1), page * PAGE_SIZE).unwrap();
    }
    let init = os.process(Pid(1)).unwrap();
    assert_eq!(init.page_table.resident_frame(0), None);
    assert!(init.page_table.entry(0).unwrap().disk_block.is_some());

    tick(&mut os);
    assert_eq!(os.read_user_word(Pid(1), 5).unwrap(), 1234);
    assert_eq!(os.read_user_word(Pid(1), 9).unwrap(), -7);
    assert_invariants(&os);
}

/// A workload that keeps a hot set: FIFO throws the hot pages out,
/// LRU does not.
#[test]
fn lru_beats_fifo_on_hot_set_trace() {
    let faults_for = |replacement: Replacement| -> u32 {
        let mut os = boot_empty(replacement);
        for page in 0..20 {
            tick(&mut os);
            os.read_user_word(Pid(1), page * PAGE_SIZE).unwrap();
        }
        for round in 0..6 {
            for page in 0..10 {
                tick(&mut os);
                os.read_user_word(Pid(1), page * PAGE_SIZE).unwrap();
            }
            tick(&mut os);
            os.read_user_word(Pid(1), (20 + round) * PAGE_SIZE).unwrap();
        }
        assert_invariants(&os);
        os.metrics().page_faults
    };

    let lru = faults_for(Replacement::Lru);
    let fifo = faults_for(Replacement::Fifo);
    assert!(lru < fifo, "lru={lru} fifo={fifo}");
}

/// A fault mid-window leaves the live countdown alone; the transfer
/// cost is deferred to the next timer reload, which shrinks by
/// exactly the debt, and the reload after that is back to a full
/// interval.
#[test]
fn transfer_cost_defers_to_next_timer_reload() {
    let mut os = boot_empty(Replacement::Lru);

    // one clean full window first
    run_cpu(&mut os, CLOCK_INTERVAL);
    assert_eq!(os.bus().timer, CLOCK_INTERVAL);

    // burn 10 instructions into the window, then fault
    run_cpu(&mut os, 10);
    assert_eq!(page_fault(&mut os, 0), ResumeDecision::Resume);
    assert_eq!(os.metrics().page_faults, 1);
    // the countdown in flight is untouched by the fault trap
    assert_eq!(os.bus().timer, CLOCK_INTERVAL - 10);

    // the tick closing this window reloads short by the debt
    run_cpu(&mut os, CLOCK_INTERVAL - 10);
    assert_eq!(os.bus().timer, CLOCK_INTERVAL - PAGE_TRANSFER_COST);

    // debt settled: the following reload is a full interval again
    run_cpu(&mut os, CLOCK_INTERVAL - PAGE_TRANSFER_COST);
    assert_eq!(os.bus().timer, CLOCK_INTERVAL);
    assert_eq!(os.running_pid(), Some(Pid(1)));
    assert_invariants(&os);
}

/// When secondary storage cannot back another victim, the faulting
/// process dies (its resources come back) but the kernel itself is
/// fine.
#[test]
fn disk_exhaustion_kills_the_faulting_process() {
    let mut os = boot_empty(Replacement::Fifo);

    // 20 frames + 80 disk blocks: pages 0..100 fit, the next eviction
    // has nowhere to write
    for page in 0..100 {
        tick(&mut os);
        assert_eq!(
            page_fault(&mut os, (page * PAGE_SIZE) as Word),
            ResumeDecision::Resume
        );
    }
    assert_eq!(os.secondary().used_words(), os.secondary().size());

    tick(&mut os);
    let decision = page_fault(&mut os, (100 * PAGE_SIZE) as Word);
    // init died and nothing else is runnable
    assert_eq!(decision, ResumeDecision::Halt);
    assert!(os.process(Pid(1)).is_none());
    assert!(!os.has_failed());

    // the fatal path reaped init, so everything came back
    assert_eq!(os.frames().count_free(), os.frames().count());
    assert_eq!(os.secondary().used_words(), 0);
    assert_invariants(&os);
}
