// kernel/src/process/scheduler.rs
//
// The two scheduling strategies. Round-robin keeps an explicit FIFO
// of READY slots; the priority scheduler has no queue at all and
// re-scans the table on every decision, which cannot desynchronise
// from the READY states. Quantum accounting and the preempt flag are
// shared by both.

use std::collections::VecDeque;

use log::debug;

use crate::config::{QUANTUM_TOTAL, SchedulerKind};
use crate::machine::Tick;
use crate::metrics::GlobalMetrics;
use crate::process::{Pcb, ProcessState, ProcessTable};

#[derive(Debug)]
pub struct Scheduler {
    kind: SchedulerKind,
    ready: VecDeque<usize>,
    current: Option<usize>,
    quantum_total: i32,
    quantum_remaining: i32,
    must_preempt: bool,
}

impl Scheduler {
    pub fn new(kind: SchedulerKind) -> Self {
        Self {
            kind,
            ready: VecDeque::new(),
            current: None,
            quantum_total: QUANTUM_TOTAL,
            quantum_remaining: 0,
            must_preempt: false,
        }
    }

    pub fn kind(&self) -> SchedulerKind {
        self.kind
    }

    /// Slot of the RUNNING process, if any.
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// READY slots as the round-robin queue sees them.
    pub fn ready_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.ready.iter().copied()
    }

    pub fn quantum_remaining(&self) -> i32 {
        self.quantum_remaining
    }

    /// Admit a slot to the ready structure. The priority scheduler
    /// keeps no queue, so this is a no-op there.
    pub fn admit(&mut self, slot: usize) {
        if self.kind == SchedulerKind::RoundRobin {
            self.ready.push_back(slot);
        }
    }

    /// One clock interrupt elapsed; burn quantum of the running
    /// process and raise the preempt flag when it runs out.
    pub fn clock_tick(&mut self) {
        if self.current.is_none() {
            return;
        }
        self.quantum_remaining -= 1;
        if self.quantum_remaining == 0 {
            debug!("scheduler: quantum expired, preemption pending");
            self.must_preempt = true;
        }
    }

    /// Fold the finished turn's CPU usage into the priority estimate:
    /// prio' = (prio + t_exec/quantum) / 2.
    fn update_priority(&self, pcb: &mut Pcb) {
        let t_exec = (self.quantum_total - self.quantum_remaining).max(0);
        let used_frac = t_exec as f32 / self.quantum_total as f32;
        pcb.priority = (pcb.priority + used_frac) / 2.0;
        debug!("scheduler: pid {} priority now {:.3}", pcb.pid, pcb.priority);
    }

    /// Pick the process to run next. Called at the end of every trap,
    /// after the IRQ handler and the pending-I/O sweep.
    pub fn schedule(&mut self, table: &mut ProcessTable, metrics: &mut GlobalMetrics, now: Tick) {
        match self.kind {
            SchedulerKind::RoundRobin => self.schedule_rr(table, metrics, now),
            SchedulerKind::Priority => self.schedule_priority(table, metrics, now),
        }
    }

    fn record_preemption(table: &mut ProcessTable, metrics: &mut GlobalMetrics, slot: usize) {
        table.slot_mut(slot).metrics.preemptions += 1;
        metrics.preemptions += 1;
    }

    fn schedule_rr(&mut self, table: &mut ProcessTable, metrics: &mut GlobalMetrics, now: Tick) {
        let mut current = self.current;

        if self.must_preempt {
            if let Some(slot) = current {
                if table.slot(slot).state == ProcessState::Running {
                    debug!("scheduler: preempting pid {}", table.slot(slot).pid);
                    Self::record_preemption(table, metrics, slot);
                    table.slot_mut(slot).set_state(ProcessState::Ready, now);
                    self.ready.push_back(slot);
                    current = None;
                }
            }
        }
        self.must_preempt = false;

        // the running process may have blocked or died in this trap
        if let Some(slot) = current {
            if table.slot(slot).state != ProcessState::Running {
                current = None;
            }
        }

        if current.is_some() {
            self.current = current;
            return;
        }

        match self.ready.pop_front() {
            Some(slot) => {
                metrics.close_idle(now);
                table.slot_mut(slot).set_state(ProcessState::Running, now);
                self.current = Some(slot);
                self.quantum_remaining = self.quantum_total;
                debug!("scheduler: dispatched pid {} (rr)", table.slot(slot).pid);
            }
            None => {
                self.current = None;
                metrics.open_idle(now);
            }
        }
    }

    fn schedule_priority(
        &mut self,
        table: &mut ProcessTable,
        metrics: &mut GlobalMetrics,
        now: Tick,
    ) {
        if let Some(slot) = self.current {
            let state = table.slot(slot).state;
            if state != ProcessState::Running {
                // blocked or terminated on this trap; freed slots keep
                // whatever priority they had
                if matches!(state, ProcessState::Blocked | ProcessState::Terminated) {
                    self.update_priority(table.slot_mut(slot));
                }
                self.current = None;
            } else if self.must_preempt {
                self.update_priority(table.slot_mut(slot));
                Self::record_preemption(table, metrics, slot);
                table.slot_mut(slot).set_state(ProcessState::Ready, now);
                debug!("scheduler: preempting pid {}", table.slot(slot).pid);
                self.current = None;
            }
        }
        self.must_preempt = false;

        if self.current.is_some() {
            return;
        }

        // lowest priority value wins, lowest slot breaks ties
        let best = (0..table.capacity())
            .filter(|&i| table.slot(i).state == ProcessState::Ready)
            .min_by(|&a, &b| {
                table
                    .slot(a)
                    .priority
                    .total_cmp(&table.slot(b).priority)
                    .then(a.cmp(&b))
            });

        match best {
            Some(slot) => {
                metrics.close_idle(now);
                table.slot_mut(slot).set_state(ProcessState::Running, now);
                self.current = Some(slot);
                self.quantum_remaining = self.quantum_total;
                debug!(
                    "scheduler: dispatched pid {} (priority {:.3})",
                    table.slot(slot).pid,
                    table.slot(slot).priority
                );
            }
            None => {
                self.current = None;
                metrics.open_idle(now);
            }
        }
    }
}
