// kernel/src/metrics.rs
//
// System-wide accounting and the final report produced when init
// dies. Per-process numbers live in the PCBs; this module only
// aggregates them into a printable summary.

use std::fmt;

use crate::interrupts::{Irq, N_IRQ};
use crate::machine::{Tick, Word};
use crate::process::{Pid, ProcessState, ProcessTable};

#[derive(Debug, Clone, Default)]
pub struct GlobalMetrics {
    pub created: u32,
    pub preemptions: u32,
    pub irq_counts: [u32; N_IRQ],
    pub idle_total: Tick,
    idle_since: Option<Tick>,
    pub page_faults: u32,
    pub evictions: u32,
    pub transfer_cost: Tick,
}

impl GlobalMetrics {
    pub fn count_irq(&mut self, code: Word) {
        if let Ok(idx) = usize::try_from(code) {
            if idx < N_IRQ {
                self.irq_counts[idx] += 1;
            }
        }
    }

    /// The system just went idle; remember since when.
    pub fn open_idle(&mut self, now: Tick) {
        if self.idle_since.is_none() {
            self.idle_since = Some(now);
            log::debug!("no process ready, system idle");
        }
    }

    /// A process was dispatched (or the run ended); fold the open idle
    /// interval into the total.
    pub fn close_idle(&mut self, now: Tick) {
        if let Some(since) = self.idle_since.take() {
            self.idle_total += now - since;
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle_since.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub pid: Pid,
    pub turnaround: Tick,
    pub preemptions: u32,
    pub page_faults: u32,
    pub state_entries: [u32; ProcessState::COUNT],
    pub state_ticks: [Tick; ProcessState::COUNT],
    pub mean_response: f32,
}

/// Snapshot of every metric the simulation produced, built when init
/// is killed.
#[derive(Debug, Clone)]
pub struct SystemReport {
    pub total_time: Tick,
    pub idle_time: Tick,
    pub created: u32,
    pub preemptions: u32,
    pub irq_counts: [u32; N_IRQ],
    pub page_faults: u32,
    pub transfer_cost: Tick,
    pub processes: Vec<ProcessReport>,
}

impl SystemReport {
    /// The caller must have closed any open idle interval first.
    pub fn build(table: &ProcessTable, metrics: &GlobalMetrics, final_time: Tick) -> Self {
        let processes = table
            .slots()
            .iter()
            .filter(|p| p.pid != Pid::default())
            .map(|p| {
                let finished = p.metrics.finished_at.unwrap_or(final_time);
                let mut state_ticks = p.metrics.state_ticks;
                // charge the unfinished stay in the current state
                if p.is_live() {
                    let residue = final_time - p.metrics.last_change;
                    if residue > 0 {
                        state_ticks[p.state.index()] += residue;
                    }
                }
                let dispatches = p.metrics.state_entries[ProcessState::Running.index()];
                let mean_response = if dispatches > 0 {
                    p.metrics.ready_total as f32 / dispatches as f32
                } else {
                    0.0
                };
                ProcessReport {
                    pid: p.pid,
                    turnaround: (finished - p.metrics.created_at).max(0),
                    preemptions: p.metrics.preemptions,
                    page_faults: p.metrics.page_faults,
                    state_entries: p.metrics.state_entries,
                    state_ticks,
                    mean_response,
                }
            })
            .collect();

        Self {
            total_time: final_time,
            idle_time: metrics.idle_total,
            created: metrics.created,
            preemptions: metrics.preemptions,
            irq_counts: metrics.irq_counts,
            page_faults: metrics.page_faults,
            transfer_cost: metrics.transfer_cost,
            processes,
        }
    }
}

impl fmt::Display for SystemReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== final system report ===")?;
        writeln!(f, "processes created: {}", self.created)?;
        writeln!(f, "total time: {} ticks", self.total_time)?;
        let idle_pct = if self.total_time > 0 {
            100.0 * self.idle_time as f32 / self.total_time as f32
        } else {
            0.0
        };
        writeln!(f, "idle time: {} ticks ({:.1}%)", self.idle_time, idle_pct)?;
        writeln!(f, "total preemptions: {}", self.preemptions)?;
        writeln!(
            f,
            "page faults: {} (transfer cost {} ticks)",
            self.page_faults, self.transfer_cost
        )?;

        writeln!(f, "interrupts by type:")?;
        for (i, count) in self.irq_counts.iter().enumerate() {
            let label = Irq::from_code(i as Word).map_or("unknown", Irq::name);
            writeln!(f, "  irq {i:<2} ({label:<12}): {count}")?;
        }

        writeln!(f, "processes:")?;
        let state_names = [
            ProcessState::Free,
            ProcessState::Ready,
            ProcessState::Running,
            ProcessState::Blocked,
            ProcessState::Terminated,
        ];
        for p in &self.processes {
            writeln!(
                f,
                "  pid {:<3} turnaround={} preemptions={} faults={}",
                p.pid, p.turnaround, p.preemptions, p.page_faults
            )?;
            for state in state_names {
                writeln!(
                    f,
                    "    {:<10} entries={:<3} ticks={}",
                    state.name(),
                    p.state_entries[state.index()],
                    p.state_ticks[state.index()]
                )?;
            }
            writeln!(f, "    mean response: {:.2} ticks", p.mean_response)?;
        }
        write!(f, "=== end of report ===")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Pcb;

    #[test]
    fn idle_intervals_accumulate() {
        let mut m = GlobalMetrics::default();
        m.open_idle(10);
        m.open_idle(20); // already idle, keeps the earlier start
        m.close_idle(50);
        m.close_idle(60); // no open interval
        assert_eq!(m.idle_total, 40);
        assert!(!m.is_idle());
    }

    #[test]
    fn report_includes_live_state_residue() {
        let mut table = ProcessTable::new(2);
        let pid = table.alloc_pid();
        *table.slot_mut(0) = Pcb::new(pid, 0, 0, 0);
        table.slot_mut(0).set_state(ProcessState::Running, 100);

        let metrics = GlobalMetrics::default();
        let report = SystemReport::build(&table, &metrics, 400);
        let p = &report.processes[0];
        assert_eq!(p.state_ticks[ProcessState::Ready.index()], 100);
        assert_eq!(p.state_ticks[ProcessState::Running.index()], 300);
        assert_eq!(p.turnaround, 400);
        assert_eq!(p.mean_response, 100.0);
    }

    #[test]
    fn report_skips_never_used_slots() {
        let table = ProcessTable::new(4);
        let report = SystemReport::build(&table, &GlobalMetrics::default(), 100);
        assert!(report.processes.is_empty());
        assert!(format!("{report}").contains("final system report"));
    }
}
