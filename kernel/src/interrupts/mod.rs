// kernel/src/interrupts/mod.rs
//
// Kernel entry. The CPU's trap stub spills the live registers into
// the register cells and calls `on_trap` with the IRQ identifier; the
// returned decision tells the stub whether to return-from-interrupt
// into the dispatched process or halt until the next hardware
// interrupt.

use log::{debug, error, info, warn};

use crate::config::CLOCK_INTERVAL;
use crate::machine::layout::{
    CLOCK_IRQ_FLAG, CLOCK_TIMER, INIT_PROGRAM, REG_A, REG_ERR, REG_FAULT_ADDR, REG_PC, REG_X,
    TRAP_STUB_PROGRAM, TRAP_VECTOR,
};
use crate::machine::{cpu_err, DeviceBus, MachineError, Memory, ProgramLoader, Word};
use crate::memory::{page_of, FaultError};
use crate::os::Os;

/// Interrupt requests the CPU can raise. The device IRQs exist on the
/// wire and are counted, but this kernel polls devices instead of
/// serving them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Irq {
    Reset,
    CpuError,
    Syscall,
    Clock,
    Keyboard,
    Screen,
}

pub const N_IRQ: usize = 6;

impl Irq {
    pub fn from_code(code: Word) -> Option<Self> {
        match code {
            0 => Some(Self::Reset),
            1 => Some(Self::CpuError),
            2 => Some(Self::Syscall),
            3 => Some(Self::Clock),
            4 => Some(Self::Keyboard),
            5 => Some(Self::Screen),
            _ => None,
        }
    }

    pub fn code(self) -> Word {
        match self {
            Self::Reset => 0,
            Self::CpuError => 1,
            Self::Syscall => 2,
            Self::Clock => 3,
            Self::Keyboard => 4,
            Self::Screen => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::CpuError => "cpu error",
            Self::Syscall => "syscall",
            Self::Clock => "clock",
            Self::Keyboard => "keyboard",
            Self::Screen => "screen",
        }
    }
}

/// What the trap stub should do when `on_trap` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Return from the interrupt into the dispatched process.
    Resume,
    /// No runnable process (or the kernel failed); halt until the
    /// next hardware interrupt.
    Halt,
}

impl ResumeDecision {
    /// Wire encoding handed back to the stub.
    pub fn code(self) -> Word {
        match self {
            Self::Resume => 0,
            Self::Halt => 1,
        }
    }
}

impl<M: Memory, B: DeviceBus, L: ProgramLoader> Os<M, B, L> {
    /// Single kernel entry point. Saves the interrupted context, runs
    /// the IRQ-specific handler, resolves pending I/O, schedules, and
    /// restores the chosen context.
    pub fn on_trap(&mut self, irq_code: Word) -> ResumeDecision {
        let irq = Irq::from_code(irq_code);
        debug!(
            "irq {irq_code} ({})",
            irq.map_or("unknown", Irq::name)
        );
        self.metrics.count_irq(irq_code);

        self.save_cpu_state();
        match irq {
            Some(Irq::Reset) => self.handle_reset(),
            Some(Irq::Syscall) => self.handle_syscall(),
            Some(Irq::CpuError) => self.handle_cpu_error(),
            Some(Irq::Clock) => self.handle_clock(),
            _ => self.handle_unknown(irq_code),
        }
        self.sweep_pending_io();

        let now = self.now();
        self.sched.schedule(&mut self.table, &mut self.metrics, now);

        self.dispatch()
    }

    /// Copy the register cells into the interrupted process's PCB.
    fn save_cpu_state(&mut self) {
        let Some(slot) = self.sched.current() else {
            return;
        };
        let regs = (|| -> Result<_, MachineError> {
            Ok((
                self.mem.read(REG_A)?,
                self.mem.read(REG_PC)?,
                self.mem.read(REG_ERR)?,
                self.mem.read(REG_X)?,
            ))
        })();
        match regs {
            Ok((a, pc, err, x)) => {
                let ctx = &mut self.table.slot_mut(slot).ctx;
                ctx.a = a;
                ctx.pc = pc;
                ctx.err = err;
                ctx.x = x;
            }
            Err(e) => {
                error!("failed to save cpu state: {e}");
                self.internal_error = true;
            }
        }
    }

    /// Write the chosen process's context back to the register cells
    /// and decide what the stub does next.
    fn dispatch(&mut self) -> ResumeDecision {
        if self.internal_error || self.shutdown {
            return ResumeDecision::Halt;
        }
        let Some(slot) = self.sched.current() else {
            debug!("halting until next interrupt");
            return ResumeDecision::Halt;
        };

        let ctx = self.table.slot(slot).ctx;
        let written = self
            .mem
            .write(REG_A, ctx.a)
            .and_then(|()| self.mem.write(REG_PC, ctx.pc))
            .and_then(|()| self.mem.write(REG_ERR, ctx.err))
            .and_then(|()| self.mem.write(REG_X, ctx.x));
        if let Err(e) = written {
            error!("failed to restore cpu state: {e}");
            self.internal_error = true;
            return ResumeDecision::Halt;
        }

        ResumeDecision::Resume
    }

    // -- per-IRQ handlers --------------------------------------------

    /// One-shot boot: install the trap stub, arm the clock, create
    /// PID 1.
    fn handle_reset(&mut self) {
        if let Err(e) = self.install_trap_stub() {
            error!("trap stub installation failed: {e}");
            self.internal_error = true;
            return;
        }
        if let Err(e) = self.bus.write(CLOCK_TIMER, CLOCK_INTERVAL) {
            error!("failed to arm clock timer: {e}");
            self.internal_error = true;
            return;
        }
        match self.create_process(INIT_PROGRAM) {
            Ok(pid) => info!("boot complete, init is pid {pid}"),
            Err(e) => {
                error!("failed to create init: {e}");
                self.internal_error = true;
            }
        }
    }

    fn install_trap_stub(&mut self) -> Result<(), MachineError> {
        let stub = self.loader.load(TRAP_STUB_PROGRAM)?;
        if stub.start != TRAP_VECTOR {
            error!(
                "trap stub linked for {} but the vector is {TRAP_VECTOR}",
                stub.start
            );
            self.internal_error = true;
            return Ok(());
        }
        for (i, &word) in stub.words.iter().enumerate() {
            self.mem.write(stub.start + i, word)?;
        }
        Ok(())
    }

    /// Clock tick: clear the device's pending flag, re-arm the timer,
    /// burn quantum. The reload absorbs any page-transfer debt accrued
    /// since the last tick, so transfer time is charged to the
    /// returning CPU without touching a live countdown.
    fn handle_clock(&mut self) {
        let reload = (CLOCK_INTERVAL - self.transfer_debt).max(1);
        self.transfer_debt = 0;
        let rearmed = self
            .bus
            .write(CLOCK_IRQ_FLAG, 0)
            .and_then(|()| self.bus.write(CLOCK_TIMER, reload));
        if let Err(e) = rearmed {
            error!("failed to re-arm clock: {e}");
            self.internal_error = true;
        }
        self.sched.clock_tick();
    }

    /// CPU-reported execution error. A page-missing error goes to the
    /// fault handler and usually resumes the process transparently;
    /// anything else is fatal for the process.
    fn handle_cpu_error(&mut self) {
        let Some(slot) = self.sched.current() else {
            error!("cpu error with no running process");
            self.internal_error = true;
            return;
        };
        let err = self.table.slot(slot).ctx.err;
        let pid = self.table.slot(slot).pid;

        if err != cpu_err::PAGE_MISSING {
            warn!("pid {pid}: cpu error `{}`", cpu_err::name(err));
            self.fatal_terminate(slot);
            return;
        }

        let fault_addr = match self.mem.read(REG_FAULT_ADDR) {
            Ok(addr) => addr,
            Err(e) => {
                error!("failed to read fault address: {e}");
                self.internal_error = true;
                return;
            }
        };
        if fault_addr < 0 {
            warn!("pid {pid}: fault at negative address {fault_addr}");
            self.fatal_terminate(slot);
            return;
        }

        match self.handle_page_fault(slot, page_of(fault_addr as usize)) {
            Ok(()) => {
                // retry the same instruction with the page resident
                self.table.slot_mut(slot).ctx.err = cpu_err::NONE;
            }
            Err(FaultError::Machine(e)) => {
                error!("page fault service failed: {e}");
                self.internal_error = true;
            }
            Err(e) => {
                warn!("pid {pid}: unserviceable page fault: {e}");
                self.fatal_terminate(slot);
            }
        }
    }

    fn handle_unknown(&mut self, irq_code: Word) {
        error!("cannot handle irq {irq_code}");
        self.internal_error = true;
    }
}
