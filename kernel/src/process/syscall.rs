// kernel/src/process/syscall.rs
//
// System calls. The id arrives in the caller's saved A register, the
// argument in X; the return value goes back in A. Every handler
// either completes immediately or leaves the caller BLOCKED for the
// pending-I/O sweep or a reap to finish.

use log::{debug, warn};

use crate::machine::layout::{KBD_DATA, KBD_STATUS, SCR_DATA, SCR_STATUS};
use crate::machine::{DeviceBus, Memory, ProgramLoader, Word};
use crate::os::Os;
use crate::process::{BlockReason, Pid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Read,
    Write,
    Spawn,
    Kill,
    Wait,
}

impl Syscall {
    pub fn from_code(code: Word) -> Option<Self> {
        match code {
            0 => Some(Self::Read),
            1 => Some(Self::Write),
            2 => Some(Self::Spawn),
            3 => Some(Self::Kill),
            4 => Some(Self::Wait),
            _ => None,
        }
    }

    pub fn code(self) -> Word {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::Spawn => 2,
            Self::Kill => 3,
            Self::Wait => 4,
        }
    }
}

impl<M: Memory, B: DeviceBus, L: ProgramLoader> Os<M, B, L> {
    pub(crate) fn handle_syscall(&mut self) {
        let Some(slot) = self.sched.current() else {
            log::error!("syscall with no running process");
            self.internal_error = true;
            return;
        };
        let id = self.table.slot(slot).ctx.a;
        debug!("pid {}: syscall {id}", self.table.slot(slot).pid);
        match Syscall::from_code(id) {
            Some(Syscall::Read) => self.sys_read(slot),
            Some(Syscall::Write) => self.sys_write(slot),
            Some(Syscall::Spawn) => self.sys_spawn(slot),
            Some(Syscall::Kill) => self.sys_kill(slot),
            Some(Syscall::Wait) => self.sys_wait(slot),
            None => {
                warn!(
                    "pid {}: unknown syscall {id}",
                    self.table.slot(slot).pid
                );
                self.fatal_terminate(slot);
            }
        }
    }

    /// READ: one word from the caller's keyboard, or block until the
    /// device has one.
    fn sys_read(&mut self, slot: usize) {
        let term = self.table.slot(slot).terminal;
        match self.bus.read(term + KBD_STATUS) {
            Err(e) => {
                warn!("keyboard status probe failed: {e}");
                self.fatal_terminate(slot);
            }
            Ok(0) => self.block_current(slot, BlockReason::IoRead(term)),
            Ok(_) => match self.bus.read(term + KBD_DATA) {
                Err(e) => {
                    warn!("keyboard read failed: {e}");
                    self.fatal_terminate(slot);
                }
                Ok(data) => self.table.slot_mut(slot).ctx.a = data,
            },
        }
    }

    /// WRITE: the word in X to the caller's screen, or block until
    /// the device accepts it.
    fn sys_write(&mut self, slot: usize) {
        let term = self.table.slot(slot).terminal;
        match self.bus.read(term + SCR_STATUS) {
            Err(e) => {
                warn!("screen status probe failed: {e}");
                self.fatal_terminate(slot);
            }
            Ok(0) => self.block_current(slot, BlockReason::IoWrite(term)),
            Ok(_) => {
                let datum = self.table.slot(slot).ctx.x;
                match self.bus.write(term + SCR_DATA, datum) {
                    Err(e) => {
                        warn!("screen write failed: {e}");
                        self.fatal_terminate(slot);
                    }
                    Ok(()) => self.table.slot_mut(slot).ctx.a = 0,
                }
            }
        }
    }

    /// SPAWN: X holds the virtual address of a NUL-terminated program
    /// name in the caller's memory. Returns the child pid, or -1 when
    /// no child could be made. An unreadable name is fatal for the
    /// caller.
    fn sys_spawn(&mut self, slot: usize) {
        let addr = self.table.slot(slot).ctx.x;
        if addr < 0 {
            warn!(
                "pid {}: spawn name at negative address {addr}",
                self.table.slot(slot).pid
            );
            self.fatal_terminate(slot);
            return;
        }
        let name = match self.copy_str_from_user(slot, addr as usize) {
            Ok(name) => name,
            Err(e) => {
                warn!(
                    "pid {}: unreadable spawn name: {e}",
                    self.table.slot(slot).pid
                );
                self.fatal_terminate(slot);
                return;
            }
        };
        match self.create_process(&name) {
            Ok(pid) => self.table.slot_mut(slot).ctx.a = pid.0,
            Err(e) => {
                warn!("spawn of `{name}` failed: {e}");
                self.table.slot_mut(slot).ctx.a = -1;
            }
        }
    }

    /// KILL: X names the victim, 0 meaning the caller itself. Killing
    /// init ends the run.
    fn sys_kill(&mut self, slot: usize) {
        let x = self.table.slot(slot).ctx.x;
        let target = if x == 0 {
            self.table.slot(slot).pid
        } else {
            Pid(x)
        };
        match self.table.find_live(target) {
            None => {
                warn!("kill of pid {target}: no such live process");
                self.table.slot_mut(slot).ctx.a = -1;
            }
            Some(victim) => {
                self.kill_process(victim);
                self.table.slot_mut(slot).ctx.a = 0;
                if target == Pid(1) {
                    self.finish_run();
                }
            }
        }
    }

    /// WAIT: block until the process named in X terminates, reaping
    /// it. Returns -1 for the caller itself, non-positive pids, and
    /// pids no slot knows about.
    fn sys_wait(&mut self, slot: usize) {
        let x = self.table.slot(slot).ctx.x;
        let caller = self.table.slot(slot).pid;
        if x <= 0 || Pid(x) == caller {
            warn!("pid {caller}: invalid wait target {x}");
            self.table.slot_mut(slot).ctx.a = -1;
            return;
        }
        let target = Pid(x);
        match self.table.find_by_pid(target) {
            None => {
                warn!("pid {caller}: wait for unknown pid {target}");
                self.table.slot_mut(slot).ctx.a = -1;
            }
            Some(tslot) if self.table.slot(tslot).state == crate::process::ProcessState::Terminated => {
                debug!("pid {caller}: pid {target} already terminated, collecting");
                self.reap(tslot);
                self.table.slot_mut(slot).ctx.a = 0;
            }
            Some(_) => self.block_current(slot, BlockReason::WaitPid(target)),
        }
    }
}
