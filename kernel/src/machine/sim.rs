// kernel/src/machine/sim.rs
//
// Reference implementations of the machine contracts: a flat word
// array, a device bus with four terminals and the clock, and an
// in-memory program store. The driver binary and the integration
// tests assemble these into a machine; nothing in the kernel core
// depends on them.

use std::collections::{HashMap, VecDeque};

use super::layout::{
    CLOCK_INSTR, CLOCK_IRQ_FLAG, CLOCK_TIMER, KBD_DATA, KBD_STATUS, NUM_TERMINALS, SCR_DATA,
    SCR_STATUS, TERM_STRIDE,
};
use super::{DeviceBus, MachineError, Memory, Program, ProgramLoader, Word};

/// Primary memory as a zero-initialised word array.
#[derive(Debug, Clone)]
pub struct ArrayMemory {
    words: Vec<Word>,
}

impl ArrayMemory {
    pub fn new(size: usize) -> Self {
        Self {
            words: vec![0; size],
        }
    }
}

impl Memory for ArrayMemory {
    fn read(&self, addr: usize) -> Result<Word, MachineError> {
        self.words
            .get(addr)
            .copied()
            .ok_or(MachineError::BadAddress(addr))
    }

    fn write(&mut self, addr: usize, value: Word) -> Result<(), MachineError> {
        match self.words.get_mut(addr) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(MachineError::BadAddress(addr)),
        }
    }

    fn size(&self) -> usize {
        self.words.len()
    }
}

/// One simulated terminal: a keyboard input queue and a screen that
/// records everything written to it. The keyboard is ready whenever
/// input is queued; the screen readiness is a plain flag the harness
/// may toggle to exercise blocking writes.
#[derive(Debug, Clone, Default)]
pub struct Terminal {
    pub input: VecDeque<Word>,
    pub output: Vec<Word>,
    pub screen_ready: bool,
}

/// Device bus: `NUM_TERMINALS` terminals followed by the clock
/// registers. The instruction counter is advanced by whoever drives
/// the simulation, not by the bus itself.
#[derive(Debug, Clone)]
pub struct MachineBus {
    terminals: Vec<Terminal>,
    pub instr_count: Word,
    pub timer: Word,
    pub irq_flag: Word,
}

impl Default for MachineBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MachineBus {
    pub fn new() -> Self {
        Self {
            terminals: (0..NUM_TERMINALS)
                .map(|_| Terminal {
                    screen_ready: true,
                    ..Terminal::default()
                })
                .collect(),
            instr_count: 0,
            timer: 0,
            irq_flag: 0,
        }
    }

    /// Account `n` executed instructions against the clock.
    pub fn advance(&mut self, n: Word) {
        self.instr_count += n;
        self.timer -= n;
    }

    pub fn terminal(&self, t: usize) -> &Terminal {
        &self.terminals[t]
    }

    pub fn terminal_mut(&mut self, t: usize) -> &mut Terminal {
        &mut self.terminals[t]
    }
}

impl DeviceBus for MachineBus {
    fn read(&mut self, reg: usize) -> Result<Word, MachineError> {
        if reg < NUM_TERMINALS * TERM_STRIDE {
            let term = &mut self.terminals[reg / TERM_STRIDE];
            return match reg % TERM_STRIDE {
                KBD_DATA => term.input.pop_front().ok_or(MachineError::DeviceFailure(reg)),
                KBD_STATUS => Ok(Word::from(!term.input.is_empty())),
                SCR_STATUS => Ok(Word::from(term.screen_ready)),
                _ => Err(MachineError::BadDevice(reg)),
            };
        }
        match reg {
            CLOCK_INSTR => Ok(self.instr_count),
            CLOCK_TIMER => Ok(self.timer),
            CLOCK_IRQ_FLAG => Ok(self.irq_flag),
            _ => Err(MachineError::BadDevice(reg)),
        }
    }

    fn write(&mut self, reg: usize, value: Word) -> Result<(), MachineError> {
        if reg < NUM_TERMINALS * TERM_STRIDE {
            let term = &mut self.terminals[reg / TERM_STRIDE];
            return match reg % TERM_STRIDE {
                SCR_DATA => {
                    if term.screen_ready {
                        term.output.push(value);
                        Ok(())
                    } else {
                        Err(MachineError::DeviceFailure(reg))
                    }
                }
                _ => Err(MachineError::BadDevice(reg)),
            };
        }
        match reg {
            CLOCK_TIMER => {
                self.timer = value;
                Ok(())
            }
            CLOCK_IRQ_FLAG => {
                self.irq_flag = value;
                Ok(())
            }
            _ => Err(MachineError::BadDevice(reg)),
        }
    }
}

/// Program images registered by name.
#[derive(Debug, Clone, Default)]
pub struct ProgramStore {
    programs: HashMap<String, (usize, Vec<Word>)>,
}

impl ProgramStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, start: usize, words: Vec<Word>) {
        self.programs.insert(name.to_owned(), (start, words));
    }
}

impl ProgramLoader for ProgramStore {
    fn load(&mut self, name: &str) -> Result<Program, MachineError> {
        let (start, words) = self
            .programs
            .get(name)
            .ok_or_else(|| MachineError::ProgramNotFound(name.to_owned()))?;
        Ok(Program {
            name: name.to_owned(),
            start: *start,
            words: words.clone(),
        })
    }
}
