// kernel/src/machine/layout.rs
//
// Fixed addresses shared between the kernel and the simulated CPU.
//
// Primary memory is split in two: the pageable area [0, PRIMARY_MEM_SIZE)
// owned by the frame manager, and a small kernel-reserved area above it
// holding the CPU register cells and the trap dispatch stub. Keeping the
// cells out of the pageable range means a page-in can never clobber them.

use crate::config::PRIMARY_MEM_SIZE;

// CPU register cells. The trap stub spills the live registers here on
// every interrupt; the kernel reads them into the PCB and writes the
// chosen process's context back before returning.
pub const REG_A: usize = PRIMARY_MEM_SIZE;
pub const REG_X: usize = PRIMARY_MEM_SIZE + 1;
pub const REG_PC: usize = PRIMARY_MEM_SIZE + 2;
pub const REG_ERR: usize = PRIMARY_MEM_SIZE + 3;
/// On a page-missing CPU error, the faulting virtual address.
pub const REG_FAULT_ADDR: usize = PRIMARY_MEM_SIZE + 4;

/// Where the CPU jumps on an interrupt; the trap stub must be loaded
/// exactly here.
pub const TRAP_VECTOR: usize = PRIMARY_MEM_SIZE + 8;
/// Room reserved for the stub.
pub const TRAP_STUB_MAX: usize = 12;

/// Total words of primary memory the kernel expects the machine to
/// provide (pageable area plus reserved area).
pub const MEM_TOTAL: usize = TRAP_VECTOR + TRAP_STUB_MAX;

// Device bus layout. Four terminals, four registers each, followed by
// the clock.
pub const NUM_TERMINALS: usize = 4;
pub const TERM_STRIDE: usize = 4;

/// Offsets within one terminal's register block.
pub const KBD_DATA: usize = 0;
pub const KBD_STATUS: usize = 1;
pub const SCR_DATA: usize = 2;
pub const SCR_STATUS: usize = 3;

pub const fn terminal_base(terminal: usize) -> usize {
    terminal * TERM_STRIDE
}

/// Monotonic count of executed instructions; the kernel's clock.
pub const CLOCK_INSTR: usize = NUM_TERMINALS * TERM_STRIDE;
/// Countdown until the next clock interrupt; writing reloads it.
pub const CLOCK_TIMER: usize = CLOCK_INSTR + 1;
/// Pending-interrupt flag; cleared by writing zero.
pub const CLOCK_IRQ_FLAG: usize = CLOCK_INSTR + 2;

/// Image installed at the trap vector during boot.
pub const TRAP_STUB_PROGRAM: &str = "trap_stub";
/// First user program, spawned as PID 1 during boot.
pub const INIT_PROGRAM: &str = "init";
