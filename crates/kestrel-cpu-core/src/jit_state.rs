//! The mutable per-context state block shared between the run loop and
//! compiled code. Compiled code addresses these structures relative to a
//! pinned base register, so the layouts are `#[repr(C)]` and field offsets
//! are part of the backend contract.

use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicU8, Ordering};

use kestrel_types::{a32, chip8};

pub const SPILL_COUNT: usize = 64;

/// Return-stack-buffer capacity. Must be a power of two so the head index
/// can be masked.
pub const RSB_SIZE: usize = 16;
pub const RSB_PTR_MASK: u32 = RSB_SIZE as u32 - 1;

/// Exclusive-monitor reservations cover an aligned 8-byte granule.
pub const RESERVATION_GRANULE_MASK: u32 = 0xFFFF_FFF8;

/// Guest MXCSR: round-to-nearest, all exceptions masked.
pub const DEFAULT_GUEST_MXCSR: u32 = 0x0000_1F80;

/// State shared by every guest ISA: spill slots, cycle accounting, the halt
/// flag, the exclusive monitor and the return-stack buffer.
#[repr(C)]
pub struct JitStateCommon {
    pub guest_mxcsr: u32,
    pub save_host_mxcsr: u32,
    pub cycles_to_run: i64,
    pub cycles_remaining: i64,
    /// Written (possibly cross-thread) to request a cooperative exit at the
    /// next halt check. Compiled code reads it as a plain byte.
    pub halt_requested: AtomicU8,
    pub exclusive_state: u8,
    pub exclusive_address: u32,
    pub rsb_ptr: u32,
    pub rsb_location_descriptors: [u64; RSB_SIZE],
    pub rsb_codeptrs: [u64; RSB_SIZE],
    pub spill: [u64; SPILL_COUNT],
}

impl Default for JitStateCommon {
    fn default() -> JitStateCommon {
        let mut common = JitStateCommon {
            guest_mxcsr: DEFAULT_GUEST_MXCSR,
            save_host_mxcsr: 0,
            cycles_to_run: 0,
            cycles_remaining: 0,
            halt_requested: AtomicU8::new(0),
            exclusive_state: 0,
            exclusive_address: 0,
            rsb_ptr: 0,
            rsb_location_descriptors: [0; RSB_SIZE],
            rsb_codeptrs: [0; RSB_SIZE],
            spill: [0; SPILL_COUNT],
        };
        common.reset_rsb();
        common
    }
}

impl JitStateCommon {
    /// Empties the return-stack buffer. The descriptor slots are poisoned
    /// with a hash no real location produces.
    pub fn reset_rsb(&mut self) {
        self.rsb_ptr = 0;
        self.rsb_location_descriptors = [u64::MAX; RSB_SIZE];
        self.rsb_codeptrs = [0; RSB_SIZE];
    }

    pub fn halt_requested(&self) -> bool {
        self.halt_requested.load(Ordering::Acquire) != 0
    }

    pub fn set_halt_requested(&self, halt: bool) {
        self.halt_requested.store(halt as u8, Ordering::Release);
    }

    /// Arms the exclusive monitor for the granule containing `vaddr`.
    pub fn set_reservation(&mut self, vaddr: u32) {
        self.exclusive_state = 1;
        self.exclusive_address = vaddr & RESERVATION_GRANULE_MASK;
    }

    pub fn clear_reservation(&mut self) {
        self.exclusive_state = 0;
    }

    /// Whether an exclusive write to `vaddr` would succeed: the monitor is
    /// armed and the stored granule matches the write granule. A successful
    /// write consumes the reservation.
    pub fn reservation_covers(&self, vaddr: u32) -> bool {
        self.exclusive_state != 0 && self.exclusive_address == (vaddr & RESERVATION_GRANULE_MASK)
    }
}

/// The CHIP-8 register file: `V0..VF`, `I`, `DT`, `ST`, `SP` and `PC`.
#[repr(transparent)]
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chip8RegisterFile(pub [u32; chip8::NUM_REGS]);

impl Chip8RegisterFile {
    pub fn pc(&self) -> u32 {
        self.0[chip8::Reg::PC.index()]
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.0[chip8::Reg::PC.index()] = pc;
    }
}

impl Index<chip8::Reg> for Chip8RegisterFile {
    type Output = u32;

    fn index(&self, reg: chip8::Reg) -> &u32 {
        &self.0[reg.index()]
    }
}

impl IndexMut<chip8::Reg> for Chip8RegisterFile {
    fn index_mut(&mut self, reg: chip8::Reg) -> &mut u32 {
        &mut self.0[reg.index()]
    }
}

#[repr(C)]
#[derive(Default)]
pub struct Chip8JitState {
    pub regs: Chip8RegisterFile,
    pub common: JitStateCommon,
}

/// The A32 register file plus CPSR.
#[repr(C)]
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct A32RegisterFile {
    pub r: [u32; a32::NUM_REGS],
    pub cpsr: u32,
}

impl A32RegisterFile {
    pub fn pc(&self) -> u32 {
        self.r[a32::Reg::PC.index()]
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.r[a32::Reg::PC.index()] = pc;
    }

    pub fn thumb(&self) -> bool {
        self.cpsr & a32::CPSR_T != 0
    }
}

impl Index<a32::Reg> for A32RegisterFile {
    type Output = u32;

    fn index(&self, reg: a32::Reg) -> &u32 {
        &self.r[reg.index()]
    }
}

impl IndexMut<a32::Reg> for A32RegisterFile {
    fn index_mut(&mut self, reg: a32::Reg) -> &mut u32 {
        &mut self.r[reg.index()]
    }
}

#[repr(C)]
#[derive(Default)]
pub struct A32JitState {
    pub regs: A32RegisterFile,
    pub common: JitStateCommon,
}
