//! Embedder callback contracts. Compiled code reaches these through thin
//! thunks bound at JIT construction; the run loop calls them directly.
//!
//! The interpreter-fallback and supervisor-call hooks receive the guest
//! register file so the embedder can observe and update architectural state
//! without holding a reference to the `Jit` itself.

use kestrel_types::Exception;

use crate::jit_state::{A32RegisterFile, Chip8RegisterFile};

pub mod chip8 {
    use super::*;

    pub trait UserCallbacks {
        /// Fetches the instruction word at `vaddr`. Reads are aligned to
        /// the instruction width.
        fn memory_read_code(&mut self, vaddr: u32) -> u32 {
            u32::from(self.memory_read_16(vaddr))
        }

        fn memory_read_8(&mut self, vaddr: u32) -> u8;
        fn memory_read_16(&mut self, vaddr: u32) -> u16;
        fn memory_write_8(&mut self, vaddr: u32, value: u8);
        fn memory_write_16(&mut self, vaddr: u32, value: u16);

        /// Hint that reads from `vaddr` are stable over time. A conservative
        /// implementation returns false.
        fn is_read_only_memory(&mut self, _vaddr: u32) -> bool {
            false
        }

        /// Must execute exactly `num_instructions` guest instructions
        /// starting from `pc`, updating `regs` (including the program
        /// counter) accordingly.
        fn interpreter_fallback(
            &mut self,
            pc: u32,
            num_instructions: usize,
            regs: &mut Chip8RegisterFile,
        );

        /// Invoked on supervisor-call bridges; `swi` carries the guest
        /// instruction word.
        fn call_svc(&mut self, swi: u32, regs: &mut Chip8RegisterFile);

        fn exception_raised(&mut self, pc: u32, exception: Exception);

        fn add_ticks(&mut self, ticks: u64);
        fn get_ticks_remaining(&mut self) -> u64;
    }
}

pub mod a32 {
    use super::*;

    pub trait UserCallbacks {
        /// Fetches the instruction halfword at `vaddr` (the frontend
        /// translates Thumb state only).
        fn memory_read_code(&mut self, vaddr: u32) -> u32 {
            u32::from(self.memory_read_16(vaddr))
        }

        fn memory_read_8(&mut self, vaddr: u32) -> u8;
        fn memory_read_16(&mut self, vaddr: u32) -> u16;
        fn memory_read_32(&mut self, vaddr: u32) -> u32;
        fn memory_read_64(&mut self, vaddr: u32) -> u64;
        fn memory_write_8(&mut self, vaddr: u32, value: u8);
        fn memory_write_16(&mut self, vaddr: u32, value: u16);
        fn memory_write_32(&mut self, vaddr: u32, value: u32);
        fn memory_write_64(&mut self, vaddr: u32, value: u64);

        fn is_read_only_memory(&mut self, _vaddr: u32) -> bool {
            false
        }

        fn interpreter_fallback(
            &mut self,
            pc: u32,
            num_instructions: usize,
            regs: &mut A32RegisterFile,
        );

        fn call_svc(&mut self, swi: u32, regs: &mut A32RegisterFile);

        fn exception_raised(&mut self, pc: u32, exception: Exception);

        fn add_ticks(&mut self, ticks: u64);
        fn get_ticks_remaining(&mut self) -> u64;
    }
}
