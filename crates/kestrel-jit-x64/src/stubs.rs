//! Pre-generated code at the start of the region: the run-code entry and
//! exit sequences, and the slow-path memory accessors that preserve every
//! live register around a callback.

use crate::asm::{Assembler, Gpr, Mem};
use crate::code_block::CodeBlock;
use crate::emit::{HostCallbacks, StateOffsets};

/// Offsets of the pre-generated stubs within the code region.
#[derive(Clone, Copy, Default)]
pub struct Stubs {
    pub run_code: usize,
    /// Restores the host MXCSR, then unwinds back to the run loop.
    pub return_from_run_code: usize,
    /// Epilogue only; used when the MXCSR was already switched out.
    pub return_no_mxcsr: usize,
    pub read_memory_8: usize,
    pub read_memory_16: usize,
    pub read_memory_32: usize,
    pub read_memory_64: usize,
    pub write_memory_8: usize,
    pub write_memory_16: usize,
    pub write_memory_32: usize,
    pub write_memory_64: usize,
}

/// Which access widths the guest ISA uses.
#[derive(Clone, Copy)]
pub struct AccessorWidths {
    pub w8: bool,
    pub w16: bool,
    pub w32: bool,
    pub w64: bool,
}

const SAVED_BESIDES_RAX: [Gpr; 8] = [
    Gpr::Rcx,
    Gpr::Rdx,
    Gpr::Rsi,
    Gpr::Rdi,
    Gpr::R8,
    Gpr::R9,
    Gpr::R10,
    Gpr::R11,
];

pub fn generate(
    code: &mut CodeBlock,
    offsets: &StateOffsets,
    hostcb: &HostCallbacks,
    widths: AccessorWidths,
) -> Stubs {
    let mut stubs = Stubs::default();
    let start = code.cursor();
    let end;
    {
        let buf = code.buf_mut();
        let mut asm = Assembler::new(buf, start);

        // fn(entrypoint: rdi, jit_state: rsi)
        asm.align(16);
        stubs.run_code = asm.pos();
        asm.push_r64(Gpr::Rbx);
        asm.push_r64(Gpr::Rbp);
        asm.push_r64(Gpr::R12);
        asm.push_r64(Gpr::R13);
        asm.push_r64(Gpr::R14);
        asm.push_r64(Gpr::R15);
        asm.sub_rsp_imm32(8);
        asm.mov_r64_r64(Gpr::R15, Gpr::Rsi);
        asm.stmxcsr_m(Mem::base_disp(Gpr::R15, offsets.save_host_mxcsr));
        asm.ldmxcsr_m(Mem::base_disp(Gpr::R15, offsets.guest_mxcsr));
        asm.jmp_r64(Gpr::Rdi);

        asm.align(16);
        stubs.return_from_run_code = asm.pos();
        asm.ldmxcsr_m(Mem::base_disp(Gpr::R15, offsets.save_host_mxcsr));
        stubs.return_no_mxcsr = asm.pos();
        asm.add_rsp_imm32(8);
        asm.pop_r64(Gpr::R15);
        asm.pop_r64(Gpr::R14);
        asm.pop_r64(Gpr::R13);
        asm.pop_r64(Gpr::R12);
        asm.pop_r64(Gpr::Rbp);
        asm.pop_r64(Gpr::Rbx);
        asm.ret();

        let mut gen_read = |asm: &mut Assembler, thunk: u64| -> usize {
            asm.align(16);
            let entry = asm.pos();
            for reg in SAVED_BESIDES_RAX {
                asm.push_r64(reg);
            }
            asm.sub_rsp_imm32(8);
            asm.mov_r64_imm64(Gpr::Rdi, hostcb.ctx);
            // The guest address is already in rsi.
            asm.mov_r64_imm64(Gpr::Rax, thunk);
            asm.call_r64(Gpr::Rax);
            asm.add_rsp_imm32(8);
            for reg in SAVED_BESIDES_RAX.iter().rev() {
                asm.pop_r64(*reg);
            }
            asm.ret();
            entry
        };

        if widths.w8 {
            stubs.read_memory_8 = gen_read(&mut asm, hostcb.read_memory_8);
        }
        if widths.w16 {
            stubs.read_memory_16 = gen_read(&mut asm, hostcb.read_memory_16);
        }
        if widths.w32 {
            stubs.read_memory_32 = gen_read(&mut asm, hostcb.read_memory_32);
        }
        if widths.w64 {
            stubs.read_memory_64 = gen_read(&mut asm, hostcb.read_memory_64);
        }

        let mut gen_write = |asm: &mut Assembler, thunk: u64| -> usize {
            asm.align(16);
            let entry = asm.pos();
            asm.push_r64(Gpr::Rax);
            for reg in SAVED_BESIDES_RAX {
                asm.push_r64(reg);
            }
            asm.mov_r64_imm64(Gpr::Rdi, hostcb.ctx);
            // Address in rsi, value in rdx.
            asm.mov_r64_imm64(Gpr::Rax, thunk);
            asm.call_r64(Gpr::Rax);
            for reg in SAVED_BESIDES_RAX.iter().rev() {
                asm.pop_r64(*reg);
            }
            asm.pop_r64(Gpr::Rax);
            asm.ret();
            entry
        };

        if widths.w8 {
            stubs.write_memory_8 = gen_write(&mut asm, hostcb.write_memory_8);
        }
        if widths.w16 {
            stubs.write_memory_16 = gen_write(&mut asm, hostcb.write_memory_16);
        }
        if widths.w32 {
            stubs.write_memory_32 = gen_write(&mut asm, hostcb.write_memory_32);
        }
        if widths.w64 {
            stubs.write_memory_64 = gen_write(&mut asm, hostcb.write_memory_64);
        }

        end = asm.finish();
    }
    code.set_cursor(end);
    stubs
}
