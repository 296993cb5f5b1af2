//! A32 backend: state layout, Thumb/ARM location packing, CPSR-based
//! condition evaluation, and the architectural opcode emitters.

use std::mem::offset_of;

use kestrel_cpu_core::jit_state::{A32JitState, A32RegisterFile, JitStateCommon, RESERVATION_GRANULE_MASK};
use kestrel_ir::{self as ir, InstIndex, Opcode, Value};
use kestrel_types::a32::{CPSR_C, CPSR_N, CPSR_T, CPSR_V, CPSR_Z};
use kestrel_types::Cond;

use crate::asm::{Assembler, Cc, Gpr, Label, Mem};
use crate::emit::{EmitCtx, EmitX64, IsaEmit, StateOffsets};
use crate::emit_memory::{emit_read_memory, emit_write_memory};
use crate::reg_alloc::{argument_info, CallArg};

pub type A32EmitX64 = EmitX64<A32Isa>;

const COMMON: usize = offset_of!(A32JitState, common);
const REGS: usize = offset_of!(A32JitState, regs);

static OFFSETS: StateOffsets = StateOffsets {
    regs: (REGS + offset_of!(A32RegisterFile, r)) as i32,
    pc: (REGS + offset_of!(A32RegisterFile, r) + 15 * 4) as i32,
    cpsr: Some((REGS + offset_of!(A32RegisterFile, cpsr)) as i32),
    guest_mxcsr: (COMMON + offset_of!(JitStateCommon, guest_mxcsr)) as i32,
    save_host_mxcsr: (COMMON + offset_of!(JitStateCommon, save_host_mxcsr)) as i32,
    cycles_remaining: (COMMON + offset_of!(JitStateCommon, cycles_remaining)) as i32,
    halt: (COMMON + offset_of!(JitStateCommon, halt_requested)) as i32,
    exclusive_state: (COMMON + offset_of!(JitStateCommon, exclusive_state)) as i32,
    exclusive_address: (COMMON + offset_of!(JitStateCommon, exclusive_address)) as i32,
    rsb_ptr: (COMMON + offset_of!(JitStateCommon, rsb_ptr)) as i32,
    rsb_location_descriptors: (COMMON + offset_of!(JitStateCommon, rsb_location_descriptors))
        as i32,
    rsb_codeptrs: (COMMON + offset_of!(JitStateCommon, rsb_codeptrs)) as i32,
    spill: (COMMON + offset_of!(JitStateCommon, spill)) as i32,
};

fn cpsr_mem(offsets: &StateOffsets) -> Mem {
    Mem::base_disp(Gpr::R15, offsets.cpsr.expect("A32 state has a CPSR"))
}

pub struct A32Isa;

impl IsaEmit for A32Isa {
    const NAME: &'static str = "a32";

    fn offsets() -> &'static StateOffsets {
        &OFFSETS
    }

    fn location_pc(location: ir::LocationDescriptor) -> u32 {
        (location.value() >> 32) as u32
    }

    fn commit_location(
        asm: &mut Assembler,
        offsets: &StateOffsets,
        next: ir::LocationDescriptor,
        initial: ir::LocationDescriptor,
    ) {
        asm.mov_m32_imm32(
            Mem::base_disp(Gpr::R15, offsets.pc),
            Self::location_pc(next),
        );
        // Interworking transfers flip the execution state bit.
        let next_thumb = next.value() & 1 != 0;
        let initial_thumb = initial.value() & 1 != 0;
        if next_thumb != initial_thumb {
            if next_thumb {
                asm.or_m32_imm32(cpsr_mem(offsets), CPSR_T);
            } else {
                asm.and_m32_imm32(cpsr_mem(offsets), !CPSR_T);
            }
        }
    }

    fn emit_rsb_location_hash(asm: &mut Assembler, offsets: &StateOffsets) {
        // Must match the frontend: hash = pc << 32 | thumb.
        asm.mov_r32_m(Gpr::Rax, Mem::base_disp(Gpr::R15, offsets.pc));
        asm.shl_r64_imm8(Gpr::Rax, 32);
        asm.mov_r32_m(Gpr::Rcx, cpsr_mem(offsets));
        asm.and_r32_imm32(Gpr::Rcx, CPSR_T);
        asm.shr_r32_imm8(Gpr::Rcx, 5);
        asm.or_r64_r64(Gpr::Rax, Gpr::Rcx);
    }

    fn emit_cond(asm: &mut Assembler, offsets: &StateOffsets, cond: Cond) -> Label {
        let pass = asm.label();
        let cpsr = cpsr_mem(offsets);
        match cond {
            Cond::Al | Cond::Nv => panic!("{cond:?} is not a testable condition"),
            Cond::Eq => {
                asm.mov_r32_m(Gpr::Rax, cpsr);
                asm.test_r32_imm32(Gpr::Rax, CPSR_Z);
                asm.jcc_label(Cc::Ne, pass);
            }
            Cond::Ne => {
                asm.mov_r32_m(Gpr::Rax, cpsr);
                asm.test_r32_imm32(Gpr::Rax, CPSR_Z);
                asm.jcc_label(Cc::E, pass);
            }
            Cond::Cs => {
                asm.mov_r32_m(Gpr::Rax, cpsr);
                asm.test_r32_imm32(Gpr::Rax, CPSR_C);
                asm.jcc_label(Cc::Ne, pass);
            }
            Cond::Cc => {
                asm.mov_r32_m(Gpr::Rax, cpsr);
                asm.test_r32_imm32(Gpr::Rax, CPSR_C);
                asm.jcc_label(Cc::E, pass);
            }
            Cond::Mi => {
                asm.mov_r32_m(Gpr::Rax, cpsr);
                asm.test_r32_imm32(Gpr::Rax, CPSR_N);
                asm.jcc_label(Cc::Ne, pass);
            }
            Cond::Pl => {
                asm.mov_r32_m(Gpr::Rax, cpsr);
                asm.test_r32_imm32(Gpr::Rax, CPSR_N);
                asm.jcc_label(Cc::E, pass);
            }
            Cond::Vs => {
                asm.mov_r32_m(Gpr::Rax, cpsr);
                asm.test_r32_imm32(Gpr::Rax, CPSR_V);
                asm.jcc_label(Cc::Ne, pass);
            }
            Cond::Vc => {
                asm.mov_r32_m(Gpr::Rax, cpsr);
                asm.test_r32_imm32(Gpr::Rax, CPSR_V);
                asm.jcc_label(Cc::E, pass);
            }
            Cond::Hi | Cond::Ls => {
                // C set and Z clear.
                asm.mov_r32_m(Gpr::Rax, cpsr);
                asm.and_r32_imm32(Gpr::Rax, CPSR_C | CPSR_Z);
                asm.cmp_r32_imm32(Gpr::Rax, CPSR_C);
                asm.jcc_label(if cond == Cond::Hi { Cc::E } else { Cc::Ne }, pass);
            }
            Cond::Ge | Cond::Lt => {
                // N == V, folded into bit 28 by a shifted xor.
                asm.mov_r32_m(Gpr::Rax, cpsr);
                asm.mov_r32_r32(Gpr::Rcx, Gpr::Rax);
                asm.shr_r32_imm8(Gpr::Rcx, 3);
                asm.xor_r32_r32(Gpr::Rcx, Gpr::Rax);
                asm.test_r32_imm32(Gpr::Rcx, CPSR_V);
                asm.jcc_label(if cond == Cond::Ge { Cc::E } else { Cc::Ne }, pass);
            }
            Cond::Gt | Cond::Le => {
                // Z clear and N == V.
                asm.mov_r32_m(Gpr::Rax, cpsr);
                asm.mov_r32_r32(Gpr::Rcx, Gpr::Rax);
                asm.shr_r32_imm8(Gpr::Rcx, 3);
                asm.xor_r32_r32(Gpr::Rcx, Gpr::Rax);
                asm.and_r32_imm32(Gpr::Rcx, CPSR_V);
                asm.and_r32_imm32(Gpr::Rax, CPSR_Z);
                asm.or_r32_r32(Gpr::Rcx, Gpr::Rax);
                asm.jcc_label(if cond == Cond::Gt { Cc::E } else { Cc::Ne }, pass);
            }
        }
        pass
    }

    fn emit_inst(ctx: &mut EmitCtx, index: InstIndex) -> bool {
        let op = ctx.block.inst(index).opcode();
        match op {
            Opcode::A32GetRegister => emit_get_register(ctx, index),
            Opcode::A32SetRegister => emit_set_register(ctx, index),
            Opcode::A32BranchWritePC => emit_branch_write_pc(ctx, index),
            Opcode::A32BXWritePC => emit_bx_write_pc(ctx, index),
            Opcode::A32GetCFlag => emit_get_c_flag(ctx, index),
            Opcode::A32SetNFlag => emit_set_flag(ctx, index, CPSR_N),
            Opcode::A32SetZFlag => emit_set_flag(ctx, index, CPSR_Z),
            Opcode::A32SetCFlag => emit_set_flag(ctx, index, CPSR_C),
            Opcode::A32SetVFlag => emit_set_flag(ctx, index, CPSR_V),
            Opcode::A32SetCpsrNZCV => emit_set_cpsr_nzcv(ctx, index),
            Opcode::A32CallSupervisor => emit_call_supervisor(ctx, index),
            Opcode::A32SetExclusive => emit_set_exclusive(ctx, index),
            Opcode::A32ClearExclusive => emit_clear_exclusive(ctx),
            Opcode::A32ExclusiveWriteMemory32 => emit_exclusive_write_memory32(ctx, index),
            Opcode::A32ReadMemory8 => {
                let (accessor, thunk) = (ctx.stubs.read_memory_8, ctx.hostcb.read_memory_8);
                emit_read_memory(ctx, index, 1, accessor, thunk);
            }
            Opcode::A32ReadMemory16 => {
                let (accessor, thunk) = (ctx.stubs.read_memory_16, ctx.hostcb.read_memory_16);
                emit_read_memory(ctx, index, 2, accessor, thunk);
            }
            Opcode::A32ReadMemory32 => {
                let (accessor, thunk) = (ctx.stubs.read_memory_32, ctx.hostcb.read_memory_32);
                emit_read_memory(ctx, index, 4, accessor, thunk);
            }
            Opcode::A32ReadMemory64 => {
                let (accessor, thunk) = (ctx.stubs.read_memory_64, ctx.hostcb.read_memory_64);
                emit_read_memory(ctx, index, 8, accessor, thunk);
            }
            Opcode::A32WriteMemory8 => {
                let (accessor, thunk) = (ctx.stubs.write_memory_8, ctx.hostcb.write_memory_8);
                emit_write_memory(ctx, index, 1, accessor, thunk);
            }
            Opcode::A32WriteMemory16 => {
                let (accessor, thunk) = (ctx.stubs.write_memory_16, ctx.hostcb.write_memory_16);
                emit_write_memory(ctx, index, 2, accessor, thunk);
            }
            Opcode::A32WriteMemory32 => {
                let (accessor, thunk) = (ctx.stubs.write_memory_32, ctx.hostcb.write_memory_32);
                emit_write_memory(ctx, index, 4, accessor, thunk);
            }
            Opcode::A32WriteMemory64 => {
                let (accessor, thunk) = (ctx.stubs.write_memory_64, ctx.hostcb.write_memory_64);
                emit_write_memory(ctx, index, 8, accessor, thunk);
            }
            _ => return false,
        }
        true
    }
}

fn register_mem(ctx: &EmitCtx, reg: kestrel_types::a32::Reg) -> Mem {
    Mem::base_disp(Gpr::R15, ctx.offsets.regs + (reg.index() * 4) as i32)
}

fn emit_get_register(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let reg = ctx.block.imm_a32_reg(args[0]);
    let result = ctx.ra.scratch_gpr(ctx.asm);
    let mem = register_mem(ctx, reg);
    ctx.asm.mov_r32_m(result, mem);
    ctx.ra.define_value(index, result);
}

fn emit_set_register(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let reg = ctx.block.imm_a32_reg(args[0]);
    let mem = register_mem(ctx, reg);
    if let Value::U32(imm) = args[1] {
        ctx.asm.mov_m32_imm32(mem, imm);
    } else {
        let value = ctx.ra.use_gpr(ctx.asm, ctx.block, args[1]);
        ctx.asm.mov_m_r32(mem, value);
    }
}

fn emit_branch_write_pc(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let pc = Mem::base_disp(Gpr::R15, ctx.offsets.pc);
    if let Value::U32(imm) = args[0] {
        ctx.asm.mov_m32_imm32(pc, imm & !1);
    } else {
        let value = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
        ctx.asm.and_r32_imm32(value, !1);
        ctx.asm.mov_m_r32(pc, value);
    }
}

/// Interworking write: bit 0 selects the execution state, and the address
/// is masked by the state's alignment (`~1` for Thumb, `~3` for ARM).
fn emit_bx_write_pc(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let value = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
    let tbit = ctx.ra.scratch_gpr(ctx.asm);
    let mask = ctx.ra.scratch_gpr(ctx.asm);

    ctx.asm.mov_r32_r32(tbit, value);
    ctx.asm.and_r32_imm32(tbit, 1);
    // mask = tbit*2 - 4: 0xFFFF_FFFE for Thumb, 0xFFFF_FFFC for ARM.
    ctx.asm
        .lea_r32_m(mask, Mem::base_index_scale_disp(tbit, tbit, 0, -4));
    ctx.asm.and_r32_r32(value, mask);
    ctx.asm
        .mov_m_r32(Mem::base_disp(Gpr::R15, ctx.offsets.pc), value);
    ctx.asm.shl_r32_imm8(tbit, 5);
    ctx.asm.and_m32_imm32(cpsr_mem(ctx.offsets), !CPSR_T);
    ctx.asm.or_m32_r32(cpsr_mem(ctx.offsets), tbit);
}

fn emit_get_c_flag(ctx: &mut EmitCtx, index: InstIndex) {
    let result = ctx.ra.scratch_gpr(ctx.asm);
    ctx.asm.mov_r32_m(result, cpsr_mem(ctx.offsets));
    ctx.asm.shr_r32_imm8(result, 29);
    ctx.asm.and_r32_imm32(result, 1);
    ctx.ra.define_value(index, result);
}

fn emit_set_flag(ctx: &mut EmitCtx, index: InstIndex, mask: u32) {
    let args = argument_info(ctx.block, index);
    let cpsr = cpsr_mem(ctx.offsets);
    match args[0] {
        Value::U1(true) => ctx.asm.or_m32_imm32(cpsr, mask),
        Value::U1(false) => ctx.asm.and_m32_imm32(cpsr, !mask),
        value => {
            let bit = mask.trailing_zeros() as u8;
            let flag = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, value);
            ctx.asm.shl_r32_imm8(flag, bit);
            ctx.asm.and_m32_imm32(cpsr, !mask);
            ctx.asm.or_m32_r32(cpsr, flag);
        }
    }
}

fn emit_set_cpsr_nzcv(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let nzcv = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
    ctx.asm.and_r32_imm32(nzcv, 0xF000_0000);
    ctx.asm.and_m32_imm32(cpsr_mem(ctx.offsets), 0x0FFF_FFFF);
    ctx.asm.or_m32_r32(cpsr_mem(ctx.offsets), nzcv);
}

fn emit_call_supervisor(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let thunk = ctx.hostcb.call_svc;
    let ctx_ptr = ctx.hostcb.ctx;
    ctx.host_call(thunk, &[CallArg::Imm64(ctx_ptr), CallArg::Value(args[0])]);
}

fn emit_set_exclusive(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let addr = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
    ctx.asm.and_r32_imm32(addr, RESERVATION_GRANULE_MASK);
    ctx.asm.mov_m_r32(
        Mem::base_disp(Gpr::R15, ctx.offsets.exclusive_address),
        addr,
    );
    ctx.asm
        .mov_m8_imm8(Mem::base_disp(Gpr::R15, ctx.offsets.exclusive_state), 1);
}

fn emit_clear_exclusive(ctx: &mut EmitCtx) {
    ctx.asm
        .mov_m8_imm8(Mem::base_disp(Gpr::R15, ctx.offsets.exclusive_state), 0);
}

/// Store-exclusive: succeeds (status 0) only when the monitor holds the
/// matching granule; success consumes the reservation.
fn emit_exclusive_write_memory32(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    ctx.ra
        .use_scratch_gpr_pinned(ctx.asm, ctx.block, args[0], Gpr::Rsi);
    ctx.ra
        .use_scratch_gpr_pinned(ctx.asm, ctx.block, args[1], Gpr::Rdx);
    let status = ctx.ra.scratch_gpr_pinned(ctx.asm, Gpr::Rax);
    let granule = ctx.ra.scratch_gpr(ctx.asm);
    let fail = ctx.asm.label();

    ctx.asm.mov_r32_imm32(status, 1);
    ctx.asm
        .cmp_m8_imm8(Mem::base_disp(Gpr::R15, ctx.offsets.exclusive_state), 0);
    ctx.asm.jcc_label(Cc::E, fail);
    ctx.asm.mov_r32_r32(granule, Gpr::Rsi);
    ctx.asm.and_r32_imm32(granule, RESERVATION_GRANULE_MASK);
    ctx.asm.cmp_r32_m(
        granule,
        Mem::base_disp(Gpr::R15, ctx.offsets.exclusive_address),
    );
    ctx.asm.jcc_label(Cc::Ne, fail);
    ctx.asm
        .mov_m8_imm8(Mem::base_disp(Gpr::R15, ctx.offsets.exclusive_state), 0);
    ctx.asm.call_to(ctx.stubs.write_memory_32);
    ctx.asm.xor_r32_r32(status, status);
    ctx.asm.bind(fail);
    ctx.ra.define_value(index, status);
}