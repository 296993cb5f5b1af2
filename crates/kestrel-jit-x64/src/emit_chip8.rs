//! CHIP-8 backend: state layout, location packing and the architectural
//! opcode emitters.

use std::mem::offset_of;

use kestrel_cpu_core::jit_state::{Chip8JitState, JitStateCommon};
use kestrel_ir::{self as ir, InstIndex, Opcode, Value};
use kestrel_types::Cond;

use crate::asm::{Assembler, Gpr, Label, Mem};
use crate::emit::{emit_cond_from_host_flags, EmitCtx, EmitX64, IsaEmit, StateOffsets};
use crate::emit_memory::{emit_read_memory, emit_write_memory};
use crate::reg_alloc::{argument_info, CallArg};

pub type Chip8EmitX64 = EmitX64<Chip8Isa>;

const COMMON: usize = offset_of!(Chip8JitState, common);

static OFFSETS: StateOffsets = StateOffsets {
    regs: offset_of!(Chip8JitState, regs) as i32,
    pc: (offset_of!(Chip8JitState, regs) + 20 * 4) as i32,
    cpsr: None,
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

pub struct Chip8Isa;

impl IsaEmit for Chip8Isa {
    const NAME: &'static str = "chip8";

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
        _initial: ir::LocationDescriptor,
    ) {
        asm.mov_m32_imm32(
            Mem::base_disp(Gpr::R15, offsets.pc),
            Self::location_pc(next),
        );
    }

    fn emit_rsb_location_hash(asm: &mut Assembler, offsets: &StateOffsets) {
        // Must match the frontend: hash = pc << 32.
        asm.mov_r32_m(Gpr::Rax, Mem::base_disp(Gpr::R15, offsets.pc));
        asm.shl_r64_imm8(Gpr::Rax, 32);
    }

    fn emit_cond(asm: &mut Assembler, _offsets: &StateOffsets, cond: Cond) -> Label {
        // Skip conditions are decided by the block's final compare, whose
        // host flags are still live here.
        emit_cond_from_host_flags(asm, cond)
    }

    fn emit_inst(ctx: &mut EmitCtx, index: InstIndex) -> bool {
        let op = ctx.block.inst(index).opcode();
        match op {
            Opcode::Chip8GetRegister => emit_get_register(ctx, index),
            Opcode::Chip8SetRegister => emit_set_register(ctx, index),
            Opcode::Chip8WritePC => emit_write_pc(ctx, index),
            Opcode::Chip8CallSupervisor => emit_call_supervisor(ctx, index),
            Opcode::Chip8ReadMemory8 => {
                let accessor = ctx.stubs.read_memory_8;
                let thunk = ctx.hostcb.read_memory_8;
                emit_read_memory(ctx, index, 1, accessor, thunk);
            }
            Opcode::Chip8ReadMemory16 => {
                let accessor = ctx.stubs.read_memory_16;
                let thunk = ctx.hostcb.read_memory_16;
                emit_read_memory(ctx, index, 2, accessor, thunk);
            }
            Opcode::Chip8WriteMemory8 => {
                let accessor = ctx.stubs.write_memory_8;
                let thunk = ctx.hostcb.write_memory_8;
                emit_write_memory(ctx, index, 1, accessor, thunk);
            }
            Opcode::Chip8WriteMemory16 => {
                let accessor = ctx.stubs.write_memory_16;
                let thunk = ctx.hostcb.write_memory_16;
                emit_write_memory(ctx, index, 2, accessor, thunk);
            }
            _ => return false,
        }
        true
    }
}

fn register_mem(ctx: &EmitCtx, reg: kestrel_types::chip8::Reg) -> Mem {
    Mem::base_disp(
        Gpr::R15,
        ctx.offsets.regs + (reg.index() * 4) as i32,
    )
}

fn emit_get_register(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let reg = ctx.block.imm_chip8_reg(args[0]);
    let result = ctx.ra.scratch_gpr(ctx.asm);
    let mem = register_mem(ctx, reg);
    ctx.asm.mov_r32_m(result, mem);
    ctx.ra.define_value(index, result);
}

fn emit_set_register(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let reg = ctx.block.imm_chip8_reg(args[0]);
    let mem = register_mem(ctx, reg);
    if let Value::U32(imm) = args[1] {
        ctx.asm.mov_m32_imm32(mem, imm);
    } else {
        let value = ctx.ra.use_gpr(ctx.asm, ctx.block, args[1]);
        ctx.asm.mov_m_r32(mem, value);
    }
}

fn emit_write_pc(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let mem = Mem::base_disp(Gpr::R15, ctx.offsets.pc);
    if let Value::U32(imm) = args[0] {
        ctx.asm.mov_m32_imm32(mem, imm);
    } else {
        let value = ctx.ra.use_gpr(ctx.asm, ctx.block, args[0]);
        ctx.asm.mov_m_r32(mem, value);
    }
}

fn emit_call_supervisor(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let thunk = ctx.hostcb.call_svc;
    let ctx_ptr = ctx.hostcb.ctx;
    ctx.host_call(thunk, &[CallArg::Imm64(ctx_ptr), CallArg::Value(args[0])]);
}
