//! Emitters for the ISA-independent data-processing opcodes.
//!
//! Pseudo-operation consumers are materialized inline, immediately after
//! their producer's host instruction while the flags are still live, and
//! then erased from the block.

use kestrel_ir::{InstIndex, Opcode, PseudoKind, Value};

use crate::asm::{Cc, Gpr};
use crate::emit::{emit_push_rsb, EmitCtx};
use crate::emit_saturation::{emit_signed_saturated_op, emit_unsigned_saturation};
use crate::reg_alloc::{argument_info, CallArg};

/// Dispatches the ISA-independent opcodes; returns false for anything the
/// per-ISA emitter must handle.
pub fn emit_generic(ctx: &mut EmitCtx, index: InstIndex) -> bool {
    let op = ctx.block.inst(index).opcode();
    match op {
        Opcode::Add32 => emit_add32(ctx, index),
        Opcode::Sub32 => emit_sub32(ctx, index),
        Opcode::And32 | Opcode::Or32 | Opcode::Eor32 => emit_logical32(ctx, index, op),
        Opcode::Not32 => emit_not32(ctx, index),
        Opcode::LogicalShiftLeft32 => emit_shift32(ctx, index, ShiftKind::Lsl),
        Opcode::LogicalShiftRight32 => emit_shift32(ctx, index, ShiftKind::Lsr),
        Opcode::ArithmeticShiftRight32 => emit_shift32(ctx, index, ShiftKind::Asr),
        Opcode::RotateRight32 => emit_shift32(ctx, index, ShiftKind::Ror),
        Opcode::MostSignificantBit => emit_most_significant_bit(ctx, index),
        Opcode::IsZero32 => emit_is_zero32(ctx, index),
        Opcode::LeastSignificantHalf => emit_narrow(ctx, index, Narrow::Half),
        Opcode::LeastSignificantByte => emit_narrow(ctx, index, Narrow::Byte),
        Opcode::ByteReverseHalf => emit_byte_reverse_half(ctx, index),
        Opcode::SignExtendHalfToWord => emit_sign_extend_half(ctx, index),
        Opcode::ZeroExtendHalfToWord => emit_narrow(ctx, index, Narrow::Half),
        Opcode::ZeroExtendByteToWord => emit_narrow(ctx, index, Narrow::Byte),
        Opcode::ZeroExtendBitToWord => emit_pass_through(ctx, index),
        Opcode::Add8 => emit_arith8(ctx, index, Arith8::Add),
        Opcode::Sub8 => emit_arith8(ctx, index, Arith8::Sub),
        Opcode::And8 | Opcode::Or8 | Opcode::Eor8 => emit_logical8(ctx, index, op),
        Opcode::LogicalShiftLeft8 => emit_shift8(ctx, index, true),
        Opcode::LogicalShiftRight8 => emit_shift8(ctx, index, false),
        Opcode::SignedSaturatedAdd16 => emit_signed_saturated_op(ctx, index, 16, false),
        Opcode::SignedSaturatedAdd32 => emit_signed_saturated_op(ctx, index, 32, false),
        Opcode::SignedSaturatedSub16 => emit_signed_saturated_op(ctx, index, 16, true),
        Opcode::SignedSaturatedSub32 => emit_signed_saturated_op(ctx, index, 32, true),
        Opcode::UnsignedSaturation => emit_unsigned_saturation(ctx, index),
        Opcode::ExceptionRaised => emit_exception_raised(ctx, index),
        Opcode::PushRSB => emit_push_rsb(ctx, index),
        _ => return false,
    }
    true
}

/// `setcc` a flag side product into a fresh register and hand it to the
/// pseudo-op, which is then erased. Must run while the producer's flags
/// are live; allocator traffic is mov-only and leaves them intact.
fn define_flag_pseudo(ctx: &mut EmitCtx, producer: InstIndex, kind: PseudoKind, cc: Cc) {
    let Some(pseudo) = ctx.pseudo(producer, kind) else {
        return;
    };
    let flag = ctx.ra.scratch_gpr(ctx.asm);
    ctx.asm.setcc_r8(cc, flag);
    ctx.asm.movzx_r32_r8(flag, flag);
    ctx.ra.define_value(pseudo, flag);
    ctx.erase(pseudo);
}

/// Packs live host flags into ARM NZCV bit positions (31..28).
/// `invert_carry` accounts for the borrow convention of subtraction.
fn define_nzcv_pseudo(ctx: &mut EmitCtx, producer: InstIndex, invert_carry: bool) {
    let Some(pseudo) = ctx.pseudo(producer, PseudoKind::Nzcv) else {
        return;
    };
    let n = ctx.ra.scratch_gpr(ctx.asm);
    let z = ctx.ra.scratch_gpr(ctx.asm);
    let c = ctx.ra.scratch_gpr(ctx.asm);
    let v = ctx.ra.scratch_gpr(ctx.asm);
    if invert_carry {
        ctx.asm.cmc();
    }
    ctx.asm.setcc_r8(Cc::S, n);
    ctx.asm.setcc_r8(Cc::E, z);
    ctx.asm.setcc_r8(Cc::B, c);
    ctx.asm.setcc_r8(Cc::O, v);
    ctx.asm.movzx_r32_r8(n, n);
    ctx.asm.movzx_r32_r8(z, z);
    ctx.asm.movzx_r32_r8(c, c);
    ctx.asm.movzx_r32_r8(v, v);
    ctx.asm.shl_r32_imm8(n, 31);
    ctx.asm.shl_r32_imm8(z, 30);
    ctx.asm.shl_r32_imm8(c, 29);
    ctx.asm.shl_r32_imm8(v, 28);
    ctx.asm.or_r32_r32(n, z);
    ctx.asm.or_r32_r32(n, c);
    ctx.asm.or_r32_r32(n, v);
    ctx.ra.define_value(pseudo, n);
    ctx.erase(pseudo);
}

fn emit_add32(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);

    let add_operand = |ctx: &mut EmitCtx, adc: bool| {
        if let Value::U32(imm) = args[1] {
            if adc {
                ctx.asm.adc_r32_imm32(result, imm);
            } else {
                ctx.asm.add_r32_imm32(result, imm);
            }
        } else {
            let rhs = ctx.ra.use_gpr(ctx.asm, ctx.block, args[1]);
            if adc {
                ctx.asm.adc_r32_r32(result, rhs);
            } else {
                ctx.asm.add_r32_r32(result, rhs);
            }
        }
    };

    match args[2] {
        Value::U1(false) => add_operand(ctx, false),
        Value::U1(true) => {
            ctx.asm.stc();
            add_operand(ctx, true);
        }
        carry => {
            let carry = ctx.ra.use_gpr(ctx.asm, ctx.block, carry);
            ctx.asm.bt_r32_imm8(carry, 0);
            add_operand(ctx, true);
        }
    }

    define_flag_pseudo(ctx, index, PseudoKind::Carry, Cc::B);
    define_flag_pseudo(ctx, index, PseudoKind::Overflow, Cc::O);
    define_nzcv_pseudo(ctx, index, false);
    ctx.ra.define_value(index, result);
}

fn emit_sub32(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);

    // ARM convention: carry-in is not-borrow, so SUB is SBC with carry set.
    match args[2] {
        Value::U1(true) => {
            if let Value::U32(imm) = args[1] {
                ctx.asm.sub_r32_imm32(result, imm);
            } else {
                let rhs = ctx.ra.use_gpr(ctx.asm, ctx.block, args[1]);
                ctx.asm.sub_r32_r32(result, rhs);
            }
        }
        Value::U1(false) => {
            let rhs = ctx.ra.use_gpr(ctx.asm, ctx.block, args[1]);
            ctx.asm.stc();
            ctx.asm.sbb_r32_r32(result, rhs);
        }
        carry => {
            let carry = ctx.ra.use_gpr(ctx.asm, ctx.block, carry);
            let rhs = ctx.ra.use_gpr(ctx.asm, ctx.block, args[1]);
            ctx.asm.bt_r32_imm8(carry, 0);
            ctx.asm.cmc();
            ctx.asm.sbb_r32_r32(result, rhs);
        }
    }

    // Host CF is borrow; the guest carry is its complement.
    define_flag_pseudo(ctx, index, PseudoKind::Carry, Cc::Ae);
    define_flag_pseudo(ctx, index, PseudoKind::Overflow, Cc::O);
    define_nzcv_pseudo(ctx, index, true);
    ctx.ra.define_value(index, result);
}

fn emit_logical32(ctx: &mut EmitCtx, index: InstIndex, op: Opcode) {
    let args = argument_info(ctx.block, index);
    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
    if let Value::U32(imm) = args[1] {
        match op {
            Opcode::And32 => ctx.asm.and_r32_imm32(result, imm),
            Opcode::Or32 => ctx.asm.or_r32_imm32(result, imm),
            _ => ctx.asm.xor_r32_imm32(result, imm),
        }
    } else {
        let rhs = ctx.ra.use_gpr(ctx.asm, ctx.block, args[1]);
        match op {
            Opcode::And32 => ctx.asm.and_r32_r32(result, rhs),
            Opcode::Or32 => ctx.asm.or_r32_r32(result, rhs),
            _ => ctx.asm.xor_r32_r32(result, rhs),
        }
    }
    define_nzcv_pseudo(ctx, index, false);
    ctx.ra.define_value(index, result);
}

fn emit_not32(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
    if ctx.pseudo(index, PseudoKind::Nzcv).is_some() {
        // `not` leaves flags alone; use the flag-setting complement.
        ctx.asm.xor_r32_imm32(result, u32::MAX);
        define_nzcv_pseudo(ctx, index, false);
    } else {
        ctx.asm.not_r32(result);
    }
    ctx.ra.define_value(index, result);
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ShiftKind {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

fn emit_shift32(ctx: &mut EmitCtx, index: InstIndex, kind: ShiftKind) {
    let args = argument_info(ctx.block, index);
    if let Value::U8(amount) = args[1] {
        emit_shift32_imm(ctx, index, kind, args, amount);
    } else {
        emit_shift32_dynamic(ctx, index, kind, args);
    }
}

fn emit_shift32_imm(
    ctx: &mut EmitCtx,
    index: InstIndex,
    kind: ShiftKind,
    args: [Value; 4],
    amount: u8,
) {
    let carry_inst = ctx.pseudo(index, PseudoKind::Carry);
    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);

    if amount == 0 {
        // Identity shift: the carry-out is the carry-in.
        if let Some(pseudo) = carry_inst {
            ctx.ra
                .define_value_from(ctx.asm, ctx.block, pseudo, args[2]);
            ctx.erase(pseudo);
        }
        ctx.ra.define_value(index, result);
        return;
    }

    match kind {
        ShiftKind::Lsl | ShiftKind::Lsr if amount < 32 => {
            if matches!(kind, ShiftKind::Lsl) {
                ctx.asm.shl_r32_imm8(result, amount);
            } else {
                ctx.asm.shr_r32_imm8(result, amount);
            }
            define_flag_pseudo(ctx, index, PseudoKind::Carry, Cc::B);
        }
        ShiftKind::Lsl => {
            // Shifts of 32 or more clear the result; only the 32-position
            // shift keeps a carry (bit 0 out for LSL, bit 31 for LSR).
            if amount == 32 {
                ctx.asm.bt_r32_imm8(result, 0);
                define_flag_pseudo(ctx, index, PseudoKind::Carry, Cc::B);
            } else if let Some(pseudo) = carry_inst {
                let zero = ctx.ra.scratch_gpr(ctx.asm);
                ctx.asm.xor_r32_r32(zero, zero);
                ctx.ra.define_value(pseudo, zero);
                ctx.erase(pseudo);
            }
            ctx.asm.xor_r32_r32(result, result);
        }
        ShiftKind::Lsr => {
            if amount == 32 {
                ctx.asm.bt_r32_imm8(result, 31);
                define_flag_pseudo(ctx, index, PseudoKind::Carry, Cc::B);
            } else if let Some(pseudo) = carry_inst {
                let zero = ctx.ra.scratch_gpr(ctx.asm);
                ctx.asm.xor_r32_r32(zero, zero);
                ctx.ra.define_value(pseudo, zero);
                ctx.erase(pseudo);
            }
            ctx.asm.xor_r32_r32(result, result);
        }
        ShiftKind::Asr => {
            let amount = amount.min(32);
            if amount < 32 {
                ctx.asm.sar_r32_imm8(result, amount);
                define_flag_pseudo(ctx, index, PseudoKind::Carry, Cc::B);
            } else {
                // All bits become the sign; so does the carry.
                ctx.asm.sar_r32_imm8(result, 31);
                if let Some(pseudo) = carry_inst {
                    let carry = ctx.ra.scratch_gpr(ctx.asm);
                    ctx.asm.mov_r32_r32(carry, result);
                    ctx.asm.and_r32_imm32(carry, 1);
                    ctx.ra.define_value(pseudo, carry);
                    ctx.erase(pseudo);
                }
            }
        }
        ShiftKind::Ror => {
            ctx.asm.ror_r32_imm8(result, amount & 31);
            if let Some(pseudo) = carry_inst {
                let carry = ctx.ra.scratch_gpr(ctx.asm);
                ctx.asm.mov_r32_r32(carry, result);
                ctx.asm.shr_r32_imm8(carry, 31);
                ctx.ra.define_value(pseudo, carry);
                ctx.erase(pseudo);
            }
        }
    }

    ctx.ra.define_value(index, result);
}

fn emit_shift32_dynamic(ctx: &mut EmitCtx, index: InstIndex, kind: ShiftKind, args: [Value; 4]) {
    let carry_inst = ctx.pseudo(index, PseudoKind::Carry);
    // The shift amount lives in cl.
    let shift = ctx
        .ra
        .use_scratch_gpr_pinned(ctx.asm, ctx.block, args[1], Gpr::Rcx);
    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);

    if carry_inst.is_none() {
        match kind {
            ShiftKind::Lsl | ShiftKind::Lsr => {
                // x86 masks the count to 5 bits; amounts of 32..255 must
                // clear the result instead.
                if matches!(kind, ShiftKind::Lsl) {
                    ctx.asm.shl_r32_cl(result);
                } else {
                    ctx.asm.shr_r32_cl(result);
                }
                let zero = ctx.ra.scratch_gpr(ctx.asm);
                ctx.asm.xor_r32_r32(zero, zero);
                ctx.asm.cmp_r8_imm8(shift, 32);
                ctx.asm.cmovcc_r32_r32(Cc::Ae, result, zero);
            }
            ShiftKind::Asr => {
                let cap = ctx.ra.scratch_gpr(ctx.asm);
                ctx.asm.mov_r32_imm32(cap, 31);
                ctx.asm.cmp_r32_imm32(shift, 31);
                ctx.asm.cmovcc_r32_r32(Cc::A, shift, cap);
                ctx.asm.sar_r32_cl(result);
            }
            ShiftKind::Ror => {
                ctx.asm.ror_r32_cl(result);
            }
        }
        ctx.ra.define_value(index, result);
        return;
    }

    let pseudo = carry_inst.unwrap();
    let carry = ctx
        .ra
        .use_scratch_gpr(ctx.asm, ctx.block, args[2]);
    let end = ctx.asm.label();

    match kind {
        ShiftKind::Lsl | ShiftKind::Lsr => {
            let over32 = ctx.asm.label();
            let exactly32 = ctx.asm.label();
            ctx.asm.test_r8_r8(shift, shift);
            ctx.asm.jcc_label(Cc::E, end);
            ctx.asm.cmp_r8_imm8(shift, 32);
            ctx.asm.jcc_label(Cc::A, over32);
            ctx.asm.jcc_label(Cc::E, exactly32);
            if matches!(kind, ShiftKind::Lsl) {
                ctx.asm.shl_r32_cl(result);
            } else {
                ctx.asm.shr_r32_cl(result);
            }
            ctx.asm.setcc_r8(Cc::B, carry);
            ctx.asm.movzx_r32_r8(carry, carry);
            ctx.asm.jmp_label(end);

            ctx.asm.bind(exactly32);
            let bit = if matches!(kind, ShiftKind::Lsl) { 0 } else { 31 };
            ctx.asm.bt_r32_imm8(result, bit);
            ctx.asm.setcc_r8(Cc::B, carry);
            ctx.asm.movzx_r32_r8(carry, carry);
            ctx.asm.xor_r32_r32(result, result);
            ctx.asm.jmp_label(end);

            ctx.asm.bind(over32);
            ctx.asm.xor_r32_r32(result, result);
            ctx.asm.xor_r32_r32(carry, carry);
            ctx.asm.bind(end);
        }
        ShiftKind::Asr => {
            let over31 = ctx.asm.label();
            ctx.asm.test_r8_r8(shift, shift);
            ctx.asm.jcc_label(Cc::E, end);
            ctx.asm.cmp_r8_imm8(shift, 32);
            ctx.asm.jcc_label(Cc::Ae, over31);
            ctx.asm.sar_r32_cl(result);
            ctx.asm.setcc_r8(Cc::B, carry);
            ctx.asm.movzx_r32_r8(carry, carry);
            ctx.asm.jmp_label(end);

            ctx.asm.bind(over31);
            ctx.asm.sar_r32_imm8(result, 31);
            ctx.asm.mov_r32_r32(carry, result);
            ctx.asm.and_r32_imm32(carry, 1);
            ctx.asm.bind(end);
        }
        ShiftKind::Ror => {
            let not_multiple = ctx.asm.label();
            ctx.asm.test_r8_r8(shift, shift);
            ctx.asm.jcc_label(Cc::E, end);
            ctx.asm.and_r32_imm32(shift, 31);
            ctx.asm.jcc_label(Cc::Ne, not_multiple);
            // A multiple of 32: the value is unchanged, the carry is the
            // top bit.
            ctx.asm.mov_r32_r32(carry, result);
            ctx.asm.shr_r32_imm8(carry, 31);
            ctx.asm.jmp_label(end);

            ctx.asm.bind(not_multiple);
            ctx.asm.ror_r32_cl(result);
            ctx.asm.mov_r32_r32(carry, result);
            ctx.asm.shr_r32_imm8(carry, 31);
            ctx.asm.bind(end);
        }
    }

    ctx.ra.define_value(pseudo, carry);
    ctx.erase(pseudo);
    ctx.ra.define_value(index, result);
}

fn emit_most_significant_bit(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
    ctx.asm.shr_r32_imm8(result, 31);
    ctx.ra.define_value(index, result);
}

fn emit_is_zero32(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
    ctx.asm.test_r32_r32(result, result);
    ctx.asm.setcc_r8(Cc::E, result);
    ctx.asm.movzx_r32_r8(result, result);
    ctx.ra.define_value(index, result);
}

#[derive(Clone, Copy)]
enum Narrow {
    Byte,
    Half,
}

fn emit_narrow(ctx: &mut EmitCtx, index: InstIndex, narrow: Narrow) {
    let args = argument_info(ctx.block, index);
    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
    match narrow {
        Narrow::Byte => ctx.asm.movzx_r32_r8(result, result),
        Narrow::Half => ctx.asm.movzx_r32_r16(result, result),
    }
    ctx.ra.define_value(index, result);
}

fn emit_byte_reverse_half(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
    ctx.asm.ror_r16_imm8(result, 8);
    ctx.ra.define_value(index, result);
}

fn emit_sign_extend_half(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
    ctx.asm.movsx_r32_r16(result, result);
    ctx.ra.define_value(index, result);
}

/// The representation already matches (a zero-extended 0/1); just forward
/// the register.
fn emit_pass_through(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
    ctx.ra.define_value(index, result);
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Arith8 {
    Add,
    Sub,
}

fn emit_arith8(ctx: &mut EmitCtx, index: InstIndex, arith: Arith8) {
    let args = argument_info(ctx.block, index);
    let has_pseudo = ctx.block.inst(index).has_associated_pseudo_operation();

    // A subtract whose value is never consumed is a compare for the block
    // terminal; leave the operands alone and only set flags.
    if arith == Arith8::Sub && ctx.block.inst(index).use_count() == 0 && !has_pseudo {
        let lhs = ctx.ra.use_gpr(ctx.asm, ctx.block, args[0]);
        if let Value::U8(imm) = args[1] {
            ctx.asm.cmp_r8_imm8(lhs, imm);
        } else {
            let rhs = ctx.ra.use_gpr(ctx.asm, ctx.block, args[1]);
            ctx.asm.cmp_r8_r8(lhs, rhs);
        }
        return;
    }

    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
    if let Value::U8(imm) = args[1] {
        match arith {
            Arith8::Add => ctx.asm.add_r8_imm8(result, imm),
            Arith8::Sub => ctx.asm.sub_r8_imm8(result, imm),
        }
    } else {
        let rhs = ctx.ra.use_gpr(ctx.asm, ctx.block, args[1]);
        match arith {
            Arith8::Add => ctx.asm.add_r8_r8(result, rhs),
            Arith8::Sub => ctx.asm.sub_r8_r8(result, rhs),
        }
    }
    let carry_cc = match arith {
        Arith8::Add => Cc::B,
        // Guest carry for subtraction is not-borrow.
        Arith8::Sub => Cc::Ae,
    };
    define_flag_pseudo(ctx, index, PseudoKind::Carry, carry_cc);
    ctx.ra.define_value(index, result);
}

fn emit_logical8(ctx: &mut EmitCtx, index: InstIndex, op: Opcode) {
    let args = argument_info(ctx.block, index);
    // Values are zero-extended, so full-width logicals preserve the
    // representation.
    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
    if let Value::U8(imm) = args[1] {
        let imm = u32::from(imm);
        match op {
            Opcode::And8 => ctx.asm.and_r32_imm32(result, imm),
            Opcode::Or8 => ctx.asm.or_r32_imm32(result, imm),
            _ => ctx.asm.xor_r32_imm32(result, imm),
        }
    } else {
        let rhs = ctx.ra.use_gpr(ctx.asm, ctx.block, args[1]);
        match op {
            Opcode::And8 => ctx.asm.and_r32_r32(result, rhs),
            Opcode::Or8 => ctx.asm.or_r32_r32(result, rhs),
            _ => ctx.asm.xor_r32_r32(result, rhs),
        }
    }
    ctx.ra.define_value(index, result);
}

fn emit_shift8(ctx: &mut EmitCtx, index: InstIndex, left: bool) {
    let args = argument_info(ctx.block, index);
    let amount = ctx.block.imm_u8(args[1]);
    assert!(amount >= 1 && amount <= 7, "8-bit shift amount out of range");
    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
    if left {
        ctx.asm.shl_r8_imm8(result, amount);
    } else {
        ctx.asm.shr_r8_imm8(result, amount);
    }
    define_flag_pseudo(ctx, index, PseudoKind::Carry, Cc::B);
    ctx.ra.define_value(index, result);
}

fn emit_exception_raised(ctx: &mut EmitCtx, index: InstIndex) {
    let args = argument_info(ctx.block, index);
    let pc = ctx.block.imm_u32(args[0]);
    let kind = ctx.block.imm_u64(args[1]);
    let thunk = ctx.hostcb.exception_raised;
    let ctx_ptr = ctx.hostcb.ctx;
    ctx.host_call(
        thunk,
        &[
            CallArg::Imm64(ctx_ptr),
            CallArg::Imm64(u64::from(pc)),
            CallArg::Imm64(kind),
        ],
    );
}
