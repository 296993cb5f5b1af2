//! Saturating arithmetic emitters.

use kestrel_ir::{InstIndex, PseudoKind, Value};

use crate::asm::Cc;
use crate::emit::EmitCtx;
use crate::reg_alloc::argument_info;

/// Signed saturating add/subtract at 16 or 32 bits. The saturated bound is
/// selected branchlessly from the first operand's sign (`bt` + `adc`), the
/// narrow-width arithmetic provides the overflow condition, and `cmovo`
/// commits the clamp.
pub fn emit_signed_saturated_op(ctx: &mut EmitCtx, index: InstIndex, width: u8, is_sub: bool) {
    debug_assert!(width == 16 || width == 32);
    let overflow_inst = ctx.pseudo(index, PseudoKind::Overflow);
    let args = argument_info(ctx.block, index);

    let result = ctx.ra.use_scratch_gpr(ctx.asm, ctx.block, args[0]);
    let operand = ctx.ra.use_gpr(ctx.asm, ctx.block, args[1]);
    let bound = ctx.ra.scratch_gpr(ctx.asm);

    let int_max: u32 = if width == 16 { 0x7FFF } else { 0x7FFF_FFFF };

    // bound := INT_MAX when the first operand is non-negative, INT_MIN
    // (as an unsigned pattern) when it is negative.
    ctx.asm.xor_r32_r32(bound, bound);
    ctx.asm.bt_r32_imm8(result, width - 1);
    ctx.asm.adc_r32_imm32(bound, int_max);

    if width == 16 {
        if is_sub {
            ctx.asm.sub_r16_r16(result, operand);
        } else {
            ctx.asm.add_r16_r16(result, operand);
        }
    } else if is_sub {
        ctx.asm.sub_r32_r32(result, operand);
    } else {
        ctx.asm.add_r32_r32(result, operand);
    }

    ctx.asm.cmovcc_r32_r32(Cc::O, result, bound);

    if let Some(pseudo) = overflow_inst {
        let overflow = ctx.ra.scratch_gpr(ctx.asm);
        ctx.asm.setcc_r8(Cc::O, overflow);
        ctx.asm.movzx_r32_r8(overflow, overflow);
        ctx.ra.define_value(pseudo, overflow);
        ctx.erase(pseudo);
    }

    ctx.ra.define_value(index, result);
}

/// Clamps a signed 32-bit value into `[0, 2^N - 1]`.
pub fn emit_unsigned_saturation(ctx: &mut EmitCtx, index: InstIndex) {
    let overflow_inst = ctx.pseudo(index, PseudoKind::Overflow);
    let args = argument_info(ctx.block, index);
    let n = ctx.block.imm_u8(args[1]);
    assert!(n <= 31);
    let saturated: u32 = (1u32 << n) - 1;

    let value = ctx.ra.use_gpr(ctx.asm, ctx.block, args[0]);
    let result = ctx.ra.scratch_gpr(ctx.asm);
    let zero = ctx.ra.scratch_gpr(ctx.asm);

    // result = clamp(value, 0, saturated)
    ctx.asm.xor_r32_r32(zero, zero);
    ctx.asm.cmp_r32_imm32(value, saturated);
    ctx.asm.mov_r32_imm32(result, saturated);
    ctx.asm.cmovcc_r32_r32(Cc::Le, result, zero);
    ctx.asm.cmovcc_r32_r32(Cc::Be, result, value);

    if let Some(pseudo) = overflow_inst {
        let overflow = ctx.ra.scratch_gpr(ctx.asm);
        ctx.asm.setcc_r8(Cc::A, overflow);
        ctx.asm.movzx_r32_r8(overflow, overflow);
        ctx.ra.define_value(pseudo, overflow);
        ctx.erase(pseudo);
    }

    ctx.ra.define_value(index, result);
}

// Reference checks for the clamp identities used above.
#[cfg(test)]
mod tests {
    use kestrel_types::bits::{saturate_signed, saturate_unsigned};

    #[test]
    fn signed_bounds() {
        assert_eq!(saturate_signed(0x7FFF + 0x0001, 16), (0x7FFF, true));
        assert_eq!(saturate_signed(-0x8000 + -1, 16), (-0x8000, true));
        assert_eq!(saturate_signed(0x0010 + 0x0020, 16), (0x0030, false));
    }

    #[test]
    fn unsigned_bounds() {
        assert_eq!(saturate_unsigned(300, 8), (255, true));
        assert_eq!(saturate_unsigned(-5, 8), (0, true));
    }
}
