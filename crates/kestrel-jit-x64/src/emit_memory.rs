//! Guest memory access emitters: an inline page-table fast path with a
//! pre-generated slow-path accessor, or a plain host call when no page
//! table was configured.

use kestrel_cpu_core::config::{PAGE_BITS, PAGE_OFFSET_MASK};
use kestrel_ir::InstIndex;

use crate::asm::{Cc, Gpr, Mem};
use crate::emit::EmitCtx;
use crate::reg_alloc::{argument_info, CallArg};

/// Loads the host page pointer for the address in `rsi` (which stays
/// unmasked for the slow path) and returns the register holding it.
fn emit_page_lookup(ctx: &mut EmitCtx, table: u64) -> (Gpr, crate::asm::Label) {
    let page = ctx.ra.scratch_gpr(ctx.asm);
    let table_reg = ctx.ra.scratch_gpr(ctx.asm);
    ctx.asm.mov_r64_imm64(table_reg, table);
    ctx.asm.mov_r32_r32(page, Gpr::Rsi);
    ctx.asm.shr_r32_imm8(page, PAGE_BITS as u8);
    ctx.asm
        .mov_r64_m(page, Mem::base_index_scale_disp(table_reg, page, 3, 0));
    let slow = ctx.asm.label();
    ctx.asm.test_r64_r64(page, page);
    ctx.asm.jcc_label(Cc::E, slow);
    (page, slow)
}

/// Memory read. `accessor` is the pre-generated slow-path stub, `thunk`
/// the raw callback entry for the no-page-table configuration.
pub fn emit_read_memory(
    ctx: &mut EmitCtx,
    index: InstIndex,
    width_bytes: u8,
    accessor: usize,
    thunk: u64,
) {
    let args = argument_info(ctx.block, index);

    let Some(table) = ctx.page_table else {
        let ctx_ptr = ctx.hostcb.ctx;
        ctx.host_call(thunk, &[CallArg::Imm64(ctx_ptr), CallArg::Value(args[0])]);
        ctx.ra.define_value(index, Gpr::Rax);
        return;
    };

    // The accessor contract: address in rsi, result in rax, everything
    // else preserved.
    ctx.ra
        .use_scratch_gpr_pinned(ctx.asm, ctx.block, args[0], Gpr::Rsi);
    let result = ctx.ra.scratch_gpr_pinned(ctx.asm, Gpr::Rax);
    let (page, slow) = emit_page_lookup(ctx, table);
    let end = ctx.asm.label();

    ctx.asm.and_r32_imm32(Gpr::Rsi, PAGE_OFFSET_MASK);
    let host = Mem::base_index_scale_disp(page, Gpr::Rsi, 0, 0);
    match width_bytes {
        1 => ctx.asm.movzx_r32_m8(result, host),
        2 => ctx.asm.movzx_r32_m16(result, host),
        4 => ctx.asm.mov_r32_m(result, host),
        8 => ctx.asm.mov_r64_m(result, host),
        _ => unreachable!(),
    }
    ctx.asm.jmp_label(end);

    ctx.asm.bind(slow);
    ctx.asm.call_to(accessor);
    ctx.asm.bind(end);

    ctx.ra.define_value(index, result);
}

/// Memory write; address in rsi, value in rdx for the slow path.
pub fn emit_write_memory(
    ctx: &mut EmitCtx,
    index: InstIndex,
    width_bytes: u8,
    accessor: usize,
    thunk: u64,
) {
    let args = argument_info(ctx.block, index);

    let Some(table) = ctx.page_table else {
        let ctx_ptr = ctx.hostcb.ctx;
        ctx.host_call(
            thunk,
            &[
                CallArg::Imm64(ctx_ptr),
                CallArg::Value(args[0]),
                CallArg::Value(args[1]),
            ],
        );
        return;
    };

    ctx.ra
        .use_scratch_gpr_pinned(ctx.asm, ctx.block, args[0], Gpr::Rsi);
    ctx.ra
        .use_scratch_gpr_pinned(ctx.asm, ctx.block, args[1], Gpr::Rdx);
    let (page, slow) = emit_page_lookup(ctx, table);
    let end = ctx.asm.label();

    ctx.asm.and_r32_imm32(Gpr::Rsi, PAGE_OFFSET_MASK);
    let host = Mem::base_index_scale_disp(page, Gpr::Rsi, 0, 0);
    match width_bytes {
        1 => ctx.asm.mov_m8_r8(host, Gpr::Rdx),
        2 => ctx.asm.mov_m16_r16(host, Gpr::Rdx),
        4 => ctx.asm.mov_m_r32(host, Gpr::Rdx),
        8 => ctx.asm.mov_m_r64(host, Gpr::Rdx),
        _ => unreachable!(),
    }
    ctx.asm.jmp_label(end);

    ctx.asm.bind(slow);
    ctx.asm.call_to(accessor);
    ctx.asm.bind(end);
}
