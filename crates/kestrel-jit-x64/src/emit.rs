//! Host-code emission: the per-block walk over the IR, the terminal
//! lowering and block-linking machinery, and the patch bookkeeping shared
//! by the per-ISA backends.

use std::collections::HashMap;
use std::marker::PhantomData;

use log::debug;

use kestrel_cpu_core::block_range::BlockRangeInformation;
use kestrel_cpu_core::jit_state::RSB_PTR_MASK;
use kestrel_ir::{self as ir, Block, InstIndex, Opcode, PseudoKind, Terminal};
use kestrel_types::Cond;

use crate::asm::{Assembler, Cc, Gpr, Label, Mem};
use crate::code_block::{CodeBlock, CodeBlockError};
use crate::emit_data::emit_generic;
use crate::perf_map::PerfMap;
use crate::reg_alloc::{CallArg, RegAlloc};
use crate::stubs::Stubs;

/// Field offsets of the per-ISA JIT state, relative to the pinned state
/// pointer (`r15`).
pub struct StateOffsets {
    pub regs: i32,
    pub pc: i32,
    pub cpsr: Option<i32>,
    pub guest_mxcsr: i32,
    pub save_host_mxcsr: i32,
    pub cycles_remaining: i32,
    pub halt: i32,
    pub exclusive_state: i32,
    pub exclusive_address: i32,
    pub rsb_ptr: i32,
    pub rsb_location_descriptors: i32,
    pub rsb_codeptrs: i32,
    pub spill: i32,
}

/// Bound embedder entrypoints: a context pointer plus the thunk addresses
/// compiled code calls through. Absent callbacks are zero.
#[derive(Clone, Copy, Default)]
pub struct HostCallbacks {
    pub ctx: u64,
    pub read_memory_8: u64,
    pub read_memory_16: u64,
    pub read_memory_32: u64,
    pub read_memory_64: u64,
    pub write_memory_8: u64,
    pub write_memory_16: u64,
    pub write_memory_32: u64,
    pub write_memory_64: u64,
    pub call_svc: u64,
    pub interpreter_fallback: u64,
    pub exception_raised: u64,
}

/// A compiled block: entrypoint offset into the code region plus size.
#[derive(Debug, Clone, Copy)]
pub struct BlockDescriptor {
    pub entrypoint: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    Jg,
    Jmp,
    MovRcx,
}

/// Patch sites waiting on (or linked to) one target location.
#[derive(Default)]
struct PatchInfo {
    jg: Vec<usize>,
    jmp: Vec<usize>,
    mov_rcx: Vec<usize>,
}

impl PatchInfo {
    fn list(&mut self, kind: PatchKind) -> &mut Vec<usize> {
        match kind {
            PatchKind::Jg => &mut self.jg,
            PatchKind::Jmp => &mut self.jmp,
            PatchKind::MovRcx => &mut self.mov_rcx,
        }
    }
}

/// Everything an opcode emitter may touch during one block's emission.
pub struct EmitCtx<'s, 'buf> {
    pub asm: &'s mut Assembler<'buf>,
    pub ra: &'s mut RegAlloc,
    pub block: &'s mut Block,
    pub offsets: &'static StateOffsets,
    pub stubs: &'s Stubs,
    pub hostcb: &'s HostCallbacks,
    pub page_table: Option<u64>,
    code_base: u64,
    patch_info: &'s mut HashMap<u64, PatchInfo>,
    descriptors: &'s HashMap<u64, BlockDescriptor>,
    sites: &'s mut Vec<(u64, usize, PatchKind)>,
}

impl EmitCtx<'_, '_> {
    pub fn state_mem(&self, offset: i32) -> Mem {
        Mem::base_disp(Gpr::R15, offset)
    }

    /// The producer's pseudo-operation of `kind`, if any. The caller emits
    /// its value and then erases it with [`EmitCtx::erase`].
    pub fn pseudo(&self, producer: InstIndex, kind: PseudoKind) -> Option<InstIndex> {
        self.block.inst(producer).associated_pseudo_operation(kind)
    }

    pub fn erase(&mut self, inst: InstIndex) {
        self.block.invalidate(inst);
    }

    /// Emits a call to an embedder thunk with SysV-arranged arguments.
    pub fn host_call(&mut self, thunk: u64, args: &[CallArg]) {
        assert!(thunk != 0, "callback thunk not bound");
        self.ra.host_call(self.asm, self.block, args);
        self.asm.mov_r64_imm64(Gpr::Rax, thunk);
        self.asm.call_r64(Gpr::Rax);
    }

    fn record_site(&mut self, target: u64, offset: usize, kind: PatchKind) {
        self.patch_info
            .entry(target)
            .or_default()
            .list(kind)
            .push(offset);
        self.sites.push((target, offset, kind));
    }
}

/// The per-ISA half of the backend: state layout, location packing, guest
/// condition evaluation and the ISA-specific opcode emitters.
pub trait IsaEmit {
    /// Prefix for perf-map symbol names.
    const NAME: &'static str;

    fn offsets() -> &'static StateOffsets;

    fn location_pc(location: ir::LocationDescriptor) -> u32;

    /// Commits the architectural position `next` into the JIT state
    /// (program counter plus any mode bits that differ from `initial`).
    fn commit_location(
        asm: &mut Assembler,
        offsets: &StateOffsets,
        next: ir::LocationDescriptor,
        initial: ir::LocationDescriptor,
    );

    /// Leaves the location hash of the current architectural state in
    /// `rax` (clobbers `rcx`). Must agree with the frontend's hash.
    fn emit_rsb_location_hash(asm: &mut Assembler, offsets: &StateOffsets);

    /// Emits a guest-condition test, jumping to the returned label when the
    /// condition holds.
    fn emit_cond(asm: &mut Assembler, offsets: &StateOffsets, cond: Cond) -> Label;

    /// ISA-specific opcodes; returns false if `index` is not one.
    fn emit_inst(ctx: &mut EmitCtx, index: InstIndex) -> bool;
}

pub struct EmitX64<I: IsaEmit> {
    code: CodeBlock,
    stubs: Stubs,
    hostcb: HostCallbacks,
    page_table: Option<u64>,
    descriptors: HashMap<u64, BlockDescriptor>,
    patch_info: HashMap<u64, PatchInfo>,
    outgoing: HashMap<u64, Vec<(u64, usize, PatchKind)>>,
    block_ranges: BlockRangeInformation,
    perf_map: PerfMap,
    _isa: PhantomData<I>,
}

/// Fixed patch-site sizes; late patching overwrites them in place.
pub const PATCH_JG_SIZE: usize = 14;
pub const PATCH_JMP_SIZE: usize = 13;
pub const PATCH_MOV_RCX_SIZE: usize = 10;

// Worst-case bytes per IR instruction plus terminal overhead, used for the
// up-front capacity check.
const EMIT_SIZE_MARGIN: usize = 1024;
const EMIT_SIZE_PER_INST: usize = 128;

impl<I: IsaEmit> EmitX64<I> {
    pub fn new(
        capacity: usize,
        hostcb: HostCallbacks,
        page_table: Option<u64>,
        stub_gen: impl FnOnce(&mut CodeBlock, &HostCallbacks) -> Stubs,
    ) -> Result<EmitX64<I>, CodeBlockError> {
        let mut code = CodeBlock::new(capacity)?;
        let stubs = stub_gen(&mut code, &hostcb);
        code.prelude_complete();
        Ok(EmitX64 {
            code,
            stubs,
            hostcb,
            page_table,
            descriptors: HashMap::new(),
            patch_info: HashMap::new(),
            outgoing: HashMap::new(),
            block_ranges: BlockRangeInformation::new(),
            perf_map: PerfMap::new(),
            _isa: PhantomData,
        })
    }

    pub fn descriptor(&self, location: ir::LocationDescriptor) -> Option<BlockDescriptor> {
        self.descriptors.get(&location.value()).copied()
    }

    pub fn run_code_address(&self) -> u64 {
        self.code.address_of(self.stubs.run_code)
    }

    pub fn entrypoint_address(&self, descriptor: BlockDescriptor) -> u64 {
        self.code.address_of(descriptor.entrypoint)
    }

    /// Seals the region executable before entering guest code.
    pub fn seal(&mut self) {
        self.code.make_executable();
    }

    /// Emits host code for `block`, links waiting patch sites to it, and
    /// records its guest address range.
    pub fn emit(&mut self, block: &mut Block) -> Result<BlockDescriptor, CodeBlockError> {
        let location = block.location();
        let location_hash = location.value();
        debug_assert!(
            !self.descriptors.contains_key(&location_hash),
            "block already compiled"
        );

        self.code.make_writable();
        self.code
            .check_capacity(EMIT_SIZE_MARGIN + block.num_insts() * EMIT_SIZE_PER_INST)?;

        let code_base = self.code.address_of(0);
        let start = self.code.cursor();
        let mut sites = Vec::new();
        let entry;
        let end;
        {
            let Self {
                code,
                stubs,
                hostcb,
                page_table,
                descriptors,
                patch_info,
                ..
            } = self;
            let buf = code.buf_mut();
            let mut asm = Assembler::new(buf, start);
            asm.align(16);
            entry = asm.pos();

            let mut ra = RegAlloc::new(block, I::offsets().spill);
            let indices: Vec<InstIndex> = block.indices().collect();
            let terminal = block.terminal().clone();
            let entry_cond = block.cond();
            let cond_failed_location = block.cond_failed_location();
            let cond_failed_cycles = block.cond_failed_cycle_count();
            let cycle_count = block.cycle_count();

            let mut ctx = EmitCtx {
                asm: &mut asm,
                ra: &mut ra,
                block: &mut *block,
                offsets: I::offsets(),
                stubs: &*stubs,
                hostcb: &*hostcb,
                page_table: *page_table,
                code_base,
                patch_info: &mut *patch_info,
                descriptors: &*descriptors,
                sites: &mut sites,
            };

            // Conditional entry: on a failed condition the block falls
            // through to its alternate location instead.
            if entry_cond != Cond::Al {
                let pass = I::emit_cond(ctx.asm, ctx.offsets, entry_cond);
                emit_add_cycles(ctx.asm, ctx.offsets, cond_failed_cycles);
                let fail = cond_failed_location.expect("conditional block without fail location");
                emit_terminal::<I>(&mut ctx, &Terminal::LinkBlock { next: fail }, location);
                ctx.asm.bind(pass);
            }

            for index in indices {
                let op = ctx.block.inst(index).opcode();
                match op {
                    Opcode::Void | Opcode::Identity => continue,
                    _ if op.is_pseudo_operation() => {
                        panic!("pseudo-operation {op:?} was not consumed by its producer")
                    }
                    _ => {}
                }
                ctx.ra.set_current(index);
                if !emit_generic(&mut ctx, index) && !I::emit_inst(&mut ctx, index) {
                    panic!("no emitter for opcode {op:?}");
                }
                ctx.ra.end_of_scope();
            }
            ctx.ra.assert_no_more_uses();

            emit_add_cycles(ctx.asm, ctx.offsets, cycle_count);
            emit_terminal::<I>(&mut ctx, &terminal, location);

            end = asm.finish();
        }

        self.code.set_cursor(end);
        let descriptor = BlockDescriptor {
            entrypoint: entry,
            size: end - entry,
        };
        self.descriptors.insert(location_hash, descriptor);
        self.outgoing
            .entry(location_hash)
            .or_default()
            .extend(sites);

        let start_pc = I::location_pc(location);
        let end_pc = I::location_pc(block.end_location());
        debug_assert!(end_pc > start_pc);
        self.block_ranges
            .add_range(start_pc, end_pc - 1, location_hash);

        self.perf_map.register(
            self.code.address_of(entry),
            descriptor.size,
            &format!("{}_{:08x}", I::NAME, start_pc),
        );

        // Late linking: anyone already waiting on this location jumps
        // straight to the fresh entrypoint from now on.
        self.patch(location, Some(descriptor.entrypoint));

        debug!(
            "compiled {:?}: {} bytes at +{:#x}",
            location, descriptor.size, entry
        );
        Ok(descriptor)
    }

    /// Rewrites every patch site recorded for `target`: toward a concrete
    /// entrypoint when `Some`, back to the unlinked defaults when `None`.
    fn patch(&mut self, target: ir::LocationDescriptor, entrypoint: Option<usize>) {
        let Some(info) = self.patch_info.get(&target.value()) else {
            return;
        };
        self.code.make_writable();
        let code_base = self.code.address_of(0);
        let return_stub = self.stubs.return_from_run_code;
        let pc = I::location_pc(target);
        let pc_offset = I::offsets().pc;
        let buf = self.code.buf_mut();
        for &site in &info.jg {
            write_patch_jg(buf, site, pc, pc_offset, entrypoint, return_stub);
        }
        for &site in &info.jmp {
            write_patch_jmp(buf, site, pc, pc_offset, entrypoint, return_stub);
        }
        for &site in &info.mov_rcx {
            write_patch_mov_rcx(buf, site, code_base, entrypoint, return_stub);
        }
    }

    /// Evicts every block overlapping the written guest ranges. Incoming
    /// links revert to their unlinked defaults and the evicted blocks'
    /// own outgoing records are unlinked (in reverse emission order). The
    /// host code bytes are left orphaned until [`Self::clear_cache`].
    pub fn invalidate_cache_ranges(&mut self, ranges: &[(u32, u32)]) -> bool {
        let hashes = self.block_ranges.invalidate_ranges(ranges);
        if hashes.is_empty() {
            return false;
        }
        self.code.make_writable();
        for hash in hashes {
            let location = ir::LocationDescriptor::new(hash);
            debug!("evicting block {:?}", location);
            self.descriptors.remove(&hash);
            self.patch(location, None);
            if let Some(outgoing) = self.outgoing.remove(&hash) {
                for (target, site, kind) in outgoing.into_iter().rev() {
                    if let Some(info) = self.patch_info.get_mut(&target) {
                        info.list(kind).retain(|&s| s != site);
                    }
                    self.rewrite_default(target, site, kind);
                }
            }
        }
        true
    }

    fn rewrite_default(&mut self, target: u64, site: usize, kind: PatchKind) {
        let target = ir::LocationDescriptor::new(target);
        let pc = I::location_pc(target);
        let pc_offset = I::offsets().pc;
        let code_base = self.code.address_of(0);
        let return_stub = self.stubs.return_from_run_code;
        let buf = self.code.buf_mut();
        match kind {
            PatchKind::Jg => write_patch_jg(buf, site, pc, pc_offset, None, return_stub),
            PatchKind::Jmp => write_patch_jmp(buf, site, pc, pc_offset, None, return_stub),
            PatchKind::MovRcx => write_patch_mov_rcx(buf, site, code_base, None, return_stub),
        }
    }

    /// Drops every compiled block and rewinds the buffer to the prelude.
    pub fn clear_cache(&mut self) {
        debug!("clearing the block cache");
        self.descriptors.clear();
        self.patch_info.clear();
        self.outgoing.clear();
        self.block_ranges.clear();
        self.code.make_writable();
        self.code.reset_to_prelude();
        self.perf_map.clear();
    }
}

/// Subtracts the block's cycle count from `cycles_remaining` without
/// touching host flags: a terminal may still consume flags produced by the
/// block's final compare.
pub fn emit_add_cycles(asm: &mut Assembler, offsets: &StateOffsets, cycles: usize) {
    if cycles == 0 {
        return;
    }
    let mem = Mem::base_disp(Gpr::R15, offsets.cycles_remaining);
    asm.mov_r64_m(Gpr::Rax, mem);
    asm.lea_r64_m(
        Gpr::Rax,
        Mem::base_disp(Gpr::Rax, -(i32::try_from(cycles).unwrap())),
    );
    asm.mov_m_r64(mem, Gpr::Rax);
}

fn cond_to_cc(cond: Cond) -> Option<Cc> {
    // Mapping for conditions that can be consumed directly from live host
    // flags after a compare.
    match cond {
        Cond::Eq => Some(Cc::E),
        Cond::Ne => Some(Cc::Ne),
        _ => None,
    }
}

/// Guest-condition evaluation against live host flags (used by frontends
/// whose conditions are produced by the block's final compare).
pub fn emit_cond_from_host_flags(asm: &mut Assembler, cond: Cond) -> Label {
    let pass = asm.label();
    let cc = cond_to_cc(cond).unwrap_or_else(|| panic!("condition {cond:?} needs guest flags"));
    asm.jcc_label(cc, pass);
    pass
}

pub fn emit_terminal<I: IsaEmit>(
    ctx: &mut EmitCtx,
    terminal: &Terminal,
    initial_location: ir::LocationDescriptor,
) {
    match terminal {
        Terminal::Invalid => panic!("block terminal was never set"),
        Terminal::CheckBit { .. } => panic!("CheckBit is not emittable by this frontend"),
        Terminal::ReturnToDispatch => {
            ctx.asm.jmp_to(ctx.stubs.return_from_run_code);
        }
        Terminal::Interpret {
            next,
            num_instructions,
        } => {
            assert_eq!(*num_instructions, 1, "interpreter fallback is single-step");
            I::commit_location(ctx.asm, ctx.offsets, *next, initial_location);
            // The embedder runs with the host's MXCSR.
            ctx.asm
                .ldmxcsr_m(Mem::base_disp(Gpr::R15, ctx.offsets.save_host_mxcsr));
            ctx.asm.mov_r64_imm64(Gpr::Rdi, ctx.hostcb.ctx);
            ctx.asm.mov_r32_imm32(Gpr::Rsi, I::location_pc(*next));
            ctx.asm.mov_r32_imm32(Gpr::Rdx, *num_instructions as u32);
            ctx.asm.mov_r64_imm64(Gpr::Rax, ctx.hostcb.interpreter_fallback);
            ctx.asm.call_r64(Gpr::Rax);
            ctx.asm.jmp_to(ctx.stubs.return_no_mxcsr);
        }
        Terminal::LinkBlock { next } => {
            ctx.asm.cmp_m64_imm32(
                Mem::base_disp(Gpr::R15, ctx.offsets.cycles_remaining),
                0,
            );
            let target = ctx.descriptors.get(&next.value()).map(|d| d.entrypoint);
            let site = ctx.asm.pos();
            {
                let pc = I::location_pc(*next);
                emit_patch_jg(ctx.asm, pc, ctx.offsets.pc, target, ctx.stubs.return_from_run_code);
            }
            ctx.record_site(next.value(), site, PatchKind::Jg);
            // Cycle budget exhausted: commit the position and return.
            I::commit_location(ctx.asm, ctx.offsets, *next, initial_location);
            ctx.asm.jmp_to(ctx.stubs.return_from_run_code);
        }
        Terminal::LinkBlockFast { next } => {
            let target = ctx.descriptors.get(&next.value()).map(|d| d.entrypoint);
            let site = ctx.asm.pos();
            {
                let pc = I::location_pc(*next);
                emit_patch_jmp(ctx.asm, pc, ctx.offsets.pc, target, ctx.stubs.return_from_run_code);
            }
            ctx.record_site(next.value(), site, PatchKind::Jmp);
        }
        Terminal::PopRSBHint => {
            I::emit_rsb_location_hash(ctx.asm, ctx.offsets);
            // Pop the predicted return target and compare location hashes.
            let rsb_ptr = Mem::base_disp(Gpr::R15, ctx.offsets.rsb_ptr);
            ctx.asm.mov_r32_m(Gpr::Rcx, rsb_ptr);
            ctx.asm.sub_r32_imm32(Gpr::Rcx, 1);
            ctx.asm.and_r32_imm32(Gpr::Rcx, RSB_PTR_MASK);
            ctx.asm.mov_m_r32(rsb_ptr, Gpr::Rcx);
            ctx.asm.cmp_r64_m(
                Gpr::Rax,
                Mem::base_index_scale_disp(
                    Gpr::R15,
                    Gpr::Rcx,
                    3,
                    ctx.offsets.rsb_location_descriptors,
                ),
            );
            ctx.asm.jcc_to(Cc::Ne, ctx.stubs.return_from_run_code);
            ctx.asm.jmp_m64(Mem::base_index_scale_disp(
                Gpr::R15,
                Gpr::Rcx,
                3,
                ctx.offsets.rsb_codeptrs,
            ));
        }
        Terminal::If { cond, then_, else_ } => {
            let pass = I::emit_cond(ctx.asm, ctx.offsets, *cond);
            emit_terminal::<I>(ctx, else_, initial_location);
            ctx.asm.bind(pass);
            emit_terminal::<I>(ctx, then_, initial_location);
        }
        Terminal::CheckHalt(inner) => {
            ctx.asm
                .cmp_m8_imm8(Mem::base_disp(Gpr::R15, ctx.offsets.halt), 0);
            ctx.asm.jcc_to(Cc::Ne, ctx.stubs.return_from_run_code);
            emit_terminal::<I>(ctx, inner, initial_location);
        }
    }
}

/// `PushRSB`: stores the return location hash and predicted code pointer
/// at the head slot, then advances the masked head index. The code-pointer
/// load is a patchable 10-byte `mov rcx, imm64`.
pub fn emit_push_rsb(ctx: &mut EmitCtx, index: InstIndex) {
    let hash = ctx.block.imm_u64(ctx.block.inst(index).arg(0));
    let target = ctx.descriptors.get(&hash).map(|d| d.entrypoint);

    let code_ptr = ctx.ra.scratch_gpr_pinned(ctx.asm, Gpr::Rcx);
    let hash_reg = ctx.ra.scratch_gpr(ctx.asm);
    let head = ctx.ra.scratch_gpr(ctx.asm);

    ctx.asm
        .mov_r32_m(head, Mem::base_disp(Gpr::R15, ctx.offsets.rsb_ptr));

    let site = ctx.asm.pos();
    {
        let start = ctx.asm.pos();
        let addr = ctx.code_base + target.unwrap_or(ctx.stubs.return_from_run_code) as u64;
        ctx.asm.mov_r64_imm64(code_ptr, addr);
        ctx.asm.pad_to(start + PATCH_MOV_RCX_SIZE);
    }
    ctx.record_site(hash, site, PatchKind::MovRcx);

    ctx.asm.mov_r64_imm64(hash_reg, hash);
    ctx.asm.mov_m_r64(
        Mem::base_index_scale_disp(Gpr::R15, head, 3, ctx.offsets.rsb_location_descriptors),
        hash_reg,
    );
    ctx.asm.mov_m_r64(
        Mem::base_index_scale_disp(Gpr::R15, head, 3, ctx.offsets.rsb_codeptrs),
        code_ptr,
    );
    ctx.asm.add_r32_imm32(head, 1);
    ctx.asm.and_r32_imm32(head, RSB_PTR_MASK);
    ctx.asm
        .mov_m_r32(Mem::base_disp(Gpr::R15, ctx.offsets.rsb_ptr), head);
}

// Patch-site emission. Each helper writes its exact fixed size so a later
// rewrite can overwrite the slot in place.

fn emit_patch_jg(
    asm: &mut Assembler,
    target_pc: u32,
    pc_offset: i32,
    target: Option<usize>,
    return_stub: usize,
) {
    let start = asm.pos();
    match target {
        Some(entry) => asm.jcc_to(Cc::G, entry),
        None => {
            asm.mov_m32_imm32(Mem::base_disp(Gpr::R15, pc_offset), target_pc);
            asm.jcc_to(Cc::G, return_stub);
        }
    }
    asm.pad_to(start + PATCH_JG_SIZE);
}

fn emit_patch_jmp(
    asm: &mut Assembler,
    target_pc: u32,
    pc_offset: i32,
    target: Option<usize>,
    return_stub: usize,
) {
    let start = asm.pos();
    match target {
        Some(entry) => asm.jmp_to(entry),
        None => {
            asm.mov_m32_imm32(Mem::base_disp(Gpr::R15, pc_offset), target_pc);
            asm.jmp_to(return_stub);
        }
    }
    asm.pad_to(start + PATCH_JMP_SIZE);
}

fn write_patch_jg(
    buf: &mut [u8],
    site: usize,
    target_pc: u32,
    pc_offset: i32,
    target: Option<usize>,
    return_stub: usize,
) {
    let mut asm = Assembler::new(buf, site);
    emit_patch_jg(&mut asm, target_pc, pc_offset, target, return_stub);
    asm.finish();
}

fn write_patch_jmp(
    buf: &mut [u8],
    site: usize,
    target_pc: u32,
    pc_offset: i32,
    target: Option<usize>,
    return_stub: usize,
) {
    let mut asm = Assembler::new(buf, site);
    emit_patch_jmp(&mut asm, target_pc, pc_offset, target, return_stub);
    asm.finish();
}

fn write_patch_mov_rcx(
    buf: &mut [u8],
    site: usize,
    code_base: u64,
    target: Option<usize>,
    return_stub: usize,
) {
    let mut asm = Assembler::new(buf, site);
    let addr = code_base + target.unwrap_or(return_stub) as u64;
    asm.mov_r64_imm64(Gpr::Rcx, addr);
    asm.pad_to(site + PATCH_MOV_RCX_SIZE);
    asm.finish();
}
