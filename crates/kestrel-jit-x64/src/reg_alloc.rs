//! Virtual-value to host-register mapping.
//!
//! Values live in general-purpose registers and fall back to the JIT
//! state's spill array when pressure demands it; the victim is the value
//! whose next use lies furthest ahead. `rsp` and the state pointer `r15`
//! are never allocated.

use std::collections::{HashMap, VecDeque};

use kestrel_cpu_core::jit_state::SPILL_COUNT;
use kestrel_ir::{Block, InstIndex, Opcode, Value};

use crate::asm::{Assembler, Gpr, Mem};

pub const ABI_RETURN: Gpr = Gpr::Rax;
pub const ABI_PARAMS: [Gpr; 4] = [Gpr::Rdi, Gpr::Rsi, Gpr::Rdx, Gpr::Rcx];
pub const CALLER_SAVED: [Gpr; 9] = [
    Gpr::Rax,
    Gpr::Rcx,
    Gpr::Rdx,
    Gpr::Rsi,
    Gpr::Rdi,
    Gpr::R8,
    Gpr::R9,
    Gpr::R10,
    Gpr::R11,
];

const ALLOCATION_ORDER: [Gpr; 14] = [
    Gpr::Rax,
    Gpr::Rcx,
    Gpr::Rdx,
    Gpr::R8,
    Gpr::R9,
    Gpr::R10,
    Gpr::R11,
    Gpr::Rsi,
    Gpr::Rdi,
    Gpr::Rbx,
    Gpr::Rbp,
    Gpr::R12,
    Gpr::R13,
    Gpr::R14,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Loc {
    Gpr(Gpr),
    Spill(usize),
}

#[derive(Default)]
struct HostState {
    value: Option<InstIndex>,
    locked: bool,
}

#[derive(Default)]
struct ValueState {
    loc: Option<Loc>,
    next_uses: VecDeque<u32>,
}

/// An argument to a host call arranged by [`RegAlloc::host_call`].
pub enum CallArg {
    Imm64(u64),
    Value(Value),
}

/// Resolved argument values of an instruction.
pub fn argument_info(block: &Block, index: InstIndex) -> [Value; 4] {
    let mut out = [Value::Void; 4];
    let inst = block.inst(index);
    for (i, slot) in out.iter_mut().enumerate().take(inst.num_args()) {
        *slot = block.resolve(inst.arg(i));
    }
    out
}

pub struct RegAlloc {
    values: HashMap<InstIndex, ValueState>,
    hosts: [HostState; 16],
    spill_in_use: [bool; SPILL_COUNT],
    spill_offset: i32,
    current: u32,
}

impl RegAlloc {
    /// Builds the use-position table for `block`. Identity chains resolve
    /// to their producers; pseudo-operations are consumed inline by their
    /// producers and do not count as uses.
    pub fn new(block: &Block, spill_offset: i32) -> RegAlloc {
        let mut values: HashMap<InstIndex, ValueState> = HashMap::new();
        for index in block.indices() {
            let inst = block.inst(index);
            let op = inst.opcode();
            if matches!(op, Opcode::Void | Opcode::Identity) || op.is_pseudo_operation() {
                continue;
            }
            for i in 0..inst.num_args() {
                if let Value::Inst(producer) = block.resolve(inst.arg(i)) {
                    values
                        .entry(producer)
                        .or_default()
                        .next_uses
                        .push_back(index.index() as u32);
                }
            }
        }

        let mut alloc = RegAlloc {
            values,
            hosts: Default::default(),
            spill_in_use: [false; SPILL_COUNT],
            spill_offset,
            current: 0,
        };
        alloc.hosts[Gpr::Rsp as usize].locked = true;
        alloc.hosts[Gpr::R15 as usize].locked = true;
        alloc
    }

    pub fn set_current(&mut self, index: InstIndex) {
        self.current = index.index() as u32;
    }

    fn spill_mem(&self, slot: usize) -> Mem {
        Mem::base_disp(Gpr::R15, self.spill_offset + (slot * 8) as i32)
    }

    fn alloc_spill_slot(&mut self) -> usize {
        let slot = self
            .spill_in_use
            .iter()
            .position(|used| !used)
            .expect("out of spill slots");
        self.spill_in_use[slot] = true;
        slot
    }

    /// A register with no live value: a free one, or the one whose value's
    /// next use is furthest away (that value gets spilled).
    fn take_free_or_evict(&mut self, asm: &mut Assembler) -> Gpr {
        for reg in ALLOCATION_ORDER {
            let host = &self.hosts[reg as usize];
            if !host.locked && host.value.is_none() {
                return reg;
            }
        }

        let mut victim: Option<(Gpr, u32)> = None;
        for reg in ALLOCATION_ORDER {
            let host = &self.hosts[reg as usize];
            if host.locked {
                continue;
            }
            let Some(value) = host.value else { continue };
            let next_use = self.values[&value]
                .next_uses
                .front()
                .copied()
                .unwrap_or(u32::MAX);
            if victim.map_or(true, |(_, best)| next_use > best) {
                victim = Some((reg, next_use));
            }
        }
        let (reg, _) = victim.expect("all registers are locked");

        let value = self.hosts[reg as usize].value.take().unwrap();
        let slot = self.alloc_spill_slot();
        asm.mov_m_r64(self.spill_mem(slot), reg);
        self.values.get_mut(&value).unwrap().loc = Some(Loc::Spill(slot));
        reg
    }

    /// Frees a specific register, relocating any live value it holds.
    fn take_specific(&mut self, asm: &mut Assembler, target: Gpr) {
        let host = &self.hosts[target as usize];
        assert!(!host.locked, "pinned register {target:?} is already in use");
        let Some(value) = host.value else { return };

        // Prefer a register-to-register move; callee-saved homes sit at the
        // tail of the allocation order, which keeps relocated values out of
        // the way of an upcoming host call. Spill as a last resort.
        self.hosts[target as usize].locked = true;
        let mut moved = None;
        for reg in ALLOCATION_ORDER.iter().rev().copied() {
            let other = &self.hosts[reg as usize];
            if !other.locked && other.value.is_none() {
                moved = Some(reg);
                break;
            }
        }
        self.hosts[target as usize].locked = false;

        match moved {
            Some(reg) => {
                asm.mov_r64_r64(reg, target);
                self.hosts[reg as usize].value = Some(value);
                self.values.get_mut(&value).unwrap().loc = Some(Loc::Gpr(reg));
            }
            None => {
                let slot = self.alloc_spill_slot();
                asm.mov_m_r64(self.spill_mem(slot), target);
                self.values.get_mut(&value).unwrap().loc = Some(Loc::Spill(slot));
            }
        }
        self.hosts[target as usize].value = None;
    }

    fn ensure_in_host(&mut self, asm: &mut Assembler, index: InstIndex) -> Gpr {
        match self.values.get(&index).and_then(|v| v.loc) {
            Some(Loc::Gpr(reg)) => reg,
            Some(Loc::Spill(slot)) => {
                let reg = self.take_free_or_evict(asm);
                asm.mov_r64_m(reg, self.spill_mem(slot));
                self.spill_in_use[slot] = false;
                self.hosts[reg as usize].value = Some(index);
                self.values.get_mut(&index).unwrap().loc = Some(Loc::Gpr(reg));
                reg
            }
            None => panic!("use of a value that was never defined"),
        }
    }

    fn consume_use(&mut self, index: InstIndex) {
        let state = self.values.get_mut(&index).expect("untracked value");
        let position = state.next_uses.pop_front().expect("use count exhausted");
        debug_assert_eq!(position, self.current, "use consumed out of order");
    }

    fn remaining_uses(&self, index: InstIndex) -> usize {
        self.values[&index].next_uses.len()
    }

    fn materialize_imm(&mut self, asm: &mut Assembler, value: Value) -> Gpr {
        let reg = self.take_free_or_evict(asm);
        self.hosts[reg as usize].locked = true;
        match value {
            Value::U1(v) => asm.mov_r32_imm32(reg, v as u32),
            Value::U8(v) => asm.mov_r32_imm32(reg, u32::from(v)),
            Value::U16(v) => asm.mov_r32_imm32(reg, u32::from(v)),
            Value::U32(v) => asm.mov_r32_imm32(reg, v),
            Value::U64(v) => {
                if let Ok(narrow) = u32::try_from(v) {
                    asm.mov_r32_imm32(reg, narrow);
                } else {
                    asm.mov_r64_imm64(reg, v);
                }
            }
            other => panic!("{other:?} cannot be materialized"),
        }
        reg
    }

    /// A register holding `value`, read-only for this instruction scope.
    pub fn use_gpr(&mut self, asm: &mut Assembler, block: &Block, value: Value) -> Gpr {
        match block.resolve(value) {
            Value::Inst(index) => {
                let reg = self.ensure_in_host(asm, index);
                self.hosts[reg as usize].locked = true;
                self.consume_use(index);
                reg
            }
            imm => self.materialize_imm(asm, imm),
        }
    }

    /// A register holding `value` which the caller may clobber; the value
    /// is copied first if it is still needed later.
    pub fn use_scratch_gpr(&mut self, asm: &mut Assembler, block: &Block, value: Value) -> Gpr {
        match block.resolve(value) {
            Value::Inst(index) => {
                let reg = self.ensure_in_host(asm, index);
                self.consume_use(index);
                if self.remaining_uses(index) == 0 {
                    self.hosts[reg as usize].value = None;
                    self.hosts[reg as usize].locked = true;
                    self.values.get_mut(&index).unwrap().loc = None;
                    reg
                } else {
                    let was_locked = self.hosts[reg as usize].locked;
                    self.hosts[reg as usize].locked = true;
                    let scratch = self.take_free_or_evict(asm);
                    self.hosts[reg as usize].locked = was_locked;
                    self.hosts[scratch as usize].locked = true;
                    asm.mov_r64_r64(scratch, reg);
                    scratch
                }
            }
            imm => self.materialize_imm(asm, imm),
        }
    }

    /// Like [`use_scratch_gpr`], but the result lands in `target` (used to
    /// conform to calling conventions and fixed-register instructions).
    pub fn use_scratch_gpr_pinned(
        &mut self,
        asm: &mut Assembler,
        block: &Block,
        value: Value,
        target: Gpr,
    ) -> Gpr {
        let resolved = block.resolve(value);
        let Value::Inst(index) = resolved else {
            self.take_specific(asm, target);
            self.hosts[target as usize].locked = true;
            match resolved {
                Value::U1(v) => asm.mov_r32_imm32(target, v as u32),
                Value::U8(v) => asm.mov_r32_imm32(target, u32::from(v)),
                Value::U16(v) => asm.mov_r32_imm32(target, u32::from(v)),
                Value::U32(v) => asm.mov_r32_imm32(target, v),
                Value::U64(v) => asm.mov_r64_imm64(target, v),
                other => panic!("{other:?} cannot be materialized"),
            }
            return target;
        };

        if self.values.get(&index).and_then(|v| v.loc) == Some(Loc::Gpr(target)) {
            self.consume_use(index);
            if self.remaining_uses(index) == 0 {
                self.hosts[target as usize].value = None;
                self.values.get_mut(&index).unwrap().loc = None;
            } else {
                // Keep a live copy elsewhere; the pinned register is ours.
                self.hosts[target as usize].locked = true;
                let copy = self.take_free_or_evict(asm);
                asm.mov_r64_r64(copy, target);
                self.hosts[target as usize].value = None;
                self.hosts[copy as usize].value = Some(index);
                self.values.get_mut(&index).unwrap().loc = Some(Loc::Gpr(copy));
            }
            self.hosts[target as usize].locked = true;
            return target;
        }

        self.take_specific(asm, target);
        self.hosts[target as usize].locked = true;
        match self.values.get(&index).and_then(|v| v.loc) {
            Some(Loc::Gpr(reg)) => {
                asm.mov_r64_r64(target, reg);
                self.consume_use(index);
                if self.remaining_uses(index) == 0 {
                    self.hosts[reg as usize].value = None;
                    self.values.get_mut(&index).unwrap().loc = None;
                }
            }
            Some(Loc::Spill(slot)) => {
                asm.mov_r64_m(target, self.spill_mem(slot));
                self.consume_use(index);
                if self.remaining_uses(index) == 0 {
                    self.spill_in_use[slot] = false;
                    self.values.get_mut(&index).unwrap().loc = None;
                }
            }
            None => panic!("use of a value that was never defined"),
        }
        target
    }

    /// A free register owned by the caller for this instruction scope.
    pub fn scratch_gpr(&mut self, asm: &mut Assembler) -> Gpr {
        let reg = self.take_free_or_evict(asm);
        self.hosts[reg as usize].locked = true;
        reg
    }

    pub fn scratch_gpr_pinned(&mut self, asm: &mut Assembler, target: Gpr) -> Gpr {
        self.take_specific(asm, target);
        self.hosts[target as usize].locked = true;
        target
    }

    /// Records that `inst`'s result now lives in `reg`.
    pub fn define_value(&mut self, inst: InstIndex, reg: Gpr) {
        assert!(
            self.hosts[reg as usize].value.is_none(),
            "defining over a live value in {reg:?}"
        );
        self.hosts[reg as usize] = HostState {
            value: Some(inst),
            locked: true,
        };
        self.values.entry(inst).or_default().loc = Some(Loc::Gpr(reg));
    }

    /// Pass-through define: `inst`'s result is `value`.
    pub fn define_value_from(
        &mut self,
        asm: &mut Assembler,
        block: &Block,
        inst: InstIndex,
        value: Value,
    ) {
        let reg = self.use_scratch_gpr(asm, block, value);
        self.define_value(inst, reg);
    }

    /// Arranges `args` in the SysV parameter registers and frees every
    /// caller-saved register (spilling live values). The caller emits the
    /// actual `call` and, for calls with a result, defines it in
    /// [`ABI_RETURN`].
    pub fn host_call(
        &mut self,
        asm: &mut Assembler,
        block: &Block,
        args: &[CallArg],
    ) {
        assert!(args.len() <= ABI_PARAMS.len());
        for (i, arg) in args.iter().enumerate() {
            let target = ABI_PARAMS[i];
            match arg {
                CallArg::Imm64(v) => {
                    let reg = self.scratch_gpr_pinned(asm, target);
                    if let Ok(narrow) = u32::try_from(*v) {
                        asm.mov_r32_imm32(reg, narrow);
                    } else {
                        asm.mov_r64_imm64(reg, *v);
                    }
                }
                CallArg::Value(v) => {
                    self.use_scratch_gpr_pinned(asm, block, *v, target);
                }
            }
        }

        for reg in CALLER_SAVED {
            let host = &self.hosts[reg as usize];
            if host.locked {
                continue;
            }
            if host.value.is_some() {
                // Relocation lands in a callee-saved register or a spill
                // slot; parameter registers are locked by now.
                self.take_specific(asm, reg);
            }
        }

        // The return register doubles as the call-target scratch.
        if !self.hosts[ABI_RETURN as usize].locked {
            self.scratch_gpr_pinned(asm, ABI_RETURN);
        }
    }

    /// Ends the current instruction scope: locks drop, uses the emitter
    /// chose not to materialize are discarded, and values with no
    /// remaining uses release their registers and spill slots.
    pub fn end_of_scope(&mut self) {
        for reg in ALLOCATION_ORDER {
            self.hosts[reg as usize].locked = false;
        }
        for (_, state) in self.values.iter_mut() {
            while state.next_uses.front() == Some(&self.current) {
                state.next_uses.pop_front();
            }
            if state.next_uses.is_empty() {
                match state.loc.take() {
                    Some(Loc::Gpr(reg)) => self.hosts[reg as usize].value = None,
                    Some(Loc::Spill(slot)) => self.spill_in_use[slot] = false,
                    None => {}
                }
            }
        }
    }

    /// Post-block invariant: every tracked use was consumed.
    pub fn assert_no_more_uses(&self) {
        for (index, state) in &self.values {
            assert!(
                state.next_uses.is_empty(),
                "value {index:?} still has {} pending uses",
                state.next_uses.len()
            );
        }
    }
}
