use kestrel_types::{a32, chip8, Cond};

use crate::inst::{Inst, InstIndex, PseudoKind, MAX_ARGS};
use crate::location::LocationDescriptor;
use crate::opcode::Opcode;
use crate::terminal::Terminal;
use crate::types::Type;
use crate::value::Value;

/// A basic block: an arena of microinstructions in program order, the guest
/// location bounds it was lifted from, an entry condition, and a terminal.
#[derive(Debug, Clone)]
pub struct Block {
    location: LocationDescriptor,
    end_location: LocationDescriptor,
    cond: Cond,
    cond_failed_location: Option<LocationDescriptor>,
    cond_failed_cycle_count: usize,
    insts: Vec<Inst>,
    terminal: Terminal,
    cycle_count: usize,
}

impl Block {
    pub fn new(location: LocationDescriptor) -> Block {
        Block {
            location,
            end_location: location,
            cond: Cond::Al,
            cond_failed_location: None,
            cond_failed_cycle_count: 0,
            insts: Vec::new(),
            terminal: Terminal::Invalid,
            cycle_count: 0,
        }
    }

    pub fn location(&self) -> LocationDescriptor {
        self.location
    }

    pub fn end_location(&self) -> LocationDescriptor {
        self.end_location
    }

    pub fn set_end_location(&mut self, location: LocationDescriptor) {
        self.end_location = location;
    }

    pub fn cond(&self) -> Cond {
        self.cond
    }

    pub fn set_cond(&mut self, cond: Cond) {
        self.cond = cond;
    }

    pub fn cond_failed_location(&self) -> Option<LocationDescriptor> {
        self.cond_failed_location
    }

    pub fn set_cond_failed_location(&mut self, location: LocationDescriptor) {
        self.cond_failed_location = Some(location);
    }

    pub fn cond_failed_cycle_count(&self) -> usize {
        self.cond_failed_cycle_count
    }

    pub fn set_cond_failed_cycle_count(&mut self, count: usize) {
        self.cond_failed_cycle_count = count;
    }

    pub fn cycle_count(&self) -> usize {
        self.cycle_count
    }

    pub fn add_cycle(&mut self) {
        self.cycle_count += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    pub fn indices(&self) -> impl Iterator<Item = InstIndex> {
        (0..self.insts.len()).map(InstIndex::new)
    }

    pub fn inst(&self, index: InstIndex) -> &Inst {
        &self.insts[index.index()]
    }

    pub fn has_terminal(&self) -> bool {
        self.terminal != Terminal::Invalid
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    pub fn set_terminal(&mut self, terminal: Terminal) {
        assert!(!self.has_terminal(), "terminal already set");
        self.terminal = terminal;
    }

    /// Appends an instruction and returns the value it produces. Argument
    /// types are checked against the opcode registry; opaque arguments have
    /// their producer's use count bumped and pseudo-op back-links installed.
    pub fn append(&mut self, op: Opcode, args: &[Value]) -> Value {
        assert!(op.num_args() <= MAX_ARGS);
        assert_eq!(args.len(), op.num_args(), "wrong arity for {:?}", op);
        for (i, &arg) in args.iter().enumerate() {
            let actual = self.value_type(arg);
            assert!(
                actual.compatible_with(op.arg_type(i)),
                "argument {i} of {:?}: {actual:?} is not {:?}",
                op,
                op.arg_type(i)
            );
        }

        let index = InstIndex::new(self.insts.len());
        self.insts.push(Inst::new(op));
        for (i, &arg) in args.iter().enumerate() {
            self.use_value(index, op, arg);
            self.insts[index.index()].args[i] = arg;
        }
        Value::Inst(index)
    }

    /// Rewrites the instruction in place into `Identity(replacement)` so
    /// existing `Value` handles to it remain valid.
    pub fn replace_uses_with(&mut self, index: InstIndex, replacement: Value) {
        self.invalidate(index);
        self.insts[index.index()].op = Opcode::Identity;
        self.use_value(index, Opcode::Identity, replacement);
        self.insts[index.index()].args[0] = replacement;
    }

    /// Clears the instruction's arguments (releasing uses and pseudo-op
    /// links) and turns it into `Void`.
    pub fn invalidate(&mut self, index: InstIndex) {
        let op = self.insts[index.index()].op;
        for i in 0..MAX_ARGS {
            let arg = std::mem::replace(&mut self.insts[index.index()].args[i], Value::Void);
            self.undo_use(index, op, arg);
        }
        self.insts[index.index()].op = Opcode::Void;
    }

    pub fn set_arg(&mut self, index: InstIndex, n: usize, value: Value) {
        let op = self.insts[index.index()].op;
        assert!(n < op.num_args());
        assert!(self.value_type(value).compatible_with(op.arg_type(n)));
        let old = std::mem::replace(&mut self.insts[index.index()].args[n], Value::Void);
        self.undo_use(index, op, old);
        self.use_value(index, op, value);
        self.insts[index.index()].args[n] = value;
    }

    fn use_value(&mut self, user: InstIndex, user_op: Opcode, value: Value) {
        let Some(target) = value.inst() else { return };
        self.insts[target.index()].use_count += 1;
        if let Some(kind) = PseudoKind::of(user_op) {
            if kind == PseudoKind::Nzcv {
                assert!(
                    self.insts[target.index()].op.may_get_nzcv_from_op(),
                    "{:?} does not support the GetNZCVFromOp pseudo-op",
                    self.insts[target.index()].op
                );
            }
            let slot = self.insts[target.index()].pseudo_slot(kind);
            assert!(slot.is_none(), "only one of each pseudo-op kind allowed");
            *slot = Some(user);
        }
    }

    fn undo_use(&mut self, user: InstIndex, user_op: Opcode, value: Value) {
        let Some(target) = value.inst() else { return };
        self.insts[target.index()].use_count -= 1;
        if let Some(kind) = PseudoKind::of(user_op) {
            let slot = self.insts[target.index()].pseudo_slot(kind);
            assert_eq!(*slot, Some(user));
            *slot = None;
        }
    }

    /// Collapses `Identity` chains, yielding either an immediate or the
    /// index of the non-identity producing instruction.
    pub fn resolve(&self, value: Value) -> Value {
        let mut value = value;
        while let Value::Inst(index) = value {
            let inst = self.inst(index);
            if inst.op != Opcode::Identity {
                break;
            }
            value = inst.args[0];
        }
        value
    }

    pub fn is_immediate(&self, value: Value) -> bool {
        !matches!(self.resolve(value), Value::Inst(_))
    }

    pub fn value_type(&self, value: Value) -> Type {
        match self.resolve(value) {
            Value::Void => Type::empty(),
            Value::Inst(index) => {
                let op = self.inst(index).op;
                debug_assert!(op != Opcode::Identity);
                op.result_type()
            }
            Value::U1(_) => Type::U1,
            Value::U8(_) => Type::U8,
            Value::U16(_) => Type::U16,
            Value::U32(_) => Type::U32,
            Value::U64(_) => Type::U64,
            Value::Chip8Reg(_) => Type::CHIP8_REG,
            Value::A32Reg(_) => Type::A32_REG,
            Value::Cond(_) => Type::COND,
        }
    }

    pub fn imm_u1(&self, value: Value) -> bool {
        match self.resolve(value) {
            Value::U1(v) => v,
            other => panic!("expected U1 immediate, got {other:?}"),
        }
    }

    pub fn imm_u8(&self, value: Value) -> u8 {
        match self.resolve(value) {
            Value::U8(v) => v,
            other => panic!("expected U8 immediate, got {other:?}"),
        }
    }

    pub fn imm_u16(&self, value: Value) -> u16 {
        match self.resolve(value) {
            Value::U16(v) => v,
            other => panic!("expected U16 immediate, got {other:?}"),
        }
    }

    pub fn imm_u32(&self, value: Value) -> u32 {
        match self.resolve(value) {
            Value::U32(v) => v,
            other => panic!("expected U32 immediate, got {other:?}"),
        }
    }

    pub fn imm_u64(&self, value: Value) -> u64 {
        match self.resolve(value) {
            Value::U64(v) => v,
            other => panic!("expected U64 immediate, got {other:?}"),
        }
    }

    pub fn imm_chip8_reg(&self, value: Value) -> chip8::Reg {
        match self.resolve(value) {
            Value::Chip8Reg(v) => v,
            other => panic!("expected register reference, got {other:?}"),
        }
    }

    pub fn imm_a32_reg(&self, value: Value) -> a32::Reg {
        match self.resolve(value) {
            Value::A32Reg(v) => v,
            other => panic!("expected register reference, got {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> Block {
        Block::new(LocationDescriptor::new(0))
    }

    #[test]
    fn inst_types_follow_the_registry() {
        let mut b = block();
        let a = b.append(Opcode::Add8, &[Value::U8(1), Value::U8(2)]);
        assert_eq!(b.value_type(a), Type::U8);
        let w = b.append(Opcode::ZeroExtendByteToWord, &[a]);
        assert_eq!(b.value_type(w), Type::U32);
    }

    #[test]
    fn identity_takes_the_aliased_type() {
        let mut b = block();
        let a = b.append(Opcode::Add8, &[Value::U8(1), Value::U8(2)]);
        let idx = a.inst().unwrap();
        b.replace_uses_with(idx, Value::U32(7));
        assert_eq!(b.value_type(a), Type::U32);
        assert!(b.is_immediate(a));
        assert_eq!(b.imm_u32(a), 7);
    }

    #[test]
    fn replace_uses_with_is_idempotent() {
        let mut b = block();
        let a = b.append(Opcode::Add8, &[Value::U8(1), Value::U8(2)]);
        let idx = a.inst().unwrap();
        b.replace_uses_with(idx, Value::U8(3));
        b.replace_uses_with(idx, Value::U8(3));
        assert_eq!(b.imm_u8(a), 3);
    }

    #[test]
    fn use_counts_track_consumers() {
        let mut b = block();
        let a = b.append(Opcode::Add8, &[Value::U8(1), Value::U8(2)]);
        let idx = a.inst().unwrap();
        assert_eq!(b.inst(idx).use_count(), 0);
        let c = b.append(Opcode::Eor8, &[a, a]);
        assert_eq!(b.inst(idx).use_count(), 2);
        b.invalidate(c.inst().unwrap());
        assert_eq!(b.inst(idx).use_count(), 0);
    }

    #[test]
    fn pseudo_ops_link_both_ways() {
        let mut b = block();
        let sum = b.append(Opcode::Add8, &[Value::U8(0xFF), Value::U8(1)]);
        let carry = b.append(Opcode::GetCarryFromOp, &[sum]);
        let sum_idx = sum.inst().unwrap();
        let carry_idx = carry.inst().unwrap();
        assert_eq!(
            b.inst(sum_idx).associated_pseudo_operation(PseudoKind::Carry),
            Some(carry_idx)
        );
        assert_eq!(b.inst(carry_idx).arg(0), sum);
        // Erasing the pseudo-op unlinks the producer again.
        b.invalidate(carry_idx);
        assert!(!b.inst(sum_idx).has_associated_pseudo_operation());
    }

    #[test]
    #[should_panic(expected = "only one of each pseudo-op kind")]
    fn duplicate_pseudo_ops_are_rejected() {
        let mut b = block();
        let sum = b.append(Opcode::Add8, &[Value::U8(0), Value::U8(1)]);
        b.append(Opcode::GetCarryFromOp, &[sum]);
        b.append(Opcode::GetCarryFromOp, &[sum]);
    }

    #[test]
    #[should_panic(expected = "does not support the GetNZCVFromOp")]
    fn nzcv_only_attaches_to_whitelisted_producers() {
        let mut b = block();
        let shifted = b.append(
            Opcode::LogicalShiftLeft32,
            &[Value::U32(1), Value::U8(2), Value::U1(false)],
        );
        b.append(Opcode::GetNZCVFromOp, &[shifted]);
    }

    #[test]
    #[should_panic(expected = "terminal already set")]
    fn terminal_is_set_exactly_once() {
        let mut b = block();
        b.set_terminal(Terminal::ReturnToDispatch);
        b.set_terminal(Terminal::ReturnToDispatch);
    }
}
