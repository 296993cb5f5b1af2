use kestrel_types::Exception;

use crate::block::Block;
use crate::opcode::Opcode;
use crate::value::Value;

#[derive(Debug, Clone, Copy)]
pub struct ResultAndCarry {
    pub result: Value,
    pub carry: Value,
}

#[derive(Debug, Clone, Copy)]
pub struct ResultAndOverflow {
    pub result: Value,
    pub overflow: Value,
}

#[derive(Debug, Clone, Copy)]
pub struct ResultAndCarryAndOverflow {
    pub result: Value,
    pub carry: Value,
    pub overflow: Value,
}

/// Convenience surface for building a block of IR. Per-ISA frontends
/// implement this on their emitters to inherit the ISA-independent
/// operations; the flag-producing variants attach the matching pseudo-ops
/// to the producer.
pub trait IREmitter {
    fn block_mut(&mut self) -> &mut Block;

    fn imm1(&mut self, value: bool) -> Value {
        Value::U1(value)
    }

    fn imm8(&mut self, value: u8) -> Value {
        Value::U8(value)
    }

    fn imm16(&mut self, value: u16) -> Value {
        Value::U16(value)
    }

    fn imm32(&mut self, value: u32) -> Value {
        Value::U32(value)
    }

    fn imm64(&mut self, value: u64) -> Value {
        Value::U64(value)
    }

    // 32-bit data processing

    fn add32(&mut self, a: Value, b: Value, carry_in: Value) -> Value {
        self.block_mut().append(Opcode::Add32, &[a, b, carry_in])
    }

    fn add_with_carry32(&mut self, a: Value, b: Value, carry_in: Value) -> ResultAndCarryAndOverflow {
        let result = self.block_mut().append(Opcode::Add32, &[a, b, carry_in]);
        let carry = self.block_mut().append(Opcode::GetCarryFromOp, &[result]);
        let overflow = self.block_mut().append(Opcode::GetOverflowFromOp, &[result]);
        ResultAndCarryAndOverflow {
            result,
            carry,
            overflow,
        }
    }

    fn sub32(&mut self, a: Value, b: Value, carry_in: Value) -> Value {
        self.block_mut().append(Opcode::Sub32, &[a, b, carry_in])
    }

    fn sub_with_carry32(&mut self, a: Value, b: Value, carry_in: Value) -> ResultAndCarryAndOverflow {
        let result = self.block_mut().append(Opcode::Sub32, &[a, b, carry_in]);
        let carry = self.block_mut().append(Opcode::GetCarryFromOp, &[result]);
        let overflow = self.block_mut().append(Opcode::GetOverflowFromOp, &[result]);
        ResultAndCarryAndOverflow {
            result,
            carry,
            overflow,
        }
    }

    fn and32(&mut self, a: Value, b: Value) -> Value {
        self.block_mut().append(Opcode::And32, &[a, b])
    }

    fn or32(&mut self, a: Value, b: Value) -> Value {
        self.block_mut().append(Opcode::Or32, &[a, b])
    }

    fn eor32(&mut self, a: Value, b: Value) -> Value {
        self.block_mut().append(Opcode::Eor32, &[a, b])
    }

    fn not32(&mut self, a: Value) -> Value {
        self.block_mut().append(Opcode::Not32, &[a])
    }

    /// Shift left for address arithmetic; no flag side products.
    fn lsl32(&mut self, value: Value, shift: Value) -> Value {
        let carry_in = Value::U1(false);
        self.block_mut()
            .append(Opcode::LogicalShiftLeft32, &[value, shift, carry_in])
    }

    fn logical_shift_left32(&mut self, value: Value, shift: Value, carry_in: Value) -> ResultAndCarry {
        let result = self
            .block_mut()
            .append(Opcode::LogicalShiftLeft32, &[value, shift, carry_in]);
        let carry = self.block_mut().append(Opcode::GetCarryFromOp, &[result]);
        ResultAndCarry { result, carry }
    }

    fn logical_shift_right32(&mut self, value: Value, shift: Value, carry_in: Value) -> ResultAndCarry {
        let result = self
            .block_mut()
            .append(Opcode::LogicalShiftRight32, &[value, shift, carry_in]);
        let carry = self.block_mut().append(Opcode::GetCarryFromOp, &[result]);
        ResultAndCarry { result, carry }
    }

    fn arithmetic_shift_right32(
        &mut self,
        value: Value,
        shift: Value,
        carry_in: Value,
    ) -> ResultAndCarry {
        let result = self
            .block_mut()
            .append(Opcode::ArithmeticShiftRight32, &[value, shift, carry_in]);
        let carry = self.block_mut().append(Opcode::GetCarryFromOp, &[result]);
        ResultAndCarry { result, carry }
    }

    fn rotate_right32(&mut self, value: Value, shift: Value, carry_in: Value) -> ResultAndCarry {
        let result = self
            .block_mut()
            .append(Opcode::RotateRight32, &[value, shift, carry_in]);
        let carry = self.block_mut().append(Opcode::GetCarryFromOp, &[result]);
        ResultAndCarry { result, carry }
    }

    fn most_significant_bit(&mut self, value: Value) -> Value {
        self.block_mut().append(Opcode::MostSignificantBit, &[value])
    }

    fn is_zero32(&mut self, value: Value) -> Value {
        self.block_mut().append(Opcode::IsZero32, &[value])
    }

    fn least_significant_half(&mut self, value: Value) -> Value {
        self.block_mut().append(Opcode::LeastSignificantHalf, &[value])
    }

    fn least_significant_byte(&mut self, value: Value) -> Value {
        self.block_mut().append(Opcode::LeastSignificantByte, &[value])
    }

    fn byte_reverse_half(&mut self, value: Value) -> Value {
        self.block_mut().append(Opcode::ByteReverseHalf, &[value])
    }

    fn sign_extend_half_to_word(&mut self, value: Value) -> Value {
        self.block_mut().append(Opcode::SignExtendHalfToWord, &[value])
    }

    fn zero_extend_half_to_word(&mut self, value: Value) -> Value {
        self.block_mut().append(Opcode::ZeroExtendHalfToWord, &[value])
    }

    fn zero_extend_byte_to_word(&mut self, value: Value) -> Value {
        self.block_mut().append(Opcode::ZeroExtendByteToWord, &[value])
    }

    fn zero_extend_bit_to_word(&mut self, value: Value) -> Value {
        self.block_mut().append(Opcode::ZeroExtendBitToWord, &[value])
    }

    // 8-bit data processing

    fn add8(&mut self, a: Value, b: Value) -> Value {
        self.block_mut().append(Opcode::Add8, &[a, b])
    }

    fn add_with_carry8(&mut self, a: Value, b: Value) -> ResultAndCarry {
        let result = self.block_mut().append(Opcode::Add8, &[a, b]);
        let carry = self.block_mut().append(Opcode::GetCarryFromOp, &[result]);
        ResultAndCarry { result, carry }
    }

    fn sub8(&mut self, a: Value, b: Value) -> Value {
        self.block_mut().append(Opcode::Sub8, &[a, b])
    }

    /// 8-bit subtract; the carry side product is the not-borrow flag.
    fn sub_with_carry8(&mut self, a: Value, b: Value) -> ResultAndCarry {
        let result = self.block_mut().append(Opcode::Sub8, &[a, b]);
        let carry = self.block_mut().append(Opcode::GetCarryFromOp, &[result]);
        ResultAndCarry { result, carry }
    }

    fn and8(&mut self, a: Value, b: Value) -> Value {
        self.block_mut().append(Opcode::And8, &[a, b])
    }

    fn or8(&mut self, a: Value, b: Value) -> Value {
        self.block_mut().append(Opcode::Or8, &[a, b])
    }

    fn eor8(&mut self, a: Value, b: Value) -> Value {
        self.block_mut().append(Opcode::Eor8, &[a, b])
    }

    fn logical_shift_left8(&mut self, value: Value, shift: Value) -> ResultAndCarry {
        let result = self
            .block_mut()
            .append(Opcode::LogicalShiftLeft8, &[value, shift]);
        let carry = self.block_mut().append(Opcode::GetCarryFromOp, &[result]);
        ResultAndCarry { result, carry }
    }

    fn logical_shift_right8(&mut self, value: Value, shift: Value) -> ResultAndCarry {
        let result = self
            .block_mut()
            .append(Opcode::LogicalShiftRight8, &[value, shift]);
        let carry = self.block_mut().append(Opcode::GetCarryFromOp, &[result]);
        ResultAndCarry { result, carry }
    }

    /// Emits an 8-bit compare whose only product is the host flag state
    /// consumed by the block terminal.
    fn compare8(&mut self, a: Value, b: Value) {
        self.block_mut().append(Opcode::Sub8, &[a, b]);
    }

    // Saturating arithmetic

    fn signed_saturated_add16(&mut self, a: Value, b: Value) -> ResultAndOverflow {
        let result = self.block_mut().append(Opcode::SignedSaturatedAdd16, &[a, b]);
        let overflow = self.block_mut().append(Opcode::GetOverflowFromOp, &[result]);
        ResultAndOverflow { result, overflow }
    }

    fn signed_saturated_add32(&mut self, a: Value, b: Value) -> ResultAndOverflow {
        let result = self.block_mut().append(Opcode::SignedSaturatedAdd32, &[a, b]);
        let overflow = self.block_mut().append(Opcode::GetOverflowFromOp, &[result]);
        ResultAndOverflow { result, overflow }
    }

    fn signed_saturated_sub16(&mut self, a: Value, b: Value) -> ResultAndOverflow {
        let result = self.block_mut().append(Opcode::SignedSaturatedSub16, &[a, b]);
        let overflow = self.block_mut().append(Opcode::GetOverflowFromOp, &[result]);
        ResultAndOverflow { result, overflow }
    }

    fn signed_saturated_sub32(&mut self, a: Value, b: Value) -> ResultAndOverflow {
        let result = self.block_mut().append(Opcode::SignedSaturatedSub32, &[a, b]);
        let overflow = self.block_mut().append(Opcode::GetOverflowFromOp, &[result]);
        ResultAndOverflow { result, overflow }
    }

    fn unsigned_saturation(&mut self, value: Value, n: Value) -> ResultAndOverflow {
        let result = self.block_mut().append(Opcode::UnsignedSaturation, &[value, n]);
        let overflow = self.block_mut().append(Opcode::GetOverflowFromOp, &[result]);
        ResultAndOverflow { result, overflow }
    }

    fn get_nzcv_from(&mut self, value: Value) -> Value {
        self.block_mut().append(Opcode::GetNZCVFromOp, &[value])
    }

    // Side effects

    fn exception_raised(&mut self, pc: u32, exception: Exception) {
        let pc = Value::U32(pc);
        let kind = Value::U64(exception.as_u64());
        self.block_mut().append(Opcode::ExceptionRaised, &[pc, kind]);
    }

    fn push_rsb(&mut self, location_hash: u64) {
        let hash = Value::U64(location_hash);
        self.block_mut().append(Opcode::PushRSB, &[hash]);
    }
}
