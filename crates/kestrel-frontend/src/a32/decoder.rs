use std::sync::OnceLock;

use kestrel_types::bits::bits;
use kestrel_types::a32::Reg;
use kestrel_types::Cond;

use super::translate_thumb::TranslatorVisitor;
use crate::decoder::{decode, finalize_table, Matcher};

pub type Handler = for<'a> fn(&mut TranslatorVisitor<'a>, u32) -> bool;

const WIDTH: u32 = 16;

fn low_reg(word: u32, lo: u32) -> Reg {
    Reg::from_bits(bits(word, lo + 2, lo))
}

fn m(name: &'static str, bitstring: &str, handler: Handler) -> Matcher<Handler> {
    Matcher::new(name, bitstring, WIDTH, handler)
}

pub fn thumb16_decode_table() -> &'static [Matcher<Handler>] {
    static TABLE: OnceLock<Vec<Matcher<Handler>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = vec![
            m("LSL (imm)", "00000vvvvvmmmddd", |v, w| {
                v.thumb16_lsl_imm(bits(w, 10, 6) as u8, low_reg(w, 3), low_reg(w, 0))
            }),
            m("LSR (imm)", "00001vvvvvmmmddd", |v, w| {
                v.thumb16_lsr_imm(bits(w, 10, 6) as u8, low_reg(w, 3), low_reg(w, 0))
            }),
            m("ASR (imm)", "00010vvvvvmmmddd", |v, w| {
                v.thumb16_asr_imm(bits(w, 10, 6) as u8, low_reg(w, 3), low_reg(w, 0))
            }),
            m("ADD (reg, T1)", "0001100mmmnnnddd", |v, w| {
                v.thumb16_add_reg_t1(low_reg(w, 6), low_reg(w, 3), low_reg(w, 0))
            }),
            m("LSL (reg)", "0100000010mmmddd", |v, w| {
                v.thumb16_lsl_reg(low_reg(w, 3), low_reg(w, 0))
            }),
            m("LSR (reg)", "0100000011mmmddd", |v, w| {
                v.thumb16_lsr_reg(low_reg(w, 3), low_reg(w, 0))
            }),
            m("ASR (reg)", "0100000100mmmddd", |v, w| {
                v.thumb16_asr_reg(low_reg(w, 3), low_reg(w, 0))
            }),
            m("ADD (reg, T2)", "01000100hmmmmddd", |v, w| {
                v.thumb16_add_reg_t2(
                    bits(w, 7, 7) != 0,
                    Reg::from_bits(bits(w, 6, 3)),
                    bits(w, 2, 0),
                )
            }),
            m("REVSH", "1011101011mmmddd", |v, w| {
                v.thumb16_revsh(low_reg(w, 3), low_reg(w, 0))
            }),
            m("SVC", "11011111vvvvvvvv", |v, w| v.thumb16_svc(w & 0xFF)),
            m("B (cond)", "1101ccccvvvvvvvv", |v, w| {
                v.thumb16_b_cond(Cond::from_bits(bits(w, 11, 8)), w & 0xFF)
            }),
            m("B", "11100vvvvvvvvvvv", |v, w| v.thumb16_b(w & 0x7FF)),
            m("BL/BLX (prefix)", "11110vvvvvvvvvvv", |v, w| {
                v.thumb16_bl_prefix(w & 0x7FF)
            }),
            m("BLX (suffix)", "11101xxxxxxxxxx0", |v, w| {
                v.thumb16_blx_suffix(w & 0x7FF)
            }),
            m("BL (suffix)", "11111vvvvvvvvvvv", |v, w| {
                v.thumb16_bl_suffix(w & 0x7FF)
            }),
        ];
        finalize_table(&mut table);
        table
    })
}

pub fn decode_thumb16(word: u32) -> Option<&'static Matcher<Handler>> {
    decode(thumb16_decode_table(), word)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_of(word: u32) -> &'static str {
        decode_thumb16(word).map(|m| m.name()).unwrap_or("<none>")
    }

    #[test]
    fn shift_immediates() {
        assert_eq!(name_of(0x0088), "LSL (imm)"); // lsls r0, r1, #2
        assert_eq!(name_of(0x07C8), "LSL (imm)"); // lsls r0, r1, #31
        assert_eq!(name_of(0x0888), "LSR (imm)");
        assert_eq!(name_of(0x1088), "ASR (imm)");
    }

    #[test]
    fn alu_register_forms() {
        assert_eq!(name_of(0x1888), "ADD (reg, T1)");
        assert_eq!(name_of(0x4088), "LSL (reg)");
        assert_eq!(name_of(0x40C8), "LSR (reg)");
        assert_eq!(name_of(0x4108), "ASR (reg)");
        assert_eq!(name_of(0x44F2), "ADD (reg, T2)");
    }

    #[test]
    fn misc_and_branches() {
        assert_eq!(name_of(0xBADC), "REVSH"); // revsh r4, r3
        assert_eq!(name_of(0xE7FE), "B"); // b +#0
        assert_eq!(name_of(0xD0FE), "B (cond)");
        assert_eq!(name_of(0xDF2A), "SVC");
        assert_eq!(name_of(0xF010), "BL/BLX (prefix)");
        assert_eq!(name_of(0xEC3E), "BLX (suffix)");
        assert_eq!(name_of(0xFA2A), "BL (suffix)");
    }

    #[test]
    fn the_svc_row_beats_the_conditional_branch_row() {
        // 0xDFxx is SVC, not B<nv>; the more specific mask must win.
        let svc = decode_thumb16(0xDF00).unwrap();
        assert_eq!(svc.name(), "SVC");
        assert!(svc.mask().count_ones() > 4);
    }
}
