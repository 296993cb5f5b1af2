use std::sync::OnceLock;

use kestrel_types::bits::bits;
use kestrel_types::chip8::Reg;

use super::translate::TranslatorVisitor;
use crate::decoder::{decode as decode_in, finalize_table, Matcher};

pub type Handler = for<'a> fn(&mut TranslatorVisitor<'a>, u32) -> bool;

const WIDTH: u32 = 16;

fn vx(word: u32) -> Reg {
    Reg::from_nibble(bits(word, 11, 8))
}

fn vy(word: u32) -> Reg {
    Reg::from_nibble(bits(word, 7, 4))
}

fn kk(word: u32) -> u8 {
    (word & 0xFF) as u8
}

fn nnn(word: u32) -> u16 {
    (word & 0xFFF) as u16
}

fn m(name: &'static str, bitstring: &str, handler: Handler) -> Matcher<Handler> {
    Matcher::new(name, bitstring, WIDTH, handler)
}

pub fn decode_table() -> &'static [Matcher<Handler>] {
    static TABLE: OnceLock<Vec<Matcher<Handler>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = vec![
            // Branch instructions
            m("RET", "0000000011101110", |v, _| v.ret()),
            m("SYS (3 nibbles)", "0000nnnnnnnnnnnn", |v, _| v.sys()),
            m("JP (3 nibbles)", "0001nnnnnnnnnnnn", |v, w| v.jp_nnn(nnn(w))),
            m("CALL (3 nibbles)", "0010nnnnnnnnnnnn", |v, w| v.call_nnn(nnn(w))),
            m("SE (Vx, byte)", "0011xxxxkkkkkkkk", |v, w| v.se_xb(vx(w), kk(w))),
            m("SNE (Vx, byte)", "0100xxxxkkkkkkkk", |v, w| v.sne_xb(vx(w), kk(w))),
            m("SE (Vx, Vy)", "0101xxxxyyyy0000", |v, w| v.se_xy(vx(w), vy(w))),
            m("SNE (Vx, Vy)", "1001xxxxyyyy0000", |v, w| v.sne_xy(vx(w), vy(w))),
            m("JP (V0, 3 nibbles)", "1011nnnnnnnnnnnn", |v, w| v.jp_v0_nnn(nnn(w))),
            m("SKP (Vx)", "1110xxxx10011110", |v, _| v.skp_x()),
            m("SKNP (Vx)", "1110xxxx10100001", |v, _| v.sknp_x()),
            // Data processing instructions
            m("ADD (Vx, byte)", "0111xxxxkkkkkkkk", |v, w| v.add_xb(vx(w), kk(w))),
            m("OR (Vx, Vy)", "1000xxxxyyyy0001", |v, w| v.or_xy(vx(w), vy(w))),
            m("AND (Vx, Vy)", "1000xxxxyyyy0010", |v, w| v.and_xy(vx(w), vy(w))),
            m("XOR (Vx, Vy)", "1000xxxxyyyy0011", |v, w| v.xor_xy(vx(w), vy(w))),
            m("ADD (Vx, Vy)", "1000xxxxyyyy0100", |v, w| v.add_xy(vx(w), vy(w))),
            m("SUB (Vx, Vy)", "1000xxxxyyyy0101", |v, w| v.sub_xy(vx(w), vy(w))),
            m("SHR (Vx)", "1000xxxx----0110", |v, w| v.shr_x(vx(w))),
            m("SUBN (Vx, Vy)", "1000xxxxyyyy0111", |v, w| v.subn_xy(vx(w), vy(w))),
            m("SHL (Vx)", "1000xxxx----1110", |v, w| v.shl_x(vx(w))),
            m("ADD (I, Vx)", "1111xxxx00011110", |v, w| v.add_ix(vx(w))),
            // Load/store instructions
            m("LD (Vx, byte)", "0110xxxxkkkkkkkk", |v, w| v.ld_xb(vx(w), kk(w))),
            m("LD (Vx, Vy)", "1000xxxxyyyy0000", |v, w| v.ld_xy(vx(w), vy(w))),
            m("LD (I, 3 nibbles)", "1010nnnnnnnnnnnn", |v, w| v.ld_innn(nnn(w))),
            m("LD (Vx, DT)", "1111xxxx00000111", |v, w| v.ld_xdt(vx(w))),
            m("LD (Vx, K)", "1111xxxx00001010", |v, _| v.ld_xk()),
            m("LD (DT, Vx)", "1111xxxx00010101", |v, w| v.ld_dtx(vx(w))),
            m("LD (ST, Vx)", "1111xxxx00011000", |v, w| v.ld_stx(vx(w))),
            m("LD (F, Vx)", "1111xxxx00101001", |v, w| v.ld_fx(vx(w))),
            // Load/store multiple instructions
            m("LD (B, Vx)", "1111xxxx00110011", |v, _| v.ld_bx()),
            m("LD (I[], Vx)", "1111xxxx01010101", |v, w| v.ld_ix(vx(w))),
            m("LD (Vx, I[])", "1111xxxx01100101", |v, w| v.ld_xi(vx(w))),
            // Miscellaneous instructions
            m("CLS", "0000000011100000", |v, w| v.cls(w)),
            m("RND (Vx, byte)", "1100xxxxkkkkkkkk", |v, _| v.rnd_xb()),
            m("DRW (Vx, Vy, nibble)", "1101xxxxyyyynnnn", |v, w| v.drw_xyn(w)),
        ];
        finalize_table(&mut table);
        table
    })
}

pub fn decode(word: u32) -> Option<&'static Matcher<Handler>> {
    decode_in(decode_table(), word)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_of(word: u32) -> &'static str {
        decode(word).map(|m| m.name()).unwrap_or("<none>")
    }

    #[test]
    fn specific_zero_page_encodings_beat_sys() {
        assert_eq!(name_of(0x00EE), "RET");
        assert_eq!(name_of(0x00E0), "CLS");
        assert_eq!(name_of(0x0123), "SYS (3 nibbles)");
    }

    #[test]
    fn alu_rows_dispatch_on_the_low_nibble() {
        assert_eq!(name_of(0x8120), "LD (Vx, Vy)");
        assert_eq!(name_of(0x8121), "OR (Vx, Vy)");
        assert_eq!(name_of(0x8122), "AND (Vx, Vy)");
        assert_eq!(name_of(0x8123), "XOR (Vx, Vy)");
        assert_eq!(name_of(0x8124), "ADD (Vx, Vy)");
        assert_eq!(name_of(0x8125), "SUB (Vx, Vy)");
        assert_eq!(name_of(0x8128), "<none>");
    }

    #[test]
    fn shift_rows_ignore_the_y_field() {
        assert_eq!(name_of(0x8106), "SHR (Vx)");
        assert_eq!(name_of(0x81F6), "SHR (Vx)");
        assert_eq!(name_of(0x810E), "SHL (Vx)");
        assert_eq!(name_of(0x81FE), "SHL (Vx)");
    }

    #[test]
    fn fx_rows_need_the_full_low_byte() {
        assert_eq!(name_of(0xF107), "LD (Vx, DT)");
        assert_eq!(name_of(0xF11E), "ADD (I, Vx)");
        assert_eq!(name_of(0xF155), "LD (I[], Vx)");
        assert_eq!(name_of(0xF1FF), "<none>");
    }

    #[test]
    fn branch_rows() {
        assert_eq!(name_of(0x1234), "JP (3 nibbles)");
        assert_eq!(name_of(0xB234), "JP (V0, 3 nibbles)");
        assert_eq!(name_of(0x2206), "CALL (3 nibbles)");
        assert_eq!(name_of(0x3A55), "SE (Vx, byte)");
        assert_eq!(name_of(0xE19E), "SKP (Vx)");
        assert_eq!(name_of(0xE1A1), "SKNP (Vx)");
    }
}
