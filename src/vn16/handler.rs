// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Instruction encoding.
//!
//! Byte layout of an instruction:
//!
//! ```text
//! +-----------------+  +------------------+  +------------------+
//! | OC4..OC0 | S | 0 |  | desc | payload.. |  | desc | payload.. |
//! +-----------------+  +------------------+  +------------------+
//!    first byte            operand 1             operand 2
//! ```
//!
//! An operand descriptor holds the addressing mode in bits 7..5 and the
//! register designator (`index << 1 | L`) in bits 4..0; `psw` uses index
//! 0xF. Payloads are 0 to 2 bytes, words little-endian.

use crate::core::elf::{R_VN_16, R_VN_PC16};
use crate::core::expr::{reloc_target, symbol_value, ExprValue};
use crate::core::number::{decode_byte, decode_word};
use crate::core::operand::{Operand, OperandSize};
use crate::core::parser::Instruction;
use crate::core::section_table::SectionTable;
use crate::core::symbol_table::{SymBind, SymbolTable};

/* Addressing modes, descriptor bits 7..5. */
pub const MODE_IMM: u8 = 0b000 << 5;
pub const MODE_REGDIR: u8 = 0b001 << 5;
pub const MODE_REGIND: u8 = 0b010 << 5;
pub const MODE_REGIND_OFF8: u8 = 0b011 << 5;
pub const MODE_REGIND_OFF16: u8 = 0b100 << 5;
pub const MODE_MEM: u8 = 0b101 << 5;

/// Register designator of `psw` (index 0xF, low bit clear).
pub const REG_PSW: u8 = 0xf << 1;
/// Register designator of `pc` (index 7, low bit clear).
pub const REG_PC: u8 = 7 << 1;

/// The first byte: `opcode << 3 | S << 2 | 0`.
pub fn opcode_byte(instr: &Instruction) -> u8 {
    let s = if instr.op_cnt == 0 {
        0
    } else {
        instr.op_size.s_bit()
    };
    (instr.code.opcode() << 3) | (s << 2)
}

/// Encoded size of an instruction, computed structurally so pass 1 never
/// has to resolve a symbol.
pub fn instruction_size(instr: &Instruction) -> Result<u16, String> {
    let mut size = 1u16;
    if instr.op_cnt >= 1 {
        size += operand_size(&instr.op1, instr.op_size)?;
    }
    if instr.op_cnt >= 2 {
        size += operand_size(&instr.op2, instr.op_size)?;
    }
    Ok(size)
}

/// Descriptor plus payload size of one operand.
///
/// Register-only shapes take 1 byte; a register-indirect with a
/// byte-decodable displacement takes 2 (1 when the displacement is zero,
/// collapsing to plain indirect); byte immediates take 2; everything
/// else takes the conservative 3-byte form.
fn operand_size(text: &str, op_size: OperandSize) -> Result<u16, String> {
    let operand =
        Operand::classify(text).ok_or_else(|| format!("invalid operand: {text}"))?;
    Ok(match operand {
        Operand::RegByte { .. }
        | Operand::RegWord(_)
        | Operand::RegPsw
        | Operand::RegInd(_) => 1,
        Operand::RegIndOff { off, .. } => match decode_byte(&off) {
            Some(0) => 1,
            Some(_) => 2,
            None => 3,
        },
        Operand::RegIndSym { .. } => 3,
        Operand::ImmLit(_) | Operand::ImmSym(_) => match op_size {
            OperandSize::Byte => 2,
            OperandSize::Word => 3,
        },
        Operand::MemAbs(_) | Operand::MemSym(_) | Operand::PcRel(_) => 3,
    })
}

/// Encoding context for pass 2: the registries plus the position of the
/// instruction being encoded.
pub struct EncodeCtx<'a> {
    pub symbols: &'a SymbolTable,
    pub sections: &'a mut SectionTable,
    /// Current section header index.
    pub shndx: u16,
    /// Location counter at the first instruction byte.
    pub loc: u16,
}

/// Encode an instruction, appending relocation records as needed, and
/// return its bytes.
pub fn encode(instr: &Instruction, ctx: &mut EncodeCtx<'_>) -> Result<Vec<u8>, String> {
    let size = instruction_size(instr)?;
    let next_instr = ctx.loc.wrapping_add(size);
    let mut bytes = vec![opcode_byte(instr)];
    if instr.op_cnt >= 1 {
        encode_operand(&instr.op1, instr.op_size, ctx, next_instr, &mut bytes)?;
    }
    if instr.op_cnt >= 2 {
        encode_operand(&instr.op2, instr.op_size, ctx, next_instr, &mut bytes)?;
    }
    if bytes.len() as u16 != size {
        return Err(format!(
            "internal: encoded {} bytes where pass 1 sized {}",
            bytes.len(),
            size
        ));
    }
    Ok(bytes)
}

fn encode_operand(
    text: &str,
    op_size: OperandSize,
    ctx: &mut EncodeCtx<'_>,
    next_instr: u16,
    bytes: &mut Vec<u8>,
) -> Result<(), String> {
    let operand =
        Operand::classify(text).ok_or_else(|| format!("invalid operand: {text}"))?;
    match operand {
        Operand::ImmLit(lit) => match op_size {
            OperandSize::Byte => {
                let value =
                    decode_byte(&lit).ok_or_else(|| format!("byte value out of range: {lit}"))?;
                bytes.push(MODE_IMM);
                bytes.push(value);
            }
            OperandSize::Word => {
                let value =
                    decode_word(&lit).ok_or_else(|| format!("word value out of range: {lit}"))?;
                bytes.push(MODE_IMM);
                push_word(bytes, value);
            }
        },
        Operand::ImmSym(sym) => {
            let value = resolve(&sym, ctx)?;
            match op_size {
                OperandSize::Byte => {
                    if !value.is_absolute() {
                        return Err(format!(
                            "byte immediate requires an absolute symbol: {sym}"
                        ));
                    }
                    let v = value.value;
                    if !(v <= 0xff || (0xff80..=0xffff).contains(&v)) {
                        return Err(format!(
                            "absolute symbol out of byte range [-128, 255]: {sym}"
                        ));
                    }
                    bytes.push(MODE_IMM);
                    bytes.push(v as u8);
                }
                OperandSize::Word => {
                    bytes.push(MODE_IMM);
                    emit_word_value(&value, ctx, bytes)?;
                }
            }
        }
        Operand::RegByte { reg, high } => {
            bytes.push(MODE_REGDIR | reg | high as u8);
        }
        Operand::RegWord(reg) => {
            bytes.push(MODE_REGDIR | reg);
        }
        Operand::RegPsw => {
            bytes.push(MODE_REGDIR | REG_PSW);
        }
        Operand::RegInd(reg) => {
            bytes.push(MODE_REGIND | reg);
        }
        Operand::RegIndOff { reg, off } => match decode_byte(&off) {
            Some(0) => bytes.push(MODE_REGIND | reg),
            Some(value) => {
                bytes.push(MODE_REGIND_OFF8 | reg);
                bytes.push(value);
            }
            None => {
                let value =
                    decode_word(&off).ok_or_else(|| format!("offset out of range: {off}"))?;
                bytes.push(MODE_REGIND_OFF16 | reg);
                push_word(bytes, value);
            }
        },
        Operand::RegIndSym { reg, sym } => {
            let value = resolve(&sym, ctx)?;
            bytes.push(MODE_REGIND_OFF16 | reg);
            emit_word_value(&value, ctx, bytes)?;
        }
        Operand::MemAbs(lit) => {
            let value =
                decode_word(&lit).ok_or_else(|| format!("address out of range: {lit}"))?;
            bytes.push(MODE_MEM);
            push_word(bytes, value);
        }
        Operand::MemSym(sym) => {
            let value = resolve(&sym, ctx)?;
            bytes.push(MODE_MEM);
            emit_word_value(&value, ctx, bytes)?;
        }
        Operand::PcRel(sym) => {
            let value = resolve(&sym, ctx)?;
            bytes.push(MODE_REGIND_OFF16 | REG_PC);
            emit_pcrel_value(&sym, &value, ctx, next_instr, bytes)?;
        }
    }
    Ok(())
}

fn resolve(sym: &str, ctx: &EncodeCtx<'_>) -> Result<ExprValue, String> {
    symbol_value(sym, ctx.symbols).ok_or_else(|| format!("undefined symbol: {sym}"))
}

/// Emit a 16-bit payload for an absolute-addressing use of a value,
/// recording an `R_VN_16` relocation when it is section-relative.
fn emit_word_value(
    value: &ExprValue,
    ctx: &mut EncodeCtx<'_>,
    bytes: &mut Vec<u8>,
) -> Result<(), String> {
    if value.is_absolute() {
        push_word(bytes, value.word());
        return Ok(());
    }
    let (target, payload) =
        reloc_target(ctx.symbols, value).map_err(|err| err.message)?;
    let offset = ctx.loc.wrapping_add(bytes.len() as u16);
    ctx.sections.add_reloc(ctx.shndx, offset, target, R_VN_16);
    push_word(bytes, payload);
    Ok(())
}

/// Emit a 16-bit PC-relative payload. A symbol local to the current
/// section resolves directly with no relocation; anything else gets an
/// `R_VN_PC16` record with the payload adjusted so the linker's
/// `S + A - P` lands on `target - next_instruction`.
fn emit_pcrel_value(
    sym: &str,
    value: &ExprValue,
    ctx: &mut EncodeCtx<'_>,
    next_instr: u16,
    bytes: &mut Vec<u8>,
) -> Result<(), String> {
    if value.is_absolute() {
        return Err(format!(
            "PC-relative addressing requires a relocatable symbol: {sym}"
        ));
    }
    let term = value
        .sym
        .and_then(|index| ctx.symbols.get(index))
        .ok_or_else(|| format!("internal: unresolved relative symbol: {sym}"))?;
    if value.shndx == ctx.shndx && term.bind != SymBind::Global {
        push_word(bytes, value.word().wrapping_sub(next_instr));
        return Ok(());
    }
    let (target, payload) =
        reloc_target(ctx.symbols, value).map_err(|err| err.message)?;
    let offset = ctx.loc.wrapping_add(bytes.len() as u16);
    ctx.sections.add_reloc(ctx.shndx, offset, target, R_VN_PC16);
    push_word(bytes, payload.wrapping_add(offset).wrapping_sub(next_instr));
    Ok(())
}

fn push_word(bytes: &mut Vec<u8>, value: u16) {
    bytes.push((value & 0xff) as u8);
    bytes.push((value >> 8) as u8);
}
