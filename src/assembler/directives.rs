// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Directive processing, shared between the passes.
//!
//! Pass 1 performs the symbol/section bookkeeping and advances the
//! location counter by structurally computed sizes; pass 2 re-processes
//! the directives whose effect is deferred (`.global` promotion, data
//! emission, fill bytes) and must advance the LC identically.

use crate::core::assembler::error::{AsmError, AsmErrorKind};
use crate::core::elf::SHN_UNDEF;
use crate::core::expr::{self, Evaluation, ExprValue};
use crate::core::lexer::{split_on_commas, tokenize_expression};
use crate::core::number::{decode_byte, decode_word};
use crate::core::parser::{Directive, DirectiveCode};
use crate::core::text_utils::is_symbol;

use super::{Assembler, Flow, Pass};

impl Assembler {
    pub(super) fn process_directive(
        &mut self,
        dir: &Directive,
        line_num: u32,
    ) -> Result<Flow, AsmError> {
        match dir.code {
            DirectiveCode::Global => self.dir_global(dir),
            DirectiveCode::Extern => self.dir_extern(dir),
            DirectiveCode::Equ => self.dir_equ(dir, line_num, false),
            DirectiveCode::Set => self.dir_equ(dir, line_num, true),
            DirectiveCode::Text => self.switch_section(".text", None),
            DirectiveCode::Data => self.switch_section(".data", None),
            DirectiveCode::Bss => self.switch_section(".bss", None),
            DirectiveCode::Section => {
                let flags = if dir.p2.is_empty() {
                    None
                } else {
                    Some(dir.p2.as_str())
                };
                self.switch_section(&dir.p1, flags)
            }
            DirectiveCode::End => {
                self.save_section_state();
                self.shndx = 0;
                self.loc = 0;
                Ok(Flow::End)
            }
            DirectiveCode::Byte => self.dir_data(dir, 1),
            DirectiveCode::Word => self.dir_data(dir, 2),
            DirectiveCode::Align => self.dir_align(dir),
            DirectiveCode::Skip => self.dir_skip(dir),
        }
    }

    fn dir_global(&mut self, dir: &Directive) -> Result<Flow, AsmError> {
        if self.pass == Pass::First {
            return Ok(Flow::Continue);
        }
        for name in split_on_commas(&dir.p1) {
            if !is_symbol(&name) {
                return Err(AsmError::new(
                    AsmErrorKind::Symbol,
                    format!("invalid symbol name in .global: {name}"),
                ));
            }
            self.symbols
                .declare_global(&name)
                .map_err(|err| AsmError::new(AsmErrorKind::Symbol, err))?;
        }
        Ok(Flow::Continue)
    }

    fn dir_extern(&mut self, dir: &Directive) -> Result<Flow, AsmError> {
        if self.pass == Pass::Second {
            return Ok(Flow::Continue);
        }
        for name in split_on_commas(&dir.p1) {
            if !is_symbol(&name) {
                return Err(AsmError::new(
                    AsmErrorKind::Symbol,
                    format!("invalid symbol name in .extern: {name}"),
                ));
            }
            self.symbols.declare_extern(&name);
        }
        Ok(Flow::Continue)
    }

    /// `.equ` (single assignment) and `.set` (reassignable).
    fn dir_equ(&mut self, dir: &Directive, line_num: u32, is_set: bool) -> Result<Flow, AsmError> {
        if self.pass == Pass::Second {
            return Ok(Flow::Continue);
        }
        let name = dir.p1.as_str();
        let index = match self.symbols.index_of(name) {
            Some(index) => {
                let entry = self.symbols.get(index).ok_or_else(|| {
                    AsmError::new(AsmErrorKind::Assembler, "internal: symbol index out of range")
                })?;
                if !entry.is_equ || !is_set {
                    return Err(AsmError::new(
                        AsmErrorKind::Symbol,
                        format!("symbol already in use: {name}"),
                    ));
                }
                // .set overwrites: any evaluation still pending is stale.
                self.deferred.retain(|pending| pending.name != name);
                index
            }
            None => self.symbols.add_equ(name),
        };

        let tokens = tokenize_expression(&dir.p2).ok_or_else(|| {
            AsmError::new(
                AsmErrorKind::Expression,
                format!("malformed expression: {}", dir.p2),
            )
        })?;
        // Evaluate before touching the entry so a `.set` like
        // `.set k, k + 1` reads the previous value.
        match expr::evaluate(&tokens, &self.symbols) {
            Ok(Evaluation::Value(value)) => {
                expr::apply_equ_value(&mut self.symbols, index, &value)
                    .map_err(|err| AsmError::new(AsmErrorKind::Expression, err.message))?;
            }
            Ok(Evaluation::Undefined(_)) => {
                if let Some(entry) = self.symbols.get_mut(index) {
                    entry.value = 0;
                    entry.shndx = SHN_UNDEF;
                    entry.reloc_base = None;
                }
                self.deferred.push(expr::DeferredEqu {
                    name: name.to_string(),
                    tokens,
                    line_num,
                });
            }
            Err(err) => {
                return Err(AsmError::new(AsmErrorKind::Expression, err.message));
            }
        }
        Ok(Flow::Continue)
    }

    fn switch_section(&mut self, name: &str, flags: Option<&str>) -> Result<Flow, AsmError> {
        self.save_section_state();
        let index = match self.pass {
            Pass::First => self
                .sections
                .enter_or_create(name, flags, &mut self.symbols)
                .map_err(|err| AsmError::new(AsmErrorKind::Directive, err))?,
            Pass::Second => self.sections.index_of(name).ok_or_else(|| {
                AsmError::new(
                    AsmErrorKind::Assembler,
                    format!("internal: section vanished between passes: {name}"),
                )
            })?,
        };
        self.shndx = index;
        self.loc = self
            .sections
            .get(index)
            .map(|section| section.loc_cnt)
            .unwrap_or(0);
        Ok(Flow::Continue)
    }

    /// `.byte` (width 1) and `.word` (width 2).
    fn dir_data(&mut self, dir: &Directive, width: u16) -> Result<Flow, AsmError> {
        let directive = if width == 1 { ".byte" } else { ".word" };
        let section = self
            .sections
            .get(self.shndx)
            .filter(|_| self.shndx != 0)
            .ok_or_else(|| {
                AsmError::new(
                    AsmErrorKind::Directive,
                    format!("{directive} outside of any section"),
                )
            })?;
        if section.is_executable() {
            return Err(AsmError::new(
                AsmErrorKind::Directive,
                format!("data directive in executable section {}", section.name),
            ));
        }
        let nobits = section.is_nobits();

        let fields = split_on_commas(&dir.p1);
        if self.pass == Pass::First {
            self.loc = self.loc.wrapping_add(width * fields.len() as u16);
            return Ok(Flow::Continue);
        }

        for field in &fields {
            let tokens = tokenize_expression(field).ok_or_else(|| {
                AsmError::new(
                    AsmErrorKind::Expression,
                    format!("malformed expression: {field}"),
                )
            })?;
            let value = match expr::evaluate(&tokens, &self.symbols) {
                Ok(Evaluation::Value(value)) => value,
                Ok(Evaluation::Undefined(name)) => {
                    return Err(AsmError::new(
                        AsmErrorKind::Symbol,
                        format!("undefined symbol: {name}"),
                    ));
                }
                Err(err) => {
                    return Err(AsmError::new(AsmErrorKind::Expression, err.message));
                }
            };
            if width == 1 {
                self.emit_data_byte(field, &value, nobits)?;
            } else {
                self.emit_data_word(field, &value, nobits)?;
            }
        }
        Ok(Flow::Continue)
    }

    fn emit_data_byte(
        &mut self,
        field: &str,
        value: &ExprValue,
        nobits: bool,
    ) -> Result<(), AsmError> {
        if !value.is_absolute() {
            return Err(AsmError::new(
                AsmErrorKind::Relocation,
                format!("byte data cannot hold a relocatable value: {field}"),
            ));
        }
        let v = value.value;
        if !((-0x80..=0xff).contains(&v) || (0xff80..=0xffff).contains(&v)) {
            return Err(AsmError::new(
                AsmErrorKind::Number,
                format!("byte value out of range: {field}"),
            ));
        }
        let byte = v as u8;
        if nobits && byte != 0 {
            return Err(AsmError::new(
                AsmErrorKind::Directive,
                format!("nonzero data in NOBITS section: {field}"),
            ));
        }
        self.emit_bytes(&[byte])
    }

    fn emit_data_word(
        &mut self,
        field: &str,
        value: &ExprValue,
        nobits: bool,
    ) -> Result<(), AsmError> {
        if value.is_absolute() {
            let word = value.word();
            if nobits && word != 0 {
                return Err(AsmError::new(
                    AsmErrorKind::Directive,
                    format!("nonzero data in NOBITS section: {field}"),
                ));
            }
            return self.emit_bytes(&[(word & 0xff) as u8, (word >> 8) as u8]);
        }
        if nobits {
            return Err(AsmError::new(
                AsmErrorKind::Directive,
                format!("nonzero data in NOBITS section: {field}"),
            ));
        }
        let (target, payload) = expr::reloc_target(&self.symbols, value)
            .map_err(|err| AsmError::new(AsmErrorKind::Relocation, err.message))?;
        self.sections
            .add_reloc(self.shndx, self.loc, target, crate::core::elf::R_VN_16);
        self.emit_bytes(&[(payload & 0xff) as u8, (payload >> 8) as u8])
    }

    fn dir_align(&mut self, dir: &Directive) -> Result<Flow, AsmError> {
        if self.shndx == 0 {
            return Err(AsmError::new(
                AsmErrorKind::Directive,
                ".align outside of any section",
            ));
        }
        let n = decode_byte(&dir.p1).ok_or_else(|| {
            AsmError::new(
                AsmErrorKind::Number,
                format!("malformed .align count: {}", dir.p1),
            )
        })?;
        if n == 0 || !n.is_power_of_two() {
            return Err(AsmError::new(
                AsmErrorKind::Directive,
                format!(".align requires a power of two: {}", dir.p1),
            ));
        }
        let fill = decode_byte(&dir.p2).ok_or_else(|| {
            AsmError::new(
                AsmErrorKind::Number,
                format!("malformed .align fill: {}", dir.p2),
            )
        })?;
        let max = if dir.p3.is_empty() {
            n as u16
        } else {
            decode_byte(&dir.p3).ok_or_else(|| {
                AsmError::new(
                    AsmErrorKind::Number,
                    format!("malformed .align maximum: {}", dir.p3),
                )
            })? as u16
        };

        let n = n as u16;
        let padding = (n - (self.loc % n)) % n;
        if padding > max {
            return Err(AsmError::new(
                AsmErrorKind::Directive,
                format!(".align padding of {padding} exceeds maximum {max}"),
            ));
        }
        match self.pass {
            Pass::First => {
                self.loc = self.loc.wrapping_add(padding);
            }
            Pass::Second => {
                self.emit_bytes(&vec![fill; padding as usize])?;
            }
        }
        Ok(Flow::Continue)
    }

    fn dir_skip(&mut self, dir: &Directive) -> Result<Flow, AsmError> {
        if self.shndx == 0 {
            return Err(AsmError::new(
                AsmErrorKind::Directive,
                ".skip outside of any section",
            ));
        }
        let count = decode_word(&dir.p1).ok_or_else(|| {
            AsmError::new(
                AsmErrorKind::Number,
                format!("malformed .skip count: {}", dir.p1),
            )
        })?;
        let fill = decode_byte(&dir.p2).ok_or_else(|| {
            AsmError::new(
                AsmErrorKind::Number,
                format!("malformed .skip fill: {}", dir.p2),
            )
        })?;
        match self.pass {
            Pass::First => {
                self.loc = self.loc.wrapping_add(count);
            }
            Pass::Second => {
                self.emit_bytes(&vec![fill; count as usize])?;
            }
        }
        Ok(Flow::Continue)
    }
}
