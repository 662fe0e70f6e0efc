// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Parser: lifts one source line into a structured [`Line`].
//!
//! Directive parameters are preserved verbatim; the directive handler
//! decodes them per pass. Instruction operands are validated against the
//! per-mnemonic grammar here so that both passes can trust their shape.

use crate::core::lexer::{split_on_commas, tokenize_line};
use crate::core::number::{decode_byte, decode_word};
use crate::core::operand::{Operand, OperandClass, OperandSize};
use crate::core::text_utils::is_symbol;
use crate::vn16::instructions::{self, class_bit, InstrCode, InstrSpec};

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveCode {
    Global,
    Extern,
    Equ,
    Set,
    Text,
    Data,
    Bss,
    Section,
    End,
    Byte,
    Word,
    Align,
    Skip,
}

impl DirectiveCode {
    pub fn name(self) -> &'static str {
        match self {
            DirectiveCode::Global => "global",
            DirectiveCode::Extern => "extern",
            DirectiveCode::Equ => "equ",
            DirectiveCode::Set => "set",
            DirectiveCode::Text => "text",
            DirectiveCode::Data => "data",
            DirectiveCode::Bss => "bss",
            DirectiveCode::Section => "section",
            DirectiveCode::End => "end",
            DirectiveCode::Byte => "byte",
            DirectiveCode::Word => "word",
            DirectiveCode::Align => "align",
            DirectiveCode::Skip => "skip",
        }
    }
}

/// A directive with its raw textual parameters.
#[derive(Debug, Clone)]
pub struct Directive {
    pub code: DirectiveCode,
    pub p1: String,
    pub p2: String,
    pub p3: String,
}

/// A validated instruction with its raw operand texts.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub code: InstrCode,
    pub op_size: OperandSize,
    pub op_cnt: u8,
    pub op1: String,
    pub op2: String,
}

#[derive(Debug, Clone)]
pub enum LineContent {
    None,
    Directive(Directive),
    Instruction(Instruction),
}

/// One parsed source line: optional label plus optional content.
#[derive(Debug, Clone)]
pub struct Line {
    pub label: String,
    pub content: LineContent,
}

impl Line {
    pub fn is_empty(&self) -> bool {
        self.label.is_empty() && matches!(self.content, LineContent::None)
    }
}

/// Parse one source line.
pub fn parse_line(src: &str) -> Result<Line, ParseError> {
    let tokens = tokenize_line(src);
    let label = tokens.label.unwrap_or_default();
    let content = match tokens.content {
        None => LineContent::None,
        Some(content) => {
            if let Some(rest) = content.strip_prefix('.') {
                LineContent::Directive(parse_directive(rest)?)
            } else {
                LineContent::Instruction(parse_instruction(&content)?)
            }
        }
    };
    Ok(Line { label, content })
}

/// Parse directive content, without the leading dot.
fn parse_directive(content: &str) -> Result<Directive, ParseError> {
    let content = content.trim();
    let name_end = content
        .bytes()
        .position(|c| !c.is_ascii_alphabetic())
        .unwrap_or(content.len());
    let name = content[..name_end].to_ascii_lowercase();
    let rest = content[name_end..].trim();

    let dir = |code| Directive {
        code,
        p1: String::new(),
        p2: String::new(),
        p3: String::new(),
    };

    match name.as_str() {
        "global" | "extern" | "byte" | "word" => {
            if rest.is_empty() {
                return Err(ParseError::new(format!(".{name} requires parameters")));
            }
            let code = match name.as_str() {
                "global" => DirectiveCode::Global,
                "extern" => DirectiveCode::Extern,
                "byte" => DirectiveCode::Byte,
                _ => DirectiveCode::Word,
            };
            let mut dir = dir(code);
            dir.p1 = rest.to_string();
            Ok(dir)
        }
        "equ" | "set" => {
            let (sym, expr) = rest
                .split_once(',')
                .ok_or_else(|| ParseError::new(format!(".{name} requires NAME, EXPR")))?;
            let sym = sym.trim();
            let expr = expr.trim();
            if !is_symbol(sym) {
                return Err(ParseError::new(format!("invalid symbol name: {sym}")));
            }
            if expr.is_empty() {
                return Err(ParseError::new(format!(".{name} requires an expression")));
            }
            let mut dir = dir(if name == "equ" {
                DirectiveCode::Equ
            } else {
                DirectiveCode::Set
            });
            dir.p1 = sym.to_string();
            dir.p2 = expr.to_string();
            Ok(dir)
        }
        "text" | "data" | "bss" | "end" => {
            if !rest.is_empty() {
                return Err(ParseError::new(format!(".{name} takes no parameters")));
            }
            Ok(dir(match name.as_str() {
                "text" => DirectiveCode::Text,
                "data" => DirectiveCode::Data,
                "bss" => DirectiveCode::Bss,
                _ => DirectiveCode::End,
            }))
        }
        "section" => {
            let (sect, flags) = match rest.split_once(',') {
                Some((sect, flags)) => (sect.trim(), Some(flags.trim())),
                None => (rest, None),
            };
            if !is_symbol(sect) {
                return Err(ParseError::new(format!("invalid section name: {sect}")));
            }
            let mut dir = dir(DirectiveCode::Section);
            dir.p1 = sect.to_string();
            if let Some(flags) = flags {
                let inner = flags
                    .strip_prefix('"')
                    .and_then(|f| f.strip_suffix('"'))
                    .ok_or_else(|| {
                        ParseError::new("section flags must be a quoted string")
                    })?;
                dir.p2 = inner.to_string();
            }
            Ok(dir)
        }
        "align" | "skip" => {
            let fields = split_on_commas(rest);
            let max_fields = if name == "align" { 3 } else { 2 };
            if rest.is_empty() || fields.len() > max_fields {
                return Err(ParseError::new(format!("malformed .{name} parameters")));
            }
            if fields.iter().any(|field| field.is_empty()) {
                return Err(ParseError::new(format!("malformed .{name} parameters")));
            }
            let mut dir = dir(if name == "align" {
                DirectiveCode::Align
            } else {
                DirectiveCode::Skip
            });
            dir.p1 = fields[0].clone();
            if fields.len() > 1 {
                dir.p2 = fields[1].clone();
            }
            if fields.len() > 2 {
                dir.p3 = fields[2].clone();
            }
            Ok(dir)
        }
        _ => Err(ParseError::new(format!("unknown directive: .{name}"))),
    }
}

/// Parse and validate instruction content.
fn parse_instruction(content: &str) -> Result<Instruction, ParseError> {
    let content = content.trim();
    let mn_end = content
        .bytes()
        .position(|c| !c.is_ascii_alphabetic())
        .unwrap_or(content.len());
    let mnemonic = content[..mn_end].to_ascii_lowercase();
    let rest = content[mn_end..].trim();
    if mnemonic.is_empty() {
        return Err(ParseError::new(format!("unrecognizable content: {content}")));
    }

    if let Some(code) = instructions::lookup_pseudo(&mnemonic) {
        if !rest.is_empty() {
            return Err(ParseError::new(format!("{mnemonic} takes no operands")));
        }
        return Ok(Instruction {
            code,
            op_size: OperandSize::Word,
            op_cnt: 1,
            op1: "psw".to_string(),
            op2: String::new(),
        });
    }

    let (spec, op_size) = resolve_mnemonic(&mnemonic)
        .ok_or_else(|| ParseError::new(format!("unknown instruction: {mnemonic}")))?;

    if spec.op_cnt == 0 {
        if !rest.is_empty() {
            return Err(ParseError::new(format!(
                "{} takes no operands",
                spec.mnemonic
            )));
        }
        return Ok(Instruction {
            code: spec.code,
            op_size,
            op_cnt: 0,
            op1: String::new(),
            op2: String::new(),
        });
    }

    let fields = split_on_commas(rest);
    if rest.is_empty()
        || fields.len() != spec.op_cnt as usize
        || fields.iter().any(|field| field.is_empty())
    {
        return Err(ParseError::new(format!(
            "{} expects {} operand(s)",
            spec.mnemonic, spec.op_cnt
        )));
    }

    let op1 = validate_operand(spec, &fields[0], spec.op1, op_size)?;
    if spec.op_cnt > 1 {
        let op2 = validate_operand(spec, &fields[1], spec.op2, op_size)?;
        if op1.class() == OperandClass::Mem && op2.class() == OperandClass::Mem {
            return Err(ParseError::new(format!(
                "{} cannot take two memory operands",
                spec.mnemonic
            )));
        }
    }

    Ok(Instruction {
        code: spec.code,
        op_size,
        op_cnt: spec.op_cnt,
        op1: fields[0].clone(),
        op2: fields.get(1).cloned().unwrap_or_default(),
    })
}

/// Resolve a mnemonic to its table entry and operand width, honoring the
/// optional `b`/`w` suffix on width-accepting instructions.
fn resolve_mnemonic(mnemonic: &str) -> Option<(&'static InstrSpec, OperandSize)> {
    if let Some(spec) = instructions::lookup(mnemonic) {
        let size = if spec.sized {
            OperandSize::Word
        } else {
            spec.fixed_size
        };
        return Some((spec, size));
    }
    let (base, size) = match mnemonic.as_bytes().last().copied() {
        Some(b'b') => (&mnemonic[..mnemonic.len() - 1], OperandSize::Byte),
        Some(b'w') => (&mnemonic[..mnemonic.len() - 1], OperandSize::Word),
        _ => return None,
    };
    let spec = instructions::lookup(base)?;
    if !spec.sized {
        return None;
    }
    Some((spec, size))
}

fn validate_operand(
    spec: &InstrSpec,
    text: &str,
    mask: u8,
    op_size: OperandSize,
) -> Result<Operand, ParseError> {
    let operand = Operand::classify(text)
        .ok_or_else(|| ParseError::new(format!("invalid operand: {text}")))?;
    if class_bit(operand.class()) & mask == 0 {
        return Err(ParseError::new(format!(
            "operand not allowed for {}: {text}",
            spec.mnemonic
        )));
    }
    match &operand {
        Operand::RegPsw => {
            if !matches!(spec.code, InstrCode::Push | InstrCode::Pop) {
                return Err(ParseError::new("psw is only addressable via push/pop"));
            }
            if op_size != OperandSize::Word {
                return Err(ParseError::new("psw is a word register"));
            }
        }
        Operand::RegByte { .. } => {
            if op_size != OperandSize::Byte {
                return Err(ParseError::new(format!(
                    "byte register in word instruction: {text}"
                )));
            }
        }
        Operand::RegWord(_) => {
            if op_size != OperandSize::Word {
                return Err(ParseError::new(format!(
                    "word register in byte instruction: {text}"
                )));
            }
        }
        Operand::ImmLit(lit) => {
            let valid = match op_size {
                OperandSize::Byte => decode_byte(lit).is_some(),
                OperandSize::Word => decode_word(lit).is_some(),
            };
            if !valid {
                return Err(ParseError::new(format!("immediate out of range: {lit}")));
            }
        }
        _ => {}
    }
    Ok(operand)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Line {
        parse_line(src).expect(src)
    }

    fn instr(src: &str) -> Instruction {
        match parse(src).content {
            LineContent::Instruction(instr) => instr,
            other => panic!("expected instruction for {src}, got {other:?}"),
        }
    }

    fn directive(src: &str) -> Directive {
        match parse(src).content {
            LineContent::Directive(dir) => dir,
            other => panic!("expected directive for {src}, got {other:?}"),
        }
    }

    #[test]
    fn empty_and_label_lines() {
        assert!(parse("").is_empty());
        assert!(parse("  # comment").is_empty());
        let line = parse("start:");
        assert_eq!(line.label, "start");
        assert!(matches!(line.content, LineContent::None));
    }

    #[test]
    fn width_suffix_defaults_to_word() {
        assert_eq!(instr("not r0").op_size, OperandSize::Word);
        assert_eq!(instr("notw r0").op_size, OperandSize::Word);
        assert_eq!(instr("notb r0l").op_size, OperandSize::Byte);
    }

    #[test]
    fn zero_address_instructions() {
        let halt = instr("halt");
        assert_eq!(halt.code, InstrCode::Halt);
        assert_eq!(halt.op_cnt, 0);
        assert_eq!(halt.op_size, OperandSize::Byte);
        assert!(parse_line("halt r0").is_err());
    }

    #[test]
    fn int_takes_byte_immediate() {
        let int = instr("int 3");
        assert_eq!(int.op_size, OperandSize::Byte);
        assert!(parse_line("int 0x100").is_err());
        assert!(parse_line("int r0").is_err());
        assert!(parse_line("intb 3").is_err());
    }

    #[test]
    fn pseudo_ops_expand_to_psw() {
        let pushf = instr("pushf");
        assert_eq!(pushf.code, InstrCode::Push);
        assert_eq!(pushf.op_cnt, 1);
        assert_eq!(pushf.op1, "psw");
        assert_eq!(pushf.op_size, OperandSize::Word);

        let popf = instr("popf");
        assert_eq!(popf.code, InstrCode::Pop);
        assert!(parse_line("pushf r0").is_err());
    }

    #[test]
    fn psw_restricted_to_push_pop() {
        assert!(parse_line("push psw").is_ok());
        assert!(parse_line("mov r0, psw").is_err());
    }

    #[test]
    fn operand_shape_validation() {
        assert!(parse_line("jmp 5").is_err());
        assert!(parse_line("jmp *0x100").is_ok());
        assert!(parse_line("mov 5, r0").is_err());
        assert!(parse_line("mov [r0], [r1]").is_err());
        assert!(parse_line("pop 5").is_err());
        assert!(parse_line("push 5").is_ok());
        assert!(parse_line("not &x").is_err());
    }

    #[test]
    fn register_width_agreement() {
        assert!(parse_line("movb r0l, r1h").is_ok());
        assert!(parse_line("movb r0, r1").is_err());
        assert!(parse_line("mov r0l, r1").is_err());
    }

    #[test]
    fn directive_shapes() {
        let equ = directive(".equ limit, 2 * 8");
        assert_eq!(equ.code, DirectiveCode::Equ);
        assert_eq!(equ.p1, "limit");
        assert_eq!(equ.p2, "2 * 8");

        let section = directive(".section .ivt, \"aw\"");
        assert_eq!(section.p1, ".ivt");
        assert_eq!(section.p2, "aw");

        let align = directive(".align 4, 0x90, 2");
        assert_eq!((align.p1.as_str(), align.p2.as_str(), align.p3.as_str()), ("4", "0x90", "2"));

        let word = directive(".word 1, 2, three");
        assert_eq!(word.p1, "1, 2, three");
    }

    #[test]
    fn directive_errors() {
        assert!(parse_line(".bogus").is_err());
        assert!(parse_line(".equ missingexpr").is_err());
        assert!(parse_line(".byte").is_err());
        assert!(parse_line(".text now").is_err());
        assert!(parse_line(".section name, aw").is_err());
        assert!(parse_line(".align").is_err());
        assert!(parse_line(".align 2, 0, 2, 9").is_err());
    }

    #[test]
    fn labelled_instruction() {
        let line = parse("loop: add r1, 1");
        assert_eq!(line.label, "loop");
        let LineContent::Instruction(instr) = line.content else {
            panic!("expected instruction");
        };
        assert_eq!(instr.code, InstrCode::Add);
        assert_eq!(instr.op1, "r1");
        assert_eq!(instr.op2, "1");
    }

    #[test]
    fn case_insensitive_mnemonics() {
        assert_eq!(instr("MOV R0, R1").code, InstrCode::Mov);
        assert_eq!(instr("HALT").code, InstrCode::Halt);
    }
}
