// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Expression evaluation under relocatable arithmetic.
//!
//! Expressions are flat infix token streams evaluated by shunting-yard.
//! Every operand carries a class index along with its value: 0 for
//! absolute values, 1 for values relative to a single section. Addition
//! adds classes, subtraction subtracts them, and every other operator
//! requires absolute operands. A legal expression ends at class 0 or 1;
//! anything else cannot be represented by a relocation and is rejected.

use crate::core::elf::SHN_ABS;
use crate::core::elf::SHN_UNDEF;
use crate::core::symbol_table::{RelocBase, SymBind, SymbolTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprOp {
    Open,
    Close,
    Or,
    Xor,
    And,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprToken {
    Number(i32),
    Sym(String),
    Op(ExprOp),
}

/// An evaluated operand: value, section class, and when relative, the
/// section it is relative to plus the symbol the value was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprValue {
    pub value: i32,
    pub class: i32,
    pub shndx: u16,
    pub sym: Option<u16>,
}

impl ExprValue {
    fn absolute(value: i32) -> Self {
        Self {
            value,
            class: 0,
            shndx: SHN_ABS,
            sym: None,
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.class == 0
    }

    pub fn is_relative(&self) -> bool {
        self.class == 1
    }

    /// The value masked to its 16-bit emitted form.
    pub fn word(&self) -> u16 {
        self.value as u16
    }
}

#[derive(Debug, Clone)]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EvalError {}

/// Evaluation either produces a value or stops at the first symbol that
/// has no usable value yet; `.equ` handling defers on the latter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Value(ExprValue),
    Undefined(String),
}

fn precedence(op: ExprOp) -> u8 {
    match op {
        ExprOp::Or => 1,
        ExprOp::Xor => 2,
        ExprOp::And => 3,
        ExprOp::Add | ExprOp::Sub => 4,
        ExprOp::Mul | ExprOp::Div | ExprOp::Mod => 5,
        ExprOp::Open | ExprOp::Close => 0,
    }
}

/// Evaluate a token stream against the symbol table.
pub fn evaluate(tokens: &[ExprToken], symbols: &SymbolTable) -> Result<Evaluation, EvalError> {
    let mut operands: Vec<ExprValue> = Vec::new();
    let mut ops: Vec<ExprOp> = Vec::new();
    let mut expect_operand = true;

    for token in tokens {
        match token {
            ExprToken::Number(value) => {
                if !expect_operand {
                    return Err(EvalError::new("expected operator in expression"));
                }
                operands.push(ExprValue::absolute(*value));
                expect_operand = false;
            }
            ExprToken::Sym(name) => {
                if !expect_operand {
                    return Err(EvalError::new("expected operator in expression"));
                }
                match symbol_value(name, symbols) {
                    Some(value) => operands.push(value),
                    None => return Ok(Evaluation::Undefined(name.clone())),
                }
                expect_operand = false;
            }
            ExprToken::Op(ExprOp::Open) => {
                if !expect_operand {
                    return Err(EvalError::new("expected operator in expression"));
                }
                ops.push(ExprOp::Open);
            }
            ExprToken::Op(ExprOp::Close) => {
                if expect_operand {
                    return Err(EvalError::new("expected operand in expression"));
                }
                loop {
                    match ops.pop() {
                        Some(ExprOp::Open) => break,
                        Some(op) => apply(op, &mut operands)?,
                        None => {
                            return Err(EvalError::new("unbalanced ')' in expression"));
                        }
                    }
                }
            }
            ExprToken::Op(op) => {
                if expect_operand {
                    return Err(EvalError::new("expected operand in expression"));
                }
                while let Some(&top) = ops.last() {
                    if top == ExprOp::Open || precedence(top) < precedence(*op) {
                        break;
                    }
                    ops.pop();
                    apply(top, &mut operands)?;
                }
                ops.push(*op);
                expect_operand = true;
            }
        }
    }

    if expect_operand {
        return Err(EvalError::new("expression ends with an operator"));
    }
    while let Some(op) = ops.pop() {
        if op == ExprOp::Open {
            return Err(EvalError::new("unbalanced '(' in expression"));
        }
        apply(op, &mut operands)?;
    }
    match operands.pop() {
        Some(result) if operands.is_empty() => {
            if result.class != 0 && result.class != 1 {
                return Err(EvalError::new(format!(
                    "expression is neither absolute nor single-relative (class {})",
                    result.class
                )));
            }
            Ok(Evaluation::Value(result))
        }
        _ => Err(EvalError::new("malformed expression")),
    }
}

/// The contribution of one symbol, or `None` when it has no usable value
/// yet (unknown name or still-deferred `.equ`).
pub fn symbol_value(name: &str, symbols: &SymbolTable) -> Option<ExprValue> {
    let index = symbols.index_of(name)?;
    let sym = symbols.get(index)?;
    if sym.is_pending_equ() {
        return None;
    }
    if sym.is_absolute() {
        return Some(ExprValue::absolute(sym.value as i32));
    }
    if let Some(base) = sym.reloc_base {
        return Some(ExprValue {
            value: sym.value as i32,
            class: 1,
            shndx: base.shndx,
            sym: Some(base.sym),
        });
    }
    Some(ExprValue {
        value: sym.value as i32,
        class: 1,
        shndx: sym.shndx,
        sym: Some(index),
    })
}

fn apply(op: ExprOp, operands: &mut Vec<ExprValue>) -> Result<(), EvalError> {
    let b = operands
        .pop()
        .ok_or_else(|| EvalError::new("malformed expression"))?;
    let a = operands
        .pop()
        .ok_or_else(|| EvalError::new("malformed expression"))?;

    let result = match op {
        ExprOp::Add => {
            let class = a.class + b.class;
            if class > 1 {
                return Err(EvalError::new(
                    "cannot add two section-relative values",
                ));
            }
            let (shndx, sym) = if a.class == 1 {
                (a.shndx, a.sym)
            } else if b.class == 1 {
                (b.shndx, b.sym)
            } else {
                (SHN_ABS, None)
            };
            ExprValue {
                value: a.value.wrapping_add(b.value),
                class,
                shndx,
                sym,
            }
        }
        ExprOp::Sub => {
            let class = a.class - b.class;
            if !(0..=1).contains(&class) {
                return Err(EvalError::new(
                    "cannot subtract a section-relative value from an absolute one",
                ));
            }
            if a.class == 1 && b.class == 1 {
                if a.shndx != b.shndx || a.shndx == SHN_UNDEF {
                    return Err(EvalError::new(
                        "cannot subtract symbols from different sections",
                    ));
                }
                ExprValue::absolute(a.value.wrapping_sub(b.value))
            } else {
                ExprValue {
                    value: a.value.wrapping_sub(b.value),
                    class,
                    shndx: a.shndx,
                    sym: a.sym,
                }
            }
        }
        ExprOp::Mul | ExprOp::Div | ExprOp::Mod | ExprOp::And | ExprOp::Or | ExprOp::Xor => {
            if a.class != 0 || b.class != 0 {
                return Err(EvalError::new(
                    "section-relative values admit only addition and subtraction",
                ));
            }
            let value = match op {
                ExprOp::Mul => a.value.wrapping_mul(b.value),
                ExprOp::Div => {
                    if b.value == 0 {
                        return Err(EvalError::new("division by zero in expression"));
                    }
                    a.value.wrapping_div(b.value)
                }
                ExprOp::Mod => {
                    if b.value == 0 {
                        return Err(EvalError::new("modulo by zero in expression"));
                    }
                    a.value.wrapping_rem(b.value)
                }
                ExprOp::And => a.value & b.value,
                ExprOp::Or => a.value | b.value,
                ExprOp::Xor => a.value ^ b.value,
                _ => unreachable!(),
            };
            ExprValue::absolute(value)
        }
        ExprOp::Open | ExprOp::Close => {
            return Err(EvalError::new("malformed expression"));
        }
    };
    operands.push(result);
    Ok(())
}

/// Relocation target of a single-relative value: the symbol to relocate
/// against and the payload to store.
///
/// Globals relocate against themselves with their own value subtracted
/// from the payload; everything else relocates against the section symbol
/// with the full value stored.
pub fn reloc_target(symbols: &SymbolTable, value: &ExprValue) -> Result<(u16, u16), EvalError> {
    let index = value
        .sym
        .ok_or_else(|| EvalError::new("internal: relative value without a symbol"))?;
    let sym = symbols
        .get(index)
        .ok_or_else(|| EvalError::new("internal: relocation symbol out of range"))?;
    if sym.bind == SymBind::Global {
        let payload = value.value.wrapping_sub(sym.value as i32) as u16;
        return Ok((index, payload));
    }
    let section_sym = symbols
        .section_symbol(value.shndx)
        .ok_or_else(|| EvalError::new("internal: relative value without a section symbol"))?;
    Ok((section_sym, value.value as u16))
}

/// A `.equ` whose expression still references undefined symbols.
#[derive(Debug, Clone)]
pub struct DeferredEqu {
    pub name: String,
    pub tokens: Vec<ExprToken>,
    pub line_num: u32,
}

/// Store an evaluated `.equ` value into its symbol entry.
pub fn apply_equ_value(
    symbols: &mut SymbolTable,
    index: u16,
    value: &ExprValue,
) -> Result<(), EvalError> {
    if value.is_absolute() {
        let sym = symbols
            .get_mut(index)
            .ok_or_else(|| EvalError::new("internal: .equ symbol out of range"))?;
        sym.value = value.word();
        sym.shndx = SHN_ABS;
        sym.reloc_base = None;
        return Ok(());
    }
    let (target, _) = reloc_target(symbols, value)?;
    let base_shndx = value.shndx;
    let sym = symbols
        .get_mut(index)
        .ok_or_else(|| EvalError::new("internal: .equ symbol out of range"))?;
    sym.value = value.word();
    sym.shndx = SHN_UNDEF;
    sym.reloc_base = Some(RelocBase {
        shndx: base_shndx,
        sym: target,
    });
    Ok(())
}

/// Re-evaluate deferred `.equ` entries to a fixed point. Entries that
/// still cannot be resolved when an iteration makes no progress are
/// returned for error reporting.
pub fn resolve_deferred(
    mut deferred: Vec<DeferredEqu>,
    symbols: &mut SymbolTable,
) -> Result<(), Vec<DeferredEqu>> {
    loop {
        if deferred.is_empty() {
            return Ok(());
        }
        let mut remaining = Vec::new();
        let mut progress = false;
        for entry in deferred {
            match evaluate(&entry.tokens, symbols) {
                Ok(Evaluation::Value(value)) => {
                    let Some(index) = symbols.index_of(&entry.name) else {
                        remaining.push(entry);
                        continue;
                    };
                    if apply_equ_value(symbols, index, &value).is_err() {
                        remaining.push(entry);
                        continue;
                    }
                    progress = true;
                }
                Ok(Evaluation::Undefined(_)) | Err(_) => remaining.push(entry),
            }
        }
        if !progress {
            return Err(remaining);
        }
        deferred = remaining;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lexer::tokenize_expression;
    use crate::core::symbol_table::SymType;

    fn eval(src: &str, symbols: &SymbolTable) -> Result<Evaluation, EvalError> {
        let tokens = tokenize_expression(src).expect("tokenizes");
        evaluate(&tokens, symbols)
    }

    fn eval_abs(src: &str, symbols: &SymbolTable) -> i32 {
        match eval(src, symbols).expect("evaluates") {
            Evaluation::Value(v) => {
                assert!(v.is_absolute(), "expected absolute result for {src}");
                v.value
            }
            Evaluation::Undefined(name) => panic!("undefined symbol {name} in {src}"),
        }
    }

    fn table_with_labels() -> SymbolTable {
        let mut symbols = SymbolTable::new();
        symbols.add_section_symbol(".text", 1);
        symbols.define_label("a", 1, 0x10, SymType::Func).unwrap();
        symbols.define_label("b", 1, 0x20, SymType::Func).unwrap();
        symbols.add_section_symbol(".data", 2);
        symbols.define_label("d", 2, 0x08, SymType::Object).unwrap();
        symbols
    }

    #[test]
    fn precedence_and_parentheses() {
        let symbols = SymbolTable::new();
        assert_eq!(eval_abs("1 + 2 * 3", &symbols), 7);
        assert_eq!(eval_abs("(1 + 2) * 3", &symbols), 9);
        assert_eq!(eval_abs("16 / 2 / 2", &symbols), 4);
        assert_eq!(eval_abs("7 % 4", &symbols), 3);
        assert_eq!(eval_abs("1 | 2 ^ 3 & 2", &symbols), 1 | (2 ^ (3 & 2)));
        assert_eq!(eval_abs("10 - 2 - 3", &symbols), 5);
    }

    #[test]
    fn same_section_difference_is_absolute() {
        let symbols = table_with_labels();
        assert_eq!(eval_abs("b - a", &symbols), 0x10);
    }

    #[test]
    fn relative_plus_constant_stays_in_section() {
        let symbols = table_with_labels();
        match eval("a + 4", &symbols).unwrap() {
            Evaluation::Value(v) => {
                assert!(v.is_relative());
                assert_eq!(v.shndx, 1);
                assert_eq!(v.value, 0x14);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn illegal_section_arithmetic() {
        let symbols = table_with_labels();
        assert!(eval("a + b", &symbols).is_err());
        assert!(eval("a - d", &symbols).is_err());
        assert!(eval("2 * a", &symbols).is_err());
        assert!(eval("4 - a", &symbols).is_err());
    }

    #[test]
    fn division_by_zero() {
        let symbols = SymbolTable::new();
        assert!(eval("1 / 0", &symbols).is_err());
        assert!(eval("1 % 0", &symbols).is_err());
    }

    #[test]
    fn malformed_expressions() {
        let symbols = SymbolTable::new();
        assert!(eval("1 +", &symbols).is_err());
        assert!(eval("(1", &symbols).is_err());
        assert!(eval("1)", &symbols).is_err());
        assert!(eval("1 2", &symbols).is_err());
    }

    #[test]
    fn undefined_symbol_reported_by_name() {
        let symbols = SymbolTable::new();
        assert_eq!(
            eval("missing + 1", &symbols).unwrap(),
            Evaluation::Undefined("missing".to_string())
        );
    }

    #[test]
    fn reloc_target_local_uses_section_symbol() {
        let symbols = table_with_labels();
        let value = match eval("a + 4", &symbols).unwrap() {
            Evaluation::Value(v) => v,
            other => panic!("unexpected {other:?}"),
        };
        let (target, payload) = reloc_target(&symbols, &value).unwrap();
        assert_eq!(target, symbols.section_symbol(1).unwrap());
        assert_eq!(payload, 0x14);
    }

    #[test]
    fn reloc_target_global_uses_symbol_itself() {
        let mut symbols = table_with_labels();
        symbols.declare_global("a").unwrap();
        let value = match eval("a + 4", &symbols).unwrap() {
            Evaluation::Value(v) => v,
            other => panic!("unexpected {other:?}"),
        };
        let (target, payload) = reloc_target(&symbols, &value).unwrap();
        assert_eq!(target, symbols.index_of("a").unwrap());
        assert_eq!(payload, 4);
    }

    #[test]
    fn deferred_chain_resolves() {
        let mut symbols = SymbolTable::new();
        symbols.add_equ("k1");
        symbols.add_equ("k2");
        let deferred = vec![
            DeferredEqu {
                name: "k2".to_string(),
                tokens: tokenize_expression("k1 + 1").unwrap(),
                line_num: 2,
            },
            DeferredEqu {
                name: "k1".to_string(),
                tokens: tokenize_expression("41").unwrap(),
                line_num: 1,
            },
        ];
        resolve_deferred(deferred, &mut symbols).unwrap();
        assert_eq!(symbols.entry("k1").unwrap().value, 41);
        assert_eq!(symbols.entry("k2").unwrap().value, 42);
        assert!(symbols.entry("k2").unwrap().is_absolute());
    }

    #[test]
    fn deferred_cycle_detected() {
        let mut symbols = SymbolTable::new();
        symbols.add_equ("x");
        symbols.add_equ("y");
        let deferred = vec![
            DeferredEqu {
                name: "x".to_string(),
                tokens: tokenize_expression("y").unwrap(),
                line_num: 1,
            },
            DeferredEqu {
                name: "y".to_string(),
                tokens: tokenize_expression("x").unwrap(),
                line_num: 2,
            },
        ];
        let leftovers = resolve_deferred(deferred, &mut symbols).unwrap_err();
        assert_eq!(leftovers.len(), 2);
    }
}
