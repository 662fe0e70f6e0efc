// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Line-level lexing for assembly source.
//!
//! A statement is `[LABEL:] [CONTENT] [# COMMENT]`. Labels follow the
//! symbol grammar and are case-sensitive; the content part is classified
//! later by the parser. Comments start at `#` and never occur inside
//! tokens, so they can be stripped up front.

use crate::core::expr::{ExprOp, ExprToken};
use crate::core::number::decode_word;
use crate::core::text_utils::{is_sym_start, Cursor};

/// The label/content split of one source line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTokens {
    pub label: Option<String>,
    pub content: Option<String>,
}

/// Strip the `#` comment, if any.
pub fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// True when the line holds nothing but whitespace and a comment.
pub fn is_empty_line(line: &str) -> bool {
    strip_comment(line).trim().is_empty()
}

/// Split a line into its optional label and content.
///
/// The split never fails: a leading token that does not match
/// `symbol ':'` is simply part of the content and gets rejected by the
/// content matchers downstream.
pub fn tokenize_line(line: &str) -> LineTokens {
    let code = strip_comment(line).trim();
    if code.is_empty() {
        return LineTokens::default();
    }

    let mut cursor = Cursor::new(code);
    let mut label = None;
    let mut rest = code;
    if let Some(first) = cursor.peek() {
        if is_sym_start(first) {
            if let Some(sym) = cursor.take_symbol() {
                if cursor.eat(b':') {
                    label = Some(sym);
                    rest = &code[cursor.pos()..];
                }
            }
        }
    }

    let rest = rest.trim();
    LineTokens {
        label,
        content: if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        },
    }
}

/// Split on commas, trimming surrounding whitespace from each field.
pub fn split_on_commas(s: &str) -> Vec<String> {
    s.split(',').map(|field| field.trim().to_string()).collect()
}

/// Tokenize an infix expression into the flat token stream.
///
/// `-` on its own is the binary subtraction operator; a `-` or `~` in
/// prefix position followed by a digit is folded into the number token.
pub fn tokenize_expression(s: &str) -> Option<Vec<ExprToken>> {
    let mut cursor = Cursor::new(s.trim());
    let mut tokens = Vec::new();
    loop {
        cursor.skip_ws();
        let Some(c) = cursor.peek() else {
            break;
        };
        match c {
            b'(' => {
                cursor.next();
                tokens.push(ExprToken::Op(ExprOp::Open));
            }
            b')' => {
                cursor.next();
                tokens.push(ExprToken::Op(ExprOp::Close));
            }
            b'+' => {
                cursor.next();
                tokens.push(ExprToken::Op(ExprOp::Add));
            }
            b'*' => {
                cursor.next();
                tokens.push(ExprToken::Op(ExprOp::Mul));
            }
            b'/' => {
                cursor.next();
                tokens.push(ExprToken::Op(ExprOp::Div));
            }
            b'%' => {
                cursor.next();
                tokens.push(ExprToken::Op(ExprOp::Mod));
            }
            b'&' => {
                cursor.next();
                tokens.push(ExprToken::Op(ExprOp::And));
            }
            b'|' => {
                cursor.next();
                tokens.push(ExprToken::Op(ExprOp::Or));
            }
            b'^' => {
                cursor.next();
                tokens.push(ExprToken::Op(ExprOp::Xor));
            }
            b'-' => {
                let prefix = is_prefix_position(&tokens);
                if prefix && cursor.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                    tokens.push(scan_number(&mut cursor)?);
                } else {
                    cursor.next();
                    tokens.push(ExprToken::Op(ExprOp::Sub));
                }
            }
            b'~' => {
                if !cursor.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                    return None;
                }
                tokens.push(scan_number(&mut cursor)?);
            }
            _ if c.is_ascii_digit() => {
                tokens.push(scan_number(&mut cursor)?);
            }
            _ if is_sym_start(c) => {
                let sym = cursor.take_symbol()?;
                tokens.push(ExprToken::Sym(sym));
            }
            _ => return None,
        }
    }
    if tokens.is_empty() {
        return None;
    }
    Some(tokens)
}

/// A `-` starts a number only at the beginning of the stream or right
/// after an operator that opens a new operand slot.
fn is_prefix_position(tokens: &[ExprToken]) -> bool {
    match tokens.last() {
        None => true,
        Some(ExprToken::Op(ExprOp::Close)) => false,
        Some(ExprToken::Op(_)) => true,
        Some(_) => false,
    }
}

fn scan_number(cursor: &mut Cursor<'_>) -> Option<ExprToken> {
    let mut text = String::new();
    if cursor.peek() == Some(b'-') || cursor.peek() == Some(b'~') {
        text.push(cursor.next()? as char);
    }
    let digits = cursor.take_while(|c| c.is_ascii_alphanumeric());
    if digits.is_empty() {
        return None;
    }
    text.push_str(&digits);
    let value = decode_word(&text)?;
    Some(ExprToken::Number(value as i32))
}
