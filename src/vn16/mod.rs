// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! VN16 CPU module: instruction set tables and the encoder.
//!
//! The VN16 is a 16-bit little-endian two-address Von-Neumann machine
//! with eight word registers (`r6` doubles as `sp`, `r7` as `pc`), a
//! status word reachable only through `pushf`/`popf`, and six addressing
//! modes selected by a per-operand descriptor byte.

pub mod handler;
pub mod instructions;

pub use handler::{encode, instruction_size, EncodeCtx};
pub use instructions::InstrCode;
