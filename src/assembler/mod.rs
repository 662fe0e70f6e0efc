// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! VN16 Assembler - main entry point.
//!
//! The driver runs the two passes over the source, resolves deferred
//! `.equ` expressions to a fixed point, and hands the registries to the
//! emitter. Pass 1 parses every line, sizes its content and logs it with
//! its starting location counter; pass 2 replays the log and emits bytes
//! and relocations. The source file is read exactly once.

pub mod cli;
mod directives;
mod dump;
mod emit;

#[cfg(test)]
mod tests;

use std::fs::{self, File};

use clap::Parser;

use crate::core::assembler::error::{
    AsmError, AsmErrorKind, AsmRunError, AsmRunReport, Diagnostic, Severity,
};
use crate::core::expr::{self, DeferredEqu};
use crate::core::parser::{self, Line, LineContent};
use crate::core::section_table::SectionTable;
use crate::core::symbol_table::{SymType, SymbolTable};
use crate::vn16::{self, EncodeCtx};

use cli::{validate_cli, Cli};

pub use cli::VERSION;
pub use emit::ObjectImage;

/// Run the assembler with command-line arguments.
pub fn run() -> Result<AsmRunReport, AsmRunError> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if err.use_stderr() => {
            return Err(AsmRunError::new(
                AsmError::new(AsmErrorKind::Cli, err.render().to_string()),
                1,
            ));
        }
        Err(err) => {
            // --help / --version
            let _ = err.print();
            std::process::exit(0);
        }
    };
    run_with(&cli)
}

/// Run one assembly job from parsed arguments.
pub fn run_with(cli: &Cli) -> Result<AsmRunReport, AsmRunError> {
    let config = validate_cli(cli);

    let source = fs::read_to_string(&config.input).map_err(|err| {
        AsmRunError::new(
            AsmError::new(
                AsmErrorKind::Io,
                format!("cannot open input file {}: {err}", config.input.display()),
            ),
            2,
        )
    })?;
    let source_lines: Vec<String> = source.lines().map(str::to_string).collect();

    // The output must be writable before any work happens.
    File::create(&config.output).map_err(|err| {
        AsmRunError::new(
            AsmError::new(
                AsmErrorKind::Io,
                format!("cannot open output file {}: {err}", config.output),
            ),
            3,
        )
    })?;

    let mut assembler = Assembler::new();
    if let Err(diag) = assembler.assemble(&source_lines) {
        return Err(AsmRunError::new(
            AsmError::new(
                AsmErrorKind::Assembler,
                format!("failed to assemble: {}", config.input.display()),
            ),
            0,
        )
        .with_diagnostics(vec![diag], source_lines));
    }

    let image = assembler
        .build_object()
        .map_err(|err| AsmRunError::new(err, 0).with_diagnostics(Vec::new(), source_lines.clone()))?;

    let mut out = File::create(&config.output).map_err(|err| {
        AsmRunError::new(
            AsmError::new(
                AsmErrorKind::Io,
                format!("cannot open output file {}: {err}", config.output),
            ),
            3,
        )
    })?;
    let write_result = if config.binary {
        image.write_binary(&mut out)
    } else {
        image.write_dump(&mut out)
    };
    write_result.map_err(|err| {
        AsmRunError::new(
            AsmError::new(
                AsmErrorKind::Io,
                format!("cannot write output file {}: {err}", config.output),
            ),
            3,
        )
    })?;

    Ok(AsmRunReport::new(Vec::new(), source_lines, config.output))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pass {
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    End,
}

/// One logged source line: what pass 2 replays instead of the file.
#[derive(Debug, Clone)]
struct LineInfo {
    line_num: u32,
    loc_cnt: u16,
    line: Line,
}

/// Core assembler state.
#[derive(Debug)]
pub struct Assembler {
    pub(crate) symbols: SymbolTable,
    pub(crate) sections: SectionTable,
    pub(crate) deferred: Vec<DeferredEqu>,
    lines: Vec<LineInfo>,
    /// Current section header index; 0 means none.
    pub(crate) shndx: u16,
    /// Location counter of the current section.
    pub(crate) loc: u16,
    pub(crate) pass: Pass,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            symbols: SymbolTable::new(),
            sections: SectionTable::new(),
            deferred: Vec::new(),
            lines: Vec::new(),
            shndx: 0,
            loc: 0,
            pass: Pass::First,
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn sections(&self) -> &SectionTable {
        &self.sections
    }

    /// Run both passes and the deferred `.equ` fixed point.
    pub fn assemble(&mut self, lines: &[String]) -> Result<(), Diagnostic> {
        self.pass1(lines)?;
        // Every label exists after pass 1, so forward-referencing `.equ`s
        // can settle now; pass 2 reads their values. Survivors are not yet
        // an error, the strict fixed point after pass 2 reports them.
        let deferred = std::mem::take(&mut self.deferred);
        if let Err(remaining) = expr::resolve_deferred(deferred, &mut self.symbols) {
            self.deferred = remaining;
        }
        self.pass2()?;
        self.resolve_equs()
    }

    fn pass1(&mut self, lines: &[String]) -> Result<(), Diagnostic> {
        self.pass = Pass::First;
        for (index, src) in lines.iter().enumerate() {
            let line_num = index as u32 + 1;
            let line = parser::parse_line(src).map_err(|err| {
                Diagnostic::new(
                    line_num,
                    Severity::Error,
                    AsmError::new(AsmErrorKind::Lexical, err.message),
                )
            })?;
            if line.is_empty() {
                continue;
            }
            let info = LineInfo {
                line_num,
                loc_cnt: self.loc,
                line,
            };
            let flow = self
                .process_line(&info)
                .map_err(|err| Diagnostic::new(line_num, Severity::Error, err))?;
            self.lines.push(info);
            if flow == Flow::End {
                break;
            }
        }
        self.save_section_state();
        Ok(())
    }

    fn pass2(&mut self) -> Result<(), Diagnostic> {
        self.pass = Pass::Second;
        self.shndx = 0;
        self.loc = 0;
        self.sections.reset_loc_counters();

        let lines = std::mem::take(&mut self.lines);
        for info in &lines {
            if self.loc != info.loc_cnt {
                return Err(Diagnostic::new(
                    info.line_num,
                    Severity::Error,
                    AsmError::new(
                        AsmErrorKind::Assembler,
                        format!(
                            "internal: pass 2 location counter {:#06x} disagrees with pass 1 {:#06x}",
                            self.loc, info.loc_cnt
                        ),
                    ),
                ));
            }
            let flow = self
                .process_line(info)
                .map_err(|err| Diagnostic::new(info.line_num, Severity::Error, err))?;
            if flow == Flow::End {
                break;
            }
        }
        self.save_section_state();
        Ok(())
    }

    /// Evaluate deferred `.equ` expressions to a fixed point.
    fn resolve_equs(&mut self) -> Result<(), Diagnostic> {
        let deferred = std::mem::take(&mut self.deferred);
        match expr::resolve_deferred(deferred, &mut self.symbols) {
            Ok(()) => Ok(()),
            Err(remaining) => {
                let names: Vec<&str> = remaining.iter().map(|entry| entry.name.as_str()).collect();
                Err(Diagnostic::new(
                    remaining[0].line_num,
                    Severity::Error,
                    AsmError::new(
                        AsmErrorKind::Expression,
                        format!(
                            "unresolved .equ symbol(s) after fixed point: {}",
                            names.join(", ")
                        ),
                    ),
                ))
            }
        }
    }

    fn process_line(&mut self, info: &LineInfo) -> Result<Flow, AsmError> {
        if !info.line.label.is_empty() && self.pass == Pass::First {
            self.define_label(&info.line.label)?;
        }
        match &info.line.content {
            LineContent::None => Ok(Flow::Continue),
            LineContent::Directive(dir) => self.process_directive(dir, info.line_num),
            LineContent::Instruction(instr) => self.process_instruction(instr),
        }
    }

    fn define_label(&mut self, name: &str) -> Result<(), AsmError> {
        let section = self
            .sections
            .get(self.shndx)
            .filter(|_| self.shndx != 0)
            .ok_or_else(|| {
                AsmError::new(
                    AsmErrorKind::Symbol,
                    format!("label outside of any section: {name}"),
                )
            })?;
        if name == section.name {
            // A label carrying the section's own name targets the section
            // symbol rather than creating a new entry.
            let sym = section.sym;
            let loc = self.loc;
            return self
                .symbols
                .get_mut(sym)
                .map(|entry| entry.value = loc)
                .ok_or_else(|| {
                    AsmError::new(AsmErrorKind::Assembler, "internal: missing section symbol")
                });
        }
        let sym_type = if section.is_executable() {
            SymType::Func
        } else {
            SymType::Object
        };
        let shndx = self.shndx;
        let loc = self.loc;
        self.symbols
            .define_label(name, shndx, loc, sym_type)
            .map(|_| ())
            .map_err(|err| AsmError::new(AsmErrorKind::Symbol, err))
    }

    fn process_instruction(
        &mut self,
        instr: &crate::core::parser::Instruction,
    ) -> Result<Flow, AsmError> {
        let section = self
            .sections
            .get(self.shndx)
            .filter(|_| self.shndx != 0)
            .ok_or_else(|| {
                AsmError::new(
                    AsmErrorKind::Instruction,
                    format!("instruction outside of any section: {}", instr.code.name()),
                )
            })?;
        if !section.is_executable() {
            return Err(AsmError::new(
                AsmErrorKind::Instruction,
                format!(
                    "executable code in non-executable section {}: {}",
                    section.name,
                    instr.code.name()
                ),
            ));
        }

        match self.pass {
            Pass::First => {
                let size = vn16::instruction_size(instr)
                    .map_err(|err| AsmError::new(AsmErrorKind::Instruction, err))?;
                self.loc = self.loc.wrapping_add(size);
            }
            Pass::Second => {
                let mut ctx = EncodeCtx {
                    symbols: &self.symbols,
                    sections: &mut self.sections,
                    shndx: self.shndx,
                    loc: self.loc,
                };
                let bytes = vn16::encode(instr, &mut ctx)
                    .map_err(|err| AsmError::new(AsmErrorKind::Instruction, err))?;
                self.emit_bytes(&bytes)?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Append bytes to the current section (pass 2) and advance the LC.
    /// NOBITS sections take no bytes but still advance.
    pub(crate) fn emit_bytes(&mut self, bytes: &[u8]) -> Result<(), AsmError> {
        let section = self.sections.get_mut(self.shndx).ok_or_else(|| {
            AsmError::new(AsmErrorKind::Assembler, "internal: emission without a section")
        })?;
        if !section.is_nobits() {
            section.data.extend_from_slice(bytes);
        }
        self.loc = self.loc.wrapping_add(bytes.len() as u16);
        Ok(())
    }

    /// Persist the current section's LC (and, in pass 1, its size).
    pub(crate) fn save_section_state(&mut self) {
        let pass = self.pass;
        let loc = self.loc;
        if let Some(section) = self.sections.get_mut(self.shndx).filter(|s| s.index != 0) {
            section.loc_cnt = loc;
            if pass == Pass::First && loc > section.size {
                section.size = loc;
            }
        }
    }
}
