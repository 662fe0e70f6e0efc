// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and output-name derivation.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

pub const VERSION: &str = "1.0";

const LONG_ABOUT: &str = "Two-pass assembler for the VN16 architecture.

Assembles one source file into an ELF16 relocatable object. By default a
human-readable dump of the object is written; -e selects the binary ELF16
format consumed by the emulator and linker.";

#[derive(Parser, Debug)]
#[command(
    name = "vnforge",
    version = VERSION,
    about = "VN16 assembler producing ELF16 relocatable objects",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(
        short = 'e',
        action = ArgAction::SetTrue,
        long_help = "Output in binary ELF16 format for use in the provided emulator."
    )]
    pub elf_output: bool,
    #[arg(
        short = 'o',
        value_name = "FILE",
        long_help = "Place the output into FILE. Defaults to the input name with its last extension replaced by .o (or .o appended)."
    )]
    pub outfile: Option<String>,
    #[arg(value_name = "INPUT", help = "Input assembly file")]
    pub input: PathBuf,
}

/// Validated CLI configuration.
#[derive(Debug)]
pub struct CliConfig {
    pub input: PathBuf,
    pub output: String,
    pub binary: bool,
}

pub fn validate_cli(cli: &Cli) -> CliConfig {
    let output = match &cli.outfile {
        Some(name) => name.clone(),
        None => derive_output_name(&cli.input.to_string_lossy()),
    };
    CliConfig {
        input: cli.input.clone(),
        output,
        binary: cli.elf_output,
    }
}

/// Replace the input's last `.EXT` with `.o` when that dot belongs to the
/// file name (not a directory), otherwise append `.o`.
pub fn derive_output_name(input: &str) -> String {
    let last_slash = input.rfind('/');
    match input.rfind('.') {
        Some(dot) if last_slash.is_none_or(|slash| dot > slash) => {
            format!("{}.o", &input[..dot])
        }
        _ => format!("{input}.o"),
    }
}
