// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Human-readable dump of a finished object, mirroring the layout of the
//! usual ELF dump tools: header block, section header table, per-section
//! hex dumps, symbol table, string tables and relocation listings.

use std::io::{self, Write};

use crate::core::elf::{self, rel_type_name, sh_type_name, SHN_ABS, SHN_UNDEF};

use super::emit::ObjectImage;

impl ObjectImage {
    pub fn write_dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.dump_header(out)?;
        self.dump_section_headers(out)?;
        self.dump_contents(out)?;
        self.dump_symbols(out)?;
        self.dump_relocations(out)?;
        self.dump_string_table(out)
    }

    fn dump_header<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "ELF Header:")?;
        let magic: Vec<String> = self
            .ehdr
            .e_ident
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect();
        writeln!(out, "  Magic:   {}", magic.join(" "))?;
        writeln!(out, "  Class:                             ELF16")?;
        writeln!(out, "  Data:                              2's complement, little endian")?;
        writeln!(out, "  Version:                           {}", self.ehdr.e_version)?;
        writeln!(out, "  Type:                              REL (Relocatable file)")?;
        writeln!(out, "  Machine:                           VN16")?;
        writeln!(out, "  Entry point address:               0x{:x}", self.ehdr.e_entry)?;
        writeln!(
            out,
            "  Start of section headers:          {} (bytes into file)",
            self.ehdr.e_shoff
        )?;
        writeln!(
            out,
            "  Size of section headers:           {} (bytes)",
            self.ehdr.e_shentsize
        )?;
        writeln!(
            out,
            "  Number of section headers:         {}",
            self.ehdr.e_shnum
        )?;
        writeln!(
            out,
            "  Section header string table index: {}",
            self.ehdr.e_shstrndx
        )?;
        writeln!(out)
    }

    fn dump_section_headers<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Section Headers:")?;
        writeln!(
            out,
            "  [Nr] {:<12} {:<9} {:>5} {:>5} {:>5} {:>3} {:<4} {:>2} {:>3} {:>2}",
            "Name", "Type", "Addr", "Off", "Size", "ES", "Flg", "Lk", "Inf", "Al"
        )?;
        for (index, shdr) in self.shdrs.iter().enumerate() {
            writeln!(
                out,
                "  [{index:>2}] {:<12} {:<9} {:04x}  {:04x}  {:04x}  {:>3} {:<4} {:>2} {:>3} {:>2}",
                self.section_names[index],
                sh_type_name(shdr.sh_type),
                shdr.sh_addr,
                shdr.sh_offset,
                shdr.sh_size,
                shdr.sh_entsize,
                elf::flag_letters(shdr.sh_flags),
                shdr.sh_link,
                shdr.sh_info,
                shdr.sh_addralign,
            )?;
        }
        writeln!(out, "  Flags: W (write), A (alloc), X (execute), I (info link)")?;
        writeln!(out)
    }

    fn dump_contents<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for (index, shdr) in self.shdrs.iter().enumerate() {
            if shdr.sh_type != elf::SHT_PROGBITS {
                continue;
            }
            writeln!(out, "Hex dump of section '{}':", self.section_names[index])?;
            if self.contents[index].is_empty() {
                writeln!(out, "  (empty)")?;
            }
            for (row, chunk) in self.contents[index].chunks(16).enumerate() {
                let bytes: Vec<String> = chunk.iter().map(|byte| format!("{byte:02x}")).collect();
                writeln!(out, "  0x{:04x}  {}", row * 16, bytes.join(" "))?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    fn dump_symbols<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(
            out,
            "Symbol table '.symtab' contains {} entries:",
            self.symbols.len()
        )?;
        writeln!(
            out,
            "   Num:  Value  Size  {:<8} {:<7} {:<4} Name",
            "Type", "Bind", "Ndx"
        )?;
        for (index, sym) in self.symbols.iter().enumerate() {
            let bind = match elf::st_bind(sym.st_info) {
                elf::STB_LOCAL => "LOCAL",
                elf::STB_GLOBAL => "GLOBAL",
                elf::STB_WEAK => "WEAK",
                _ => "?",
            };
            let sym_type = match elf::st_type(sym.st_info) {
                elf::STT_NOTYPE => "NOTYPE",
                elf::STT_OBJECT => "OBJECT",
                elf::STT_FUNC => "FUNC",
                elf::STT_SECTION => "SECTION",
                elf::STT_FILE => "FILE",
                _ => "?",
            };
            writeln!(
                out,
                "  {index:>4}:   {:04x}  {:>4}  {:<8} {:<7} {:<4} {}",
                sym.st_value,
                sym.st_size,
                sym_type,
                bind,
                ndx_name(sym.st_shndx),
                self.symbol_names[index],
            )?;
        }
        writeln!(out)
    }

    fn dump_relocations<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for (index, shdr) in self.shdrs.iter().enumerate() {
            if shdr.sh_type != elf::SHT_REL {
                continue;
            }
            let entries = self.contents[index].chunks(elf::REL_SIZE as usize);
            writeln!(
                out,
                "Relocation section '{}' contains {} entries:",
                self.section_names[index],
                self.contents[index].len() / elf::REL_SIZE as usize
            )?;
            writeln!(out, "  Offset  Info  {:<10} Sym.Ndx  Sym.Name", "Type")?;
            for entry in entries {
                let offset = u16::from_le_bytes([entry[0], entry[1]]);
                let info = u16::from_le_bytes([entry[2], entry[3]]);
                let sym = elf::r_sym(info) as usize;
                writeln!(
                    out,
                    "  {offset:04x}    {info:04x}  {:<10} {sym:>7}  {}",
                    rel_type_name(elf::r_type(info)),
                    self.symbol_names.get(sym).map(String::as_str).unwrap_or("?"),
                )?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    fn dump_string_table<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for (index, shdr) in self.shdrs.iter().enumerate() {
            if shdr.sh_type != elf::SHT_STRTAB {
                continue;
            }
            writeln!(out, "String table '{}':", self.section_names[index])?;
            let bytes = &self.contents[index];
            let mut start = 0;
            for (pos, &byte) in bytes.iter().enumerate() {
                if byte == 0 {
                    if pos > start {
                        writeln!(
                            out,
                            "  [{start:>4}]  {}",
                            String::from_utf8_lossy(&bytes[start..pos])
                        )?;
                    }
                    start = pos + 1;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

fn ndx_name(shndx: u16) -> String {
    match shndx {
        SHN_UNDEF => "UND".to_string(),
        SHN_ABS => "ABS".to_string(),
        _ => shndx.to_string(),
    }
}
