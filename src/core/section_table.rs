// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Section registry: descriptors, content buffers and relocation tables.
//!
//! Like the symbol table, sections are insertion-ordered and a section's
//! position is its final section-header index. Index 0 is the NULL
//! section. Relocation records are stored on the section they patch; the
//! matching `.rel<name>` header is created lazily when the first record
//! appears.

use crate::core::elf::{self, Rel, SHF_ALLOC, SHF_EXECINSTR, SHF_INFO_LINK, SHF_WRITE};
use crate::core::symbol_table::SymbolTable;

#[derive(Debug)]
pub struct Section {
    pub name: String,
    pub sh_type: u16,
    pub flags: u16,
    /// Location counter, persisted across section switches within a pass.
    pub loc_cnt: u16,
    /// Final size, fixed at the end of pass 1.
    pub size: u16,
    pub entsize: u16,
    pub info: u16,
    pub link: u16,
    pub index: u16,
    /// Index of this section's `STT_SECTION` symbol (0 when it has none).
    pub sym: u16,
    pub data: Vec<u8>,
    /// Relocations patching this section, in insertion order.
    pub relocs: Vec<Rel>,
    /// Header index of the lazily created `.rel<name>` section.
    pub rel_index: Option<u16>,
}

impl Section {
    fn new(name: &str, index: u16, sh_type: u16, flags: u16) -> Self {
        Self {
            name: name.to_string(),
            sh_type,
            flags,
            loc_cnt: 0,
            size: 0,
            entsize: 0,
            info: 0,
            link: 0,
            index,
            sym: 0,
            data: Vec::new(),
            relocs: Vec::new(),
            rel_index: None,
        }
    }

    pub fn is_nobits(&self) -> bool {
        self.sh_type == elf::SHT_NOBITS
    }

    pub fn is_executable(&self) -> bool {
        self.flags & SHF_EXECINSTR != 0
    }

    pub fn is_progbits(&self) -> bool {
        self.sh_type == elf::SHT_PROGBITS
    }
}

#[derive(Debug)]
pub struct SectionTable {
    sections: Vec<Section>,
}

impl Default for SectionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SectionTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sections: vec![Section::new("", 0, elf::SHT_NULL, 0)],
        }
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.len() <= 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    pub fn get(&self, index: u16) -> Option<&Section> {
        self.sections.get(index as usize)
    }

    pub fn get_mut(&mut self, index: u16) -> Option<&mut Section> {
        self.sections.get_mut(index as usize)
    }

    /// Look up a section by name (case-sensitive); the NULL section is not
    /// addressable by name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<u16> {
        if name.is_empty() {
            return None;
        }
        self.sections
            .iter()
            .position(|section| section.name == name)
            .map(|pos| pos as u16)
    }

    /// Enter an existing section or create it with inferred or explicit
    /// flags. Newly created sections get an `STT_SECTION` symbol.
    pub fn enter_or_create(
        &mut self,
        name: &str,
        flags_str: Option<&str>,
        symbols: &mut SymbolTable,
    ) -> Result<u16, String> {
        if let Some(index) = self.index_of(name) {
            return Ok(index);
        }
        let (sh_type, flags) = match flags_str {
            Some(flags_str) => parse_flags(flags_str)
                .ok_or_else(|| format!("invalid section flags: \"{flags_str}\""))?,
            None => infer_flags(name).ok_or_else(|| {
                format!("section requires an explicit flags string: {name}")
            })?,
        };
        let index = self.sections.len() as u16;
        let mut section = Section::new(name, index, sh_type, flags);
        section.sym = symbols.add_section_symbol(name, index);
        self.sections.push(section);
        Ok(index)
    }

    /// Append a metadata section (`.symtab`, `.strtab`, ...) during
    /// emission; these carry no section symbol.
    pub fn add_meta(&mut self, name: &str, sh_type: u16) -> u16 {
        let index = self.sections.len() as u16;
        self.sections.push(Section::new(name, index, sh_type, 0));
        index
    }

    /// Record a relocation patching `target` at `offset`, creating the
    /// `.rel<target>` header on first use.
    pub fn add_reloc(&mut self, target: u16, offset: u16, sym: u16, rel_type: u8) {
        if self.sections[target as usize].rel_index.is_none() {
            let name = format!(".rel{}", self.sections[target as usize].name);
            let index = self.sections.len() as u16;
            let mut rel = Section::new(&name, index, elf::SHT_REL, SHF_INFO_LINK);
            rel.entsize = elf::REL_SIZE;
            rel.info = target;
            self.sections.push(rel);
            self.sections[target as usize].rel_index = Some(index);
        }
        self.sections[target as usize]
            .relocs
            .push(Rel::new(offset, sym, rel_type));
    }

    /// Reset every location counter for the next pass; sizes stay fixed.
    pub fn reset_loc_counters(&mut self) {
        for section in &mut self.sections {
            section.loc_cnt = 0;
        }
    }

    /// Serialize all section names into `.shstrtab` bytes plus the
    /// per-section name offsets (index-aligned).
    pub fn shstrtab_bytes(&self) -> (Vec<u8>, Vec<u16>) {
        let mut bytes = vec![0u8];
        let mut offsets = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            if section.name.is_empty() {
                offsets.push(0);
                continue;
            }
            offsets.push(bytes.len() as u16);
            bytes.extend_from_slice(section.name.as_bytes());
            bytes.push(0);
        }
        (bytes, offsets)
    }
}

/// Flag inference for the well-known section names.
fn infer_flags(name: &str) -> Option<(u16, u16)> {
    match name {
        ".bss" => Some((elf::SHT_NOBITS, SHF_ALLOC | SHF_WRITE)),
        ".data" => Some((elf::SHT_PROGBITS, SHF_ALLOC | SHF_WRITE)),
        ".text" => Some((elf::SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR)),
        ".rodata" => Some((elf::SHT_PROGBITS, SHF_ALLOC)),
        _ => None,
    }
}

/// Explicit flags string: `a` = ALLOC, `e` = NOBITS, `w` = WRITE,
/// `x` = EXECINSTR.
fn parse_flags(flags_str: &str) -> Option<(u16, u16)> {
    let mut sh_type = elf::SHT_PROGBITS;
    let mut flags = 0;
    for c in flags_str.chars() {
        match c {
            'a' => flags |= SHF_ALLOC,
            'e' => sh_type = elf::SHT_NOBITS,
            'w' => flags |= SHF_WRITE,
            'x' => flags |= SHF_EXECINSTR,
            _ => return None,
        }
    }
    Some((sh_type, flags))
}
