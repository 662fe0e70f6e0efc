// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Final object assembly and binary serialization.
//!
//! After both passes the registries are frozen; this module appends the
//! `.symtab`/`.strtab`/`.shstrtab` headers, assigns file offsets in
//! section-index order and packs everything into an [`ObjectImage`] that
//! can be written as a binary ELF16 object or dumped as text.

use std::io::{self, Write};

use crate::core::assembler::error::{AsmError, AsmErrorKind};
use crate::core::elf::{self, Ehdr, Shdr, Sym, EHDR_SIZE, REL_SIZE, SHDR_SIZE, SYM_SIZE};

use super::Assembler;

/// The finished object: headers, contents, and the name tables the dump
/// needs to label them.
pub struct ObjectImage {
    pub ehdr: Ehdr,
    pub shdrs: Vec<Shdr>,
    pub section_names: Vec<String>,
    pub contents: Vec<Vec<u8>>,
    pub symbols: Vec<Sym>,
    pub symbol_names: Vec<String>,
}

impl ObjectImage {
    /// Serialize the binary ELF16 object.
    pub fn write_binary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.ehdr.write_to(out)?;
        for shdr in &self.shdrs {
            shdr.write_to(out)?;
        }
        for content in &self.contents {
            out.write_all(content)?;
        }
        Ok(())
    }
}

impl Assembler {
    /// Build the final object image. Consumes the registries' frozen state
    /// and appends the metadata sections.
    pub fn build_object(&mut self) -> Result<ObjectImage, AsmError> {
        self.verify_sections()?;

        // Relocation sections were sized lazily; fix their byte sizes now.
        let rel_sizes: Vec<(u16, u16)> = self
            .sections
            .iter()
            .filter_map(|section| {
                section
                    .rel_index
                    .map(|rel| (rel, section.relocs.len() as u16 * REL_SIZE))
            })
            .collect();
        for (rel, size) in rel_sizes {
            if let Some(section) = self.sections.get_mut(rel) {
                section.size = size;
            }
        }

        let symtab = self.sections.add_meta(".symtab", elf::SHT_SYMTAB);
        let strtab = self.sections.add_meta(".strtab", elf::SHT_STRTAB);
        let shstrtab = self.sections.add_meta(".shstrtab", elf::SHT_STRTAB);

        let (strtab_bytes, name_offsets) = self.symbols.strtab_bytes();
        let symbols: Vec<Sym> = self
            .symbols
            .iter()
            .enumerate()
            .map(|(index, sym)| Sym {
                st_name: name_offsets[index],
                st_value: sym.value,
                st_size: sym.size,
                st_info: elf::st_info(sym.bind.to_elf(), sym.sym_type.to_elf()),
                st_other: 0,
                st_shndx: sym.shndx,
            })
            .collect();
        let symbol_names: Vec<String> = self.symbols.iter().map(|sym| sym.name.clone()).collect();

        if let Some(section) = self.sections.get_mut(symtab) {
            section.size = symbols.len() as u16 * SYM_SIZE;
            section.entsize = SYM_SIZE;
            section.link = strtab;
        }
        if let Some(section) = self.sections.get_mut(strtab) {
            section.size = strtab_bytes.len() as u16;
        }

        // Every .rel* section links to the final symbol table.
        let rel_indices: Vec<u16> = self
            .sections
            .iter()
            .filter(|section| section.sh_type == elf::SHT_REL)
            .map(|section| section.index)
            .collect();
        for rel in rel_indices {
            if let Some(section) = self.sections.get_mut(rel) {
                section.link = symtab;
            }
        }

        let (shstrtab_bytes, shname_offsets) = self.sections.shstrtab_bytes();
        if let Some(section) = self.sections.get_mut(shstrtab) {
            section.size = shstrtab_bytes.len() as u16;
        }

        // Per-section contents, in index order.
        let mut contents: Vec<Vec<u8>> = Vec::with_capacity(self.sections.len());
        for section in self.sections.iter() {
            let content = match section.sh_type {
                elf::SHT_PROGBITS => section.data.clone(),
                elf::SHT_REL => {
                    let target = self.sections.get(section.info).ok_or_else(|| {
                        AsmError::new(AsmErrorKind::Assembler, "internal: dangling .rel target")
                    })?;
                    let mut bytes = Vec::with_capacity(target.relocs.len() * REL_SIZE as usize);
                    for rel in &target.relocs {
                        rel.write_to(&mut bytes).map_err(|err| {
                            AsmError::new(AsmErrorKind::Io, err.to_string())
                        })?;
                    }
                    bytes
                }
                elf::SHT_SYMTAB => {
                    let mut bytes = Vec::with_capacity(symbols.len() * SYM_SIZE as usize);
                    for sym in &symbols {
                        sym.write_to(&mut bytes).map_err(|err| {
                            AsmError::new(AsmErrorKind::Io, err.to_string())
                        })?;
                    }
                    bytes
                }
                elf::SHT_STRTAB => {
                    if section.index == strtab {
                        strtab_bytes.clone()
                    } else {
                        shstrtab_bytes.clone()
                    }
                }
                _ => Vec::new(),
            };
            contents.push(content);
        }

        // File offsets follow the header table in section-index order.
        let shnum = self.sections.len() as u16;
        let mut offset = EHDR_SIZE + shnum * SHDR_SIZE;
        let mut shdrs = Vec::with_capacity(self.sections.len());
        for (index, section) in self.sections.iter().enumerate() {
            let content_len = contents[index].len() as u16;
            shdrs.push(Shdr {
                sh_name: shname_offsets[index],
                sh_type: section.sh_type,
                sh_flags: section.flags,
                sh_addr: 0,
                sh_offset: if section.sh_type == elf::SHT_NULL {
                    0
                } else {
                    offset
                },
                sh_size: section.size,
                sh_link: section.link,
                sh_info: section.info,
                sh_addralign: 0,
                sh_entsize: section.entsize,
            });
            offset += content_len;
        }

        let section_names: Vec<String> =
            self.sections.iter().map(|section| section.name.clone()).collect();

        Ok(ObjectImage {
            ehdr: Ehdr::new_rel(shnum, shstrtab),
            shdrs,
            section_names,
            contents,
            symbols,
            symbol_names,
        })
    }

    /// Emission-time invariants: buffered bytes match the sizes pass 1
    /// settled on, and every relocation patches inside its section.
    fn verify_sections(&self) -> Result<(), AsmError> {
        for section in self.sections.iter() {
            if section.is_progbits() && section.data.len() != section.size as usize {
                return Err(AsmError::new(
                    AsmErrorKind::Assembler,
                    format!(
                        "internal: section {} emitted {} bytes but was sized {}",
                        section.name,
                        section.data.len(),
                        section.size
                    ),
                ));
            }
            if section.is_nobits() && !section.data.is_empty() {
                return Err(AsmError::new(
                    AsmErrorKind::Assembler,
                    format!("internal: NOBITS section {} holds data", section.name),
                ));
            }
            for rel in &section.relocs {
                if rel.r_offset >= section.size {
                    return Err(AsmError::new(
                        AsmErrorKind::Assembler,
                        format!(
                            "internal: relocation offset {:#06x} outside section {}",
                            rel.r_offset, section.name
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}
