// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! End-to-end assembler tests: assemble source strings and inspect the
//! resulting sections, symbols, relocations and object images.

use clap::Parser;

use super::cli::Cli;
use super::{run_with, Assembler};
use crate::core::elf::{self, Rel, EHDR_SIZE, R_VN_16, R_VN_PC16, SHDR_SIZE, SHN_ABS, SHN_UNDEF, SYM_SIZE};
use crate::core::symbol_table::{SymBind, SymType, Symbol};

fn assemble(src: &str) -> Assembler {
    try_assemble(src).expect("assembly succeeds")
}

fn try_assemble(src: &str) -> Result<Assembler, String> {
    let lines: Vec<String> = src.lines().map(str::to_string).collect();
    let mut asm = Assembler::new();
    match asm.assemble(&lines) {
        Ok(()) => Ok(asm),
        Err(diag) => Err(diag.format()),
    }
}

fn assemble_err(src: &str) -> String {
    try_assemble(src).expect_err("assembly fails")
}

fn section_data(asm: &Assembler, name: &str) -> Vec<u8> {
    let index = asm.sections().index_of(name).expect(name);
    asm.sections().get(index).expect(name).data.clone()
}

fn section_size(asm: &Assembler, name: &str) -> u16 {
    let index = asm.sections().index_of(name).expect(name);
    asm.sections().get(index).expect(name).size
}

fn relocs(asm: &Assembler, name: &str) -> Vec<Rel> {
    let index = asm.sections().index_of(name).expect(name);
    asm.sections().get(index).expect(name).relocs.clone()
}

fn symbol<'a>(asm: &'a Assembler, name: &str) -> &'a Symbol {
    asm.symbols().entry(name).expect(name)
}

#[test]
fn halt_program() {
    let asm = assemble(".text\nhalt\n.end\n");
    assert_eq!(section_size(&asm, ".text"), 1);
    assert_eq!(section_data(&asm, ".text"), vec![1 << 3]);
}

#[test]
fn data_word_is_little_endian() {
    let asm = assemble(".data\nx: .word 0x1234\n.end\n");
    assert_eq!(section_data(&asm, ".data"), vec![0x34, 0x12]);

    let x = symbol(&asm, "x");
    assert_eq!(x.value, 0);
    assert_eq!(x.shndx, asm.sections().index_of(".data").unwrap());
    assert_eq!(x.sym_type, SymType::Object);
    assert_eq!(x.bind, SymBind::Local);
}

#[test]
fn mov_register_direct() {
    let asm = assemble(".text\n mov r0, r1\n.end\n");
    assert_eq!(section_data(&asm, ".text"), vec![0x24, 0x20, 0x22]);
}

#[test]
fn equ_constant_in_byte_data() {
    let asm = assemble(".equ k, 7\n.data\n .byte k\n.end\n");
    assert_eq!(section_data(&asm, ".data"), vec![0x07]);
    let k = symbol(&asm, "k");
    assert_eq!(k.shndx, SHN_ABS);
    assert_eq!(k.value, 7);
}

#[test]
fn extern_call_emits_absolute_reloc() {
    let asm = assemble(".extern foo\n.text\n call foo\n.end\n");
    assert_eq!(
        section_data(&asm, ".text"),
        vec![(23 << 3) | 4, 0b101 << 5, 0, 0]
    );

    let rels = relocs(&asm, ".text");
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].r_offset, 2);
    assert_eq!(rels[0].rel_type(), R_VN_16);
    assert_eq!(rels[0].sym(), asm.symbols().index_of("foo").unwrap());

    let foo = symbol(&asm, "foo");
    assert_eq!(foo.bind, SymBind::Global);
    assert_eq!(foo.shndx, SHN_UNDEF);

    // The lazily created relocation section points back at .text.
    let rel_index = asm.sections().index_of(".rel.text").unwrap();
    let rel_section = asm.sections().get(rel_index).unwrap();
    assert_eq!(rel_section.info, asm.sections().index_of(".text").unwrap());
}

#[test]
fn pcrel_jump_to_local_label_needs_no_reloc() {
    let asm = assemble(".text\nl: jmp $l\n.end\n");
    // Payload encodes l - next_instruction = -4, little-endian.
    assert_eq!(
        section_data(&asm, ".text"),
        vec![(19 << 3) | 4, (0b100 << 5) | (7 << 1), 0xfc, 0xff]
    );
    assert!(asm.sections().index_of(".rel.text").is_none());
}

#[test]
fn pcrel_jump_to_extern_uses_pc16() {
    let asm = assemble(".extern isr\n.text\n jmp $isr\n.end\n");
    assert_eq!(&section_data(&asm, ".text")[2..], &[0xfe, 0xff]);
    let rels = relocs(&asm, ".text");
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].rel_type(), R_VN_PC16);
    assert_eq!(rels[0].sym(), asm.symbols().index_of("isr").unwrap());
}

#[test]
fn location_counter_resumes_across_section_switches() {
    let asm = assemble(
        ".text\n\
         nop\n\
         .data\n\
         .byte 1\n\
         .text\n\
         halt\n\
         .end\n",
    );
    assert_eq!(section_data(&asm, ".text"), vec![0x00, 0x08]);
    assert_eq!(section_size(&asm, ".text"), 2);
    assert_eq!(section_data(&asm, ".data"), vec![0x01]);

    // A label after the resume sees the restored LC.
    let asm = assemble(".text\nnop\n.data\n.byte 1\n.text\nl: halt\n.end\n");
    assert_eq!(symbol(&asm, "l").value, 1);
}

#[test]
fn align_pads_to_power_of_two() {
    let asm = assemble(".data\n.byte 1\n.align 4, 0xff\n.word 0x0102\n.end\n");
    assert_eq!(
        section_data(&asm, ".data"),
        vec![0x01, 0xff, 0xff, 0xff, 0x02, 0x01]
    );

    // Already aligned: no padding at all.
    let asm = assemble(".data\n.word 1\n.align 2\n.byte 2\n.end\n");
    assert_eq!(section_data(&asm, ".data"), vec![0x01, 0x00, 0x02]);
}

#[test]
fn align_errors() {
    assert!(assemble_err(".data\n.align 3\n.end\n").contains("power of two"));
    assert!(assemble_err(".data\n.byte 1\n.align 8, 0, 2\n.end\n").contains("exceeds"));
    assert!(assemble_err(".align 2\n.end\n").contains("outside"));
}

#[test]
fn skip_emits_fill_bytes() {
    let asm = assemble(".data\n.skip 3, 0xaa\n.byte 1\n.end\n");
    assert_eq!(section_data(&asm, ".data"), vec![0xaa, 0xaa, 0xaa, 0x01]);

    let asm = assemble(".data\n.skip 2\n.end\n");
    assert_eq!(section_data(&asm, ".data"), vec![0x00, 0x00]);
}

#[test]
fn bss_takes_no_bytes_but_grows() {
    let asm = assemble(".bss\nbuf: .skip 16\n.word 0\n.byte 0, 0\n.end\n");
    assert_eq!(section_size(&asm, ".bss"), 20);
    assert!(section_data(&asm, ".bss").is_empty());
    assert_eq!(symbol(&asm, "buf").value, 0);

    let index = asm.sections().index_of(".bss").unwrap();
    let bss = asm.sections().get(index).unwrap();
    assert_eq!(bss.sh_type, elf::SHT_NOBITS);
    assert_eq!(bss.flags, elf::SHF_ALLOC | elf::SHF_WRITE);
}

#[test]
fn nonzero_data_in_bss_is_rejected() {
    assert!(assemble_err(".bss\n.byte 1\n.end\n").contains("NOBITS"));
    assert!(assemble_err(".bss\n.word 0x100\n.end\n").contains("NOBITS"));
    assert!(assemble_err(".extern x\n.bss\n.word x\n.end\n").contains("NOBITS"));
}

#[test]
fn wrong_section_contexts_are_fatal() {
    assert!(assemble_err(".text\n.byte 1\n.end\n").contains("executable"));
    assert!(assemble_err(".data\nnop\n.end\n").contains("non-executable"));
    assert!(assemble_err("nop\n.end\n").contains("outside"));
    assert!(assemble_err("l: .end\n").contains("outside"));
}

#[test]
fn custom_section_flags() {
    let asm = assemble(".section .ivt, \"aw\"\n.word 0\n.end\n");
    let index = asm.sections().index_of(".ivt").unwrap();
    let ivt = asm.sections().get(index).unwrap();
    assert_eq!(ivt.flags, elf::SHF_ALLOC | elf::SHF_WRITE);
    assert_eq!(ivt.sh_type, elf::SHT_PROGBITS);

    assert!(assemble_err(".section .odd\n.end\n").contains("flags"));
}

#[test]
fn symbol_redefinition_is_fatal() {
    assert!(assemble_err(".text\nx: nop\nx: nop\n.end\n").contains("already in use"));
    assert!(assemble_err(".equ k, 1\n.equ k, 2\n.end\n").contains("already in use"));
    assert!(assemble_err(".equ k, 1\n.text\nk: nop\n.end\n").contains("already in use"));
}

#[test]
fn set_allows_reassignment() {
    let asm = assemble(".set k, 1\n.set k, k + 1\n.data\n.byte k\n.end\n");
    assert_eq!(section_data(&asm, ".data"), vec![0x02]);
}

#[test]
fn undefined_reference_is_fatal() {
    assert!(assemble_err(".text\n call missing\n.end\n").contains("undefined symbol"));
    assert!(assemble_err(".data\n.word missing\n.end\n").contains("undefined symbol"));
}

#[test]
fn extern_later_defined_becomes_global_definition() {
    let asm = assemble(".extern shared\n.text\nshared: nop\n.end\n");
    let shared = symbol(&asm, "shared");
    assert_eq!(shared.bind, SymBind::Global);
    assert_eq!(shared.shndx, asm.sections().index_of(".text").unwrap());
}

#[test]
fn global_promotion_runs_in_pass_two() {
    let asm = assemble(".global entry\n.text\nentry: halt\n.end\n");
    assert_eq!(symbol(&asm, "entry").bind, SymBind::Global);

    assert!(assemble_err(".global nothing\n.text\nhalt\n.end\n").contains("undefined"));
}

#[test]
fn global_of_relative_equ_is_rejected() {
    let err = assemble_err(".text\nl: nop\n.equ p, l + 1\n.global p\n.end\n");
    assert!(err.contains("relative"));
}

#[test]
fn word_data_with_local_symbol_relocates_via_section() {
    let asm = assemble(".text\nl: nop\n.data\n.word l, l\n.end\n");
    assert_eq!(section_data(&asm, ".data"), vec![0, 0, 0, 0]);

    let rels = relocs(&asm, ".data");
    assert_eq!(rels.len(), 2);
    assert_eq!(rels[0].r_offset, 0);
    assert_eq!(rels[1].r_offset, 2);
    let text_sym = asm
        .symbols()
        .section_symbol(asm.sections().index_of(".text").unwrap())
        .unwrap();
    assert_eq!(rels[0].sym(), text_sym);
    assert_eq!(rels[0].rel_type(), R_VN_16);
}

#[test]
fn byte_data_rejects_relocatable_values() {
    let err = assemble_err(".text\nl: nop\n.data\n.byte l\n.end\n");
    assert!(err.contains("relocatable"));
}

#[test]
fn expression_data() {
    let asm = assemble(".data\n.word 2 + 3 * 4, (2 + 3) * 4\n.byte -1, ~0\n.end\n");
    assert_eq!(section_data(&asm, ".data"), vec![14, 0, 20, 0, 0xff, 0xff]);
}

#[test]
fn section_class_algebra() {
    // Difference of two same-section labels is absolute.
    let asm = assemble(".text\na: nop\nb: halt\n.data\n.byte b - a\n.end\n");
    assert_eq!(section_data(&asm, ".data"), vec![0x01]);

    // Label plus constant stays in the section and relocates.
    let asm = assemble(".text\na: nop\n.data\n.word a + 4\n.end\n");
    let rels = relocs(&asm, ".data");
    assert_eq!(rels.len(), 1);
    assert_eq!(section_data(&asm, ".data"), vec![4, 0]);

    assert!(assemble_err(".text\na: nop\nb: nop\n.data\n.word a + b\n.end\n").contains("add"));
    assert!(assemble_err(".text\na: nop\n.data\n.word 2 * a\n.end\n").contains("relative"));
}

#[test]
fn equ_over_extern_keeps_symbol_relocation() {
    let asm = assemble(".extern base\n.equ ptr, base + 2\n.data\n.word ptr\n.end\n");
    assert_eq!(section_data(&asm, ".data"), vec![2, 0]);
    let rels = relocs(&asm, ".data");
    assert_eq!(rels[0].sym(), asm.symbols().index_of("base").unwrap());

    let ptr = symbol(&asm, "ptr");
    assert!(ptr.is_relative_equ());
}

#[test]
fn deferred_equ_resolves_through_forward_label() {
    let asm = assemble(".equ after, l + 2\n.text\nnop\nl: halt\n.data\n.word after\n.end\n");
    let after = symbol(&asm, "after");
    assert_eq!(after.value, 3);
    assert!(after.is_relative_equ());

    let rels = relocs(&asm, ".data");
    assert_eq!(rels.len(), 1);
    assert_eq!(section_data(&asm, ".data"), vec![3, 0]);
}

#[test]
fn deferred_equ_chain_to_absolute() {
    let asm = assemble(".equ a, b + 1\n.equ b, c + 1\n.equ c, 40\n.data\n.byte a\n.end\n");
    assert_eq!(section_data(&asm, ".data"), vec![42]);
    assert_eq!(symbol(&asm, "a").shndx, SHN_ABS);
}

#[test]
fn equ_cycle_is_fatal() {
    let err = assemble_err(".equ aa, bb\n.equ bb, aa\n.end\n");
    assert!(err.contains("unresolved"));
    assert!(err.contains("aa"));
    assert!(err.contains("bb"));
}

#[test]
fn label_matching_section_name_updates_section_symbol() {
    let asm = assemble(".text\nnop\n.text: halt\n.end\n");
    let text = asm.sections().index_of(".text").unwrap();
    let section_sym = asm.symbols().section_symbol(text).unwrap();
    assert_eq!(asm.symbols().get(section_sym).unwrap().value, 1);
    // No second symbol named .text was created.
    assert_eq!(asm.symbols().index_of(".text"), Some(section_sym));
}

#[test]
fn end_terminates_assembly() {
    let asm = assemble(".text\nhalt\n.end\ngarbage that would not parse\n");
    assert_eq!(section_data(&asm, ".text"), vec![0x08]);
}

#[test]
fn missing_end_is_permitted() {
    let asm = assemble(".text\nhalt\n");
    assert_eq!(section_data(&asm, ".text"), vec![0x08]);
    assert_eq!(section_size(&asm, ".text"), 1);
}

#[test]
fn lexical_errors_carry_line_numbers() {
    let err = assemble_err(".text\nmov r0,\n.end\n");
    assert!(err.starts_with("2:"), "{err}");

    let err = assemble_err(".text\nfrob r0\n.end\n");
    assert!(err.contains("unknown instruction"));
}

#[test]
fn object_image_layout() {
    let mut asm = assemble(".text\nhalt\n.end\n");
    let image = asm.build_object().expect("object builds");

    // null, .text, .symtab, .strtab, .shstrtab
    assert_eq!(image.shdrs.len(), 5);
    assert_eq!(image.ehdr.e_shnum, 5);
    assert_eq!(image.ehdr.e_shstrndx, 4);
    assert_eq!(image.ehdr.e_shoff, EHDR_SIZE);
    assert_eq!(image.section_names[1], ".text");
    assert_eq!(image.section_names[2], ".symtab");

    // Offsets are contiguous in section-index order after the headers.
    let mut offset = EHDR_SIZE + 5 * SHDR_SIZE;
    for index in 1..image.shdrs.len() {
        assert_eq!(image.shdrs[index].sh_offset, offset);
        offset += image.contents[index].len() as u16;
    }

    // Symbol table: null symbol plus the .text section symbol.
    assert_eq!(image.symbols.len(), 2);
    assert_eq!(image.shdrs[2].sh_size, 2 * SYM_SIZE);
    assert_eq!(image.shdrs[2].sh_entsize, SYM_SIZE);
    assert_eq!(image.shdrs[2].sh_link, 3); // .strtab
    assert_eq!(
        image.symbols[1].st_info,
        elf::st_info(elf::STB_LOCAL, elf::STT_SECTION)
    );

    let mut binary = Vec::new();
    image.write_binary(&mut binary).unwrap();
    assert_eq!(&binary[..4], b"\x7fELF");
    assert_eq!(binary.len() as u16, offset);
}

#[test]
fn rel_sections_link_to_symtab() {
    let mut asm = assemble(".extern foo\n.text\n call foo\n.end\n");
    let image = asm.build_object().expect("object builds");
    let rel_index = image
        .section_names
        .iter()
        .position(|name| name == ".rel.text")
        .unwrap();
    let symtab_index = image
        .section_names
        .iter()
        .position(|name| name == ".symtab")
        .unwrap();
    assert_eq!(image.shdrs[rel_index].sh_link, symtab_index as u16);
    assert_eq!(image.shdrs[rel_index].sh_type, elf::SHT_REL);
    assert_eq!(image.shdrs[rel_index].sh_info, 1); // .text
    assert_eq!(image.contents[rel_index].len(), 4);
}

#[test]
fn dump_lists_sections_symbols_and_relocations() {
    let mut asm = assemble(".extern foo\n.text\n call foo\n.end\n");
    let image = asm.build_object().expect("object builds");
    let mut out = Vec::new();
    image.write_dump(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.contains("ELF Header:"));
    assert!(text.contains("Machine:                           VN16"));
    assert!(text.contains("Section Headers:"));
    assert!(text.contains(".rel.text"));
    assert!(text.contains("Hex dump of section '.text':"));
    assert!(text.contains("bc a0 00 00"));
    assert!(text.contains("Symbol table '.symtab' contains 3 entries:"));
    assert!(text.contains("R_VN_16"));
    assert!(text.contains("foo"));
}

#[test]
fn run_derives_output_and_writes_dump() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("prog.s");
    std::fs::write(&input, ".text\nhalt\n.end\n").unwrap();

    let cli = Cli::parse_from(["vnforge", input.to_str().unwrap()]);
    let report = run_with(&cli).expect("run succeeds");
    assert!(report.output_path().ends_with("prog.o"));
    let text = std::fs::read_to_string(report.output_path()).unwrap();
    assert!(text.contains("ELF Header:"));
}

#[test]
fn run_writes_binary_object_with_e_flag() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("prog.s");
    std::fs::write(&input, ".text\nhalt\n.end\n").unwrap();

    let cli = Cli::parse_from(["vnforge", "-e", input.to_str().unwrap()]);
    let report = run_with(&cli).expect("run succeeds");
    let bytes = std::fs::read(report.output_path()).unwrap();
    assert_eq!(&bytes[..4], b"\x7fELF");
    assert_eq!(bytes[4], elf::ELFCLASS16);
    assert_eq!(bytes[5], elf::ELFDATA2LSB);
}

#[test]
fn run_exit_codes() {
    let cli = Cli::parse_from(["vnforge", "/no/such/input.s"]);
    assert_eq!(run_with(&cli).unwrap_err().exit_code(), 2);

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("prog.s");
    std::fs::write(&input, ".text\nhalt\n.end\n").unwrap();
    let cli = Cli::parse_from([
        "vnforge",
        "-o",
        "/no/such/dir/out.o",
        input.to_str().unwrap(),
    ]);
    assert_eq!(run_with(&cli).unwrap_err().exit_code(), 3);

    // Assembly failures are graceful: reported, but exit 0.
    std::fs::write(&input, ".text\n mov r0,\n.end\n").unwrap();
    let cli = Cli::parse_from(["vnforge", input.to_str().unwrap()]);
    let err = run_with(&cli).unwrap_err();
    assert_eq!(err.exit_code(), 0);
    assert_eq!(err.diagnostics().len(), 1);
}

#[test]
fn pushf_assembles_like_push_psw() {
    let asm = assemble(".text\npushf\npopf\n.end\n");
    assert_eq!(
        section_data(&asm, ".text"),
        vec![(17 << 3) | 4, 0x3e, (18 << 3) | 4, 0x3e]
    );
}

#[test]
fn immediate_symbol_word_relocates() {
    let asm = assemble(".extern tab\n.text\n mov r0, &tab\n.end\n");
    let rels = relocs(&asm, ".text");
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].r_offset, 3); // opcode, reg desc, imm desc, then payload
    assert_eq!(rels[0].rel_type(), R_VN_16);
}

#[test]
fn rodata_is_read_only_progbits() {
    let asm = assemble(".section .rodata\n.word 1\n.end\n");
    let index = asm.sections().index_of(".rodata").unwrap();
    let rodata = asm.sections().get(index).unwrap();
    assert_eq!(rodata.flags, elf::SHF_ALLOC);
    assert_eq!(rodata.sh_type, elf::SHT_PROGBITS);
}
