//! ELF32 module loading.
//!
//! Code comes from loadable executable segments, scratch space from the
//! tail of loadable writable segments, and imports from the `.rel.plt`
//! relocations: each names a dynamic symbol and the GOT slot the dynamic
//! linker fills with its address.

use goblin::elf::header::ET_DYN;
use goblin::elf::program_header::{PF_W, PF_X, PT_LOAD};
use goblin::elf::Elf;
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::module::{
    addr32, file_range, ExecutableSection, Format, ImportTable, Module, RelocatedImport,
    WritableSection,
};

/// Build a [`Module`] from a parsed ELF image.
pub fn load(name: &str, elf: &Elf, data: &[u8]) -> Result<Module> {
    if elf.is_64 {
        return Err(Error::load(name, "64-bit ELF images are not supported"));
    }

    let mut module = Module::new(name, Format::Elf);
    module.position_independent = elf.header.e_type == ET_DYN;

    for ph in &elf.program_headers {
        if ph.p_type != PT_LOAD {
            continue;
        }

        if ph.p_flags & PF_X != 0 {
            let Some(bytes) = file_range(data, ph.p_offset, ph.p_filesz) else {
                warn!(
                    "{}: executable segment at 0x{:x} extends past end of file, skipped",
                    name, ph.p_vaddr
                );
                continue;
            };
            // The last scanned byte must still be addressable.
            let end = ph.p_vaddr.saturating_add(ph.p_filesz);
            addr32(name, end.saturating_sub(1))?;
            module.executable.push(ExecutableSection {
                base: addr32(name, ph.p_vaddr)?,
                bytes: bytes.to_vec(),
            });
        }

        if ph.p_flags & PF_W != 0 {
            let used = u32::try_from(ph.p_memsz)
                .map_err(|_| Error::load(name, "writable segment larger than 4 GiB"))?;
            module.writable.push(WritableSection {
                start: addr32(name, ph.p_vaddr)?,
                used,
                alignment: u32::try_from(ph.p_align).unwrap_or(0),
            });
        }
    }

    module.imports = ImportTable::Relocations(plt_imports(name, elf)?);

    debug!(
        "{}: {} executable and {} writable segments",
        name,
        module.executable.len(),
        module.writable.len()
    );
    Ok(module)
}

/// Resolve each PLT relocation to (symbol name, GOT slot).
fn plt_imports(name: &str, elf: &Elf) -> Result<Vec<RelocatedImport>> {
    let mut imports = Vec::new();
    for reloc in elf.pltrelocs.iter() {
        let Some(function) = elf
            .dynsyms
            .get(reloc.r_sym)
            .and_then(|sym| elf.dynstrtab.get_at(sym.st_name))
        else {
            warn!("{}: PLT relocation at 0x{:x} has no symbol name", name, reloc.r_offset);
            continue;
        };
        if function.is_empty() {
            continue;
        }
        imports.push(RelocatedImport {
            function: function.to_string(),
            slot: addr32(name, reloc.r_offset)?,
        });
    }
    Ok(imports)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::assembler::Assembler;
    use crate::types::VirtAddr;
    use goblin::elf::dynamic::{
        DT_JMPREL, DT_NULL, DT_PLTREL, DT_PLTRELSZ, DT_REL, DT_STRSZ, DT_STRTAB, DT_SYMENT,
        DT_SYMTAB,
    };
    use goblin::elf::program_header::PT_DYNAMIC;
    use std::io::Write;

    const ET_EXEC: u16 = 2;

    /// Minimal ELF32 image: one R-X segment holding `code` at `code_vaddr`
    /// and one RW- segment of `data_memsz` bytes at `data_vaddr`.
    pub(crate) fn build_elf32(
        e_type: u16,
        code: &[u8],
        code_vaddr: u32,
        data_vaddr: u32,
        data_memsz: u32,
        data_align: u32,
    ) -> Vec<u8> {
        build_elf32_with_imports(e_type, code, code_vaddr, data_vaddr, data_memsz, data_align, &[])
    }

    /// Like [`build_elf32`], plus a read-only segment at [`DYN_VADDR`] with
    /// `.dynstr`, `.dynsym`, `.rel.plt` and a `PT_DYNAMIC` pointing at
    /// them. Each `(function, slot)` becomes one `R_386_JMP_SLOT`.
    fn build_elf32_with_imports(
        e_type: u16,
        code: &[u8],
        code_vaddr: u32,
        data_vaddr: u32,
        data_memsz: u32,
        data_align: u32,
        imports: &[(&str, u32)],
    ) -> Vec<u8> {
        const EHSIZE: u32 = 52;
        const PHENTSIZE: u32 = 32;
        let phnum: u16 = if imports.is_empty() { 2 } else { 4 };
        let code_offset = EHSIZE + phnum as u32 * PHENTSIZE;
        let dyn_offset = (code_offset + code.len() as u32 + 3) & !3;

        let mut out = Vec::new();
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&e_type.to_le_bytes());
        out.extend_from_slice(&3u16.to_le_bytes()); // EM_386
        out.extend_from_slice(&1u32.to_le_bytes()); // e_version
        out.extend_from_slice(&code_vaddr.to_le_bytes()); // e_entry
        out.extend_from_slice(&EHSIZE.to_le_bytes()); // e_phoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&(EHSIZE as u16).to_le_bytes());
        out.extend_from_slice(&(PHENTSIZE as u16).to_le_bytes());
        out.extend_from_slice(&phnum.to_le_bytes());
        out.extend_from_slice(&40u16.to_le_bytes()); // e_shentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx

        let (blob, dynamic_at) = dynamic_blob(imports);
        let blob_len = blob.len() as u32;
        let dynamic_len = blob_len - dynamic_at;

        let code_len = code.len() as u32;
        let mut headers = vec![
            [PT_LOAD, code_offset, code_vaddr, code_vaddr, code_len, code_len, PF_X | 4, 0x1000],
            [PT_LOAD, 0, data_vaddr, data_vaddr, 0, data_memsz, PF_W | 4, data_align],
        ];
        if !imports.is_empty() {
            headers.push([PT_LOAD, dyn_offset, DYN_VADDR, DYN_VADDR, blob_len, blob_len, 4, 4]);
            headers.push([
                PT_DYNAMIC,
                dyn_offset + dynamic_at,
                DYN_VADDR + dynamic_at,
                DYN_VADDR + dynamic_at,
                dynamic_len,
                dynamic_len,
                6,
                4,
            ]);
        }
        for field in headers.into_iter().flatten() {
            out.extend_from_slice(&field.to_le_bytes());
        }

        out.extend_from_slice(code);
        if !imports.is_empty() {
            out.resize(dyn_offset as usize, 0);
            out.extend_from_slice(&blob);
        }
        out
    }

    /// Virtual address of the dynamic-linking segment.
    const DYN_VADDR: u32 = 0x0900_0000;

    /// Lay out string table, symbols, PLT relocations and the dynamic
    /// array, in that order. Returns the blob and the dynamic array offset.
    fn dynamic_blob(imports: &[(&str, u32)]) -> (Vec<u8>, u32) {
        const R_386_JMP_SLOT: u32 = 7;

        let mut strtab = vec![0u8];
        let mut symtab = vec![0u8; 16];
        let mut relocs = Vec::new();
        for (i, (function, slot)) in imports.iter().enumerate() {
            let st_name = strtab.len() as u32;
            strtab.extend_from_slice(function.as_bytes());
            strtab.push(0);

            symtab.extend_from_slice(&st_name.to_le_bytes());
            symtab.extend_from_slice(&[0; 8]); // st_value, st_size
            symtab.extend_from_slice(&[0x12, 0, 0, 0]); // GLOBAL FUNC, UND

            relocs.extend_from_slice(&slot.to_le_bytes());
            let r_info = ((i as u32 + 1) << 8) | R_386_JMP_SLOT;
            relocs.extend_from_slice(&r_info.to_le_bytes());
        }
        let strsz = strtab.len() as u32;
        strtab.resize((strtab.len() + 3) & !3, 0);

        let symtab_at = strtab.len() as u32;
        let relocs_at = symtab_at + symtab.len() as u32;
        let dynamic_at = relocs_at + relocs.len() as u32;

        let mut blob = strtab;
        blob.extend_from_slice(&symtab);
        blob.extend_from_slice(&relocs);
        let entries: [(u64, u32); 8] = [
            (DT_STRTAB, DYN_VADDR),
            (DT_STRSZ, strsz),
            (DT_SYMTAB, DYN_VADDR + symtab_at),
            (DT_SYMENT, 16),
            (DT_JMPREL, DYN_VADDR + relocs_at),
            (DT_PLTRELSZ, relocs.len() as u32),
            (DT_PLTREL, DT_REL as u32),
            (DT_NULL, 0),
        ];
        for (tag, value) in entries {
            blob.extend_from_slice(&(tag as u32).to_le_bytes());
            blob.extend_from_slice(&value.to_le_bytes());
        }
        (blob, dynamic_at)
    }

    #[test]
    fn loads_segments() {
        let image = build_elf32(ET_EXEC, &[0x58, 0xC3], 0x8048000, 0x8049000, 0x10, 0x1000);
        let module = Module::parse("a.out", &image).unwrap();

        assert_eq!(module.format, Format::Elf);
        assert!(!module.position_independent);
        assert_eq!(module.executable.len(), 1);
        assert_eq!(module.executable[0].base, VirtAddr(0x8048000));
        assert_eq!(module.executable[0].bytes, vec![0x58, 0xC3]);
        assert_eq!(
            module.writable,
            vec![WritableSection {
                start: VirtAddr(0x8049000),
                used: 0x10,
                alignment: 0x1000,
            }]
        );
        assert_eq!(module.imports, ImportTable::Relocations(Vec::new()));
    }

    #[test]
    fn plt_relocations_become_got_slots() {
        let imports = [("puts", 0x804a00c), ("", 0x804a010), ("exit", 0x804a014)];
        let image = build_elf32_with_imports(
            ET_EXEC,
            &[0x58, 0xC3],
            0x8048000,
            0x804a000,
            0x20,
            0x1000,
            &imports,
        );
        let module = Module::parse("a.out", &image).unwrap();

        // The unnamed relocation is dropped.
        assert_eq!(
            module.imports,
            ImportTable::Relocations(vec![
                RelocatedImport {
                    function: "puts".into(),
                    slot: VirtAddr(0x804a00c),
                },
                RelocatedImport {
                    function: "exit".into(),
                    slot: VirtAddr(0x804a014),
                },
            ])
        );
        // The dynamic-linking segment is neither code nor scratch.
        assert_eq!(module.executable.len(), 1);
        assert_eq!(module.writable.len(), 1);

        let asm = Assembler::from_modules([module]).unwrap();
        assert_eq!(asm.import_pointer_by_name("exit").unwrap(), VirtAddr(0x804a014));
        assert!(matches!(
            asm.import_pointer_by_name("printf"),
            Err(Error::ImportNotFound(_))
        ));
    }

    #[test]
    fn shared_object_is_position_independent() {
        let image = build_elf32(ET_DYN, &[0xC3], 0x1000, 0x2000, 4, 0x1000);
        let module = Module::parse("libfoo.so", &image).unwrap();
        assert!(module.position_independent);
    }

    #[test]
    fn load_from_disk() {
        let image = build_elf32(ET_EXEC, &[0x90, 0xC3], 0x1000, 0x2000, 4, 0x1000);
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&image).unwrap();
        tmp.flush().unwrap();

        let module = Module::load(tmp.path()).unwrap();
        assert_eq!(module.executable[0].bytes, vec![0x90, 0xC3]);
        assert_eq!(
            module.name,
            tmp.path().file_name().unwrap().to_string_lossy()
        );
    }
}
