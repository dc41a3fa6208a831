//! PE32 module loading.
//!
//! Code comes from sections flagged executable, scratch space from the
//! virtual tail of sections flagged writable, and imports from the
//! import address tables, one per imported DLL.

use goblin::pe::section_table::{IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_WRITE};
use goblin::pe::PE;
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::module::{
    addr32, file_range, ExecutableSection, Format, ImportDescriptor, ImportTable, Module,
    WritableSection,
};

/// `IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE`: the image may be relocated by ASLR.
pub const DYNAMIC_BASE: u16 = 0x0040;

/// Size of one IAT slot in a PE32 image.
pub const IAT_ENTRY_SIZE: u32 = 4;

/// Build a [`Module`] from a parsed PE image.
pub fn load(name: &str, pe: &PE, data: &[u8]) -> Result<Module> {
    if pe.is_64 {
        return Err(Error::load(name, "PE32+ (64-bit) images are not supported"));
    }
    let optional = pe
        .header
        .optional_header
        .as_ref()
        .ok_or_else(|| Error::load(name, "missing optional header"))?;

    let image_base = pe.image_base as u64;
    let mut module = Module::new(name, Format::Pe);
    module.position_independent = optional.windows_fields.dll_characteristics & DYNAMIC_BASE != 0;
    let section_alignment = optional.windows_fields.section_alignment;

    for section in &pe.sections {
        let section_name = section.name().unwrap_or("?");
        let base = image_base + section.virtual_address as u64;

        if section.characteristics & IMAGE_SCN_MEM_EXECUTE != 0 {
            // Raw data is file-aligned; only the virtual extent is code.
            let len = match section.virtual_size {
                0 => section.size_of_raw_data,
                n => n.min(section.size_of_raw_data),
            };
            match file_range(data, section.pointer_to_raw_data as u64, len as u64) {
                Some(bytes) => {
                    addr32(name, (base + len as u64).saturating_sub(1))?;
                    debug!("{}: scanning {} at 0x{:x} ({} bytes)", name, section_name, base, len);
                    module.executable.push(ExecutableSection {
                        base: addr32(name, base)?,
                        bytes: bytes.to_vec(),
                    });
                }
                None => warn!(
                    "{}: section {} extends past end of file, skipped",
                    name, section_name
                ),
            }
        }

        if section.characteristics & IMAGE_SCN_MEM_WRITE != 0 {
            module.writable.push(WritableSection {
                start: addr32(name, base)?,
                used: section.virtual_size,
                alignment: section_alignment,
            });
        }
    }

    let entries = pe
        .imports
        .iter()
        .map(|import| (import.dll, import.name.as_ref(), import.offset as u64));
    module.imports = ImportTable::ByLibrary(group_imports(name, image_base, entries)?);

    Ok(module)
}

/// Gather `(dll, function, IAT slot RVA)` triples into per-DLL tables.
///
/// The lowest slot of each DLL is its table base; every other function is
/// placed at its slot index relative to that base. Unnamed gaps stay empty
/// strings so indices keep lining up with slot addresses.
pub(crate) fn group_imports<'a>(
    name: &str,
    image_base: u64,
    entries: impl IntoIterator<Item = (&'a str, &'a str, u64)>,
) -> Result<Vec<ImportDescriptor>> {
    let mut by_dll: Vec<(&str, Vec<(u64, &str)>)> = Vec::new();
    for (dll, function, rva) in entries {
        match by_dll.iter_mut().find(|(d, _)| d.eq_ignore_ascii_case(dll)) {
            Some((_, slots)) => slots.push((rva, function)),
            None => by_dll.push((dll, vec![(rva, function)])),
        }
    }

    let mut descriptors = Vec::with_capacity(by_dll.len());
    for (dll, mut slots) in by_dll {
        slots.sort_by_key(|(rva, _)| *rva);
        let base_rva = slots[0].0;

        let mut functions = Vec::new();
        for (rva, function) in slots {
            let index = ((rva - base_rva) / IAT_ENTRY_SIZE as u64) as usize;
            if functions.len() <= index {
                functions.resize(index + 1, String::new());
            }
            functions[index] = function.to_string();
        }

        descriptors.push(ImportDescriptor {
            library: dll.to_string(),
            table: addr32(name, image_base + base_rva)?,
            functions,
        });
    }
    Ok(descriptors)
}
