//! Import pointer resolution.
//!
//! A payload cannot call an imported function directly, since its address
//! is only known after the loader runs. What it can use is the fixed
//! address of the slot the loader writes that address into; these
//! lookups return the slot, never the function body.

use crate::error::{Error, Result};
use crate::module::{ImportTable, Module};
use crate::pe::IAT_ENTRY_SIZE;
use crate::types::VirtAddr;

/// Slot for `library!function` in per-library import tables.
///
/// Both names match case-insensitively. The first module that imports
/// the pair wins.
pub fn import_pointer(modules: &[Module], library: &str, function: &str) -> Result<VirtAddr> {
    modules
        .iter()
        .filter_map(|module| match &module.imports {
            ImportTable::ByLibrary(tables) => Some(tables),
            ImportTable::Relocations(_) => None,
        })
        .flatten()
        .filter(|table| table.library.eq_ignore_ascii_case(library))
        .find_map(|table| {
            let index = table
                .functions
                .iter()
                .position(|f| f.eq_ignore_ascii_case(function))?;
            table.table.checked_add(index as u32 * IAT_ENTRY_SIZE)
        })
        .ok_or_else(|| Error::ImportNotFound(format!("{}!{}", library, function)))
}

/// Slot for `function` in flat relocation-based import tables.
pub fn import_pointer_by_name(modules: &[Module], function: &str) -> Result<VirtAddr> {
    modules
        .iter()
        .filter_map(|module| match &module.imports {
            ImportTable::Relocations(relocs) => Some(relocs),
            ImportTable::ByLibrary(_) => None,
        })
        .flatten()
        .find(|reloc| reloc.function.eq_ignore_ascii_case(function))
        .map(|reloc| reloc.slot)
        .ok_or_else(|| Error::ImportNotFound(function.to_string()))
}
