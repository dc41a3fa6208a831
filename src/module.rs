//! Loaded-module model shared by the format loaders.
//!
//! A [`Module`] is everything the assembler needs from a binary once the
//! container format has been parsed: where its code lives, where its
//! writable data ends, and where its import pointer slots are. All
//! addresses are absolute; RVA translation happens in the loaders.

use std::path::Path;

use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::types::VirtAddr;

/// Container format a module was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Pe,
    Elf,
}

/// Executable bytes mapped at `base`.
#[derive(Debug, Clone)]
pub struct ExecutableSection {
    pub base: VirtAddr,
    pub bytes: Vec<u8>,
}

/// A writable region: `used` bytes at `start`, padded in memory up to the
/// next `alignment` boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritableSection {
    pub start: VirtAddr,
    pub used: u32,
    pub alignment: u32,
}

/// One library's import address table: slot `i` holds the resolved
/// address of `functions[i]` and lives at `table + 4 * i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDescriptor {
    pub library: String,
    pub table: VirtAddr,
    pub functions: Vec<String>,
}

/// A function imported through a relocated pointer slot (e.g. a GOT entry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocatedImport {
    pub function: String,
    pub slot: VirtAddr,
}

/// How a module reports its imports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTable {
    /// Per-library address tables (PE).
    ByLibrary(Vec<ImportDescriptor>),
    /// One flat namespace of relocation targets (ELF).
    Relocations(Vec<RelocatedImport>),
}

impl Default for ImportTable {
    fn default() -> Self {
        ImportTable::ByLibrary(Vec::new())
    }
}

/// A loaded binary module.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub format: Format,
    pub position_independent: bool,
    pub executable: Vec<ExecutableSection>,
    pub writable: Vec<WritableSection>,
    pub imports: ImportTable,
}

impl Module {
    /// An empty, fixed-address module; loaders and tests fill it in.
    pub fn new(name: impl Into<String>, format: Format) -> Self {
        Module {
            name: name.into(),
            format,
            position_independent: false,
            executable: Vec::new(),
            writable: Vec::new(),
            imports: ImportTable::default(),
        }
    }

    /// Load a PE32 or ELF32 module from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let file = std::fs::File::open(path)
            .map_err(|e| Error::load(&name, format!("open: {}", e)))?;
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| Error::load(&name, format!("mmap: {}", e)))?;

        Self::parse(&name, &mmap)
    }

    /// Parse an in-memory image, dispatching on its container format.
    pub fn parse(name: &str, data: &[u8]) -> Result<Self> {
        let object = goblin::Object::parse(data)
            .map_err(|e| Error::load(name, format!("parse: {}", e)))?;

        match object {
            goblin::Object::Elf(elf) => crate::elf::load(name, &elf, data),
            goblin::Object::PE(pe) => crate::pe::load(name, &pe, data),
            _ => Err(Error::load(name, "unsupported format (expected PE or ELF)")),
        }
    }
}

/// Slice `len` bytes at file offset `offset`, or `None` if out of range.
pub(crate) fn file_range(data: &[u8], offset: u64, len: u64) -> Option<&[u8]> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    data.get(start..end)
}

/// Narrow a loader-reported address to 32 bits.
pub(crate) fn addr32(name: &str, value: u64) -> Result<VirtAddr> {
    u32::try_from(value)
        .map(VirtAddr)
        .map_err(|_| Error::load(name, format!("address 0x{:x} exceeds 32 bits", value)))
}
