//! Return-oriented program assembler.
//!
//! Ties the pieces together: modules are loaded and scanned once through
//! an [`AssemblerBuilder`], which then yields an [`Assembler`] whose
//! catalog is frozen. The assembler answers gadget lookups, hands out
//! scratch memory, resolves import pointer slots, and turns symbolic
//! programs into payload bytes.

use std::path::Path;

use log::info;

use crate::catalog::{Catalog, CatalogBuilder};
use crate::error::{Error, Result};
use crate::imports;
use crate::module::Module;
use crate::pattern::Operation;
use crate::program::{self, Item, Leaf};
use crate::scratch::ScratchAllocator;
use crate::types::VirtAddr;

/// Load phase: modules are added and scanned here.
///
/// Adding consumes the builder, so a module that fails to load leaves no
/// partially built catalog behind.
#[derive(Debug, Default)]
pub struct AssemblerBuilder {
    modules: Vec<Module>,
    catalog: CatalogBuilder,
    scratch: ScratchAllocator,
}

impl AssemblerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the module at `path` and scan it.
    pub fn add_module(self, path: &Path) -> Result<Self> {
        let module = Module::load(path)?;
        self.add_loaded(module)
    }

    /// Scan an already loaded module.
    ///
    /// Position-independent modules are rejected: their gadgets have no
    /// fixed address.
    pub fn add_loaded(mut self, module: Module) -> Result<Self> {
        if module.position_independent {
            return Err(Error::load(
                &module.name,
                "module is position independent (ASLR enabled)",
            ));
        }

        let mut gadgets = 0;
        for section in &module.executable {
            gadgets += self.catalog.scan_section(section);
        }
        for section in &module.writable {
            self.scratch.add_section(section);
        }
        info!(
            "{}: {} gadgets in {} executable sections, {} slack regions",
            module.name,
            gadgets,
            module.executable.len(),
            module.writable.len()
        );

        self.modules.push(module);
        Ok(self)
    }

    /// Freeze the catalog.
    pub fn build(self) -> Assembler {
        Assembler {
            modules: self.modules,
            catalog: self.catalog.finish(),
            scratch: self.scratch,
        }
    }
}

/// A loaded set of modules ready to assemble programs against.
#[derive(Debug)]
pub struct Assembler {
    modules: Vec<Module>,
    catalog: Catalog,
    scratch: ScratchAllocator,
}

impl Assembler {
    /// Load and scan every module in `paths`, in order.
    pub fn new<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        paths
            .iter()
            .try_fold(AssemblerBuilder::new(), |builder, path| builder.add_module(path.as_ref()))
            .map(AssemblerBuilder::build)
    }

    /// Build from modules already in memory.
    pub fn from_modules(modules: impl IntoIterator<Item = Module>) -> Result<Self> {
        modules
            .into_iter()
            .try_fold(AssemblerBuilder::new(), AssemblerBuilder::add_loaded)
            .map(AssemblerBuilder::build)
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Every distinct instruction found followed by a return.
    pub fn instructions(&self) -> impl Iterator<Item = &Operation> {
        self.catalog.instructions()
    }

    /// Address of the first gadget found for `op`.
    pub fn lookup(&self, op: &str) -> Result<VirtAddr> {
        self.catalog.lookup(op)
    }

    /// Reserve `n` bytes of scratch memory.
    pub fn allocate(&mut self, n: u32) -> Result<VirtAddr> {
        self.scratch.allocate(n)
    }

    /// Address of the pointer slot for `library!function`.
    pub fn import_pointer(&self, library: &str, function: &str) -> Result<VirtAddr> {
        imports::import_pointer(&self.modules, library, function)
    }

    /// Address of the pointer slot for `function` in relocation-based tables.
    pub fn import_pointer_by_name(&self, function: &str) -> Result<VirtAddr> {
        imports::import_pointer_by_name(&self.modules, function)
    }

    /// Resolve a program into the 32-bit words it stands for.
    pub fn resolve(&self, program: &[Item]) -> Result<Vec<u32>> {
        program::flatten(program)
            .into_iter()
            .map(|leaf| match leaf {
                Leaf::Op(op) => self.lookup(op.as_str()).map(VirtAddr::addr),
                Leaf::Word(w) => Ok(w),
            })
            .collect()
    }

    /// Assemble a program into little-endian payload bytes, four per leaf.
    /// Fails on the first unresolved symbol without producing output.
    pub fn assemble(&self, program: &[Item]) -> Result<Vec<u8>> {
        let words = self.resolve(program)?;
        Ok(words.iter().flat_map(|w| w.to_le_bytes()).collect())
    }

    /// Every instruction with all of its addresses, sorted by instruction.
    pub fn listing(&self) -> Vec<(&Operation, &[VirtAddr])> {
        self.catalog.iter().collect()
    }
}
