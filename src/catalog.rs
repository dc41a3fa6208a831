//! Gadget catalog: operation symbol -> addresses where it is followed by a
//! return.
//!
//! Built in two phases. A [`CatalogBuilder`] accumulates matches while
//! modules are scanned; [`CatalogBuilder::finish`] freezes it into a
//! read-only [`Catalog`]. Addresses for a symbol keep discovery order, so
//! the first module scanned wins a lookup.

use std::collections::BTreeMap;

use log::debug;

use crate::error::{Error, Result};
use crate::module::ExecutableSection;
use crate::pattern::{self, Operation};
use crate::types::VirtAddr;

/// Catalog under construction.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    entries: BTreeMap<Operation, Vec<VirtAddr>>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan one executable section and record every recognized gadget.
    /// Returns the number of gadgets found.
    pub fn scan_section(&mut self, section: &ExecutableSection) -> usize {
        let matches = pattern::scan(&section.bytes);
        for m in &matches {
            // Loaders guarantee the whole section is 32-bit addressable.
            let addr = VirtAddr(section.base.addr().wrapping_add(m.offset as u32));
            self.insert(Operation::from(&m.instruction), addr);
        }
        debug!(
            "scanned {} bytes at {}: {} gadgets",
            section.bytes.len(),
            section.base,
            matches.len()
        );
        matches.len()
    }

    /// Record one gadget address for `op`.
    pub fn insert(&mut self, op: Operation, addr: VirtAddr) {
        self.entries.entry(op).or_default().push(addr);
    }

    pub fn finish(self) -> Catalog {
        Catalog {
            entries: self.entries,
        }
    }
}

/// Frozen gadget catalog.
#[derive(Debug, Default)]
pub struct Catalog {
    entries: BTreeMap<Operation, Vec<VirtAddr>>,
}

impl Catalog {
    /// Every distinct operation observed, in sorted order.
    pub fn instructions(&self) -> impl Iterator<Item = &Operation> {
        self.entries.keys()
    }

    /// All addresses for `op`, earliest discovered first.
    pub fn addresses(&self, op: &str) -> &[VirtAddr] {
        self.entries
            .get(&Operation::from(op))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Default address for `op`: the first one discovered.
    pub fn lookup(&self, op: &str) -> Result<VirtAddr> {
        self.addresses(op)
            .first()
            .copied()
            .ok_or_else(|| Error::SymbolNotFound(op.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(operation, addresses)` pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&Operation, &[VirtAddr])> {
        self.entries.iter().map(|(op, addrs)| (op, addrs.as_slice()))
    }
}
