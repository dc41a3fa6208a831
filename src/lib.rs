//! ropasm — a return-oriented program assembler for 32-bit x86.
//!
//! Scans fixed-address PE32 and ELF32 modules for single instructions
//! followed by a `RET`, catalogs them by operation ("POP EAX",
//! "ADD ESP, 12", ...), and turns programs written as nested lists of
//! those operations and literal words into a flat stream of gadget
//! addresses ready to be placed on a stack.
//!
//! # Module overview
//!
//! ## Loading
//!
//! - [`error`] — Error types used throughout the crate.
//! - [`types`] — Core types: `VirtAddr`, `Reg32`.
//! - [`module`] — Loaded-module model and format dispatch.
//! - [`elf`] — ELF32 segments and PLT/GOT imports.
//! - [`pe`] — PE32 sections and import address tables.
//!
//! ## Gadgets and memory
//!
//! - [`pattern`] — Fixed instruction recognizer for bytes preceding a `RET`.
//! - [`catalog`] — Operation → gadget address catalog.
//! - [`scratch`] — Bump allocator over writable-section slack space.
//! - [`imports`] — Import pointer-slot resolution.
//!
//! ## Assembly
//!
//! - [`program`] — Nested symbolic programs and flattening.
//! - [`assembler`] — Load phase, lookups, and payload assembly.
//! - [`script`] — JSON payload scripts used by the CLI.

pub mod error;
pub mod types;
pub mod module;
pub mod elf;
pub mod pe;
pub mod pattern;
pub mod catalog;
pub mod scratch;
pub mod imports;
pub mod program;
pub mod assembler;
pub mod script;

pub use assembler::{Assembler, AssemblerBuilder};
pub use error::{Error, Result};
pub use pattern::Operation;
pub use program::Item;
pub use types::VirtAddr;
