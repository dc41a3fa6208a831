//! JSON payload scripts for the command-line tool.
//!
//! A script declares scratch variables and import pointers up front and
//! then the program itself as nested JSON arrays:
//!
//! ```json
//! {
//!   "scratch": [{"name": "pESP", "size": 4}],
//!   "imports": [{"name": "ppAlloc", "library": "KERNEL32.DLL", "function": "VirtualAlloc"}],
//!   "program": [["POP EAX", "$pESP"], "NOP", 4096]
//! }
//! ```
//!
//! Strings are operation symbols unless they start with `$`, in which case
//! they name a declared variable and stand for its address.

use std::collections::HashMap;

use log::info;
use serde::Deserialize;
use serde_json::Value;

use crate::assembler::Assembler;
use crate::error::{Error, Result};
use crate::program::Item;
use crate::types::VirtAddr;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    #[serde(default)]
    pub scratch: Vec<ScratchVar>,
    #[serde(default)]
    pub imports: Vec<ImportVar>,
    pub program: Value,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScratchVar {
    pub name: String,
    pub size: u32,
}

/// An import pointer variable. Without `library` the function is looked up
/// in relocation-based (ELF) import tables.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportVar {
    pub name: String,
    pub library: Option<String>,
    pub function: String,
}

impl Script {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::InvalidProgram(e.to_string()))
    }

    /// Allocate scratch, resolve imports, and convert the program into
    /// [`Item`]s with every `$name` replaced by its address.
    pub fn compile(&self, asm: &mut Assembler) -> Result<Vec<Item>> {
        let mut vars: HashMap<&str, VirtAddr> = HashMap::new();

        for var in &self.scratch {
            let addr = asm.allocate(var.size)?;
            info!("scratch ${} = {} ({} bytes)", var.name, addr, var.size);
            define(&mut vars, &var.name, addr)?;
        }
        for var in &self.imports {
            let addr = match &var.library {
                Some(library) => asm.import_pointer(library, &var.function)?,
                None => asm.import_pointer_by_name(&var.function)?,
            };
            info!("import ${} = {} ({})", var.name, addr, var.function);
            define(&mut vars, &var.name, addr)?;
        }

        match &self.program {
            Value::Array(items) => items.iter().map(|v| to_item(v, &vars)).collect(),
            other => Err(Error::InvalidProgram(format!(
                "program must be an array, got {}",
                other
            ))),
        }
    }
}

fn define<'a>(
    vars: &mut HashMap<&'a str, VirtAddr>,
    name: &'a str,
    addr: VirtAddr,
) -> Result<()> {
    if vars.insert(name, addr).is_some() {
        return Err(Error::InvalidProgram(format!("variable ${} defined twice", name)));
    }
    Ok(())
}

fn to_item(value: &Value, vars: &HashMap<&str, VirtAddr>) -> Result<Item> {
    match value {
        Value::String(s) => match s.strip_prefix('$') {
            Some(name) => vars
                .get(name)
                .map(|addr| Item::from(*addr))
                .ok_or_else(|| Error::InvalidProgram(format!("undefined variable ${}", name))),
            None => Ok(Item::op(s.as_str())),
        },
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Item::Word)
            .ok_or_else(|| Error::InvalidProgram(format!("{} is not a 32-bit unsigned value", n))),
        Value::Array(items) => items
            .iter()
            .map(|v| to_item(v, vars))
            .collect::<Result<Vec<_>>>()
            .map(Item::Seq),
        other => Err(Error::InvalidProgram(format!(
            "{} is neither an instruction nor an integer",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{
        ExecutableSection, Format, ImportDescriptor, ImportTable, Module, WritableSection,
    };

    fn assembler() -> Assembler {
        let mut module = Module::new("swdir.dll", Format::Pe);
        module.executable = vec![ExecutableSection {
            base: VirtAddr(0x1000),
            bytes: vec![0x58, 0xC3, 0x90, 0xC3],
        }];
        module.writable = vec![WritableSection {
            start: VirtAddr(0x3000),
            used: 0,
            alignment: 0x10,
        }];
        module.imports = ImportTable::ByLibrary(vec![ImportDescriptor {
            library: "KERNEL32.dll".into(),
            table: VirtAddr(0x5000),
            functions: vec!["CreateThread".into(), "VirtualAlloc".into()],
        }]);
        Assembler::from_modules([module]).unwrap()
    }

    #[test]
    fn compiles_variables_and_nesting() {
        let script = Script::parse(
            r#"{
                "scratch": [{"name": "pESP", "size": 4}, {"name": "lpMem", "size": 4}],
                "imports": [
                    {"name": "ppAlloc", "library": "kernel32.DLL", "function": "VirtualAlloc"}
                ],
                "program": [["POP EAX", "$lpMem"], "NOP", "$ppAlloc", 4096]
            }"#,
        )
        .unwrap();
        let mut asm = assembler();
        let program = script.compile(&mut asm).unwrap();
        let words = asm.resolve(&program).unwrap();
        assert_eq!(words, vec![0x1000, 0x3004, 0x1002, 0x5004, 4096]);
    }

    #[test]
    fn rejects_non_integer_leaves() {
        let mut asm = assembler();
        for program in ["[true]", "[1.5]", "[-1]", "[4294967296]", "[null]", "[{}]", "\"NOP\""] {
            let text = format!(r#"{{"program": {}}}"#, program);
            let script = Script::parse(&text).unwrap();
            assert!(
                matches!(script.compile(&mut asm), Err(Error::InvalidProgram(_))),
                "{}",
                program
            );
        }
    }

    #[test]
    fn undefined_and_duplicate_variables() {
        let mut asm = assembler();
        let script = Script::parse(r#"{"program": ["$nope"]}"#).unwrap();
        assert!(matches!(script.compile(&mut asm), Err(Error::InvalidProgram(_))));

        let script = Script::parse(
            r#"{"scratch": [{"name": "a", "size": 1}, {"name": "a", "size": 1}], "program": []}"#,
        )
        .unwrap();
        assert!(matches!(script.compile(&mut asm), Err(Error::InvalidProgram(_))));
    }

    #[test]
    fn missing_import_propagates() {
        let mut asm = assembler();
        let script = Script::parse(
            r#"{"imports": [{"name": "p", "function": "VirtualAlloc"}], "program": []}"#,
        )
        .unwrap();
        assert!(matches!(script.compile(&mut asm), Err(Error::ImportNotFound(_))));
    }

    #[test]
    fn malformed_json_is_invalid_program() {
        assert!(matches!(Script::parse("{"), Err(Error::InvalidProgram(_))));
        assert!(matches!(
            Script::parse(r#"{"program": [], "extra": 1}"#),
            Err(Error::InvalidProgram(_))
        ));
    }
}
