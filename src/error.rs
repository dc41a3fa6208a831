use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot load {module}: {reason}")]
    Load { module: String, reason: String },

    #[error("instruction {0} not found")]
    SymbolNotFound(String),

    #[error("no scratch space left for {0} bytes")]
    AllocationExhausted(u32),

    #[error("import {0} not found")]
    ImportNotFound(String),

    #[error("invalid program: {0}")]
    InvalidProgram(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn load(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Load {
            module: module.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
