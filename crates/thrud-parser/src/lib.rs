//! Text-format parser for thrud.
//!
//! Reads the line-oriented format produced by [`thrud_ir::dump_module`]
//! back into a [`thrud_ir::Module`].

mod lexer;
mod reader;

/// Parse kernel source text into a thrud IR module.
pub fn parse(source: &str) -> Result<thrud_ir::Module, ParseError> {
    reader::parse_module(source)
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("line {line}: unexpected {found}, expected {expected}")]
    Unexpected {
        line: usize,
        found: String,
        expected: String,
    },
    #[error("line {line}: invalid character '{ch}'")]
    InvalidChar { line: usize, ch: char },
    #[error("line {line}: invalid integer '{text}'")]
    BadInteger { line: usize, text: String },
    #[error("line {line}: unknown type '{name}'")]
    UnknownType { line: usize, name: String },
    #[error("line {line}: undefined value '%{name}'")]
    UndefinedValue { line: usize, name: String },
    #[error("line {line}: undefined block '%{name}'")]
    UndefinedBlock { line: usize, name: String },
    #[error("line {line}: undefined global '@{name}'")]
    UndefinedGlobal { line: usize, name: String },
    #[error("line {line}: '{name}' is already defined")]
    Redefinition { line: usize, name: String },
    #[error("kernel '@{0}' is missing its closing brace")]
    Unterminated(String),
    #[error(transparent)]
    Ir(#[from] thrud_ir::IrError),
}

impl ParseError {
    /// Source line the error points at, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Unexpected { line, .. }
            | Self::InvalidChar { line, .. }
            | Self::BadInteger { line, .. }
            | Self::UnknownType { line, .. }
            | Self::UndefinedValue { line, .. }
            | Self::UndefinedBlock { line, .. }
            | Self::UndefinedGlobal { line, .. }
            | Self::Redefinition { line, .. } => Some(*line),
            Self::Unterminated(_) | Self::Ir(_) => None,
        }
    }
}
