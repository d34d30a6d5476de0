//! Tally - A plain text accounting journal scanner and transaction categorizer
//! ---
//!
//! Reads ledger-style journals (dated transactions, postings with amount
//! expressions, notes and `include` directives) and learns from them which
//! account or payee a piece of bank statement text most likely belongs to.
//!

extern crate pest;
#[macro_use]
extern crate pest_derive;

/// Arithmetic amount expressions with currency units, e.g. `(€5 * 5)`.
pub mod amount;

/// Frequency based categorizer, trained from a [`History`][categorizer::History].
pub mod categorizer;

/// Turning parsed transactions into categorizer training data.
pub mod history;

/// Our main parser entrypoints.
pub mod parser;

/// Journal value types produced by the parser.
pub mod transaction;

pub use parser::{parse, parse_file, scan};

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Location inside a journal file, both 1-based. Columns count characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.column)
    }
}

/// A fault found while scanning the text of a single file.
#[derive(Debug, Error, PartialEq)]
pub enum Fault {
    #[error("invalid syntax at {position}: {message}")]
    Syntax { position: Position, message: String },

    #[error("unsupported token at {position}")]
    UnsupportedToken { position: Position },

    #[error("incompatible units at {position}: `{lhs}' {operator} `{rhs}'")]
    UnitMismatch {
        position: Position,
        operator: char,
        lhs: String,
        rhs: String,
    },

    #[error("amount at {position} is not a finite number")]
    NotFinite { position: Position },
}

impl Fault {
    pub fn position(&self) -> Position {
        match self {
            Fault::Syntax { position, .. }
            | Fault::UnsupportedToken { position }
            | Fault::UnitMismatch { position, .. }
            | Fault::NotFinite { position } => *position,
        }
    }

    /// Line rules are parsed one line at a time, so their positions always
    /// report row 1. This moves the fault to the row the line came from.
    pub(crate) fn at_row(mut self, row: usize) -> Fault {
        match &mut self {
            Fault::Syntax { position, .. }
            | Fault::UnsupportedToken { position }
            | Fault::UnitMismatch { position, .. }
            | Fault::NotFinite { position } => position.row = row,
        }
        self
    }
}

/// Contextual error for journal files, naming the file a [`Fault`] came from.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("could not read `{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid include pattern `{pattern}'")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("could not parse `{}'", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        fault: Fault,
    },

    #[error("in file included from `{}'", path.display())]
    ReferencedFile {
        path: PathBuf,
        #[source]
        source: Box<LedgerError>,
    },
}

impl LedgerError {
    /// The innermost scan fault, following included files down.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            LedgerError::Parse { fault, .. } => Some(fault),
            LedgerError::ReferencedFile { source, .. } => source.fault(),
            LedgerError::Io { .. } | LedgerError::Pattern { .. } => None,
        }
    }
}
