//! Parsing layer for the loosely-structured text files fed into the OTU
//! database: delimited tables with unreliable dialects, FASTA-style sequence
//! files and taxonomy exports that need format auto-detection.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub mod delimited;
pub mod fasta;
pub mod taxa;
pub mod text;

pub use delimited::{DelimitedParser, Dialect, Row};
pub use fasta::{FastaParser, SeqRecord};
pub use taxa::{TaxaFormat, TaxaParser};
pub use text::{AccessMode, TextStream};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("cannot open {path} in mode {mode:?}: {source}")]
    FileAccess {
        path: PathBuf,
        mode: AccessMode,
        #[source]
        source: io::Error,
    },

    #[error("{path} is not open for writing")]
    NotWritable { path: PathBuf },

    /// Row-scoped parse failure. Logged and skipped by the row iterators,
    /// never fatal to the surrounding stream.
    #[error("line {line} is malformed ({detail}): {content:?}")]
    RowParse {
        line: u64,
        content: String,
        detail: String,
    },

    /// Row-scoped write failure. Logged and skipped, like [`ParseError::RowParse`].
    #[error("row fields {found:?} do not match header {expected:?}")]
    RowWrite {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("{path}: {detail}")]
    Format { path: PathBuf, detail: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
