//! Persistence collaborator contract. The relational engine itself is out of
//! scope; importers only need transaction scoping, one create per table and
//! name-to-id lookups. [`MemoryStore`] is the reference implementation used
//! by the CLI and the test suite.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type SampleId = u64;
pub type OtuId = u64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown sample {0:?}")]
    UnknownSample(String),

    #[error("unknown OTU {0:?}")]
    UnknownOtu(String),

    #[error("no transaction in progress")]
    NoTransaction,

    #[error("a transaction is already in progress")]
    NestedTransaction,

    #[error("cannot dump store to {path}: {source}")]
    Dump {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize store: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleInfo {
    pub sample_name: String,
    pub sample_type: String,
    pub study: String,
    pub sex: String,
    pub cage: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSet {
    pub set_name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtuSeq {
    pub otu_name: String,
    pub sequence: String,
    pub seq_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtuCount {
    pub otu_id: OtuId,
    pub sample_id: SampleId,
    pub percent_abundance: f64,
}

/// One taxonomy annotation row, in whichever of the two known conventions
/// the source file used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format")]
pub enum TaxaRecord {
    Rdp {
        otu_name: String,
        phylum: String,
        class: String,
        order: String,
        family: String,
        genus: String,
    },
    GreenGenes {
        otu_name: String,
        percent_identity: String,
        p_value: String,
        /// Semicolon-joined rank string, kept verbatim.
        taxonomy: String,
    },
}

impl TaxaRecord {
    pub fn otu_name(&self) -> &str {
        match self {
            TaxaRecord::Rdp { otu_name, .. } => otu_name,
            TaxaRecord::GreenGenes { otu_name, .. } => otu_name,
        }
    }
}

/// Transaction-scoped create/lookup contract the importers run against.
/// All writes between [`Store::begin`] and [`Store::commit`] land together
/// or, after [`Store::rollback`], not at all.
pub trait Store {
    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;

    fn create_sample(&mut self, sample: SampleInfo) -> Result<SampleId, StoreError>;
    fn create_analysis_set(&mut self, set: AnalysisSet) -> Result<(), StoreError>;
    fn create_seq(&mut self, seq: OtuSeq) -> Result<OtuId, StoreError>;
    fn create_count(&mut self, count: OtuCount) -> Result<(), StoreError>;
    fn create_taxa(&mut self, taxa: TaxaRecord) -> Result<(), StoreError>;

    /// Resolve a sample by name; abundance columns must match persisted
    /// samples, never a positional counter.
    fn sample_id(&self, name: &str) -> Result<SampleId, StoreError>;
    fn otu_id(&self, name: &str) -> Result<OtuId, StoreError>;
}

/// All tables, ids implied by 1-based row position.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Tables {
    pub sample_info: Vec<SampleInfo>,
    pub analysis_sets: Vec<AnalysisSet>,
    pub otu_seqs: Vec<OtuSeq>,
    pub otu_counts: Vec<OtuCount>,
    pub otu_taxa: Vec<TaxaRecord>,
}

/// In-memory [`Store`] with snapshot-based rollback.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Tables,
    snapshot: Option<Tables>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Serialize every table to pretty-printed JSON at `path`.
    pub fn dump_json<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| StoreError::Dump {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.tables)?;
        Ok(())
    }
}

impl Store for MemoryStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_some() {
            return Err(StoreError::NestedTransaction);
        }
        self.snapshot = Some(self.tables.clone());
        debug!("transaction started");
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.snapshot.take().ok_or(StoreError::NoTransaction)?;
        debug!("transaction committed");
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.tables = self.snapshot.take().ok_or(StoreError::NoTransaction)?;
        debug!("transaction rolled back");
        Ok(())
    }

    fn create_sample(&mut self, sample: SampleInfo) -> Result<SampleId, StoreError> {
        self.tables.sample_info.push(sample);
        Ok(self.tables.sample_info.len() as SampleId)
    }

    fn create_analysis_set(&mut self, set: AnalysisSet) -> Result<(), StoreError> {
        self.tables.analysis_sets.push(set);
        Ok(())
    }

    fn create_seq(&mut self, seq: OtuSeq) -> Result<OtuId, StoreError> {
        self.tables.otu_seqs.push(seq);
        Ok(self.tables.otu_seqs.len() as OtuId)
    }

    fn create_count(&mut self, count: OtuCount) -> Result<(), StoreError> {
        self.tables.otu_counts.push(count);
        Ok(())
    }

    fn create_taxa(&mut self, taxa: TaxaRecord) -> Result<(), StoreError> {
        self.tables.otu_taxa.push(taxa);
        Ok(())
    }

    fn sample_id(&self, name: &str) -> Result<SampleId, StoreError> {
        self.tables
            .sample_info
            .iter()
            .position(|sample| sample.sample_name == name)
            .map(|idx| idx as SampleId + 1)
            .ok_or_else(|| StoreError::UnknownSample(name.to_owned()))
    }

    fn otu_id(&self, name: &str) -> Result<OtuId, StoreError> {
        self.tables
            .otu_seqs
            .iter()
            .position(|seq| seq.otu_name == name)
            .map(|idx| idx as OtuId + 1)
            .ok_or_else(|| StoreError::UnknownOtu(name.to_owned()))
    }
}
