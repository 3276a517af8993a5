//! Thin import orchestrators: one per file kind, each pulling a parser's
//! row stream inside a single store transaction. Row-level parse failures
//! were already absorbed by the parsers; anything that reaches this layer
//! rolls the whole file back.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::ArgEnum;
use log::{debug, error, info};

use crate::parser::{
    AccessMode, DelimitedParser, FastaParser, Row, TaxaFormat, TaxaParser,
};
use crate::store::{
    AnalysisSet, OtuCount, OtuSeq, SampleInfo, Store, TaxaRecord,
};

/// The kinds of files the importer accepts, dispatched exhaustively.
#[derive(ArgEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Sample metadata table.
    Sample,
    /// Analysis sets with names and descriptions.
    Analysis,
    /// OTU abundance matrix, one column per sample.
    Count,
    /// OTU sequences in FASTA format.
    Fasta,
    /// OTU taxonomy annotations (RDP or GreenGenes).
    Taxa,
}

/// Import one file of the given kind. Returns the number of created rows.
pub fn run_import<S: Store>(kind: FileKind, path: &Path, store: &mut S) -> Result<usize> {
    match kind {
        FileKind::Sample => import_samples(path, store),
        FileKind::Analysis => import_analysis_sets(path, store),
        FileKind::Count => import_counts(path, store),
        FileKind::Fasta => import_fasta(path, store),
        FileKind::Taxa => import_taxa(path, store),
    }
}

/// Run `body` inside one all-or-nothing transaction. On failure the
/// transaction is rolled back, the error logged with the file path and
/// re-raised.
fn with_transaction<S, T, F>(store: &mut S, path: &Path, body: F) -> Result<T>
where
    S: Store,
    F: FnOnce(&mut S) -> Result<T>,
{
    store.begin().context("starting transaction")?;
    match body(store) {
        Ok(value) => {
            store.commit().context("committing transaction")?;
            Ok(value)
        }
        Err(err) => {
            error!("import of {} failed, rolling back: {err:#}", path.display());
            if let Err(rb) = store.rollback() {
                error!("rollback of {} also failed: {rb}", path.display());
            }
            Err(err)
        }
    }
}

fn field<'r>(row: &'r Row, name: &str) -> Result<&'r str> {
    row.get(name)
        .with_context(|| format!("row has no {name:?} column"))
}

fn optional_field(row: &Row, name: &str) -> String {
    row.get(name).unwrap_or_default().to_owned()
}

/// Import sample metadata. `sample_name` is required; the remaining columns
/// default to empty when a study's metadata sheet omits them.
pub fn import_samples<S: Store>(path: &Path, store: &mut S) -> Result<usize> {
    info!("importing sample metadata from {}", path.display());
    let mut parser = DelimitedParser::open(path, AccessMode::Read)
        .with_context(|| format!("opening sample metadata {}", path.display()))?;

    let created = with_transaction(store, path, |store| {
        let mut created = 0;
        for row in parser.rows()? {
            let row = row?;
            let sample = SampleInfo {
                sample_name: field(&row, "sample_name")?.to_owned(),
                sample_type: optional_field(&row, "sample_type"),
                study: optional_field(&row, "study"),
                sex: optional_field(&row, "sex"),
                cage: optional_field(&row, "cage"),
                time: optional_field(&row, "time"),
            };
            debug!("importing sample {:?}", sample.sample_name);
            store.create_sample(sample)?;
            created += 1;
        }
        Ok(created)
    })?;

    info!("imported {created} samples from {}", path.display());
    Ok(created)
}

/// Import analysis set names and descriptions.
pub fn import_analysis_sets<S: Store>(path: &Path, store: &mut S) -> Result<usize> {
    info!("importing analysis sets from {}", path.display());
    let mut parser = DelimitedParser::open(path, AccessMode::Read)
        .with_context(|| format!("opening analysis sets {}", path.display()))?;

    let created = with_transaction(store, path, |store| {
        let mut created = 0;
        for row in parser.rows()? {
            let row = row?;
            let set = AnalysisSet {
                set_name: field(&row, "set_name")?.to_owned(),
                // Older exports abbreviate the description column.
                description: row
                    .get("description")
                    .or_else(|| row.get("desc"))
                    .unwrap_or_default()
                    .to_owned(),
            };
            store.create_analysis_set(set)?;
            created += 1;
        }
        Ok(created)
    })?;

    info!("imported {created} analysis sets from {}", path.display());
    Ok(created)
}

/// Import OTU sequences from a FASTA file.
pub fn import_fasta<S: Store>(path: &Path, store: &mut S) -> Result<usize> {
    info!("importing OTU sequences from {}", path.display());
    let mut parser = FastaParser::open(path, AccessMode::Read)
        .with_context(|| format!("opening FASTA {}", path.display()))?;

    let created = with_transaction(store, path, |store| {
        let mut created = 0;
        for record in parser.records()? {
            let record = record?;
            debug!("importing sequence {:?}", record.id);
            store.create_seq(OtuSeq {
                seq_length: record.sequence.len(),
                otu_name: record.id,
                sequence: record.sequence,
            })?;
            created += 1;
        }
        Ok(created)
    })?;

    info!("imported {created} sequences from {}", path.display());
    Ok(created)
}

/// Import an abundance matrix: first column names the OTU, every remaining
/// header names a sample. Both sides are resolved against the store by
/// name; an unknown sample or OTU aborts the whole file. Empty cells and
/// zero abundances produce no rows.
pub fn import_counts<S: Store>(path: &Path, store: &mut S) -> Result<usize> {
    info!("importing abundance matrix from {}", path.display());
    let mut parser = DelimitedParser::open(path, AccessMode::Read)
        .with_context(|| format!("opening abundance matrix {}", path.display()))?;

    let header = parser.fieldnames()?;
    if header.len() < 2 {
        bail!(
            "abundance matrix {} has no sample columns",
            path.display()
        );
    }

    let created = with_transaction(store, path, |store| {
        let samples: Vec<(String, u64)> = header
            .iter()
            .skip(1)
            .map(|name| {
                store
                    .sample_id(name)
                    .map(|id| (name.clone(), id))
                    .with_context(|| format!("resolving sample column {name:?}"))
            })
            .collect::<Result<_>>()?;

        let mut created = 0;
        for row in parser.rows()? {
            let row = row?;
            let otu_name = &row.values()[0];
            let otu_id = store
                .otu_id(otu_name)
                .with_context(|| format!("resolving OTU {otu_name:?}"))?;

            for (idx, (sample_name, sample_id)) in samples.iter().enumerate() {
                let cell = row.values()[idx + 1].trim();
                if cell.is_empty() {
                    continue;
                }
                let percent_abundance: f64 = cell.parse().with_context(|| {
                    format!("bad abundance {cell:?} for OTU {otu_name:?}, sample {sample_name:?}")
                })?;
                if percent_abundance == 0.0 {
                    continue;
                }
                store.create_count(OtuCount {
                    otu_id,
                    sample_id: *sample_id,
                    percent_abundance,
                })?;
                created += 1;
            }
        }
        Ok(created)
    })?;

    info!("imported {created} abundance counts from {}", path.display());
    Ok(created)
}

/// Import taxonomy annotations, auto-detecting the RDP vs GreenGenes layout.
pub fn import_taxa<S: Store>(path: &Path, store: &mut S) -> Result<usize> {
    info!("importing taxonomy annotations from {}", path.display());
    let mut parser =
        TaxaParser::open(path).with_context(|| format!("opening taxonomy {}", path.display()))?;
    let format = parser.format();
    info!("{} classified as {:?} taxonomy", path.display(), format);

    let created = with_transaction(store, path, |store| {
        let mut created = 0;
        for row in parser.rows()? {
            let row = row?;
            store.create_taxa(taxa_record(format, &row)?)?;
            created += 1;
        }
        Ok(created)
    })?;

    info!("imported {created} annotations from {}", path.display());
    Ok(created)
}

fn taxa_record(format: TaxaFormat, row: &Row) -> Result<TaxaRecord> {
    let record = match format {
        TaxaFormat::Rdp => TaxaRecord::Rdp {
            otu_name: field(row, "otu_name")?.to_owned(),
            phylum: field(row, "phylum")?.to_owned(),
            class: field(row, "class")?.to_owned(),
            order: field(row, "order")?.to_owned(),
            family: field(row, "family")?.to_owned(),
            genus: field(row, "genus")?.to_owned(),
        },
        TaxaFormat::GreenGenes => TaxaRecord::GreenGenes {
            otu_name: field(row, "otu_name")?.to_owned(),
            percent_identity: field(row, "percent_identity")?.to_owned(),
            p_value: field(row, "p_value")?.to_owned(),
            taxonomy: field(row, "taxonomy")?.to_owned(),
        },
    };
    Ok(record)
}
