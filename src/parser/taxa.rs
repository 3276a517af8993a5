use std::path::{Path, PathBuf};

use log::debug;

use super::delimited::{DelimitedParser, Rows};
use super::text::{AccessMode, TextStream};
use super::ParseError;

/// GreenGenes exports tag every rank with a hierarchical prefix; the
/// domain-level one is enough to tell the two conventions apart.
const GREENGENES_MARKER: &str = "k__";

pub const RDP_FIELDS: &[&str] = &["otu_name", "phylum", "class", "order", "family", "genus"];

/// The last column is the semicolon-joined rank string.
pub const GREENGENES_FIELDS: &[&str] = &["otu_name", "percent_identity", "p_value", "taxonomy"];

/// The two taxonomy table conventions this importer understands. Selection
/// is a pure function of file content, never of the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxaFormat {
    Rdp,
    GreenGenes,
}

impl TaxaFormat {
    pub fn fieldnames(self) -> &'static [&'static str] {
        match self {
            TaxaFormat::Rdp => RDP_FIELDS,
            TaxaFormat::GreenGenes => GREENGENES_FIELDS,
        }
    }

    /// Peek at the first line of `path` through a fresh read-only handle and
    /// decide which convention applies. Leaves no observable side effect on
    /// any parser or on the filesystem: a missing file is a file-access
    /// error, not a freshly created empty one. An empty file matches neither
    /// schema.
    pub fn classify<P: AsRef<Path>>(path: P) -> Result<TaxaFormat, ParseError> {
        let path = path.as_ref();
        let mut stream = TextStream::open_existing(path)?;

        let format = match stream.lines().next() {
            None => {
                return Err(ParseError::Format {
                    path: path.to_path_buf(),
                    detail: "empty taxonomy file matches neither RDP nor GreenGenes".into(),
                })
            }
            Some(Err(err)) => return Err(err.into()),
            Some(Ok(line)) if line.contains(GREENGENES_MARKER) => TaxaFormat::GreenGenes,
            Some(Ok(_)) => TaxaFormat::Rdp,
        };

        debug!("{} classified as {:?} taxonomy", path.display(), format);
        Ok(format)
    }
}

/// Taxonomy table parser: detects the schema variant, then delegates to a
/// [`DelimitedParser`] pre-seeded with that variant's field list (both
/// observed exports are headerless).
pub struct TaxaParser {
    format: TaxaFormat,
    inner: DelimitedParser,
}

impl TaxaParser {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<TaxaParser, ParseError> {
        let path = path.into();
        let format = TaxaFormat::classify(&path)?;
        let inner = DelimitedParser::with_fieldnames(
            path,
            AccessMode::Read,
            format.fieldnames().iter().copied(),
        )?;
        Ok(TaxaParser { format, inner })
    }

    pub fn format(&self) -> TaxaFormat {
        self.format
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    pub fn rows(&mut self) -> Result<Rows<'_>, ParseError> {
        self.inner.rows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn taxa_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn greengenes_marker_wins() {
        let dir = TempDir::new().unwrap();
        let path = taxa_file(
            &dir,
            "gg.txt",
            "otu1\t97.2\t0.001\tk__Bacteria;p__Firmicutes;c__Bacilli\n",
        );
        assert_eq!(TaxaFormat::classify(&path).unwrap(), TaxaFormat::GreenGenes);
    }

    #[test]
    fn no_marker_means_rdp() {
        let dir = TempDir::new().unwrap();
        let path = taxa_file(
            &dir,
            "rdp.txt",
            "otu1\tFirmicutes\tBacilli\tLactobacillales\tLactobacillaceae\tLactobacillus\n",
        );
        assert_eq!(TaxaFormat::classify(&path).unwrap(), TaxaFormat::Rdp);
    }

    #[test]
    fn empty_file_matches_neither_schema() {
        let dir = TempDir::new().unwrap();
        let path = taxa_file(&dir, "empty.txt", "");
        assert!(matches!(
            TaxaFormat::classify(&path),
            Err(ParseError::Format { .. })
        ));
    }

    #[test]
    fn classify_never_creates_a_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.txt");

        assert!(matches!(
            TaxaFormat::classify(&path),
            Err(ParseError::FileAccess { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn rows_carry_the_fixed_field_list() {
        let dir = TempDir::new().unwrap();
        let path = taxa_file(
            &dir,
            "gg.txt",
            "otu1\t97.2\t0.001\tk__Bacteria;p__Firmicutes\notu2\t88.1\t0.05\tk__Archaea\n",
        );

        let mut parser = TaxaParser::open(&path).unwrap();
        assert_eq!(parser.format(), TaxaFormat::GreenGenes);

        let rows: Vec<_> = parser.rows().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("otu_name"), Some("otu1"));
        assert_eq!(rows[0].get("taxonomy"), Some("k__Bacteria;p__Firmicutes"));
        assert_eq!(rows[1].get("p_value"), Some("0.05"));
    }

    #[test]
    fn classification_does_not_consume_the_row_stream() {
        let dir = TempDir::new().unwrap();
        let path = taxa_file(&dir, "rdp.txt", "otu1\tF\tB\tL\tLa\tLb\n");

        let format = TaxaFormat::classify(&path).unwrap();
        let mut parser = TaxaParser::open(&path).unwrap();
        assert_eq!(parser.format(), format);
        assert_eq!(parser.rows().unwrap().count(), 1);
    }
}
