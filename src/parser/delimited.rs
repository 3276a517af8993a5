use std::path::PathBuf;
use std::sync::Arc;

use itertools::Itertools;
use log::{debug, warn};

use super::text::{AccessMode, Lines, TextStream};
use super::ParseError;

/// How many bytes of the file the sniffer is allowed to look at.
const SNIFF_WINDOW: usize = 1024;

/// Candidate delimiters, in order of precedence. Comma and tab outrank
/// semicolon, which also appears inside hierarchical taxonomy strings.
const CANDIDATES: &[u8] = b",\t;|";

/// Delimiter and quoting convention of one delimited file. Derived once per
/// parser (sniffed or supplied) and reused for every read and write on that
/// handle. Line endings are handled by the line reader itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: u8,
    pub quote: u8,
}

impl Default for Dialect {
    fn default() -> Self {
        Dialect {
            delimiter: b',',
            quote: b'"',
        }
    }
}

impl Dialect {
    /// Guess the dialect from a sample of the file's head: the first
    /// candidate, in precedence order, that splits every sampled line into
    /// the same column count wins. Single-column or inconsistent content is
    /// undecidable.
    pub fn sniff(sample: &str) -> Option<Dialect> {
        let lines = sample
            .lines()
            .filter(|line| !line.trim().is_empty())
            .take(8)
            .collect_vec();
        if lines.is_empty() {
            return None;
        }

        for &delimiter in CANDIDATES {
            let first = count_byte(lines[0], delimiter);
            if first == 0 {
                continue;
            }
            if lines.iter().all(|line| count_byte(line, delimiter) == first) {
                return Some(Dialect {
                    delimiter,
                    ..Dialect::default()
                });
            }
        }
        None
    }
}

fn count_byte(line: &str, byte: u8) -> usize {
    line.bytes().filter(|&b| b == byte).count()
}

/// One parsed line of a delimited table: an ordered field-name to value
/// mapping. Every row of one parse shares the same header allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    header: Arc<[String]>,
    values: Vec<String>,
}

impl Row {
    pub fn new(header: Arc<[String]>, values: Vec<String>) -> Row {
        debug_assert_eq!(header.len(), values.len());
        Row { header, values }
    }

    /// Build a row (and its own header) from ordered name/value pairs.
    pub fn from_pairs<'a, I>(pairs: I) -> Row
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let (names, values): (Vec<String>, Vec<String>) = pairs
            .into_iter()
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .unzip();
        Row {
            header: names.into(),
            values,
        }
    }

    pub fn header(&self) -> &Arc<[String]> {
        &self.header
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let idx = self.header.iter().position(|field| field == name)?;
        Some(&self.values[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }
}

/// Parser for delimited tables over one exclusively-owned [`TextStream`].
pub struct DelimitedParser {
    stream: TextStream,
    dialect: Option<Dialect>,
    fieldnames: Option<Arc<[String]>>,
    /// True when the fieldnames were supplied at construction, so the file
    /// itself has no header line to skip.
    explicit_fieldnames: bool,
}

impl DelimitedParser {
    /// Open a delimited file whose first non-empty line is the header.
    pub fn open<P: Into<PathBuf>>(path: P, mode: AccessMode) -> Result<DelimitedParser, ParseError> {
        let stream = TextStream::open(path.into(), mode)?;
        Ok(DelimitedParser {
            stream,
            dialect: None,
            fieldnames: None,
            explicit_fieldnames: false,
        })
    }

    /// Open a headerless delimited file, supplying the field names up front.
    pub fn with_fieldnames<P, S>(
        path: P,
        mode: AccessMode,
        fieldnames: impl IntoIterator<Item = S>,
    ) -> Result<DelimitedParser, ParseError>
    where
        P: Into<PathBuf>,
        S: Into<String>,
    {
        let mut parser = DelimitedParser::open(path, mode)?;
        let names: Vec<String> = fieldnames.into_iter().map(Into::into).collect();
        parser.fieldnames = Some(names.into());
        parser.explicit_fieldnames = true;
        Ok(parser)
    }

    /// Force a dialect instead of sniffing it.
    pub fn with_dialect(mut self, dialect: Dialect) -> DelimitedParser {
        self.dialect = Some(dialect);
        self
    }

    pub fn path(&self) -> &std::path::Path {
        self.stream.path()
    }

    /// The cached dialect, sniffing it on first use. A sniff that comes up
    /// empty is not an error: the parse falls back to comma.
    pub fn dialect(&mut self) -> Result<Dialect, ParseError> {
        if let Some(dialect) = self.dialect {
            return Ok(dialect);
        }
        let sample = self.stream.peek_prefix(SNIFF_WINDOW)?;
        let dialect = Dialect::sniff(&sample).unwrap_or_else(|| {
            debug!(
                "cannot sniff the dialect of {}, falling back to comma",
                self.stream.path().display()
            );
            Dialect::default()
        });
        self.dialect = Some(dialect);
        Ok(dialect)
    }

    /// The ordered field names: the construction-time list if one was given,
    /// otherwise the parsed first non-empty line of the file. Querying them
    /// rewinds the stream, so a subsequent [`DelimitedParser::rows`] still
    /// sees the whole file.
    pub fn fieldnames(&mut self) -> Result<Arc<[String]>, ParseError> {
        if let Some(names) = &self.fieldnames {
            return Ok(names.clone());
        }
        let dialect = self.dialect()?;

        self.stream.rewind()?;
        let mut header = None;
        for line in self.stream.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                header = Some(line);
                break;
            }
        }
        self.stream.rewind()?;

        let names: Arc<[String]> = match header {
            Some(line) => split_line(&line, dialect)?.into(),
            // An empty file has no header and will yield no rows.
            None => Vec::new().into(),
        };
        debug!(
            "fieldnames of {}: [{}]",
            self.stream.path().display(),
            names.iter().join(", ")
        );
        self.fieldnames = Some(names.clone());
        Ok(names)
    }

    /// Lazy pass over the data rows. Malformed lines (wrong field count or
    /// unparseable quoting) are logged with their 1-based line number and
    /// skipped; they never abort the stream. I/O failures do: the iterator
    /// yields the error and ends.
    pub fn rows(&mut self) -> Result<Rows<'_>, ParseError> {
        let dialect = self.dialect()?;
        let header = self.fieldnames()?;
        let skip_header = !self.explicit_fieldnames;
        let path = self.stream.path().to_path_buf();

        self.stream.rewind()?;
        Ok(Rows {
            lines: self.stream.lines(),
            dialect,
            header,
            skip_header,
            line: 0,
            path,
            done: false,
        })
    }

    /// Write the header line. Legal on its own (header-only files exist).
    pub fn write_headers(&mut self) -> Result<(), ParseError> {
        let dialect = self.dialect()?;
        let names = self.fieldnames.clone().ok_or_else(|| ParseError::Format {
            path: self.stream.path().to_path_buf(),
            detail: "no fieldnames to write".into(),
        })?;
        let line = join_line(names.iter().map(String::as_str), dialect)?;
        self.stream.write_line(&line)?;
        Ok(())
    }

    /// Write data rows, emitting the header first if none has been set. A row
    /// whose fields do not match the writer's header is logged and skipped.
    /// Returns the number of rows written.
    pub fn write_rows<'r, I>(&mut self, rows: I) -> Result<usize, ParseError>
    where
        I: IntoIterator<Item = &'r Row>,
    {
        let dialect = self.dialect()?;
        let mut written = 0;

        for row in rows {
            if self.fieldnames.is_none() {
                // Keys of the first row become the header.
                self.fieldnames = Some(row.header().clone());
                self.explicit_fieldnames = true;
                self.write_headers()?;
            }
            let header = self
                .fieldnames
                .as_ref()
                .cloned()
                .unwrap_or_else(|| Vec::new().into());

            if row.header().as_ref() != header.as_ref() {
                let err = ParseError::RowWrite {
                    expected: header.to_vec(),
                    found: row.header().to_vec(),
                };
                warn!("{}: skipping row: {}", self.stream.path().display(), err);
                continue;
            }

            let line = join_line(row.values().iter().map(String::as_str), dialect)?;
            self.stream.write_line(&line)?;
            written += 1;
        }

        self.stream.flush()?;
        Ok(written)
    }
}

/// Split one raw line according to `dialect`, honoring quoting.
fn split_line(line: &str, dialect: Dialect) -> Result<Vec<String>, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(dialect.delimiter)
        .quote(dialect.quote)
        .has_headers(false)
        .from_reader(line.as_bytes());

    let mut record = csv::StringRecord::new();
    reader.read_record(&mut record)?;
    Ok(record.iter().map(str::to_owned).collect())
}

/// Join fields into one raw line according to `dialect`, quoting as needed.
fn join_line<'a, I>(fields: I, dialect: Dialect) -> Result<String, ParseError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut writer = csv::WriterBuilder::new()
        .delimiter(dialect.delimiter)
        .quote(dialect.quote)
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(fields)?;
    let bytes = writer
        .into_inner()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;

    let mut line = String::from_utf8_lossy(&bytes).into_owned();
    if line.ends_with('\n') {
        line.pop();
    }
    Ok(line)
}

/// One-shot iterator over the data rows of a [`DelimitedParser`].
///
/// Malformed rows are absorbed (logged and skipped); an I/O failure of the
/// underlying stream is file-level and is yielded as an error so callers can
/// abort instead of committing a truncated parse.
pub struct Rows<'s> {
    lines: Lines<'s>,
    dialect: Dialect,
    header: Arc<[String]>,
    skip_header: bool,
    line: u64,
    path: PathBuf,
    done: bool,
}

impl Iterator for Rows<'_> {
    type Item = Result<Row, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let raw = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err.into()));
                }
            };
            self.line += 1;

            if raw.trim().is_empty() {
                continue;
            }
            if self.skip_header {
                self.skip_header = false;
                continue;
            }

            let values = match split_line(&raw, self.dialect) {
                Ok(values) => values,
                Err(err) => {
                    let err = ParseError::RowParse {
                        line: self.line,
                        content: raw,
                        detail: err.to_string(),
                    };
                    warn!("{}: skipping row: {}", self.path.display(), err);
                    continue;
                }
            };

            if values.len() != self.header.len() {
                let err = ParseError::RowParse {
                    line: self.line,
                    content: raw,
                    detail: format!(
                        "expected {} fields, found {}",
                        self.header.len(),
                        values.len()
                    ),
                };
                warn!("{}: skipping row: {}", self.path.display(), err);
                continue;
            }

            return Some(Ok(Row::new(self.header.clone(), values)));
        }
    }
}
