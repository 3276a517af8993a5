use std::path::PathBuf;

use log::warn;

use super::text::{AccessMode, Lines, TextStream};
use super::ParseError;

const DEFAULT_LEAD: char = '>';
const DEFAULT_LINE_WIDTH: usize = 80;

/// One FASTA record: identifier (without the lead character) and the
/// concatenated sequence with all line-internal whitespace stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqRecord {
    pub id: String,
    pub sequence: String,
}

/// Parser for FASTA-style sequence files over one exclusively-owned
/// [`TextStream`].
pub struct FastaParser {
    stream: TextStream,
    lead: char,
    line_width: usize,
}

impl FastaParser {
    pub fn open<P: Into<PathBuf>>(path: P, mode: AccessMode) -> Result<FastaParser, ParseError> {
        let stream = TextStream::open(path.into(), mode)?;
        Ok(FastaParser {
            stream,
            lead: DEFAULT_LEAD,
            line_width: DEFAULT_LINE_WIDTH,
        })
    }

    pub fn with_lead(mut self, lead: char) -> FastaParser {
        self.lead = lead;
        self
    }

    pub fn with_line_width(mut self, width: usize) -> FastaParser {
        debug_assert!(width > 0);
        self.line_width = width;
        self
    }

    pub fn path(&self) -> &std::path::Path {
        self.stream.path()
    }

    /// Lazy pass over the records of the file, grouping raw lines into
    /// (identifier, sequence) pairs. Only the current record is buffered.
    ///
    /// A file whose first non-blank line is not a header is structurally
    /// invalid and yields a [`ParseError::Format`] before any record.
    /// Records whose body turns out empty are logged and dropped.
    pub fn records(&mut self) -> Result<Records<'_>, ParseError> {
        self.stream.rewind()?;
        let path = self.stream.path().to_path_buf();
        Ok(Records {
            lines: self.stream.lines(),
            lead: self.lead,
            path,
            pending: None,
            buffer: String::new(),
            done: false,
        })
    }

    /// Write one header line, prepending the lead character if missing.
    pub fn write_header(&mut self, id: &str) -> Result<(), ParseError> {
        if id.starts_with(self.lead) {
            self.stream.write_line(id)
        } else {
            self.stream.write_line(&format!("{}{}", self.lead, id))
        }
    }

    /// Write one contiguous sequence, re-wrapped into lines of the configured
    /// width. Returns the number of lines written.
    pub fn write_seq(&mut self, bases: &str) -> Result<usize, ParseError> {
        let chars: Vec<char> = bases.chars().collect();
        let mut written = 0;
        for chunk in chars.chunks(self.line_width) {
            let line: String = chunk.iter().collect();
            self.stream.write_line(&line)?;
            written += 1;
        }
        Ok(written)
    }

    /// Write pre-split sequence lines verbatim, one element per line. No
    /// re-wrapping: this is the contract for callers that already chose
    /// their line breaks.
    pub fn write_seq_lines<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<usize, ParseError> {
        for line in lines {
            self.stream.write_line(line.as_ref())?;
        }
        Ok(lines.len())
    }

    /// Write a whole record: header plus wrapped sequence.
    pub fn write_record(&mut self, record: &SeqRecord) -> Result<(), ParseError> {
        self.write_header(&record.id)?;
        self.write_seq(&record.sequence)?;
        self.stream.flush()?;
        Ok(())
    }
}

/// One-shot record iterator. Two states: waiting for the first header
/// (`pending` is `None`) and accumulating a sequence body (`pending` holds
/// the current identifier).
pub struct Records<'s> {
    lines: Lines<'s>,
    lead: char,
    path: PathBuf,
    pending: Option<String>,
    buffer: String,
    done: bool,
}

impl Records<'_> {
    fn take_record(&mut self, id: String) -> Option<SeqRecord> {
        let sequence = std::mem::take(&mut self.buffer);
        if sequence.is_empty() {
            warn!(
                "{}: dropping record {:?} with empty sequence",
                self.path.display(),
                id
            );
            return None;
        }
        Some(SeqRecord { id, sequence })
    }
}

impl Iterator for Records<'_> {
    type Item = Result<SeqRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let line = match self.lines.next() {
                None => {
                    self.done = true;
                    let id = self.pending.take()?;
                    return self.take_record(id).map(Ok);
                }
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err.into()));
                }
                Some(Ok(line)) => line,
            };

            if line.trim().is_empty() {
                continue;
            }

            if line.starts_with(self.lead) {
                let id = line
                    .strip_prefix(self.lead)
                    .unwrap_or(&line)
                    .trim()
                    .to_owned();
                if let Some(prev) = self.pending.replace(id) {
                    if let Some(record) = self.take_record(prev) {
                        return Some(Ok(record));
                    }
                }
                continue;
            }

            match &self.pending {
                Some(_) => {
                    // Body line: strip all whitespace, no separator inserted.
                    self.buffer
                        .extend(line.chars().filter(|c| !c.is_whitespace()));
                }
                None => {
                    self.done = true;
                    return Some(Err(ParseError::Format {
                        path: self.path.clone(),
                        detail: format!(
                            "expected a {:?} header before sequence data, found {:?}",
                            self.lead, line
                        ),
                    }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fasta_file(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("seqs.fasta");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn collect(parser: &mut FastaParser) -> Vec<SeqRecord> {
        parser.records().unwrap().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn single_record_concatenates_body_lines() {
        let dir = TempDir::new().unwrap();
        let path = fasta_file(&dir, ">head\nACGT\nTCGA\n");

        let mut parser = FastaParser::open(&path, AccessMode::Read).unwrap();
        let records = collect(&mut parser);
        assert_eq!(
            records,
            [SeqRecord {
                id: "head".into(),
                sequence: "ACGTTCGA".into()
            }]
        );
    }

    #[test]
    fn one_record_per_header() {
        let dir = TempDir::new().unwrap();
        let path = fasta_file(&dir, ">a\nAC\nGT\n>b\nTT\n>c\nGG\nCC\nAA\n");

        let mut parser = FastaParser::open(&path, AccessMode::Read).unwrap();
        let records = collect(&mut parser);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].sequence, "ACGT");
        assert_eq!(records[1].id, "b");
        assert_eq!(records[2].sequence, "GGCCAA");
    }

    #[test]
    fn body_whitespace_is_stripped() {
        let dir = TempDir::new().unwrap();
        let path = fasta_file(&dir, "> spaced id \n AC GT \nTC\tGA\n");

        let mut parser = FastaParser::open(&path, AccessMode::Read).unwrap();
        let records = collect(&mut parser);
        assert_eq!(records[0].id, "spaced id");
        assert_eq!(records[0].sequence, "ACGTTCGA");
    }

    #[test]
    fn empty_file_yields_no_records() {
        let dir = TempDir::new().unwrap();
        let path = fasta_file(&dir, "");

        let mut parser = FastaParser::open(&path, AccessMode::Read).unwrap();
        assert_eq!(parser.records().unwrap().count(), 0);
    }

    #[test]
    fn body_before_any_header_is_a_format_error() {
        let dir = TempDir::new().unwrap();
        let path = fasta_file(&dir, "ACGT\n>late\nTTTT\n");

        let mut parser = FastaParser::open(&path, AccessMode::Read).unwrap();
        let mut records = parser.records().unwrap();
        assert!(matches!(records.next(), Some(Err(ParseError::Format { .. }))));
        assert!(records.next().is_none());
    }

    #[test]
    fn empty_body_records_are_dropped() {
        let dir = TempDir::new().unwrap();
        let path = fasta_file(&dir, ">empty\n>real\nACGT\n");

        let mut parser = FastaParser::open(&path, AccessMode::Read).unwrap();
        let records = collect(&mut parser);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "real");
    }

    #[test]
    fn wrapping_produces_full_width_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.fasta");

        let bases = "A".repeat(170);
        {
            let mut parser = FastaParser::open(&path, AccessMode::Create).unwrap();
            assert_eq!(parser.write_seq(&bases).unwrap(), 3);
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let widths: Vec<usize> = contents.lines().map(str::len).collect();
        assert_eq!(widths, [80, 80, 10]);
    }

    #[test]
    fn seq_lines_are_written_verbatim() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.fasta");

        {
            let mut parser = FastaParser::open(&path, AccessMode::Create).unwrap();
            parser.write_header("otu9").unwrap();
            parser.write_seq_lines(&["ACG", "TTTTT"]).unwrap();
        }

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            ">otu9\nACG\nTTTTT\n"
        );
    }

    #[test]
    fn lead_character_not_doubled_on_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.fasta");

        {
            let mut parser = FastaParser::open(&path, AccessMode::Create).unwrap();
            parser.write_header(">already").unwrap();
        }

        assert_eq!(std::fs::read_to_string(&path).unwrap(), ">already\n");
    }

    #[test]
    fn round_trip_preserves_id_and_sequence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rt.fasta");

        let record = SeqRecord {
            id: "otu42".into(),
            sequence: "ACGT".repeat(50),
        };

        {
            let mut writer = FastaParser::open(&path, AccessMode::Create).unwrap();
            writer.write_record(&record).unwrap();
        }

        let mut reader = FastaParser::open(&path, AccessMode::Read).unwrap();
        let records = collect(&mut reader);
        assert_eq!(records, [record]);
    }
}
