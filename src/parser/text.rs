use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use super::ParseError;

/// How a [`TextStream`] wants to use its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Existing file, read-only.
    Read,
    /// Existing file, read and write.
    ReadWrite,
    /// Create (or truncate), read and write.
    Create,
}

impl AccessMode {
    pub fn writable(self) -> bool {
        !matches!(self, AccessMode::Read)
    }

    fn options(self) -> OpenOptions {
        let mut opts = OpenOptions::new();
        match self {
            AccessMode::Read => {
                opts.read(true);
            }
            AccessMode::ReadWrite => {
                opts.read(true).write(true);
            }
            AccessMode::Create => {
                opts.read(true).write(true).create(true).truncate(true);
            }
        }
        opts
    }
}

/// Line-oriented handle over one open file. Owned exclusively by a single
/// parser; at most one open handle per parser instance.
#[derive(Debug)]
pub struct TextStream {
    path: PathBuf,
    mode: AccessMode,
    reader: BufReader<File>,
}

impl TextStream {
    /// Open `path` in `mode`. If the requested mode fails, retry once in
    /// create-and-read-write mode; if that also fails, report the path and
    /// the *original* mode.
    pub fn open<P: AsRef<Path>>(path: P, mode: AccessMode) -> Result<Self, ParseError> {
        let path = path.as_ref().to_path_buf();

        let (file, mode) = match mode.options().open(&path) {
            Ok(file) => (file, mode),
            Err(source) => {
                debug!(
                    "cannot open {} in mode {:?}, retrying as create: {}",
                    path.display(),
                    mode,
                    source
                );
                match AccessMode::Create.options().open(&path) {
                    Ok(file) => (file, AccessMode::Create),
                    Err(_) => return Err(ParseError::FileAccess { path, mode, source }),
                }
            }
        };

        debug!("{} is open in mode {:?}", path.display(), mode);
        Ok(TextStream {
            path,
            mode,
            reader: BufReader::new(file),
        })
    }

    /// Open `path` read-only with no mode negotiation: a missing file is a
    /// [`ParseError::FileAccess`], never created. For peek-style callers
    /// that must leave the filesystem untouched.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self, ParseError> {
        let path = path.as_ref().to_path_buf();
        let file = AccessMode::Read
            .options()
            .open(&path)
            .map_err(|source| ParseError::FileAccess {
                path: path.clone(),
                mode: AccessMode::Read,
                source,
            })?;
        Ok(TextStream {
            path,
            mode: AccessMode::Read,
            reader: BufReader::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The negotiated mode, which may be more permissive than requested.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Seek back to the start of the file.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// One-shot pass over the remaining lines, newline stripped. Not
    /// restartable; call [`TextStream::rewind`] first to start from the top.
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { stream: self }
    }

    /// Read up to `len` bytes from the start of the file, restoring the read
    /// position afterwards. Used for dialect sniffing.
    pub fn peek_prefix(&mut self, len: usize) -> io::Result<String> {
        self.rewind()?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        self.rewind()?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Append one newline-terminated line to the handle. Writes always land
    /// at the end of the file, wherever reads or sniffing left the cursor.
    pub fn write_line(&mut self, line: &str) -> Result<(), ParseError> {
        if !self.mode.writable() {
            return Err(ParseError::NotWritable {
                path: self.path.clone(),
            });
        }
        let file = self.reader.get_mut();
        file.seek(SeekFrom::End(0))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Flush pending writes to disk.
    pub fn flush(&mut self) -> io::Result<()> {
        self.reader.get_mut().flush()
    }
}

pub struct Lines<'s> {
    stream: &'s mut TextStream,
}

impl Iterator for Lines<'_> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = String::new();
        match self.stream.reader.read_line(&mut buf) {
            Ok(0) => None,
            Ok(_) => {
                if buf.ends_with('\n') {
                    buf.pop();
                    if buf.ends_with('\r') {
                        buf.pop();
                    }
                }
                Some(Ok(buf))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scratch() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn read_existing_file_line_by_line() {
        let dir = scratch();
        let path = dir.path().join("lines.txt");
        std::fs::write(&path, "one\ntwo\r\nthree").unwrap();

        let mut stream = TextStream::open(&path, AccessMode::Read).unwrap();
        let lines: Vec<String> = stream.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, ["one", "two", "three"]);
    }

    #[test]
    fn missing_file_falls_back_to_create() {
        let dir = scratch();
        let path = dir.path().join("fresh.txt");

        let mut stream = TextStream::open(&path, AccessMode::Read).unwrap();
        assert_eq!(stream.mode(), AccessMode::Create);
        stream.write_line("hello").unwrap();
        stream.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn open_existing_does_not_negotiate_or_create() {
        let dir = scratch();
        let path = dir.path().join("absent.txt");

        assert!(matches!(
            TextStream::open_existing(&path),
            Err(ParseError::FileAccess { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn unopenable_path_reports_original_mode() {
        let dir = scratch();
        let path = dir.path().join("no-such-dir").join("file.txt");

        let err = TextStream::open(&path, AccessMode::Read).unwrap_err();
        match err {
            ParseError::FileAccess { mode, .. } => assert_eq!(mode, AccessMode::Read),
            other => panic!("expected FileAccess, got {other:?}"),
        }
    }

    #[test]
    fn writes_append_even_after_reads_rewound_the_cursor() {
        let dir = scratch();
        let path = dir.path().join("append.txt");
        std::fs::write(&path, "AAAA\nBBBB\n").unwrap();

        let mut stream = TextStream::open(&path, AccessMode::ReadWrite).unwrap();
        stream.peek_prefix(1024).unwrap();
        stream.write_line("XX").unwrap();
        stream.flush().unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "AAAA\nBBBB\nXX\n"
        );
    }

    #[test]
    fn write_refused_on_read_only_handle() {
        let dir = scratch();
        let path = dir.path().join("ro.txt");
        std::fs::write(&path, "data\n").unwrap();

        let mut stream = TextStream::open(&path, AccessMode::Read).unwrap();
        assert!(matches!(
            stream.write_line("nope"),
            Err(ParseError::NotWritable { .. })
        ));
    }

    #[test]
    fn peek_prefix_does_not_move_read_position() {
        let dir = scratch();
        let path = dir.path().join("peek.txt");
        std::fs::write(&path, "first\nsecond\n").unwrap();

        let mut stream = TextStream::open(&path, AccessMode::Read).unwrap();
        let prefix = stream.peek_prefix(1024).unwrap();
        assert!(prefix.starts_with("first"));

        let first = stream.lines().next().unwrap().unwrap();
        assert_eq!(first, "first");
    }

    #[test]
    fn rewind_restarts_iteration() {
        let dir = scratch();
        let path = dir.path().join("rw.txt");
        std::fs::write(&path, "a\nb\n").unwrap();

        let mut stream = TextStream::open(&path, AccessMode::Read).unwrap();
        assert_eq!(stream.lines().count(), 2);
        assert_eq!(stream.lines().count(), 0);
        stream.rewind().unwrap();
        assert_eq!(stream.lines().count(), 2);
    }
}
