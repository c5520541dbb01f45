// src/print_job/program.rs - Lazy G-code program reader
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("Cannot open G-code file '{path}': {source}")]
    ResourceUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("G-code read error: {0}")]
    Read(#[from] std::io::Error),
}

/// Any seekable buffered byte source a program can be read from.
pub trait ProgramSource: BufRead + Seek + Send {}

impl<T: BufRead + Seek + Send> ProgramSource for T {}

/// Yields the meaningful lines of a stored program one at a time.
///
/// Comments and blank lines are skipped. `position` is the number of bytes
/// consumed so far and is pinned to `size` once the program is exhausted.
pub struct ProgramReader<R = BufReader<File>> {
    source: R,
    size: u64,
    position: u64,
    buf: Vec<u8>,
}

impl ProgramReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ProgramError> {
        let path = path.as_ref();
        let unavailable = |source| ProgramError::ResourceUnavailable {
            path: path.display().to_string(),
            source,
        };
        let file = File::open(path).map_err(unavailable)?;
        let size = file.metadata().map_err(unavailable)?.len();
        tracing::info!("Opened G-code file: {} ({} bytes)", path.display(), size);
        Ok(Self::from_reader(BufReader::new(file), size))
    }
}

impl<R: BufRead + Seek> ProgramReader<R> {
    pub fn from_reader(source: R, size: u64) -> Self {
        Self {
            source,
            size,
            position: 0,
            buf: Vec::new(),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn rewind(&mut self) -> Result<(), ProgramError> {
        self.source.seek(SeekFrom::Start(0))?;
        self.position = 0;
        Ok(())
    }

    /// Next non-empty line with comments and surrounding whitespace removed,
    /// or `None` once the program is exhausted.
    pub fn next_line(&mut self) -> Result<Option<String>, ProgramError> {
        loop {
            self.buf.clear();
            let read = self.source.read_until(b'\n', &mut self.buf)?;
            if read == 0 {
                self.position = self.size;
                return Ok(None);
            }
            self.position = (self.position + read as u64).min(self.size);

            let line = String::from_utf8_lossy(&self.buf);
            let code = strip_comment(&line).trim();
            if !code.is_empty() {
                return Ok(Some(code.to_string()));
            }
        }
    }
}

impl<R: ProgramSource + 'static> ProgramReader<R> {
    pub fn boxed(self) -> ProgramReader<Box<dyn ProgramSource>> {
        ProgramReader {
            source: Box::new(self.source),
            size: self.size,
            position: self.position,
            buf: self.buf,
        }
    }
}

/// Cut a line at its first unescaped `;`. A backslash escapes the next character.
pub fn strip_comment(line: &str) -> &str {
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            ';' if !escaped => return &line[..idx],
            '\\' if !escaped => escaped = true,
            _ => escaped = false,
        }
    }
    line
}
