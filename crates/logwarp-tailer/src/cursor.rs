//! Read position within one tailed file.

use std::fs::Metadata;
use std::io::{self, SeekFrom};
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub(crate) struct FileCursor {
    file: File,
    offset: u64,
    /// Bytes after the last newline, waiting for the rest of their line.
    partial: Vec<u8>,
    #[cfg(unix)]
    ino: u64,
}

impl FileCursor {
    /// Open `path`, positioned at its end or its start.
    pub(crate) async fn open(path: &Path, from_end: bool) -> io::Result<Self> {
        let mut file = File::open(path).await?;
        let offset = if from_end {
            file.seek(SeekFrom::End(0)).await?
        } else {
            0
        };
        #[cfg(unix)]
        let ino = {
            use std::os::unix::fs::MetadataExt;
            file.metadata().await?.ino()
        };

        Ok(Self {
            file,
            offset,
            partial: Vec::new(),
            #[cfg(unix)]
            ino,
        })
    }

    /// Whether `meta` (of the watched path) still describes the open file.
    pub(crate) fn same_file(&self, meta: &Metadata) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            meta.ino() == self.ino
        }
        #[cfg(not(unix))]
        {
            let _ = meta;
            true
        }
    }

    /// Rewind if the file shrank below our offset. Returns whether it did.
    pub(crate) async fn check_truncation(&mut self) -> io::Result<bool> {
        let len = self.file.metadata().await?.len();
        if len >= self.offset {
            return Ok(false);
        }
        self.file.seek(SeekFrom::Start(0)).await?;
        self.offset = 0;
        self.partial.clear();
        Ok(true)
    }

    /// Read everything appended since the last call and return the complete
    /// lines, without their terminators.
    pub(crate) async fn read_lines(&mut self) -> io::Result<Vec<String>> {
        let mut buf = Vec::new();
        let n = self.file.read_to_end(&mut buf).await?;
        self.offset += n as u64;
        if n == 0 {
            return Ok(Vec::new());
        }

        self.partial.extend_from_slice(&buf);
        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };

        let complete: Vec<u8> = self.partial.drain(..=last_newline).collect();
        Ok(complete[..complete.len() - 1]
            .split(|&b| b == b'\n')
            .map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                String::from_utf8_lossy(line).into_owned()
            })
            .collect())
    }

    pub(crate) fn pending_bytes(&self) -> usize {
        self.partial.len()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn splits_complete_lines_and_keeps_fragment() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let mut cursor = FileCursor::open(tmp.path(), false).await.unwrap();

        write!(tmp, "one\r\ntwo\nthr").unwrap();
        tmp.flush().unwrap();
        assert_eq!(cursor.read_lines().await.unwrap(), vec!["one", "two"]);
        assert_eq!(cursor.pending_bytes(), 3);

        write!(tmp, "ee\n").unwrap();
        tmp.flush().unwrap();
        assert_eq!(cursor.read_lines().await.unwrap(), vec!["three"]);
        assert_eq!(cursor.pending_bytes(), 0);
    }

    #[tokio::test]
    async fn open_from_end_skips_existing_content() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "old").unwrap();
        tmp.flush().unwrap();

        let mut cursor = FileCursor::open(tmp.path(), true).await.unwrap();
        assert!(cursor.read_lines().await.unwrap().is_empty());

        writeln!(tmp, "new").unwrap();
        tmp.flush().unwrap();
        assert_eq!(cursor.read_lines().await.unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn truncation_rewinds() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "a long first line").unwrap();
        tmp.flush().unwrap();

        let mut cursor = FileCursor::open(tmp.path(), false).await.unwrap();
        assert_eq!(cursor.read_lines().await.unwrap().len(), 1);

        tmp.as_file().set_len(0).unwrap();
        // Write through a fresh handle so the data lands at offset 0.
        std::fs::write(tmp.path(), "b\n").unwrap();

        assert!(cursor.check_truncation().await.unwrap());
        assert_eq!(cursor.read_lines().await.unwrap(), vec!["b"]);
        assert!(!cursor.check_truncation().await.unwrap());
    }
}
