//! File-backed transport for replaying and recording captures.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::Transport;
use crate::error::EComResult;

/// Reads a capture file as if it were device output, and/or records writes.
pub struct FileTransport {
    reader: Option<BufReader<File>>,
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    eof: bool,
}

impl FileTransport {
    /// Replay `path`. Writes are rejected.
    pub fn replay(path: impl AsRef<Path>) -> EComResult<Self> {
        let path = path.as_ref();
        Ok(Self {
            reader: Some(BufReader::new(File::open(path)?)),
            writer: None,
            path: path.to_path_buf(),
            eof: false,
        })
    }

    /// Record every write to `path`, truncating it. Reads return no data.
    pub fn record(path: impl AsRef<Path>) -> EComResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            reader: None,
            writer: Some(BufWriter::new(file)),
            path: path.to_path_buf(),
            eof: true,
        })
    }

    /// True once the replayed file has been read to the end.
    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

impl Transport for FileTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => {
                writer.write_all(data)?;
                writer.flush()
            }
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file transport opened for replay only",
            )),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(0);
        };

        let count = reader.read(buf)?;
        if count == 0 && !buf.is_empty() {
            self.eof = true;
        }
        Ok(count)
    }

    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_record_then_replay() {
        let capture = NamedTempFile::new().unwrap();

        let mut recorder = FileTransport::record(capture.path()).unwrap();
        recorder.write_all(&[0xFF, 0x5A]).unwrap();
        recorder.write_all(&[0x01, 0x02]).unwrap();
        drop(recorder);

        let mut replay = FileTransport::replay(capture.path()).unwrap();
        let mut buf = [0u8; 16];
        let n = replay.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0xFF, 0x5A, 0x01, 0x02]);
        assert!(!replay.is_eof());

        assert_eq!(replay.read(&mut buf).unwrap(), 0);
        assert!(replay.is_eof());
    }

    #[test]
    fn test_replay_rejects_writes() {
        let capture = NamedTempFile::new().unwrap();
        let mut replay = FileTransport::replay(capture.path()).unwrap();
        let err = replay.write_all(&[1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn test_record_reads_nothing() {
        let capture = NamedTempFile::new().unwrap();
        let mut recorder = FileTransport::record(capture.path()).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(recorder.read(&mut buf).unwrap(), 0);
        assert!(recorder.name().starts_with("file:"));
    }
}
