use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Buffered reader over a headerless raw video file.
pub struct RawFileReader {
    path: PathBuf,
    reader: Option<BufReader<File>>,
}

impl RawFileReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open raw input {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(BufReader::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads until `buf` is full or the input ends and returns the number of
    /// bytes read; 0 once the file is exhausted or the reader is closed.
    pub fn fill_buffer(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(0);
        };
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to read {}", self.path.display()))
                }
            }
        }
        Ok(filled)
    }

    /// Reads one whole frame. A trailing partial frame counts as end of input.
    pub fn read_frame(&mut self, frame: &mut [u8]) -> Result<bool> {
        let filled = self.fill_buffer(frame)?;
        if filled > 0 && filled < frame.len() {
            tracing::debug!(
                path = %self.path.display(),
                bytes = filled,
                frame_size = frame.len(),
                "discarding short trailing frame"
            );
        }
        Ok(filled == frame.len() && filled > 0)
    }

    pub fn rewind(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.as_mut() {
            reader
                .seek(SeekFrom::Start(0))
                .with_context(|| format!("failed to rewind {}", self.path.display()))?;
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.reader = None;
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn raw_file(dir: &TempDir, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join("input.rgba");
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn fill_buffer_reports_bytes_read() {
        let dir = TempDir::new().unwrap();
        let path = raw_file(&dir, &[1, 2, 3, 4, 5, 6]);
        let mut reader = RawFileReader::open(&path).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reader.fill_buffer(&mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(reader.fill_buffer(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[5, 6]);
        assert_eq!(reader.fill_buffer(&mut buf).unwrap(), 0);
    }

    #[test]
    fn short_trailing_frame_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = raw_file(&dir, &[7; 10]);
        let mut reader = RawFileReader::open(&path).unwrap();
        let mut frame = [0u8; 4];
        assert!(reader.read_frame(&mut frame).unwrap());
        assert!(reader.read_frame(&mut frame).unwrap());
        assert!(!reader.read_frame(&mut frame).unwrap());
        assert!(!reader.read_frame(&mut frame).unwrap());
    }

    #[test]
    fn rewind_restarts_playout() {
        let dir = TempDir::new().unwrap();
        let path = raw_file(&dir, &[1, 2, 3, 4]);
        let mut reader = RawFileReader::open(&path).unwrap();
        let mut frame = [0u8; 4];
        assert!(reader.read_frame(&mut frame).unwrap());
        assert!(!reader.read_frame(&mut frame).unwrap());
        reader.rewind().unwrap();
        assert!(reader.read_frame(&mut frame).unwrap());
        assert_eq!(frame, [1, 2, 3, 4]);
    }

    #[test]
    fn close_is_idempotent_and_stops_reads() {
        let dir = TempDir::new().unwrap();
        let path = raw_file(&dir, &[1, 2, 3, 4]);
        let mut reader = RawFileReader::open(&path).unwrap();
        reader.close();
        reader.close();
        assert!(reader.is_closed());
        let mut buf = [0u8; 4];
        assert_eq!(reader.fill_buffer(&mut buf).unwrap(), 0);
        reader.rewind().unwrap();
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = RawFileReader::open(Path::new("/nonexistent/input.rgba"))
            .err()
            .expect("open should fail");
        assert!(format!("{err:#}").contains("/nonexistent/input.rgba"));
    }
}
