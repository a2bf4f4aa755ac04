use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::path::PathBuf;

/// Chunked byte input for a capture.
///
/// The runner polls `read_chunk` from its single-threaded loop; a source
/// returns whatever bytes it has, and 0 only at the true end of the
/// stream.
pub trait ByteSource {
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn close(&mut self) {}
}

/// A capture file on disk.
pub struct FileSource {
    path: PathBuf,
    file: Option<File>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource {
            path: path.into(),
            file: None,
        }
    }
}

impl ByteSource for FileSource {
    fn open(&mut self) -> io::Result<()> {
        self.file = Some(File::open(&self.path)?);
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Err(io::Error::new(ErrorKind::NotConnected, "source not opened"));
        };
        loop {
            match file.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&mut self) {
        self.file = None;
    }
}

/// An in-memory capture, mostly for tests and tools.
pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        MemorySource {
            data: data.into(),
            pos: 0,
        }
    }
}

impl ByteSource for MemorySource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_reads_out_in_chunks() {
        let mut src = MemorySource::new(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 2];
        assert_eq!(src.read_chunk(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(src.read_chunk(&mut buf).unwrap(), 2);
        assert_eq!(src.read_chunk(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 5);
        assert_eq!(src.read_chunk(&mut buf).unwrap(), 0);
    }

    #[test]
    fn file_source_requires_open() {
        let mut src = FileSource::new("/nonexistent/capture.vcd");
        let mut buf = [0u8; 8];
        assert!(src.read_chunk(&mut buf).is_err());
        assert!(src.open().is_err());
    }
}
