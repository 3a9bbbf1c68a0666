use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use memmap2::Mmap;
use thiserror::Error;

/// Anything with a fixed length that can be read at arbitrary offsets from
/// several threads at once.
pub trait RandomAccessSource: Send + Sync {
    fn len(&self) -> u64;

    /// Reads exactly `count` bytes at `offset`. Fewer bytes is an error.
    fn read_at(&self, offset: u64, count: usize) -> io::Result<Bytes>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("cannot open {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("cannot map {}: {source}", .path.display())]
    Map { path: PathBuf, source: io::Error },
}

/// Opens `path` as a source, memory mapped when `mmap` is set.
pub fn open_source(path: &Path, mmap: bool) -> Result<Arc<dyn RandomAccessSource>, SourceError> {
    // stat before opening so a missing file is reported the same way in both modes
    let metadata = std::fs::metadata(path).map_err(|source| SourceError::Open {
        path: path.to_owned(),
        source,
    })?;
    let file = File::open(path).map_err(|source| SourceError::Open {
        path: path.to_owned(),
        source,
    })?;
    let length = metadata.len();
    debug!("opened {} ({} bytes, mmap: {})", path.display(), length, mmap);

    if !mmap {
        return Ok(Arc::new(FileSource { file, length }));
    }
    if length == 0 {
        // zero-length mappings are rejected on some platforms
        return Ok(Arc::new(MemorySource::new(Bytes::new())));
    }
    let source = MmapSource::new(&file).map_err(|source| SourceError::Map {
        path: path.to_owned(),
        source,
    })?;
    Ok(Arc::new(source))
}

fn check_bounds(length: u64, offset: u64, count: usize) -> io::Result<()> {
    match offset.checked_add(count as u64) {
        Some(end) if end <= length => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read of {count} bytes at offset {offset} runs past end of source ({length} bytes)"),
        )),
    }
}

/// Positional reads on a regular file handle.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    length: u64,
}

impl FileSource {
    pub fn new(file: File) -> io::Result<Self> {
        let length = file.metadata()?.len();
        Ok(Self { file, length })
    }
}

impl RandomAccessSource for FileSource {
    fn len(&self) -> u64 {
        self.length
    }

    #[cfg(unix)]
    fn read_at(&self, offset: u64, count: usize) -> io::Result<Bytes> {
        use std::os::unix::fs::FileExt;

        let mut buffer = vec![0u8; count];
        self.file.read_exact_at(&mut buffer, offset)?;
        Ok(Bytes::from(buffer))
    }

    #[cfg(windows)]
    fn read_at(&self, offset: u64, count: usize) -> io::Result<Bytes> {
        use std::os::windows::fs::FileExt;

        let mut buffer = vec![0u8; count];
        let mut filled = 0;
        while filled < count {
            match self.file.seek_read(&mut buffer[filled..], offset + filled as u64) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Bytes::from(buffer))
    }
}

/// Reads served from a read-only memory map of the file.
#[derive(Debug)]
pub struct MmapSource {
    map: Mmap,
}

impl MmapSource {
    pub fn new(file: &File) -> io::Result<Self> {
        // SAFETY: the map is read-only. Truncating the file underneath it while
        // a checksum runs is outside what this tool guards against.
        let map = unsafe { Mmap::map(file)? };
        Ok(Self { map })
    }
}

impl RandomAccessSource for MmapSource {
    fn len(&self) -> u64 {
        self.map.len() as u64
    }

    fn read_at(&self, offset: u64, count: usize) -> io::Result<Bytes> {
        check_bounds(self.len(), offset, count)?;
        let start = offset as usize;
        Ok(Bytes::copy_from_slice(&self.map[start..start + count]))
    }
}

/// A source held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl RandomAccessSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, count: usize) -> io::Result<Bytes> {
        check_bounds(self.len(), offset, count)?;
        let start = offset as usize;
        Ok(self.data.slice(start..start + count))
    }
}
