//! Random-access byte media for containers
//!
//! A container never touches a file directly; it talks to an [`IoChannel`].
//! [`FileChannel`] is backed by a real file, [`MemoryChannel`] by a shared
//! in-memory buffer. A [`ChannelFactory`] turns a path into a channel and is
//! the only thing the registry needs from its environment.

use crate::error::{PakError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Access mode a container (and its channel) is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn can_read(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// Random-access byte medium
///
/// All calls block until complete. Implementations keep a cursor; the
/// `*_at` helpers seek before every transfer so callers never depend on
/// where the previous operation left it.
pub trait IoChannel: Send {
    /// Current cursor position
    fn position(&self) -> u64;

    /// Move the cursor
    fn seek(&mut self, position: u64) -> Result<()>;

    /// Length of the medium in bytes
    fn len(&self) -> Result<u64>;

    /// Grow or truncate the medium
    fn set_len(&mut self, len: u64) -> Result<()>;

    /// Read up to `buf.len()` bytes at the cursor, returning the count
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `buf` at the cursor
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Release the medium. Further calls fail with [`PakError::Closed`].
    fn close(&mut self) -> Result<()>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read as many bytes as available at `offset`, up to `buf.len()`
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.seek(offset)?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Fill `buf` from `offset` or fail with `UnexpectedEof`
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.read_at(offset, buf)?;
        if n < buf.len() {
            return Err(PakError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("short read at offset {}: {} of {} bytes", offset, n, buf.len()),
            )));
        }
        Ok(())
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.seek(offset)?;
        self.write_all(buf)
    }
}

/// File-backed channel
pub struct FileChannel {
    file: Option<File>,
    path: PathBuf,
    position: u64,
}

impl FileChannel {
    /// Open `path` with the given access
    ///
    /// `create_new` creates (or truncates) the file and requires write access.
    pub fn open<P: AsRef<Path>>(path: P, access: Access, create_new: bool) -> Result<Self> {
        if create_new && !access.can_write() {
            return Err(PakError::AccessDenied {
                required: Access::Write,
            });
        }

        let mut options = OpenOptions::new();
        // Tables are always read on load, whatever the container's access
        options.read(true).write(access.can_write());
        if create_new {
            options.create(true).truncate(true);
        }
        let file = options.open(&path)?;

        Ok(FileChannel {
            file: Some(file),
            path: path.as_ref().to_path_buf(),
            position: 0,
        })
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(PakError::Closed)
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(PakError::Closed)
    }
}

impl IoChannel for FileChannel {
    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        self.file_mut()?.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file()?.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.file_mut()?.set_len(len)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.file_mut()?.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.file_mut()?.write_all(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file_mut()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

/// In-memory channel over a shared buffer
///
/// Clones of the buffer handle see the same bytes, which lets a
/// [`MemoryChannelFactory`] re-open a medium after its container closed.
pub struct MemoryChannel {
    data: Arc<Mutex<Vec<u8>>>,
    position: u64,
    limit: Option<u64>,
    closed: bool,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::from_shared(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::from_shared(Arc::new(Mutex::new(bytes)))
    }

    pub fn from_shared(data: Arc<Mutex<Vec<u8>>>) -> Self {
        MemoryChannel {
            data,
            position: 0,
            limit: None,
            closed: false,
        }
    }

    /// Refuse to grow the medium beyond `limit` bytes
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Shared handle to the underlying bytes
    pub fn shared(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.data)
    }

    /// Copy of the current contents
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(PakError::Closed);
        }
        Ok(())
    }

    fn check_limit(&self, len: u64) -> Result<()> {
        match self.limit {
            Some(limit) if len > limit => Err(PakError::Io(std::io::Error::new(
                ErrorKind::Other,
                format!("medium limit exceeded: {} > {}", len, limit),
            ))),
            _ => Ok(()),
        }
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl IoChannel for MemoryChannel {
    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        self.check_open()?;
        self.position = position;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.data.lock().len() as u64)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.check_open()?;
        self.check_limit(len)?;
        self.data.lock().resize(len as usize, 0);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let data = self.data.lock();
        let start = (self.position as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        drop(data);
        self.position += n as u64;
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.check_open()?;
        let end = self.position + buf.len() as u64;
        self.check_limit(end)?;

        let mut data = self.data.lock();
        if data.len() < end as usize {
            data.resize(end as usize, 0);
        }
        let start = self.position as usize;
        data[start..end as usize].copy_from_slice(buf);
        drop(data);

        self.position = end;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.check_open()
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Produces channels for container paths
pub trait ChannelFactory: Send + Sync {
    /// Open the medium at `path`; `create_new` creates or truncates it
    fn open(&self, path: &Path, access: Access, create_new: bool) -> Result<Box<dyn IoChannel>>;

    /// Delete the medium at `path`
    fn remove(&self, path: &Path) -> Result<()>;
}

/// Factory over the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FsChannelFactory;

impl ChannelFactory for FsChannelFactory {
    fn open(&self, path: &Path, access: Access, create_new: bool) -> Result<Box<dyn IoChannel>> {
        Ok(Box::new(FileChannel::open(path, access, create_new)?))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }
}

/// Factory keeping named media in memory
#[derive(Default, Clone)]
pub struct MemoryChannelFactory {
    media: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<Vec<u8>>>>>>,
    limit: Option<u64>,
}

impl MemoryChannelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every channel opened by this factory refuses to grow past `limit`
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Copy of a medium's bytes
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.media.lock().get(path).map(|data| data.lock().clone())
    }

    /// Replace (or install) a medium's bytes
    pub fn set_contents(&self, path: &Path, bytes: Vec<u8>) {
        let mut media = self.media.lock();
        match media.get(path) {
            Some(data) => *data.lock() = bytes,
            None => {
                media.insert(path.to_path_buf(), Arc::new(Mutex::new(bytes)));
            }
        }
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.media.lock().contains_key(path)
    }
}

impl ChannelFactory for MemoryChannelFactory {
    fn open(&self, path: &Path, access: Access, create_new: bool) -> Result<Box<dyn IoChannel>> {
        let mut media = self.media.lock();
        let data = if create_new {
            if !access.can_write() {
                return Err(PakError::AccessDenied {
                    required: Access::Write,
                });
            }
            let data = Arc::new(Mutex::new(Vec::new()));
            media.insert(path.to_path_buf(), Arc::clone(&data));
            data
        } else {
            media.get(path).cloned().ok_or_else(|| {
                PakError::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("no medium at {}", path.display()),
                ))
            })?
        };

        let channel = MemoryChannel::from_shared(data);
        Ok(Box::new(match self.limit {
            Some(limit) => channel.with_limit(limit),
            None => channel,
        }))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        match self.media.lock().remove(path) {
            Some(_) => Ok(()),
            None => Err(PakError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("no medium at {}", path.display()),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_channel_read_write() {
        let mut channel = MemoryChannel::new();
        channel.write_all_at(4, b"Hello").unwrap();

        assert_eq!(channel.len().unwrap(), 9);
        assert_eq!(channel.position(), 9);

        let mut buf = [0u8; 9];
        channel.read_exact_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"\0\0\0\0Hello");
    }

    #[test]
    fn test_memory_channel_short_read() {
        let mut channel = MemoryChannel::from_bytes(vec![1, 2, 3]);

        let mut buf = [0u8; 8];
        assert_eq!(channel.read_at(1, &mut buf).unwrap(), 2);
        assert!(matches!(
            channel.read_exact_at(1, &mut buf),
            Err(PakError::Io(_))
        ));
    }

    #[test]
    fn test_memory_channel_limit() {
        let mut channel = MemoryChannel::new().with_limit(16);
        channel.set_len(16).unwrap();
        assert!(channel.set_len(17).is_err());
        assert!(channel.write_all_at(12, b"too long").is_err());
        // Failed growth leaves the medium untouched
        assert_eq!(channel.len().unwrap(), 16);
    }

    #[test]
    fn test_memory_channel_closed() {
        let mut channel = MemoryChannel::new();
        channel.close().unwrap();
        assert!(matches!(channel.len(), Err(PakError::Closed)));
        assert!(matches!(channel.write_all(b"x"), Err(PakError::Closed)));
    }

    #[test]
    fn test_file_channel_create_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("medium.pak");

        {
            let mut channel = FileChannel::open(&path, Access::ReadWrite, true).unwrap();
            channel.set_len(8192).unwrap();
            channel.write_all_at(4096, b"cluster").unwrap();
            channel.close().unwrap();
            assert!(matches!(channel.flush(), Err(PakError::Closed)));
        }

        let mut channel = FileChannel::open(&path, Access::Read, false).unwrap();
        assert_eq!(channel.len().unwrap(), 8192);
        let mut buf = [0u8; 7];
        channel.read_exact_at(4096, &mut buf).unwrap();
        assert_eq!(&buf, b"cluster");
    }

    #[test]
    fn test_file_channel_create_requires_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("readonly.pak");

        assert!(matches!(
            FileChannel::open(&path, Access::Read, true),
            Err(PakError::AccessDenied { .. })
        ));
    }

    #[test]
    fn test_memory_factory_reopen_and_remove() {
        let factory = MemoryChannelFactory::new();
        let path = Path::new("mem/a.pak");

        {
            let mut channel = factory.open(path, Access::ReadWrite, true).unwrap();
            channel.write_all_at(0, b"abc").unwrap();
            channel.close().unwrap();
        }

        let mut channel = factory.open(path, Access::Read, false).unwrap();
        let mut buf = [0u8; 3];
        channel.read_exact_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"abc");

        factory.remove(path).unwrap();
        assert!(!factory.exists(path));
        assert!(factory.open(path, Access::Read, false).is_err());
    }
}
