//! Single-file key-value store
//!
//! File format:
//! ```text
//! [HEADER: 64 bytes]
//!   - magic: 8 bytes ("KEYTRIE\0")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes
//!   - entry_count: 8 bytes (u64 LE)
//!   - index_offset: 8 bytes (u64 LE)
//!   - reserved: 32 bytes
//!
//! [RECORDS: variable]
//!   - zstd-compressed values, appended; a rewrite appends a new record
//!
//! [INDEX: variable]
//!   - (key_len u32, key, offset u64, size u32) per live key
//! ```

use super::Storage;
use crate::{Error, Result, MAGIC, VERSION};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const HEADER_SIZE: u64 = 64;
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Clone, Copy, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
}

fn le_u32(buf: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[..4]);
    u32::from_le_bytes(bytes)
}

fn le_u64(buf: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    u64::from_le_bytes(bytes)
}

/// A key-value store backed by a single file
pub struct FileStore {
    path: PathBuf,
    file: RwLock<File>,
    index: RwLock<HashMap<Vec<u8>, IndexEntry>>,
    /// Where the next record goes
    write_offset: RwLock<u64>,
}

impl FileStore {
    /// Create a new store file, truncating any existing one
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        Ok(FileStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(HashMap::new()),
            write_offset: RwLock::new(HEADER_SIZE),
        })
    }

    /// Open an existing store file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..8] != MAGIC {
            return Err(Error::InvalidFile("Invalid magic bytes".into()));
        }
        let version = le_u32(&header[8..12]);
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }

        let entry_count = le_u64(&header[16..24]);
        let index_offset = le_u64(&header[24..32]);

        let mut index = HashMap::new();
        if index_offset > 0 && entry_count > 0 {
            file.seek(SeekFrom::Start(index_offset))?;
            for _ in 0..entry_count {
                let mut len_buf = [0u8; 4];
                file.read_exact(&mut len_buf)?;
                let mut key = vec![0u8; u32::from_le_bytes(len_buf) as usize];
                file.read_exact(&mut key)?;

                let mut entry_buf = [0u8; 12];
                file.read_exact(&mut entry_buf)?;
                let entry = IndexEntry {
                    offset: le_u64(&entry_buf[0..8]),
                    size: le_u32(&entry_buf[8..12]),
                };
                index.insert(key, entry);
            }
        }

        // Records written after the last sync are not indexed and are lost
        let write_offset = if index_offset > 0 {
            index_offset
        } else {
            file.seek(SeekFrom::End(0))?
        };
        debug!(path = %path.display(), entries = index.len(), "opened store");

        Ok(FileStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(index),
            write_offset: RwLock::new(write_offset),
        })
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the index and header and flush to disk
    pub fn sync(&self) -> Result<()> {
        let index = self.index.read();
        let write_offset = *self.write_offset.read();
        let mut file = self.file.write();

        file.seek(SeekFrom::Start(16))?;
        file.write_all(&(index.len() as u64).to_le_bytes())?;
        file.write_all(&write_offset.to_le_bytes())?;

        file.seek(SeekFrom::Start(write_offset))?;
        let mut entries: Vec<_> = index.iter().collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (key, entry) in entries {
            file.write_all(&(key.len() as u32).to_le_bytes())?;
            file.write_all(key)?;
            file.write_all(&entry.offset.to_le_bytes())?;
            file.write_all(&entry.size.to_le_bytes())?;
        }

        file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.index.read().get(key).copied() else {
            return Ok(None);
        };

        let mut data = vec![0u8; entry.size as usize];
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut data)?;
        }
        let value = zstd::decode_all(data.as_slice())
            .map_err(|e| Error::Corruption(format!("Undecodable record at {}: {}", entry.offset, e)))?;
        Ok(Some(value))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let compressed = zstd::encode_all(value, COMPRESSION_LEVEL)?;
        let size = compressed.len() as u32;

        let offset = {
            let mut write_offset = self.write_offset.write();
            let offset = *write_offset;

            let mut file = self.file.write();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&compressed)?;

            *write_offset = offset + size as u64;
            offset
        };

        self.index
            .write()
            .insert(key.to_vec(), IndexEntry { offset, size });
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            warn!(path = %self.path.display(), error = %e, "sync on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("values.keytrie");

        {
            let store = FileStore::create(&path).unwrap();
            assert!(store.is_empty());
        }
        {
            let store = FileStore::open(&path).unwrap();
            assert!(store.is_empty());
        }
    }

    #[test]
    fn test_put_get_overwrite() {
        let dir = tempdir().unwrap();
        let store = FileStore::create(dir.path().join("values.keytrie")).unwrap();

        store.put(b"aliceMK", b"first").unwrap();
        store.put(b"aliceMK", b"second").unwrap();
        assert_eq!(store.get(b"aliceMK").unwrap().unwrap(), b"second");
        assert!(store.get(b"bobMK").unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("values.keytrie");

        {
            let store = FileStore::create(&path).unwrap();
            store.put(b"alicePK", b"key-1").unwrap();
            store.put(b"bobPK", b"key-2").unwrap();
            store.sync().unwrap();
        }
        {
            let store = FileStore::open(&path).unwrap();
            assert_eq!(store.get(b"alicePK").unwrap().unwrap(), b"key-1");
            assert_eq!(store.get(b"bobPK").unwrap().unwrap(), b"key-2");
            store.put(b"carolPK", b"key-3").unwrap();
        }
        {
            // Dropping syncs
            let store = FileStore::open(&path).unwrap();
            assert_eq!(store.len(), 3);
        }
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("other.bin");
        std::fs::write(&path, [7u8; 64]).unwrap();
        assert!(matches!(FileStore::open(&path), Err(Error::InvalidFile(_))));
    }
}
