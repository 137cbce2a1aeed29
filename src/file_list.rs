//! File-id table: a dense bijection between paths and 32-bit ids.
//!
//! On disk the table is a `u32` count followed by NUL-terminated paths; the
//! position of a path in the sequence is its id. The writer streams entries
//! during indexing with a placeholder count, patched on finish, so a failed
//! file can be rolled back by truncating to its pre-write offset.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// A fully loaded file-id table. Built once at read time; the path→id map
/// used during indexing is not reconstructed here.
#[derive(Debug, Default)]
pub struct FileList {
    paths: Vec<String>,
}

impl FileList {
    /// Read a complete table from disk.
    pub fn read(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        if data.len() < 4 {
            return Err(Error::CorruptIndex {
                reason: format!("file list {} shorter than its header", path.display()),
            });
        }
        let count = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;

        let mut paths = Vec::with_capacity(count);
        let mut rest = &data[4..];
        for _ in 0..count {
            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| Error::CorruptIndex {
                    reason: format!("file list {} truncated mid-entry", path.display()),
                })?;
            let entry = std::str::from_utf8(&rest[..nul]).map_err(|_| Error::CorruptIndex {
                reason: format!("file list {} holds a non-UTF-8 path", path.display()),
            })?;
            paths.push(entry.to_string());
            rest = &rest[nul + 1..];
        }
        if !rest.is_empty() {
            return Err(Error::CorruptIndex {
                reason: format!("file list {} has trailing bytes", path.display()),
            });
        }
        Ok(FileList { paths })
    }

    /// Path for a file id.
    pub fn get(&self, id: u32) -> Option<&str> {
        self.paths.get(id as usize).map(String::as_str)
    }

    /// Number of entries; ids form the dense prefix `0..len()`.
    pub fn len(&self) -> u32 {
        self.paths.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }
}

/// Streaming writer for the on-disk table.
pub struct FileListWriter {
    file: File,
    count: u32,
    offset: u64,
}

impl FileListWriter {
    /// Create the table file with a placeholder count.
    pub fn create(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&0u32.to_le_bytes())?;
        Ok(FileListWriter {
            file,
            count: 0,
            offset: 4,
        })
    }

    /// Append one path, returning the offset it was written at so the entry
    /// can be rolled back.
    pub fn append(&mut self, path: &str) -> Result<u64> {
        let at = self.offset;
        self.file.write_all(path.as_bytes())?;
        self.file.write_all(&[0])?;
        self.offset += path.len() as u64 + 1;
        self.count += 1;
        Ok(at)
    }

    /// Truncate the table back to the offset returned by `append`, undoing
    /// the most recent entry.
    pub fn rollback_to(&mut self, offset: u64) -> Result<()> {
        self.file.set_len(offset)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        self.count -= 1;
        Ok(())
    }

    /// Number of entries written so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Patch the count header and close the table.
    pub fn finish(mut self) -> Result<u32> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.count.to_le_bytes())?;
        self.file.sync_all()?;
        Ok(self.count)
    }
}
