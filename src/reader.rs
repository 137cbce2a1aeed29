//! Memory-mapped index reader.
//!
//! Opens the three files of an index directory: the data file is mmapped
//! for random access, the record file is loaded whole (entries are small
//! and fixed-size), and the file list is fully decoded. Posting lists are
//! validated on first read and cached per trigram.

use std::fs::File;
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use log::debug;
use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::file_list::FileList;
use crate::format::{IndexEntry, DATA_FILE, ENTRY_SIZE, FILE_LIST, INDEX_DIR, LIST_FILE};
use crate::posting::CompressedIds;

/// Read-only handle on a built index.
pub struct IndexReader {
    /// `None` when the data file is empty, which cannot be mapped.
    data: Option<Mmap>,
    entries: Vec<IndexEntry>,
    files: FileList,
    cache: AHashMap<u32, CompressedIds>,
}

impl IndexReader {
    /// Open an index directory.
    pub fn open(dir: &Path) -> Result<Self> {
        let data_path = dir.join(DATA_FILE);
        let file = File::open(&data_path).map_err(|e| Error::File {
            path: data_path,
            source: e,
        })?;
        let data = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: read-only mapping; the index is not mutated after
            // build.
            Some(unsafe { Mmap::map(&file)? })
        };

        let entries = read_entries(&dir.join(LIST_FILE))?;
        let files = FileList::read(&dir.join(FILE_LIST))?;

        debug!(
            "opened index {}: {} trigrams, {} files, {} data bytes",
            dir.display(),
            entries.len(),
            files.len(),
            data.as_deref().map_or(0, <[u8]>::len)
        );

        Ok(IndexReader {
            data,
            entries,
            files,
            cache: AHashMap::new(),
        })
    }

    /// Posting list for a trigram. Misses return (and cache) an empty list.
    ///
    /// The cache is unbounded on purpose: a query touches at most a few
    /// hundred distinct trigrams. `clear_cache` is the explicit knob for
    /// clients that hold a reader across many queries.
    pub fn get(&mut self, trigram: u32) -> Result<&CompressedIds> {
        if self.cache.contains_key(&trigram) {
            return Ok(&self.cache[&trigram]);
        }

        let postings = match self
            .entries
            .binary_search_by_key(&trigram, |e| e.trigram)
        {
            Ok(at) => self.read_postings(self.entries[at])?,
            Err(_) => CompressedIds::new(),
        };

        Ok(self.cache.entry(trigram).or_insert(postings))
    }

    /// Path for a file id.
    pub fn file(&self, id: u32) -> Option<&str> {
        self.files.get(id)
    }

    /// Number of indexed files; ids form the dense prefix `0..file_count()`.
    pub fn file_count(&self) -> u32 {
        self.files.len()
    }

    /// The full sorted record table.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Drop every cached posting list. Subsequent `get` calls re-read from
    /// the data file.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    fn read_postings(&self, entry: IndexEntry) -> Result<CompressedIds> {
        let data = self.data.as_deref().unwrap_or(&[]);
        let start = entry.offset as usize;
        let end = start + entry.size as usize;
        if end > data.len() {
            return Err(Error::CorruptIndex {
                reason: format!(
                    "posting list for trigram {:#08x} extends past the data file",
                    entry.trigram
                ),
            });
        }
        let postings = CompressedIds::from_raw(data[start..end].to_vec(), entry.last_id);
        postings.validate()?;
        Ok(postings)
    }
}

fn read_entries(path: &Path) -> Result<Vec<IndexEntry>> {
    let data = std::fs::read(path)?;
    if data.len() % ENTRY_SIZE != 0 {
        return Err(Error::CorruptIndex {
            reason: format!(
                "record file {} is not a whole number of entries",
                path.display()
            ),
        });
    }

    let mut entries = Vec::with_capacity(data.len() / ENTRY_SIZE);
    let mut prev: Option<u32> = None;
    for record in data.chunks_exact(ENTRY_SIZE) {
        let entry = IndexEntry::from_bytes(record);
        if let Some(p) = prev {
            if entry.trigram <= p {
                return Err(Error::CorruptIndex {
                    reason: format!("record file {} is not sorted by trigram", path.display()),
                });
            }
        }
        prev = Some(entry.trigram);
        entries.push(entry);
    }
    Ok(entries)
}

/// Find the nearest ancestor of `start` containing an index subdirectory.
pub fn locate_index_dir(start: &Path) -> Result<PathBuf> {
    let mut current = start;
    loop {
        let candidate = current.join(INDEX_DIR);
        if candidate.is_dir() {
            return Ok(candidate);
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return Err(Error::IndexNotFound(start.to_path_buf())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::Indexer;
    use std::fs;
    use tempfile::tempdir;

    fn build_index(dir: &Path, files: &[(&str, &[u8])]) -> PathBuf {
        let index_dir = dir.join(INDEX_DIR);
        let mut indexer = Indexer::open(&index_dir).unwrap();
        for (name, content) in files {
            let path = dir.join(name);
            fs::write(&path, content).unwrap();
            indexer.index_file(path.to_str().unwrap()).unwrap();
        }
        indexer.finish().unwrap();
        index_dir
    }

    #[test]
    fn get_hits_misses_and_caches() {
        let dir = tempdir().unwrap();
        let index_dir = build_index(dir.path(), &[("a.txt", b"ABCDE")]);

        let mut reader = IndexReader::open(&index_dir).unwrap();
        let t = crate::trigram::pack_window(b"BCD");
        assert_eq!(reader.get(t).unwrap().iter().collect::<Vec<_>>(), vec![0]);

        let miss = crate::trigram::pack_window(b"zzz");
        assert!(reader.get(miss).unwrap().is_empty());

        reader.clear_cache();
        assert_eq!(reader.get(t).unwrap().iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn file_lookup_is_dense() {
        let dir = tempdir().unwrap();
        let index_dir = build_index(dir.path(), &[("a.txt", b"AAAA"), ("b.txt", b"BBBB")]);

        let reader = IndexReader::open(&index_dir).unwrap();
        assert_eq!(reader.file_count(), 2);
        assert!(reader.file(0).unwrap().ends_with("a.txt"));
        assert!(reader.file(1).unwrap().ends_with("b.txt"));
        assert_eq!(reader.file(2), None);
    }

    #[test]
    fn locate_walks_ancestors() {
        let dir = tempdir().unwrap();
        let index_dir = dir.path().join(INDEX_DIR);
        fs::create_dir_all(&index_dir).unwrap();
        let nested = dir.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(locate_index_dir(&nested).unwrap(), index_dir);
    }

    #[test]
    fn locate_fails_without_index() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            locate_index_dir(dir.path()),
            Err(Error::IndexNotFound(_))
        ));
    }

    #[test]
    fn unsorted_record_file_rejected() {
        let dir = tempdir().unwrap();
        let index_dir = build_index(dir.path(), &[("a.txt", b"ABCDE")]);

        // Swap the first two records.
        let list_path = index_dir.join(LIST_FILE);
        let mut data = fs::read(&list_path).unwrap();
        assert!(data.len() >= 2 * ENTRY_SIZE);
        let (a, b) = data.split_at_mut(ENTRY_SIZE);
        a.swap_with_slice(&mut b[..ENTRY_SIZE]);
        fs::write(&list_path, &data).unwrap();

        assert!(matches!(
            IndexReader::open(&index_dir),
            Err(Error::CorruptIndex { .. })
        ));
    }
}
