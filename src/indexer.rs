//! The indexing pipeline: per-file tokenization into trigram posting
//! lists, chunk flushes when the in-memory budget is reached, and a final
//! external merge into one `.data` + `.list` pair.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use log::debug;

use crate::error::{Error, Result};
use crate::file_list::FileListWriter;
use crate::format::{IndexEntry, DATA_FILE, ENTRY_SIZE, FILE_LIST, LIST_FILE, TMP_DIR};
use crate::posting::CompressedIds;
use crate::trigram;

/// Counters accumulated over one index build.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    /// Files successfully indexed.
    pub files_indexed: u64,
    /// Content bytes tokenized.
    pub bytes_indexed: u64,
    /// Chunks flushed to disk before the merge.
    pub chunks_written: u64,
    /// Final size of the data and record files.
    pub database_bytes: u64,
}

/// Builds an index under a directory. One instance, one build; not safe
/// for concurrent `index_file` calls.
pub struct Indexer {
    index_dir: PathBuf,
    tmp_dir: PathBuf,
    postings: AHashMap<u32, CompressedIds>,
    seen: AHashMap<String, u32>,
    file_writer: FileListWriter,
    next_file_id: u32,
    bytes_buffered: usize,
    chunks: Vec<u64>,
    next_chunk: u64,
    stats: IndexStats,
}

impl Indexer {
    /// Create the index directory (and its transient chunk directory) and
    /// start an empty build. Any previous index content is replaced.
    pub fn open(index_dir: &Path) -> Result<Self> {
        fs::create_dir_all(index_dir)?;
        let tmp_dir = index_dir.join(TMP_DIR);
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        let file_writer = FileListWriter::create(&index_dir.join(FILE_LIST))?;

        Ok(Indexer {
            index_dir: index_dir.to_path_buf(),
            tmp_dir,
            postings: AHashMap::new(),
            seen: AHashMap::new(),
            file_writer,
            next_file_id: 0,
            bytes_buffered: 0,
            chunks: Vec::new(),
            next_chunk: 0,
            stats: IndexStats::default(),
        })
    }

    /// Tokenize one file into the in-memory posting lists.
    ///
    /// Returns `Ok(false)` for a path already indexed in this build. On an
    /// I/O error every posting touched by the file is rewound, the file
    /// list entry is truncated away and the id sequence is unchanged, so
    /// the caller can skip the file and continue.
    pub fn index_file(&mut self, path: &str) -> Result<bool> {
        if self.seen.contains_key(path) {
            return Ok(false);
        }

        let id = self.next_file_id;
        let list_offset = self.file_writer.append(path)?;
        let mut undo: Vec<(u32, usize, u32)> = Vec::new();

        match self.scan_file(path, id, &mut undo) {
            Ok(bytes) => {
                self.seen.insert(path.to_string(), id);
                self.next_file_id = self
                    .next_file_id
                    .checked_add(1)
                    .expect("file id overflow (exceeded u32::MAX files)");
                self.stats.files_indexed += 1;
                self.stats.bytes_indexed += bytes;
                Ok(true)
            }
            Err(e) => {
                for (t, len, last_id) in undo {
                    let postings = self
                        .postings
                        .get_mut(&t)
                        .expect("undo log refers to a missing posting list");
                    self.bytes_buffered -= postings.len_bytes() - len;
                    postings.truncate_to(len, last_id);
                    if len == 0 {
                        self.postings.remove(&t);
                    }
                }
                self.file_writer.rollback_to(list_offset)?;
                Err(e)
            }
        }
    }

    fn scan_file(&mut self, path: &str, id: u32, undo: &mut Vec<(u32, usize, u32)>) -> Result<u64> {
        let file = File::open(path).map_err(|e| Error::File {
            path: PathBuf::from(path),
            source: e,
        })?;
        let mut reader = BufReader::with_capacity(64 * 1024, file);

        let mut buf = [0u8; 64 * 1024];
        let mut prev = [0u8; 2];
        let mut have = 0usize;
        let mut total = 0u64;

        loop {
            let n = reader.read(&mut buf).map_err(|e| Error::File {
                path: PathBuf::from(path),
                source: e,
            })?;
            if n == 0 {
                break;
            }
            total += n as u64;

            for &b in &buf[..n] {
                if have == 2 {
                    let t = trigram::pack(prev[0], prev[1], b);
                    let postings = self.postings.entry(t).or_default();
                    // One posting per file: skip if this id is already the tail.
                    if postings.is_empty() || postings.last_id() != id {
                        undo.push((t, postings.len_bytes(), postings.last_id()));
                        let before = postings.len_bytes();
                        postings.append(id)?;
                        self.bytes_buffered += postings.len_bytes() - before;
                    }
                    prev[0] = prev[1];
                    prev[1] = b;
                } else {
                    prev[have] = b;
                    have += 1;
                }
            }
        }
        Ok(total)
    }

    /// Encoded posting bytes currently buffered; the flush trigger.
    pub fn buffered_size(&self) -> usize {
        self.bytes_buffered
    }

    /// Number of files indexed so far.
    pub fn file_count(&self) -> u32 {
        self.next_file_id
    }

    /// Build statistics so far.
    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    /// Flush the in-memory posting lists to a new on-disk chunk, sorted by
    /// trigram, and clear the buffer.
    pub fn write_chunk(&mut self) -> Result<()> {
        if self.postings.is_empty() {
            return Ok(());
        }

        let chunk = self.next_chunk;
        self.next_chunk += 1;
        let (data_path, list_path) = self.chunk_paths(chunk);
        write_postings(&self.postings, &data_path, &list_path)?;

        debug!(
            "flushed chunk {chunk}: {} trigrams, {} bytes",
            self.postings.len(),
            self.bytes_buffered
        );

        self.postings.clear();
        self.bytes_buffered = 0;
        self.chunks.push(chunk);
        self.stats.chunks_written += 1;
        Ok(())
    }

    /// Finish the build: merge chunks pairwise into the final pair, patch
    /// the file list count and remove the transient directory.
    pub fn finish(mut self) -> Result<IndexStats> {
        let final_data = self.index_dir.join(DATA_FILE);
        let final_list = self.index_dir.join(LIST_FILE);

        if self.chunks.is_empty() {
            // Everything still fits in memory; skip the merge entirely.
            write_postings(&self.postings, &final_data, &final_list)?;
        } else {
            self.write_chunk()?;
            while self.chunks.len() > 1 {
                let a = self.chunks.remove(0);
                let b = self.chunks.remove(0);
                let out = self.next_chunk;
                self.next_chunk += 1;
                self.merge_chunks(a, b, out)?;
                self.chunks.push(out);
            }
            let last = self.chunks[0];
            let (data_path, list_path) = self.chunk_paths(last);
            fs::rename(data_path, &final_data)?;
            fs::rename(list_path, &final_list)?;
        }

        self.file_writer.finish()?;
        fs::remove_dir_all(&self.tmp_dir)?;

        self.stats.database_bytes =
            fs::metadata(&final_data)?.len() + fs::metadata(&final_list)?.len();
        Ok(self.stats)
    }

    fn chunk_paths(&self, chunk: u64) -> (PathBuf, PathBuf) {
        (
            self.tmp_dir.join(format!("chunk.{chunk}.data")),
            self.tmp_dir.join(format!("chunk.{chunk}.list")),
        )
    }

    /// Two-way merge of chunks `a` and `b` into chunk `out`. Both inputs
    /// are walked in trigram order; a trigram present on both sides gets
    /// its posting lists merged, one present on a single side is copied
    /// verbatim. The inputs are deleted afterwards.
    fn merge_chunks(&self, a: u64, b: u64, out: u64) -> Result<()> {
        let (a_data, a_list) = self.chunk_paths(a);
        let (b_data, b_list) = self.chunk_paths(b);
        let (out_data, out_list) = self.chunk_paths(out);

        let mut left = ChunkCursor::open(&a_data, &a_list)?;
        let mut right = ChunkCursor::open(&b_data, &b_list)?;
        let mut writer = ChunkWriter::create(&out_data, &out_list)?;

        loop {
            match (left.current(), right.current()) {
                (Some(le), Some(re)) => {
                    if le.trigram < re.trigram {
                        writer.copy(&mut left)?;
                    } else if re.trigram < le.trigram {
                        writer.copy(&mut right)?;
                    } else {
                        let lp = left.take_postings()?;
                        let rp = right.take_postings()?;
                        writer.write(le.trigram, &lp.merge(&rp))?;
                    }
                }
                (Some(_), None) => writer.copy(&mut left)?,
                (None, Some(_)) => writer.copy(&mut right)?,
                (None, None) => break,
            }
        }
        writer.finish()?;

        debug!("merged chunks {a} + {b} -> {out}");
        fs::remove_file(a_data)?;
        fs::remove_file(a_list)?;
        fs::remove_file(b_data)?;
        fs::remove_file(b_list)?;
        Ok(())
    }
}

/// Write a posting map as a sorted `.data` + `.list` pair.
fn write_postings(
    postings: &AHashMap<u32, CompressedIds>,
    data_path: &Path,
    list_path: &Path,
) -> Result<()> {
    let mut trigrams: Vec<u32> = postings.keys().copied().collect();
    trigrams.sort_unstable();

    let mut data = BufWriter::new(File::create(data_path)?);
    let mut list = BufWriter::new(File::create(list_path)?);
    let mut offset = 0u64;

    for t in trigrams {
        let ids = &postings[&t];
        data.write_all(ids.as_bytes())?;
        let entry = IndexEntry {
            trigram: t,
            offset,
            size: ids.len_bytes() as u32,
            last_id: ids.last_id(),
        };
        list.write_all(&entry.to_bytes())?;
        offset += ids.len_bytes() as u64;
    }

    data.flush()?;
    list.flush()?;
    Ok(())
}

/// Sequential reader over one chunk's record and data files. Blobs are
/// written in record order, so the data side never seeks.
struct ChunkCursor {
    data: BufReader<File>,
    list: BufReader<File>,
    current: Option<IndexEntry>,
}

impl ChunkCursor {
    fn open(data_path: &Path, list_path: &Path) -> Result<Self> {
        let mut cursor = ChunkCursor {
            data: BufReader::new(File::open(data_path)?),
            list: BufReader::new(File::open(list_path)?),
            current: None,
        };
        cursor.advance()?;
        Ok(cursor)
    }

    fn current(&self) -> Option<IndexEntry> {
        self.current
    }

    fn advance(&mut self) -> Result<()> {
        let mut record = [0u8; ENTRY_SIZE];
        let mut filled = 0;
        while filled < ENTRY_SIZE {
            let n = self.list.read(&mut record[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.current = match filled {
            0 => None,
            ENTRY_SIZE => Some(IndexEntry::from_bytes(&record)),
            _ => {
                return Err(Error::CorruptIndex {
                    reason: "chunk record file truncated mid-entry".to_string(),
                })
            }
        };
        Ok(())
    }

    /// Read the current entry's blob raw and step to the next entry.
    fn take_blob(&mut self) -> Result<(IndexEntry, Vec<u8>)> {
        let entry = self.current.expect("take_blob past end of chunk");
        let mut blob = vec![0u8; entry.size as usize];
        self.data.read_exact(&mut blob)?;
        self.advance()?;
        Ok((entry, blob))
    }

    /// Read and validate the current entry's posting list, stepping past it.
    fn take_postings(&mut self) -> Result<CompressedIds> {
        let (entry, blob) = self.take_blob()?;
        let postings = CompressedIds::from_raw(blob, entry.last_id);
        postings.validate()?;
        Ok(postings)
    }
}

/// Sequential writer for a merged chunk.
struct ChunkWriter {
    data: BufWriter<File>,
    list: BufWriter<File>,
    offset: u64,
}

impl ChunkWriter {
    fn create(data_path: &Path, list_path: &Path) -> Result<Self> {
        Ok(ChunkWriter {
            data: BufWriter::new(File::create(data_path)?),
            list: BufWriter::new(File::create(list_path)?),
            offset: 0,
        })
    }

    fn write(&mut self, trigram: u32, postings: &CompressedIds) -> Result<()> {
        self.write_blob(trigram, postings.as_bytes(), postings.last_id())
    }

    /// Copy the source cursor's current blob without re-encoding.
    fn copy(&mut self, from: &mut ChunkCursor) -> Result<()> {
        let (entry, blob) = from.take_blob()?;
        self.write_blob(entry.trigram, &blob, entry.last_id)
    }

    fn write_blob(&mut self, trigram: u32, blob: &[u8], last_id: u32) -> Result<()> {
        self.data.write_all(blob)?;
        let entry = IndexEntry {
            trigram,
            offset: self.offset,
            size: blob.len() as u32,
            last_id,
        };
        self.list.write_all(&entry.to_bytes())?;
        self.offset += blob.len() as u64;
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.data.flush()?;
        self.list.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> String {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn single_file_postings() {
        let dir = tempdir().unwrap();
        let mut indexer = Indexer::open(&dir.path().join(".idx")).unwrap();
        let path = write_file(dir.path(), "a.txt", b"ABCDE");

        assert!(indexer.index_file(&path).unwrap());
        for window in [b"ABC", b"BCD", b"CDE"] {
            let t = trigram::pack_window(window);
            let ids: Vec<u32> = indexer.postings[&t].iter().collect();
            assert_eq!(ids, vec![0]);
        }
        assert_eq!(indexer.file_count(), 1);
    }

    #[test]
    fn duplicate_trigrams_collapse_per_file() {
        let dir = tempdir().unwrap();
        let mut indexer = Indexer::open(&dir.path().join(".idx")).unwrap();
        let path = write_file(dir.path(), "a.txt", b"aaaaaa");

        indexer.index_file(&path).unwrap();
        let t = trigram::pack_window(b"aaa");
        assert_eq!(indexer.postings[&t].iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn short_file_gets_id_but_no_trigrams() {
        let dir = tempdir().unwrap();
        let mut indexer = Indexer::open(&dir.path().join(".idx")).unwrap();
        let path = write_file(dir.path(), "tiny.txt", b"ab");

        indexer.index_file(&path).unwrap();
        assert_eq!(indexer.file_count(), 1);
        assert!(indexer.postings.is_empty());
        assert_eq!(indexer.buffered_size(), 0);
    }

    #[test]
    fn duplicate_path_skipped() {
        let dir = tempdir().unwrap();
        let mut indexer = Indexer::open(&dir.path().join(".idx")).unwrap();
        let path = write_file(dir.path(), "a.txt", b"ABCDE");

        assert!(indexer.index_file(&path).unwrap());
        assert!(!indexer.index_file(&path).unwrap());
        assert_eq!(indexer.file_count(), 1);
    }

    #[test]
    fn missing_file_rolls_back_id_and_postings() {
        let dir = tempdir().unwrap();
        let mut indexer = Indexer::open(&dir.path().join(".idx")).unwrap();
        let good = write_file(dir.path(), "good.txt", b"ABCDE");
        indexer.index_file(&good).unwrap();

        let bytes_before = indexer.buffered_size();
        let missing = dir.path().join("missing.txt");
        let err = indexer.index_file(missing.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, Error::File { .. }));

        // Id sequence and buffers unchanged.
        assert_eq!(indexer.file_count(), 1);
        assert_eq!(indexer.buffered_size(), bytes_before);

        let next = write_file(dir.path(), "next.txt", b"XBCDE");
        indexer.index_file(&next).unwrap();
        let t = trigram::pack_window(b"BCD");
        assert_eq!(indexer.postings[&t].iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn finish_without_chunks_writes_final_pair() {
        let dir = tempdir().unwrap();
        let index_dir = dir.path().join(".idx");
        let mut indexer = Indexer::open(&index_dir).unwrap();
        let path = write_file(dir.path(), "a.txt", b"ABCDE");
        indexer.index_file(&path).unwrap();

        let stats = indexer.finish().unwrap();
        assert_eq!(stats.files_indexed, 1);
        assert_eq!(stats.chunks_written, 0);
        assert!(index_dir.join(DATA_FILE).is_file());
        assert!(index_dir.join(LIST_FILE).is_file());
        assert!(index_dir.join(FILE_LIST).is_file());
        assert!(!index_dir.join(TMP_DIR).exists());
    }

    #[test]
    fn empty_build_still_produces_an_index() {
        let dir = tempdir().unwrap();
        let index_dir = dir.path().join(".idx");
        let indexer = Indexer::open(&index_dir).unwrap();
        let stats = indexer.finish().unwrap();
        assert_eq!(stats.files_indexed, 0);
        assert!(index_dir.join(DATA_FILE).is_file());
    }

    #[test]
    fn chunked_build_merges_posting_lists() {
        let dir = tempdir().unwrap();
        let index_dir = dir.path().join(".idx");
        let mut indexer = Indexer::open(&index_dir).unwrap();

        // Shared trigram XYZ across all three chunks, plus per-chunk ones.
        for (i, content) in [&b"XYZaaa"[..], &b"XYZbbb"[..], &b"XYZccc"[..]]
            .iter()
            .enumerate()
        {
            let path = write_file(dir.path(), &format!("f{i}.txt"), content);
            indexer.index_file(&path).unwrap();
            indexer.write_chunk().unwrap();
        }

        let stats = indexer.finish().unwrap();
        assert_eq!(stats.chunks_written, 3);

        let mut reader = crate::reader::IndexReader::open(&index_dir).unwrap();
        let shared = trigram::pack_window(b"XYZ");
        assert_eq!(
            reader.get(shared).unwrap().iter().collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        let only_b = trigram::pack_window(b"bbb");
        assert_eq!(
            reader.get(only_b).unwrap().iter().collect::<Vec<_>>(),
            vec![1]
        );
    }
}
