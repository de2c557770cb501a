/*
 * Owns the primary index and the freelist and keeps them mirrored onto a
 * single index file.
 *
 * File layout:
 *   (key:i64, value:i64) x row_count     - primary index, ascending key
 *   (key:i64, value:i64) x free_count    - freelist, ascending key == address
 *
 * Both spans are in-order BST traversals, so the file is always sorted
 * ascending by key within each span.
 */

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::Path;

use log::debug;

use crate::codec::{read_i64, write_i64};
use crate::error::{log_io_failures, Error, Result};
use crate::tree::Tree;

pub struct IndexStore {
    pub primary: Tree,
    pub freelist: Tree,
    file: File,
}

impl IndexStore {
    // When row_count and free_count are both zero the file is created
    // fresh; otherwise it must already exist and is read back: row_count
    // primary entries followed by free_count freelist entries.
    pub fn open(path: &Path, row_count: i64, free_count: i64) -> Result<IndexStore> {
        log_io_failures(Self::open_impl(path, row_count, free_count))
    }

    fn open_impl(path: &Path, row_count: i64, free_count: i64) -> Result<IndexStore> {
        let is_new_file = row_count == 0 && free_count == 0;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(is_new_file)
            .truncate(is_new_file)
            .open(path)
            .map_err(|source| Error::CannotOpenFile { path: path.display().to_string(), source })?;

        let mut store = IndexStore { primary: Tree::new(), freelist: Tree::new(), file };
        if !is_new_file {
            store.load(row_count, free_count)?;
        }
        debug!(
            "index store opened at {:?} (row_count={}, free_count={}, new_file={})",
            path, row_count, free_count, is_new_file
        );
        Ok(store)
    }

    fn load(&mut self, row_count: i64, free_count: i64) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        for _ in 0..row_count {
            let key = read_i64(&mut self.file)?;
            let value = read_i64(&mut self.file)?;
            self.primary.insert(key, value);
        }
        for _ in 0..free_count {
            let key = read_i64(&mut self.file)?;
            let value = read_i64(&mut self.file)?;
            self.freelist.insert(key, value);
        }
        Ok(())
    }

    // Rewrites the whole index file: primary in-order, then freelist
    // in-order. The combined entry count never decreases across the
    // database's lifetime, so rewinding and overwriting never needs to
    // truncate trailing bytes.
    pub fn write(&mut self) -> Result<()> {
        log_io_failures(self.write_impl())
    }

    fn write_impl(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        for entry in self.primary.in_order() {
            write_i64(&mut self.file, entry.key)?;
            write_i64(&mut self.file, entry.value)?;
        }
        for entry in self.freelist.in_order() {
            write_i64(&mut self.file, entry.key)?;
            write_i64(&mut self.file, entry.value)?;
        }
        self.file.flush()?;
        Ok(())
    }

    // Writes out the current state, then releases the trees and the file
    // handle (the latter happens implicitly as self is dropped).
    pub fn close(mut self) -> Result<()> {
        self.write()?;
        self.primary.clear();
        self.freelist.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_empty_then_write_then_reopen_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx");

        {
            let mut store = IndexStore::open(&path, 0, 0).unwrap();
            store.primary.insert(10, 100);
            store.primary.insert(5, 50);
            store.freelist.insert(200, 200);
            store.write().unwrap();
        }

        let store = IndexStore::open(&path, 2, 1).unwrap();
        assert_eq!(store.primary.len(), 2);
        assert_eq!(store.freelist.len(), 1);
        assert!(store.primary.contains(10));
        assert!(store.primary.contains(5));
        assert!(store.freelist.contains(200));
    }

    #[test]
    fn entries_are_persisted_in_ascending_key_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx");

        let mut store = IndexStore::open(&path, 0, 0).unwrap();
        for key in [5, 3, 8, 1, 4] {
            store.primary.insert(key, key * 10);
        }
        store.write().unwrap();
        drop(store);

        let raw = std::fs::read(&path).unwrap();
        let mut keys = Vec::new();
        for chunk in raw.chunks_exact(16) {
            keys.push(i64::from_le_bytes(chunk[0..8].try_into().unwrap()));
        }
        assert_eq!(keys, vec![1, 3, 4, 5, 8]);
    }

    #[test]
    fn close_flushes_and_empties_the_trees() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx");

        let mut store = IndexStore::open(&path, 0, 0).unwrap();
        store.primary.insert(1, 1);
        store.close().unwrap();

        let reopened = IndexStore::open(&path, 1, 0).unwrap();
        assert!(reopened.primary.contains(1));
    }

    #[test]
    fn opening_a_missing_file_for_a_nonempty_header_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist");
        let err = IndexStore::open(&path, 1, 0).unwrap_err();
        assert!(matches!(err, Error::CannotOpenFile { .. }));
    }
}
