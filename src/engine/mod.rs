/*
 * The database handle: file lifecycle, header bookkeeping, and the CRUD +
 * scan operations exposed to callers.
 */

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::codec::{read_i64, read_u64, write_i64, write_u64};
use crate::error::{log_io_failures, Error, Result};
use crate::index_store::IndexStore;

// data_size (u64) + row_count (i64) + free_count (i64)
pub const HEADER_SIZE: u64 = 24;

#[derive(Debug, Clone, Copy)]
struct Header {
    data_size: u64,
    row_count: i64,
    free_count: i64,
}

// Snapshot of Header handed back to callers by Db::get_info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Info {
    pub data_size: u64,
    pub row_count: i64,
    pub free_count: i64,
}

// One data file, one index file, both owned exclusively for the lifetime
// of the handle. Not safe to share across threads without external
// synchronization.
pub struct Db {
    data_file: File,
    // `Option` so `close` can take the `IndexStore` by value without a
    // partial move out of `self` — not allowed once `Db` implements `Drop`.
    index: Option<IndexStore>,
    header: Header,
    closed: bool,
}

impl Db {
    fn index(&self) -> &IndexStore {
        self.index.as_ref().expect("index store only absent after close()")
    }

    fn index_mut(&mut self) -> &mut IndexStore {
        self.index.as_mut().expect("index store only absent after close()")
    }

    // Truncates any existing file at path. The sibling index file (path
    // with "-index" appended) is created alongside it.
    pub fn create<P: AsRef<Path>>(path: P, data_size: u64) -> Result<Db> {
        log_io_failures(Self::create_impl(path.as_ref(), data_size))
    }

    fn create_impl(path: &Path, data_size: u64) -> Result<Db> {
        let mut data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| Error::CannotOpenFile { path: path.display().to_string(), source })?;

        let index = IndexStore::open(&index_path_for(path), 0, 0)?;

        let header = Header { data_size, row_count: 0, free_count: 0 };
        write_header(&mut data_file, &header)?;
        debug!("created database at {:?} (data_size={})", path, data_size);
        Ok(Db { data_file, index: Some(index), header, closed: false })
    }

    // Reads the header and reconstructs the primary index and freelist
    // from the sibling index file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Db> {
        log_io_failures(Self::open_impl(path.as_ref()))
    }

    fn open_impl(path: &Path) -> Result<Db> {
        let mut data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::CannotOpenFile { path: path.display().to_string(), source })?;

        let header = read_header(&mut data_file)?;
        let index = IndexStore::open(&index_path_for(path), header.row_count, header.free_count)?;
        debug!(
            "opened database at {:?} (data_size={}, row_count={}, free_count={})",
            path, header.data_size, header.row_count, header.free_count
        );
        Ok(Db { data_file, index: Some(index), header, closed: false })
    }

    // Writes the header, closes the index store, and flushes the data
    // file. The handle is consumed; the underlying file descriptors close
    // when it drops at the end of this call.
    pub fn close(mut self) -> Result<()> {
        let result = (|| -> Result<()> {
            write_header(&mut self.data_file, &self.header)?;
            self.index.take().expect("index store only absent after close()").close()?;
            self.data_file.flush()?;
            Ok(())
        })();
        if result.is_ok() {
            self.closed = true;
            debug!("closed database (row_count={}, free_count={})", self.header.row_count, self.header.free_count);
        }
        log_io_failures(result)
    }

    pub fn get_info(&self) -> Info {
        Info {
            data_size: self.header.data_size,
            row_count: self.header.row_count,
            free_count: self.header.free_count,
        }
    }

    // buf must be exactly data_size bytes; enforcing that is on the caller.
    pub fn select(&mut self, key: i64, buf: &mut [u8]) -> Result<()> {
        log_io_failures(self.select_impl(key, buf))
    }

    fn select_impl(&mut self, key: i64, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len() as u64, self.header.data_size, "buffer must be exactly data_size bytes");
        let entry = self.index().primary.search(key).ok_or(Error::RowNotFound)?;
        self.data_file.seek(SeekFrom::Start(entry.value as u64))?;
        self.data_file.read_exact(buf)?;
        Ok(())
    }

    // Invokes callback(key, row_bytes) once per row, ascending by key,
    // reusing a single scratch buffer.
    pub fn select_all<F: FnMut(i64, &[u8])>(&mut self, callback: F) -> Result<()> {
        log_io_failures(self.select_all_impl(callback))
    }

    fn select_all_impl<F: FnMut(i64, &[u8])>(&mut self, mut callback: F) -> Result<()> {
        let mut scratch = vec![0u8; self.header.data_size as usize];
        for entry in self.index().primary.in_order() {
            self.data_file.seek(SeekFrom::Start(entry.value as u64))?;
            self.data_file.read_exact(&mut scratch)?;
            callback(entry.key, &scratch);
        }
        Ok(())
    }

    // Destination address is the minimum freelist entry if the freelist is
    // non-empty (freed slots reused in ascending order), otherwise the next
    // address past the current end of the data file.
    pub fn insert(&mut self, key: i64, data: &[u8]) -> Result<()> {
        log_io_failures(self.insert_impl(key, data))
    }

    fn insert_impl(&mut self, key: i64, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len() as u64, self.header.data_size, "row must be exactly data_size bytes");
        if self.index().primary.contains(key) {
            return Err(Error::DuplicatedKeyViolation);
        }

        let address = match self.index_mut().freelist.remove_min() {
            Some(entry) => {
                self.header.free_count -= 1;
                entry.value
            }
            None => HEADER_SIZE as i64 + self.header.data_size as i64 * self.header.row_count,
        };

        self.data_file.seek(SeekFrom::Start(address as u64))?;
        self.data_file.write_all(data)?;
        self.data_file.flush()?;

        self.header.row_count += 1;
        self.index_mut().primary.insert(key, address);

        write_header(&mut self.data_file, &self.header)?;
        self.index_mut().write()?;
        Ok(())
    }

    // Overwrites the row in place. row_count/free_count untouched, so the
    // index file is not rewritten.
    pub fn update(&mut self, key: i64, data: &[u8]) -> Result<()> {
        log_io_failures(self.update_impl(key, data))
    }

    fn update_impl(&mut self, key: i64, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len() as u64, self.header.data_size, "row must be exactly data_size bytes");
        let entry = self.index().primary.search(key).ok_or(Error::RowNotFound)?;
        self.data_file.seek(SeekFrom::Start(entry.value as u64))?;
        self.data_file.write_all(data)?;
        self.data_file.flush()?;
        Ok(())
    }

    // Returns the row's address to the freelist. A missing key is
    // tolerated and reported as Ok(()), idempotent-delete.
    pub fn delete(&mut self, key: i64) -> Result<()> {
        log_io_failures(self.delete_impl(key))
    }

    fn delete_impl(&mut self, key: i64) -> Result<()> {
        if self.header.row_count == 0 {
            return Ok(());
        }

        let address = match self.index_mut().primary.remove(key) {
            Some(address) => address,
            None => {
                warn!("delete: key {} has no row", key);
                return Ok(());
            }
        };

        self.header.row_count -= 1;
        self.index_mut().freelist.insert(address, address);
        self.header.free_count += 1;

        write_header(&mut self.data_file, &self.header)?;
        self.index_mut().write()?;
        Ok(())
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if !self.closed {
            warn!("database handle dropped without calling close(); pending state was not flushed");
        }
    }
}

fn write_header(file: &mut File, header: &Header) -> Result<()> {
    file.seek(SeekFrom::Start(0))?;
    write_u64(file, header.data_size)?;
    write_i64(file, header.row_count)?;
    write_i64(file, header.free_count)?;
    file.flush()?;
    Ok(())
}

fn read_header(file: &mut File) -> Result<Header> {
    file.seek(SeekFrom::Start(0))?;
    let data_size = read_u64(file)?;
    let row_count = read_i64(file)?;
    let free_count = read_i64(file)?;
    Ok(Header { data_size, row_count, free_count })
}

// Appends "-index" to path's file name, e.g. db -> db-index.
fn index_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push("-index");
    PathBuf::from(name)
}
