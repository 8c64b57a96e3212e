//! Paged layout shared by the record-based synopses.
//!
//! ```text
//!   page 0                      pages 1..=num_pages
//!   +-----------+---------------+   +--------+--------+-----+--------+
//!   | num_pages | num_elements  |   | record | record | ... | unused |
//!   | i32 @0    | i64 @4        |   +--------+--------+-----+--------+
//!   | checksum u64 @12          |    record = key u64 BE | value f64 BE
//!   +---------------------------+
//! ```
//!
//! Records are key-sorted and never straddle a page; the tail of a page
//! too short for a whole record is left unused. Data pages are written
//! before the metadata page, so a build that fails part way leaves the
//! previous metadata (zeroed after `create`) as the visible state.

use std::iter::Peekable;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::hasher::Hasher;
use crate::storage::{FileHandle, Page};

pub const METADATA_PAGE: u32 = 0;
pub const RECORD_SIZE: usize = 16;

const NUM_PAGES_OFFSET: usize = 0;
const NUM_ELEMENTS_OFFSET: usize = 4;
const CHECKSUM_OFFSET: usize = 12;
const METADATA_SIZE: usize = 20;

/// Contents of the metadata page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynopsisMeta {
    pub num_pages: i32,
    pub num_elements: i64,
    pub checksum: u64,
}

impl SynopsisMeta {
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < METADATA_SIZE {
            return Err(Error::InvalidOperation(format!(
                "page of {} bytes cannot hold synopsis metadata",
                buf.len()
            )));
        }
        BigEndian::write_i32(&mut buf[NUM_PAGES_OFFSET..], self.num_pages);
        BigEndian::write_i64(&mut buf[NUM_ELEMENTS_OFFSET..], self.num_elements);
        BigEndian::write_u64(&mut buf[CHECKSUM_OFFSET..], self.checksum);
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < METADATA_SIZE {
            return Err(Error::InvalidData("truncated metadata page".to_string()));
        }
        let meta = Self {
            num_pages: BigEndian::read_i32(&buf[NUM_PAGES_OFFSET..]),
            num_elements: BigEndian::read_i64(&buf[NUM_ELEMENTS_OFFSET..]),
            checksum: BigEndian::read_u64(&buf[CHECKSUM_OFFSET..]),
        };
        if meta.num_pages < 0 || meta.num_elements < 0 {
            return Err(Error::InvalidData(format!(
                "negative counts in metadata: {:?}",
                meta
            )));
        }
        Ok(meta)
    }

    /// Reads the metadata page. A file without pages reads as empty.
    pub fn read(handle: &FileHandle) -> Result<Self> {
        let store = handle.store();
        if store.num_pages(handle.file_id())? == 0 {
            return Ok(Self::default());
        }
        let page = store.pin(handle.page_id(METADATA_PAGE), false)?;
        let meta = page.read().and_then(|data| Self::decode(&data));
        store.unpin(page)?;
        meta
    }

    pub fn write(&self, handle: &FileHandle) -> Result<()> {
        let store = handle.store();
        let page = store.pin(handle.page_id(METADATA_PAGE), true)?;
        let written = page.write().and_then(|mut guard| {
            guard.fill(0);
            self.encode_into(&mut guard)?;
            guard.release(true);
            Ok(())
        });
        store.unpin(page)?;
        written
    }
}

/// One persisted `(key, value)` pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    pub key: u64,
    pub value: f64,
}

impl Record {
    pub fn new(key: u64, value: f64) -> Self {
        Self { key, value }
    }

    fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        BigEndian::write_u64(&mut buf[..8], self.key);
        BigEndian::write_f64(&mut buf[8..], self.value);
        buf
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            key: BigEndian::read_u64(&buf[..8]),
            value: BigEndian::read_f64(&buf[8..RECORD_SIZE]),
        }
    }
}

pub fn records_per_page(page_size: usize) -> Result<usize> {
    if page_size < METADATA_SIZE.max(RECORD_SIZE) {
        return Err(Error::InvalidOperation(format!(
            "page size {} is too small for synopsis records",
            page_size
        )));
    }
    Ok(page_size / RECORD_SIZE)
}

/// Writes `records` to pages 1.. and commits them with the metadata page.
pub fn write_records<I>(handle: &FileHandle, records: I) -> Result<SynopsisMeta>
where
    I: IntoIterator<Item = Record>,
{
    let store = handle.store();
    let per_page = records_per_page(store.page_size())?;
    let mut records = records.into_iter().peekable();
    let mut hasher = Hasher::new();
    let mut num_pages = 0u32;
    let mut num_elements = 0i64;

    while records.peek().is_some() {
        num_pages += 1;
        let page = store.pin(handle.page_id(num_pages), true)?;
        let filled = fill_page(&page, &mut records, per_page, &mut hasher);
        store.unpin(page)?;
        num_elements += filled? as i64;
    }

    let meta = SynopsisMeta {
        num_pages: num_pages as i32,
        num_elements,
        checksum: hasher.checksum(),
    };
    meta.write(handle)?;
    tracing::debug!(
        file = handle.name(),
        pages = num_pages,
        elements = num_elements,
        "Persisted synopsis records"
    );
    Ok(meta)
}

fn fill_page<I>(
    page: &Page,
    records: &mut Peekable<I>,
    per_page: usize,
    hasher: &mut Hasher,
) -> Result<usize>
where
    I: Iterator<Item = Record>,
{
    let mut guard = page.write()?;
    let mut written = 0;
    while written < per_page {
        let Some(record) = records.next() else {
            break;
        };
        let bytes = record.encode();
        let offset = written * RECORD_SIZE;
        guard[offset..offset + RECORD_SIZE].copy_from_slice(&bytes);
        hasher.write(&bytes);
        written += 1;
    }
    guard.release(true);
    Ok(written)
}

/// Reads back every record, verifying the checksum.
pub fn read_records(handle: &FileHandle) -> Result<Vec<Record>> {
    let store = handle.store();
    let meta = SynopsisMeta::read(handle)?;
    let per_page = records_per_page(store.page_size())?;
    let mut remaining = meta.num_elements as usize;
    let mut records = Vec::with_capacity(remaining.min(meta.num_pages as usize * per_page));
    let mut hasher = Hasher::new();

    for page_no in 1..=meta.num_pages as u32 {
        if remaining == 0 {
            break;
        }
        let page = store.pin(handle.page_id(page_no), false)?;
        let read = page.read().map(|data| {
            let take = remaining.min(per_page);
            for chunk in data.chunks_exact(RECORD_SIZE).take(take) {
                hasher.write(chunk);
                records.push(Record::decode(chunk));
            }
            take
        });
        store.unpin(page)?;
        remaining -= read?;
    }

    if remaining != 0 {
        return Err(Error::InvalidData(format!(
            "metadata of {} claims {} more records than its pages hold",
            handle.name(),
            remaining
        )));
    }
    if hasher.checksum() != meta.checksum {
        tracing::warn!(file = handle.name(), "Synopsis checksum mismatch");
        return Err(Error::ChecksumMismatch);
    }
    tracing::debug!(file = handle.name(), elements = records.len(), "Loaded synopsis records");
    Ok(records)
}
