//! Paged bloom filter over one or more key fields.
//!
//! ```text
//!   page 0                          pages 1..=num_pages
//!   +--------------+--------------+   +---------------------------+
//!   | num_pages    | num_hashes   |   | bit array, page_size * 8   |
//!   | i32 @0       | i32 @4       |   | bits per page              |
//!   | num_elements i64 @8         |   +---------------------------+
//!   | num_bits     i64 @16        |
//!   +-----------------------------+
//! ```
//!
//! Keys are hashed with MurmurHash3 x64/128 (seed 0) over the concatenated
//! key field bytes. Probe `i` sets bit `(h0 + i * h1) mod num_bits` with
//! `h0` and `h1` the low and high halves of the hash, in wrapping unsigned
//! arithmetic.

use std::io::Cursor;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use crate::config::BloomConfig;
use crate::error::{Error, Result};
use crate::storage::{FileHandle, Page, PagedStore, SynopsisFile};
use crate::tuple::Tuple;

const METADATA_PAGE: u32 = 0;
const NUM_PAGES_OFFSET: usize = 0;
const NUM_HASHES_OFFSET: usize = 4;
const NUM_ELEMENTS_OFFSET: usize = 8;
const NUM_BITS_OFFSET: usize = 16;
const METADATA_SIZE: usize = 24;
const SEED: u32 = 0;

/// Hash count and expected false positive rate for a bits-per-element budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomSpec {
    pub bits_per_element: u32,
    pub num_hashes: u32,
    pub false_positive_rate: f64,
}

pub struct BloomCalculations;

impl BloomCalculations {
    /// Optimal probe count `bits_per_element * ln 2`, at least one.
    pub fn compute(bits_per_element: u32) -> BloomSpec {
        let num_hashes = ((bits_per_element as f64) * std::f64::consts::LN_2)
            .round()
            .max(1.0) as u32;
        BloomSpec {
            bits_per_element,
            num_hashes,
            false_positive_rate: Self::false_positive_rate(bits_per_element, num_hashes),
        }
    }

    /// `(1 - e^(-k / b))^k`
    pub fn false_positive_rate(bits_per_element: u32, num_hashes: u32) -> f64 {
        if bits_per_element == 0 {
            return 1.0;
        }
        let k = num_hashes as f64;
        (1.0 - (-k / bits_per_element as f64).exp()).powf(k)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct BloomMeta {
    num_pages: i32,
    num_hashes: i32,
    num_elements: i64,
    num_bits: i64,
}

impl BloomMeta {
    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < METADATA_SIZE {
            return Err(Error::InvalidData("truncated bloom filter metadata".to_string()));
        }
        let meta = Self {
            num_pages: BigEndian::read_i32(&buf[NUM_PAGES_OFFSET..]),
            num_hashes: BigEndian::read_i32(&buf[NUM_HASHES_OFFSET..]),
            num_elements: BigEndian::read_i64(&buf[NUM_ELEMENTS_OFFSET..]),
            num_bits: BigEndian::read_i64(&buf[NUM_BITS_OFFSET..]),
        };
        if meta.num_pages < 0 || meta.num_hashes < 0 || meta.num_elements < 0 || meta.num_bits < 0 {
            return Err(Error::InvalidData(format!("corrupt bloom filter metadata: {:?}", meta)));
        }
        if meta.num_pages > 0 && meta.num_bits == 0 {
            return Err(Error::InvalidData("bloom filter pages without bits".to_string()));
        }
        Ok(meta)
    }

    fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < METADATA_SIZE {
            return Err(Error::InvalidOperation(format!(
                "page of {} bytes cannot hold bloom filter metadata",
                buf.len()
            )));
        }
        BigEndian::write_i32(&mut buf[NUM_PAGES_OFFSET..], self.num_pages);
        BigEndian::write_i32(&mut buf[NUM_HASHES_OFFSET..], self.num_hashes);
        BigEndian::write_i64(&mut buf[NUM_ELEMENTS_OFFSET..], self.num_elements);
        BigEndian::write_i64(&mut buf[NUM_BITS_OFFSET..], self.num_bits);
        Ok(())
    }

    fn read(handle: &FileHandle) -> Result<Self> {
        let store = handle.store();
        if store.num_pages(handle.file_id())? == 0 {
            return Ok(Self::default());
        }
        let page = store.pin(handle.page_id(METADATA_PAGE), false)?;
        let meta = page.read().and_then(|data| Self::decode(&data));
        store.unpin(page)?;
        meta
    }
}

/// Location of one probe: data page number, byte and bit inside it.
fn locate(bit: u64, bits_per_page: u64) -> (u32, usize, u8) {
    let in_page = bit % bits_per_page;
    ((bit / bits_per_page) as u32 + 1, (in_page >> 3) as usize, (in_page & 7) as u8)
}

/// Key bytes hashed for `tuple`: the key fields back to back.
fn key_hash<T: Tuple + ?Sized>(tuple: &T, key_fields: &[usize]) -> Result<(u64, u64)> {
    let mut key = Vec::new();
    for &field in key_fields {
        key.extend_from_slice(tuple.field(field));
    }
    let hash = murmur3::murmur3_x64_128(&mut Cursor::new(key), SEED)?;
    Ok((hash as u64, (hash >> 64) as u64))
}

fn probes(hashes: (u64, u64), num_hashes: u32, num_bits: u64) -> impl Iterator<Item = u64> {
    let (h0, h1) = hashes;
    (0..num_hashes as u64).map(move |i| h0.wrapping_add(i.wrapping_mul(h1)) % num_bits)
}

/// A bloom filter persisted in its own file.
pub struct BloomFilter {
    file: SynopsisFile,
    key_fields: Vec<usize>,
    meta: BloomMeta,
}

impl BloomFilter {
    pub fn new(store: Arc<dyn PagedStore>, name: impl Into<String>, key_fields: Vec<usize>) -> Self {
        Self {
            file: SynopsisFile::new(store, name),
            key_fields,
            meta: BloomMeta::default(),
        }
    }

    pub fn create(&mut self) -> Result<()> {
        self.file.create()
    }

    /// Opens the file and loads the filter dimensions.
    pub fn activate(&mut self) -> Result<()> {
        self.file.activate()?;
        match self.file.handle().and_then(|handle| BloomMeta::read(&handle)) {
            Ok(meta) => {
                self.meta = meta;
                tracing::debug!(
                    file = self.file.name(),
                    pages = meta.num_pages,
                    bits = meta.num_bits,
                    "Activated bloom filter"
                );
                Ok(())
            }
            Err(err) => {
                self.file.deactivate()?;
                Err(err)
            }
        }
    }

    pub fn deactivate(&mut self) -> Result<()> {
        self.file.deactivate()
    }

    pub fn destroy(&mut self) -> Result<()> {
        self.file.destroy()
    }

    pub fn is_activated(&self) -> bool {
        self.file.is_activated()
    }

    pub fn num_elements(&self) -> Result<u64> {
        self.require_active()?;
        Ok(self.meta.num_elements as u64)
    }

    pub fn num_bits(&self) -> Result<u64> {
        self.require_active()?;
        Ok(self.meta.num_bits as u64)
    }

    pub fn num_hashes(&self) -> Result<u32> {
        self.require_active()?;
        Ok(self.meta.num_hashes as u32)
    }

    pub fn num_pages(&self) -> Result<u32> {
        self.require_active()?;
        Ok(self.meta.num_pages as u32)
    }

    fn require_active(&self) -> Result<()> {
        self.file.handle().map(|_| ())
    }

    /// Whether the key of `tuple` may have been added. Never false for a
    /// key that was.
    pub fn contains<T: Tuple + ?Sized>(&self, tuple: &T) -> Result<bool> {
        let handle = self.file.handle()?;
        if self.meta.num_pages == 0 {
            return Ok(false);
        }
        let store = handle.store();
        let bits_per_page = store.page_size() as u64 * 8;
        let hashes = key_hash(tuple, &self.key_fields)?;
        for bit in probes(hashes, self.meta.num_hashes as u32, self.meta.num_bits as u64) {
            let (page_no, byte, offset) = locate(bit, bits_per_page);
            let page = store.pin(handle.page_id(page_no), false)?;
            let set = page.read().map(|data| data[byte] & (1 << offset) != 0);
            store.unpin(page)?;
            if !set? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Bulk loader sized for `num_elements` keys. The filter must be
    /// activated. It keeps answering with its previous dimensions until the
    /// builder commits in `end`.
    pub fn create_builder(&mut self, num_elements: u64, config: &BloomConfig) -> Result<BloomFilterBuilder<'_>> {
        let handle = self.file.handle()?;
        let num_hashes = config.effective_hashes();
        let num_bits = num_elements
            .checked_mul(config.bits_per_element as u64)
            .ok_or_else(|| Error::InvalidOperation("bloom filter bit count overflows".to_string()))?;
        let bits_per_page = handle.store().page_size() as u64 * 8;
        let num_pages = num_bits.div_ceil(bits_per_page);
        if num_pages > i32::MAX as u64 {
            return Err(Error::InvalidOperation(format!(
                "cannot create a bloom filter of {} pages",
                num_pages
            )));
        }

        let meta = BloomMeta {
            num_pages: num_pages as i32,
            num_hashes: num_hashes as i32,
            num_elements: num_elements as i64,
            num_bits: num_bits as i64,
        };
        BloomFilterBuilder::new(self, handle, meta)
    }
}

/// Fills confiscated pages, writing them and then the metadata on `end`.
/// Committing publishes the new dimensions to the filter it was created from.
pub struct BloomFilterBuilder<'a> {
    filter: &'a mut BloomFilter,
    handle: FileHandle,
    meta: BloomMeta,
    pages: Vec<Page>,
    added: u64,
}

impl<'a> BloomFilterBuilder<'a> {
    fn new(filter: &'a mut BloomFilter, handle: FileHandle, meta: BloomMeta) -> Result<Self> {
        let store = handle.store();
        let mut pages = Vec::with_capacity(meta.num_pages as usize);
        for page_no in 1..=meta.num_pages as u32 {
            match store.confiscate(handle.page_id(page_no)) {
                Ok(page) => pages.push(page),
                Err(err) => {
                    for page in pages {
                        store.return_page(page);
                    }
                    return Err(err);
                }
            }
        }
        tracing::debug!(
            file = handle.name(),
            pages = meta.num_pages,
            bits = meta.num_bits,
            hashes = meta.num_hashes,
            "Started bloom filter build"
        );
        Ok(Self {
            filter,
            handle,
            meta,
            pages,
            added: 0,
        })
    }

    pub fn add<T: Tuple + ?Sized>(&mut self, tuple: &T) -> Result<()> {
        if self.meta.num_pages == 0 {
            return Err(Error::InvalidState(
                "bloom filter was sized for zero elements".to_string(),
            ));
        }
        let bits_per_page = self.handle.store().page_size() as u64 * 8;
        let hashes = key_hash(tuple, &self.filter.key_fields)?;
        for bit in probes(hashes, self.meta.num_hashes as u32, self.meta.num_bits as u64) {
            let (page_no, byte, offset) = locate(bit, bits_per_page);
            let page = &self.pages[page_no as usize - 1];
            let mut guard = page.write()?;
            guard[byte] |= 1 << offset;
            guard.release(true);
        }
        self.added += 1;
        Ok(())
    }

    pub fn end(mut self) -> Result<()> {
        let store = self.handle.store();
        for page in self.pages {
            store.write_confiscated(page)?;
        }

        let page = store.pin(self.handle.page_id(METADATA_PAGE), true)?;
        let written = page.write().and_then(|mut guard| {
            guard.fill(0);
            self.meta.encode_into(&mut guard)?;
            guard.release(true);
            Ok(())
        });
        store.unpin(page)?;
        written?;
        self.filter.meta = self.meta;

        tracing::info!(
            file = self.handle.name(),
            added = self.added,
            pages = self.meta.num_pages,
            bits = self.meta.num_bits,
            "Built bloom filter"
        );
        Ok(())
    }

    /// Returns the confiscated pages without persisting anything.
    pub fn abort(self) {
        let store = self.handle.store();
        for page in self.pages {
            store.return_page(page);
        }
        tracing::warn!(file = self.handle.name(), added = self.added, "Aborted bloom filter build");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Key;
    use crate::storage::MemoryStore;
    use crate::tuple::KeyTuple;

    fn filter(store: Arc<dyn PagedStore>, key_fields: Vec<usize>) -> BloomFilter {
        let mut filter = BloomFilter::new(store, "bloom", key_fields);
        filter.create().unwrap();
        filter.activate().unwrap();
        filter
    }

    fn build(filter: &mut BloomFilter, keys: &[i32], config: &BloomConfig) {
        let mut builder = filter.create_builder(keys.len() as u64, config).unwrap();
        for &key in keys {
            builder.add(&KeyTuple::from_key(key)).unwrap();
        }
        builder.end().unwrap();
    }

    #[test]
    fn test_no_false_negatives() {
        let keys: Vec<i32> = (0..500).map(|i| i * 7 - 1000).collect();
        for (bits, hashes) in [(1, 1), (4, 2), (10, 7), (16, 11)] {
            let mut filter = filter(Arc::new(MemoryStore::new(64)), vec![0]);
            build(&mut filter, &keys, &BloomConfig::default().bits_per_element(bits).num_hashes(hashes));
            assert_eq!(filter.num_hashes().unwrap(), hashes);
            for &key in &keys {
                assert!(filter.contains(&KeyTuple::from_key(key)).unwrap(), "key {}", key);
            }
        }
    }

    #[test]
    fn test_rejects_most_absent_keys() {
        let keys: Vec<i32> = (0..1000).collect();
        let mut filter = filter(Arc::new(MemoryStore::new(256)), vec![0]);
        build(&mut filter, &keys, &BloomConfig::default());

        let false_positives = (10_000..20_000)
            .filter(|&key: &i32| filter.contains(&KeyTuple::from_key(key)).unwrap())
            .count();
        // about 1% expected at 10 bits per element
        assert!(false_positives < 500, "{} false positives", false_positives);
    }

    #[test]
    fn test_dimensions_survive_reactivation() {
        let store: Arc<dyn PagedStore> = Arc::new(MemoryStore::new(64));
        let mut filter = filter(store.clone(), vec![0]);
        build(&mut filter, &[1, 2, 3], &BloomConfig::default().bits_per_element(300));
        filter.deactivate().unwrap();
        assert!(matches!(filter.num_bits(), Err(Error::NotActivated(_))));

        filter.activate().unwrap();
        assert_eq!(filter.num_elements().unwrap(), 3);
        assert_eq!(filter.num_bits().unwrap(), 900);
        // 512 bits per 64 byte page
        assert_eq!(filter.num_pages().unwrap(), 2);
        assert!(filter.contains(&KeyTuple::from_key(2i32)).unwrap());
    }

    #[test]
    fn test_composite_key() {
        let mut filter = filter(Arc::new(MemoryStore::new(128)), vec![0, 2]);
        let mut builder = filter.create_builder(2, &BloomConfig::default()).unwrap();
        let tuple = |a: i32, b: i32, c: i32| KeyTuple::new(vec![a.encode(), b.encode(), c.encode()]);
        builder.add(&tuple(1, 100, 2)).unwrap();
        builder.add(&tuple(3, 100, 4)).unwrap();
        builder.end().unwrap();

        // the unkeyed middle field does not take part
        assert!(filter.contains(&tuple(1, -5, 2)).unwrap());
        assert!(filter.contains(&tuple(3, 0, 4)).unwrap());
    }

    #[test]
    fn test_empty_filter() {
        let mut filter = filter(Arc::new(MemoryStore::new(64)), vec![0]);
        assert!(!filter.contains(&KeyTuple::from_key(1i32)).unwrap());

        let mut builder = filter.create_builder(0, &BloomConfig::default()).unwrap();
        assert!(matches!(
            builder.add(&KeyTuple::from_key(1i32)),
            Err(Error::InvalidState(_))
        ));
        builder.end().unwrap();
        assert_eq!(filter.num_pages().unwrap(), 0);
        assert!(!filter.contains(&KeyTuple::from_key(1i32)).unwrap());
    }

    #[test]
    fn test_abort_leaves_filter_empty() {
        let mut filter = filter(Arc::new(MemoryStore::new(64)), vec![0]);
        let mut builder = filter.create_builder(10, &BloomConfig::default()).unwrap();
        builder.add(&KeyTuple::from_key(5i32)).unwrap();
        builder.abort();

        assert_eq!(filter.num_pages().unwrap(), 0);
        assert!(!filter.contains(&KeyTuple::from_key(5i32)).unwrap());
    }

    #[test]
    fn test_contains_right_after_end() {
        let mut filter = filter(Arc::new(MemoryStore::new(64)), vec![0]);
        let mut builder = filter.create_builder(3, &BloomConfig::default()).unwrap();
        for key in [1i32, 2, 3] {
            builder.add(&KeyTuple::from_key(key)).unwrap();
        }
        builder.end().unwrap();

        assert_eq!(filter.num_elements().unwrap(), 3);
        for key in [1i32, 2, 3] {
            assert!(filter.contains(&KeyTuple::from_key(key)).unwrap(), "key {}", key);
        }
    }

    #[test]
    fn test_abort_keeps_previous_build() {
        let mut filter = filter(Arc::new(MemoryStore::new(64)), vec![0]);
        build(&mut filter, &[7, 8], &BloomConfig::default());

        let mut builder = filter.create_builder(50, &BloomConfig::default()).unwrap();
        builder.add(&KeyTuple::from_key(9i32)).unwrap();
        builder.abort();

        assert_eq!(filter.num_elements().unwrap(), 2);
        assert!(filter.contains(&KeyTuple::from_key(7i32)).unwrap());
        assert!(filter.contains(&KeyTuple::from_key(8i32)).unwrap());
    }

    #[test]
    fn test_not_activated() {
        let filter = BloomFilter::new(Arc::new(MemoryStore::new(64)), "idle", vec![0]);
        assert!(matches!(
            filter.contains(&KeyTuple::from_key(1i32)),
            Err(Error::NotActivated(_))
        ));
    }

    #[test]
    fn test_calculations() {
        let spec = BloomCalculations::compute(10);
        assert_eq!(spec.num_hashes, 7);
        assert!(spec.false_positive_rate > 0.005 && spec.false_positive_rate < 0.01);
        assert_eq!(BloomCalculations::compute(1).num_hashes, 1);
        assert_eq!(BloomCalculations::false_positive_rate(0, 3), 1.0);
    }
}
