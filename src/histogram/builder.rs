use std::sync::Arc;

use super::{HistogramBucket, HistogramKind, HistogramSynopsis};
use crate::domain::Domain;
use crate::encoding::keycode::OrdinalValueProvider;
use crate::error::{Error, Result};
use crate::storage::FileHandle;
use crate::tuple::Tuple;

/// Streams sorted positions into equi-height buckets.
///
/// A bucket is closed once it holds `elements_per_bucket` tuples and the
/// position changes, so equal positions never straddle two buckets. The
/// last bucket absorbs the tail once `size` buckets are open.
pub struct HistogramBuilder {
    handle: FileHandle,
    kind: HistogramKind,
    domain: Domain,
    key_field: usize,
    ordinal: Arc<dyn OrdinalValueProvider>,
    antimatter: bool,
    size: usize,
    elements_per_bucket: u64,
    buckets: Vec<HistogramBucket>,
    in_bucket: u64,
    prev_position: Option<i64>,
    tuples: u64,
}

impl HistogramBuilder {
    /// `num_elements` is the expected tuple count the buckets are sized from.
    pub fn new(
        handle: FileHandle,
        kind: HistogramKind,
        domain: Domain,
        key_field: usize,
        size: usize,
        num_elements: u64,
        ordinal: Arc<dyn OrdinalValueProvider>,
    ) -> Self {
        let size = size.max(1);
        Self {
            handle,
            kind,
            domain,
            key_field,
            ordinal,
            antimatter: false,
            size,
            elements_per_bucket: (num_elements / size as u64).max(1),
            buckets: Vec::with_capacity(size.min(1024)),
            in_bucket: 0,
            prev_position: None,
            tuples: 0,
        }
    }

    pub fn set_antimatter(&mut self, aware: bool) {
        self.antimatter = aware;
    }

    pub fn add<T: Tuple + ?Sized>(&mut self, tuple: &T) -> Result<()> {
        let position = self.ordinal.ordinal_value(tuple.field(self.key_field))?;
        let weight = if self.antimatter && tuple.antimatter() == Some(true) {
            -1.0
        } else {
            1.0
        };
        self.add_position(position, weight)
    }

    pub fn add_position(&mut self, position: i64, weight: f64) -> Result<()> {
        if !self.domain.contains(position) {
            return Err(Error::InvalidData(format!(
                "position {} outside domain [{}, {}]",
                position,
                self.domain.start(),
                self.domain.end()
            )));
        }
        if let Some(previous) = self.prev_position {
            if position < previous {
                return Err(Error::OutOfOrderInput {
                    previous,
                    current: position,
                });
            }
        }
        let new_position = self.prev_position != Some(position);
        let full = self.in_bucket >= self.elements_per_bucket && self.buckets.len() < self.size;
        if self.buckets.is_empty() {
            self.buckets.push(HistogramBucket::new(position, 0.0, 0));
        } else if new_position && full {
            if let Some(current) = self.buckets.last_mut() {
                current.border = position - 1;
            }
            self.buckets.push(HistogramBucket::new(position, 0.0, 0));
            self.in_bucket = 0;
        }
        if let Some(current) = self.buckets.last_mut() {
            current.border = position;
            current.count += weight;
            if new_position {
                current.unique += 1;
            }
        }
        self.in_bucket += 1;
        self.prev_position = Some(position);
        self.tuples += 1;
        Ok(())
    }

    pub fn end(mut self) -> Result<HistogramSynopsis> {
        if let Some(last) = self.buckets.last_mut() {
            last.border = self.domain.end();
        }
        let synopsis = HistogramSynopsis::new(self.kind, self.domain, self.size, self.buckets);
        let meta = synopsis.persist(&self.handle)?;
        tracing::info!(
            file = self.handle.name(),
            kind = ?self.kind,
            tuples = self.tuples,
            buckets = synopsis.len(),
            pages = meta.num_pages,
            "Built histogram synopsis"
        );
        Ok(synopsis)
    }

    pub fn abort(self) {
        tracing::warn!(
            file = self.handle.name(),
            tuples = self.tuples,
            "Aborted histogram build"
        );
    }
}
