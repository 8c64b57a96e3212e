//! Streaming sparse wavelet transform.
//!
//! The builder never materialises the coefficient tree. It keeps a stack of
//! dyadic ranges that are already complete, highest level at the bottom,
//! and folds each new position into it:
//!
//! ```text
//!   positions:  p0 ........ p1 ...... p2
//!   stack:     [ level 3 | level 1 | level 0 ]   covers [domain start, p2]
//! ```
//!
//! Two adjacent entries on the same level combine into their parent,
//! emitting the parent's detail coefficient. Gaps between positions are
//! filled with zero-valued ranges, so only the log-many ranges along the
//! right edge of the processed prefix are ever held in memory. Emitted
//! coefficients go through a [`TopKCoefficientSet`].

use std::sync::Arc;

use super::{normalization, CoefficientPool, TopKCoefficientSet, WaveletCoefficient, WaveletSynopsis};
use crate::domain::Domain;
use crate::encoding::keycode::OrdinalValueProvider;
use crate::error::{Error, Result};
use crate::persist::{write_records, Record};
use crate::storage::FileHandle;
use crate::tuple::Tuple;

pub struct SparseWaveletTransformBuilder {
    handle: FileHandle,
    domain: Domain,
    key_field: usize,
    ordinal: Arc<dyn OrdinalValueProvider>,
    antimatter: bool,
    stack: Vec<WaveletCoefficient>,
    prev_position: Option<i64>,
    pool: CoefficientPool,
    output: TopKCoefficientSet,
    tuples: u64,
}

impl SparseWaveletTransformBuilder {
    pub fn new(
        handle: FileHandle,
        domain: Domain,
        key_field: usize,
        threshold: usize,
        ordinal: Arc<dyn OrdinalValueProvider>,
    ) -> Self {
        let mut pool = CoefficientPool::new(domain.max_level());
        let sentinel = pool.allocate(-1);
        Self {
            handle,
            domain,
            key_field,
            ordinal,
            antimatter: false,
            stack: vec![sentinel],
            prev_position: None,
            pool,
            output: TopKCoefficientSet::new(threshold),
            tuples: 0,
        }
    }

    /// Count tuples flagged as antimatter with weight -1.
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

    /// Folds `weight` at `position` into the transform. Positions must be
    /// non-decreasing; repeating the previous one adds to it.
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
        let top = self.pop()?;
        if self.prev_position == Some(position) {
            self.modify_tuple(top, weight);
        } else {
            self.transform_tuple(top, position, weight);
        }
        self.prev_position = Some(position);
        self.tuples += 1;
        Ok(())
    }

    /// Closes every open range, persists the coefficients and returns the
    /// finished synopsis.
    pub fn end(mut self) -> Result<WaveletSynopsis> {
        let mut top = self.pop()?;
        if !top.is_sentinel() {
            if self.prev_position != Some(self.domain.end()) {
                self.transform_tuple(top, self.domain.end(), 0.0);
                top = self.pop()?;
            }
            if !self.stack.is_empty() || top.index() != 1 || top.level() != self.domain.max_level() as i32 {
                return Err(Error::InvalidState(format!(
                    "transform did not close into the root: top ({}, {}), {} ranges left",
                    top.level(),
                    top.index(),
                    self.stack.len()
                )));
            }
            let average = WaveletCoefficient::new(top.value(), top.level(), 0);
            let left = self.output.add(average);
            self.release(left);
        }

        let threshold = self.output.capacity();
        let coefficients = std::mem::replace(&mut self.output, TopKCoefficientSet::new(0)).into_sorted();
        write_records(
            &self.handle,
            coefficients.iter().map(|c| Record::new(c.index(), c.value())),
        )?;

        let (created, recycled) = self.pool.stats();
        tracing::info!(
            file = self.handle.name(),
            tuples = self.tuples,
            coefficients = coefficients.len(),
            created,
            recycled,
            "Built wavelet synopsis"
        );
        Ok(WaveletSynopsis::from_sorted(self.domain, threshold, coefficients))
    }

    /// Drops the build. Nothing has been written before `end`.
    pub fn abort(self) {
        tracing::warn!(
            file = self.handle.name(),
            tuples = self.tuples,
            "Aborted wavelet synopsis build"
        );
    }

    fn pop(&mut self) -> Result<WaveletCoefficient> {
        self.stack
            .pop()
            .ok_or_else(|| Error::InvalidState("transform stack is empty".to_string()))
    }

    fn release(&mut self, left: Option<WaveletCoefficient>) {
        if let Some(coefficient) = left {
            self.pool.deallocate(coefficient.level(), coefficient);
        }
    }

    /// Stores an unnormalised detail of a level-`level` range.
    fn emit(&mut self, index: u64, level: i32, detail: f64) {
        let mut coefficient = self.pool.allocate(level);
        coefficient.index = index;
        coefficient.value = detail / normalization(self.domain.max_level(), level);
        let left = self.output.add(coefficient);
        self.release(left);
    }

    fn move_level_up(&mut self, child: &WaveletCoefficient) -> WaveletCoefficient {
        let mut parent = self.pool.allocate(child.level() + 1);
        parent.value = child.value() / 2.0;
        parent.index = child.parent_index(&self.domain);
        parent
    }

    /// Pushes `coefficient`, merging it with same-level neighbours first.
    fn push_to_stack(&mut self, mut coefficient: WaveletCoefficient) {
        while self
            .stack
            .last()
            .is_some_and(|top| top.level() == coefficient.level())
        {
            let Some(left) = self.stack.pop() else {
                break;
            };
            if left.is_sentinel() {
                self.pool.deallocate(left.level(), left);
                continue;
            }
            let index = left.parent_index(&self.domain);
            let level = left.level() + 1;
            self.emit(index, level, (left.value() - coefficient.value()) / 2.0);

            let mut parent = self.pool.allocate(level);
            parent.index = index;
            parent.value = (left.value() + coefficient.value()) / 2.0;
            self.pool.deallocate(left.level(), left);
            self.pool.deallocate(coefficient.level(), coefficient);
            coefficient = parent;
        }
        if coefficient.is_sentinel() {
            self.pool.deallocate(coefficient.level(), coefficient);
        } else {
            self.stack.push(coefficient);
        }
    }

    fn transform_tuple(&mut self, top: WaveletCoefficient, position: i64, value: f64) {
        let mut top = top;
        let mut next = self.move_level_up(&top);

        // close ranges that end before `position` with an empty right half
        while !top.is_sentinel()
            && !next.covers(position, &self.domain)
            && self.stack.last().map_or(true, |s| s.level() >= next.level())
        {
            self.emit(next.index(), next.level(), next.value());
            let parent = self.move_level_up(&next);
            self.pool.deallocate(top.level(), top);
            top = next;
            next = parent;
        }
        self.pool.deallocate(next.level(), next);

        self.push_to_stack(top);
        let mut transform_position = match self.stack.last() {
            Some(last) => last.transform_position(&self.domain),
            None => self.domain.start(),
        };

        // zero-valued ranges fill the gap up to `position`
        while transform_position != position {
            let mut filler = match self.stack.last() {
                Some(last) => {
                    let (level, index) = (last.level(), last.index().wrapping_add(1));
                    let mut filler = self.pool.allocate(level);
                    filler.index = index;
                    filler
                }
                None => {
                    let mut filler = self.pool.allocate(self.domain.max_level() as i32);
                    filler.index = 1;
                    filler
                }
            };
            self.compute_dyadic_subranges(&mut filler, position);
            transform_position = filler.transform_position(&self.domain);
            self.push_to_stack(filler);
        }

        let mut leaf = self.pool.allocate(0);
        leaf.index = position as u64;
        leaf.value = value;
        self.push_to_stack(leaf);
    }

    /// Descends `filler` to the largest dyadic range that ends before `position`.
    fn compute_dyadic_subranges(&self, filler: &mut WaveletCoefficient, position: i64) {
        let half = 1u64 << (self.domain.max_level() - 1);
        while filler.level() > 0 && filler.covers(position, &self.domain) {
            if filler.level() == 1 {
                filler.index = (filler.index().wrapping_sub(half) << 1)
                    .wrapping_add(self.domain.start() as u64);
            } else {
                filler.index <<= 1;
            }
            filler.level -= 1;
        }
    }

    /// A repeated position: add `weight` to the open range on top of the
    /// stack and to every detail already emitted for ranges whose right
    /// edge is this position.
    fn modify_tuple(&mut self, mut top: WaveletCoefficient, weight: f64) {
        let max_level = self.domain.max_level();
        let mut index = top.index();
        for level in (1..=top.level()).rev() {
            let delta = -weight / 2f64.powi(level) / normalization(max_level, level);
            let left = self.output.append(index, level, delta);
            self.release(left);
            index = (index << 1) | 1;
        }
        top.value += weight / 2f64.powi(top.level());
        self.stack.push(top);
    }
}
