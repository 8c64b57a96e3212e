use super::WaveletCoefficient;

/// Cap on recycled coefficients kept per level.
const MAX_FREE_PER_LEVEL: usize = 64;

/// Per-level free lists of coefficient records.
///
/// The transform retires and creates O(log domain) coefficients per tuple.
/// Retired records go back to the list of their level and are handed out
/// again instead of building new ones. Levels `-1..=max_level` are
/// registered up front, slot `level + 1`.
#[derive(Debug)]
pub struct CoefficientPool {
    free: Vec<Vec<WaveletCoefficient>>,
    created: usize,
    recycled: usize,
}

impl CoefficientPool {
    pub fn new(max_level: u32) -> Self {
        Self {
            free: (0..max_level as usize + 2).map(|_| Vec::new()).collect(),
            created: 0,
            recycled: 0,
        }
    }

    fn slot(level: i32) -> Option<usize> {
        usize::try_from(level + 1).ok()
    }

    /// A coefficient at `level` with value 0 and the sentinel index.
    pub fn allocate(&mut self, level: i32) -> WaveletCoefficient {
        let reused = Self::slot(level)
            .and_then(|slot| self.free.get_mut(slot))
            .and_then(Vec::pop);
        match reused {
            Some(mut coefficient) => {
                self.recycled += 1;
                coefficient.reset(level);
                coefficient
            }
            None => {
                self.created += 1;
                let mut coefficient = WaveletCoefficient::sentinel();
                coefficient.reset(level);
                coefficient
            }
        }
    }

    pub fn deallocate(&mut self, level: i32, coefficient: WaveletCoefficient) {
        if let Some(list) = Self::slot(level).and_then(|slot| self.free.get_mut(slot)) {
            if list.len() < MAX_FREE_PER_LEVEL {
                list.push(coefficient);
            }
        }
    }

    /// (created, recycled)
    pub fn stats(&self) -> (usize, usize) {
        (self.created, self.recycled)
    }
}
