//! Selectivity estimation over the components of one LSM index.

use std::sync::Mutex;

use crate::config::StatisticsConfig;
use crate::error::{Error, Result};
use crate::persist::SynopsisMeta;
use crate::storage::SynopsisFile;
use crate::synopsis::Synopsis;

/// Synopses of the live components of an index, newest first.
///
/// Mergeable kinds are answered from one merged synopsis, built lazily and
/// dropped whenever the component set changes. Histograms cannot be merged
/// and are answered by summing the per-component estimates.
pub struct ComponentStatistics {
    config: StatisticsConfig,
    components: Vec<(String, Synopsis)>,
    merged: Mutex<Option<Synopsis>>,
}

impl ComponentStatistics {
    pub fn new(config: StatisticsConfig) -> Self {
        Self {
            config,
            components: Vec::new(),
            merged: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &StatisticsConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|(name, _)| name.as_str())
    }

    /// Registers the synopsis of a freshly flushed or merged component.
    pub fn add_component(&mut self, name: impl Into<String>, synopsis: Synopsis) -> Result<()> {
        let name = name.into();
        if synopsis.kind() != self.config.kind {
            return Err(Error::InvalidOperation(format!(
                "component {} carries a {} synopsis, expected {}",
                name,
                synopsis.kind(),
                self.config.kind
            )));
        }
        if let Some((_, first)) = self.components.first() {
            if first.domain() != synopsis.domain() {
                return Err(Error::InvalidOperation(format!(
                    "component {} has a different key domain",
                    name
                )));
            }
        }
        if self.components.iter().any(|(existing, _)| *existing == name) {
            return Err(Error::InvalidOperation(format!(
                "component {} is already registered",
                name
            )));
        }
        self.components.insert(0, (name, synopsis));
        self.invalidate();
        Ok(())
    }

    /// Forgets a component, typically once a merge has replaced it.
    pub fn remove_component(&mut self, name: &str) -> Option<Synopsis> {
        let position = self.components.iter().position(|(n, _)| n == name)?;
        self.invalidate();
        Some(self.components.remove(position).1)
    }

    fn invalidate(&mut self) {
        if let Ok(merged) = self.merged.get_mut() {
            *merged = None;
        }
    }

    /// Chains pairwise merges over every component. `None` when there are
    /// no components.
    pub fn merge_all(&self) -> Result<Option<Synopsis>> {
        let mut synopses = self.components.iter().map(|(_, s)| s);
        let Some(first) = synopses.next() else {
            return Ok(None);
        };
        let mut merged = first.clone();
        for synopsis in synopses {
            merged = merged.merge(synopsis)?;
        }
        Ok(Some(merged))
    }

    /// Merges every component and persists the result into the activated
    /// `file`, for the component replacing them.
    pub fn persist_merged(&self, file: &SynopsisFile) -> Result<Option<SynopsisMeta>> {
        let handle = file.handle()?;
        let Some(merged) = self.merge_all()? else {
            return Ok(None);
        };
        let meta = merged.persist(&handle)?;
        tracing::info!(
            file = file.name(),
            components = self.components.len(),
            elements = meta.num_elements,
            "Persisted merged synopsis"
        );
        Ok(Some(meta))
    }

    pub fn estimate_point(&self, position: i64) -> Result<f64> {
        self.estimate(|synopsis| synopsis.point_query(position))
    }

    pub fn estimate_range(&self, start: i64, end: i64) -> Result<f64> {
        self.estimate(|synopsis| synopsis.range_query(start, end))
    }

    fn estimate(&self, query: impl Fn(&Synopsis) -> f64) -> Result<f64> {
        if !matches!(self.components.first(), Some((_, Synopsis::Wavelet(_)))) {
            return Ok(self.components.iter().map(|(_, s)| query(s)).sum());
        }
        let mut merged = self.merged.lock()?;
        if merged.is_none() {
            *merged = self.merge_all()?;
            tracing::debug!(components = self.components.len(), "Merged component synopses");
        }
        Ok(merged.as_ref().map(&query).unwrap_or(0.0))
    }
}
