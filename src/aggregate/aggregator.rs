//! Shared result collector filled in by worker threads

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::classifier::ClassifiedResult;
use crate::matrix::{Configuration, SweepMatrix};

use super::summary::{ConfigSummary, ModuleResult, RunSummary};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("snapshot requested with {recorded} of {expected} results recorded")]
    Incomplete { recorded: usize, expected: usize },
}

/// One configuration's slots, indexed by module id minus one.
struct ConfigSlot {
    config: Configuration,
    modules: Vec<Option<ModuleResult>>,
}

struct Inner {
    module_count: u32,
    slots: Vec<ConfigSlot>,
    index: HashMap<Configuration, usize>,
    recorded: usize,
    expected: usize,
}

/// Collects classified results for every item in a sweep matrix.
///
/// Slots are pre-seeded in canonical matrix order, so the summary layout is
/// independent of the order workers finish in. `record` is safe to call from
/// any thread.
pub struct Aggregator {
    inner: Mutex<Inner>,
}

impl Aggregator {
    /// Create an aggregator with one empty slot per matrix item.
    pub fn for_matrix(matrix: &SweepMatrix) -> Self {
        let configs = matrix.configurations();
        let mut slots = Vec::with_capacity(configs.len());
        let mut index = HashMap::with_capacity(configs.len());
        for config in configs {
            index.insert(config, slots.len());
            slots.push(ConfigSlot {
                config,
                modules: vec![None; matrix.module_count() as usize],
            });
        }

        Self {
            inner: Mutex::new(Inner {
                module_count: matrix.module_count(),
                slots,
                index,
                recorded: 0,
                expected: matrix.item_count(),
            }),
        }
    }

    /// Record one classified result. Re-recording an item replaces the
    /// previous result without double counting. Items outside the matrix
    /// are ignored.
    pub fn record(&self, result: ClassifiedResult) {
        let mut inner = self.lock();

        let slot_idx = match inner.index.get(&result.item.config) {
            Some(&idx) => idx,
            None => return,
        };
        let module_idx = result.item.module_id as usize;
        if module_idx == 0 || module_idx > inner.module_count as usize {
            return;
        }

        if inner.slots[slot_idx].modules[module_idx - 1].is_none() {
            inner.recorded += 1;
        }
        inner.slots[slot_idx].modules[module_idx - 1] = Some(ModuleResult {
            module_id: result.item.module_id,
            status: result.status,
            duration_ms: result.duration_ms,
            detail: result.detail,
        });
    }

    /// Number of results recorded so far.
    pub fn recorded(&self) -> usize {
        self.lock().recorded
    }

    /// Total number of slots in the matrix.
    pub fn expected(&self) -> usize {
        self.lock().expected
    }

    /// True once every slot holds a result.
    pub fn is_complete(&self) -> bool {
        let inner = self.lock();
        inner.recorded == inner.expected
    }

    /// Produce the run summary. Every slot must hold a result; cancelled
    /// runs record their unresolved items before snapshotting.
    pub fn snapshot(
        &self,
        run_id: &str,
        partial: bool,
        wall_ms: u64,
    ) -> Result<RunSummary, AggregateError> {
        let inner = self.lock();
        if inner.recorded != inner.expected {
            return Err(AggregateError::Incomplete {
                recorded: inner.recorded,
                expected: inner.expected,
            });
        }

        let configs = inner
            .slots
            .iter()
            .map(|slot| {
                let modules = slot.modules.iter().flatten().cloned().collect();
                ConfigSummary::from_modules(slot.config, modules)
            })
            .collect();

        Ok(RunSummary::from_configs(
            run_id.to_string(),
            inner.module_count,
            configs,
            partial,
            wall_ms,
        ))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
