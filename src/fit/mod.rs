//! Boundary to the external fit engine.
//!
//! The minimizer itself is opaque: it is asked for the fit of one
//! `(shape, region, shift)` key and returns one record per mass point (or a
//! single record without coordinates). Results are kept in a [`FitTable`] that
//! is cached on disk between runs, so a key is only fitted when the table does
//! not have it yet.

use tracing::{debug, info};

use crate::domain::{FitKey, FitRecord, FitTable, ModelConfig};
use crate::error::{ModelError, Result};

/// A synchronous fit engine.
pub trait FitEngine {
    fn fit(&mut self, key: &FitKey) -> Result<Vec<FitRecord>>;
}

impl<F> FitEngine for F
where
    F: FnMut(&FitKey) -> Result<Vec<FitRecord>>,
{
    fn fit(&mut self, key: &FitKey) -> Result<Vec<FitRecord>> {
        self(key)
    }
}

/// Records for `key`, fitting and storing them only when the table lacks them.
pub fn fit_or_load<'t>(
    engine: &mut dyn FitEngine,
    table: &'t mut FitTable,
    key: &FitKey,
) -> Result<&'t [FitRecord]> {
    if table.get(key).is_none() {
        let records = engine.fit(key)?;
        if records.is_empty() {
            return Err(ModelError::data_shape(key.to_string(), "fit returned no records"));
        }
        debug!(key = %key, n = records.len(), "fitted");
        table.insert(key.clone(), records);
    }
    table.records(key)
}

/// Every fit a build of `config` reads: the central fit and the up/down fits of
/// each region shift, for every shape and every mixture.
pub fn plan_fits(config: &ModelConfig) -> Vec<FitKey> {
    let mut keys = Vec::new();
    for region in &config.regions {
        let names = region
            .shapes
            .iter()
            .map(|s| s.name.as_str())
            .chain(region.mixtures.iter().map(|m| m.name.as_str()));
        for name in names {
            keys.push(FitKey::central(name, &region.name));
            for shift in &region.shifts {
                keys.push(FitKey::up(name, &region.name, shift));
                keys.push(FitKey::down(name, &region.name, shift));
            }
        }
    }
    keys
}

/// Keys of `plan` the table has no records for.
pub fn missing_fits(table: &FitTable, plan: &[FitKey]) -> Vec<FitKey> {
    plan.iter().filter(|k| table.get(k).is_none()).cloned().collect()
}

/// Run the engine for every key of `plan` not in the table yet.
///
/// Returns the number of fits performed.
pub fn fill_table(
    engine: &mut dyn FitEngine,
    table: &mut FitTable,
    plan: &[FitKey],
) -> Result<usize> {
    let missing = missing_fits(table, plan);
    for key in &missing {
        fit_or_load(engine, table, key)?;
    }
    info!(fitted = missing.len(), cached = plan.len() - missing.len(), "fit table ready");
    Ok(missing.len())
}
