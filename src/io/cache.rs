//! Read/write the fit-result cache.
//!
//! The cache is the JSON form of a [`FitTable`]: every fitted key with its
//! per-mass-point records, plus the tool name and creation timestamp. Reusing
//! it avoids refitting the same grid on every invocation.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::Utc;

use crate::domain::{FitTable, ModelConfig};
use crate::error::Result;

/// Write the table, stamping it with the current time.
pub fn write_fit_table(path: &Path, table: &FitTable) -> Result<()> {
    let file = File::create(path)?;
    let stamped = FitTable {
        created: Utc::now(),
        ..table.clone()
    };
    serde_json::to_writer_pretty(BufWriter::new(file), &stamped)?;
    Ok(())
}

pub fn read_fit_table(path: &Path) -> Result<FitTable> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Read the table at `path`, or start an empty one when the file does not exist.
pub fn load_or_default(path: &Path) -> Result<FitTable> {
    if path.exists() {
        read_fit_table(path)
    } else {
        Ok(FitTable::default())
    }
}

pub fn read_model_config(path: &Path) -> Result<ModelConfig> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::domain::{FitKey, FitRecord};
    use crate::error::ModelError;

    #[test]
    fn cache_survives_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fits.json");

        let mut table = FitTable::default();
        table.insert(
            FitKey::up("sig", "PP", "pileup"),
            vec![FitRecord {
                coords: vec![7.0],
                values: BTreeMap::from([("mean".to_string(), 7.02)]),
                errors: BTreeMap::from([("mean".to_string(), 0.01)]),
                integral: 152.5,
            }],
        );
        write_fit_table(&path, &table).unwrap();

        let back = read_fit_table(&path).unwrap();
        assert_eq!(back.tool, "morph");
        assert_eq!(back.entries, table.entries);
        assert!(back.created >= table.created);
    }

    #[test]
    fn missing_cache_starts_empty_and_bad_json_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.json");
        assert!(load_or_default(&path).unwrap().entries.is_empty());

        std::fs::write(&path, "{ not json").unwrap();
        let err = load_or_default(&path).unwrap_err();
        assert!(matches!(err, ModelError::Json(_)));
        assert_eq!(err.exit_code(), 2);
    }
}
