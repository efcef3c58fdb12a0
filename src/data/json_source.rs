// JSON file observation source

use super::{limit_assets, ObservationSource, RawObservation};
use crate::error::{SimResult, SimulationError};
use std::fs;
use std::path::{Path, PathBuf};

/// Reads a JSON array of raw observation rows
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read every row, ignoring the asset limit
    pub fn read_all(&self) -> SimResult<Vec<RawObservation>> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            SimulationError::DataSourceUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        let rows: Vec<RawObservation> = serde_json::from_str(&content).map_err(|e| {
            SimulationError::DataSourceUnavailable(format!(
                "{} is not a JSON array of observations: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(rows)
    }
}

impl ObservationSource for JsonFileSource {
    fn fetch(&self, max_assets: Option<usize>) -> SimResult<Vec<RawObservation>> {
        Ok(limit_assets(self.read_all()?, max_assets))
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.json");
        fs::write(
            &path,
            r#"[{"poolAddress": "x", "timestamp": "2024-01-01T00:00:00Z", "marketCap": 10.0},
                {"poolAddress": "y", "timestamp": 5, "marketCap": 11.0}]"#,
        )
        .unwrap();

        let source = JsonFileSource::new(&path);
        assert_eq!(source.fetch(None).unwrap().len(), 2);
        assert_eq!(source.fetch(Some(1)).unwrap().len(), 1);
        assert!(source.describe().starts_with("json:"));
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let source = JsonFileSource::new("/nonexistent/rows.json");
        assert!(matches!(
            source.fetch(None),
            Err(SimulationError::DataSourceUnavailable(_))
        ));
    }
}
