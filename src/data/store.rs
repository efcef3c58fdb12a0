//! SQLite cache of raw observations

use super::{limit_assets, ObservationSource, RawObservation, RawTimestamp};
use crate::error::{SimResult, SimulationError};
use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const SELECT_COLUMNS: &str = "pool_address, timestamp, market_cap, holders_count,
    buy_volume_5s, buy_volume_10s, sell_volume_5s, sell_volume_10s,
    net_volume_5s, net_volume_10s, ma_market_cap_10s, ma_market_cap_30s, ma_market_cap_60s,
    market_cap_change_5s, market_cap_change_10s, market_cap_change_30s, market_cap_change_60s,
    holder_delta_5s, holder_delta_10s, holder_delta_30s, holder_delta_60s,
    price_change_percent, large_buy_5s";

/// Observation store backed by a single SQLite connection
pub struct ObservationStore {
    conn: Arc<Mutex<Connection>>,
    location: String,
}

impl ObservationStore {
    /// Open (or create) a store file and apply the schema
    pub fn open<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(|e| {
            SimulationError::DataSourceUnavailable(format!("{}: {}", path.display(), e))
        })?;
        let store = ObservationStore {
            conn: Arc::new(Mutex::new(conn)),
            location: path.display().to_string(),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Open an existing store; a missing file is a fatal source error
    pub fn open_existing<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        if !path.as_ref().exists() {
            return Err(SimulationError::DataSourceUnavailable(format!(
                "{} does not exist",
                path.as_ref().display()
            )));
        }
        Self::open(path)
    }

    /// Create an in-memory store (for testing)
    pub fn new_in_memory() -> SimResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = ObservationStore {
            conn: Arc::new(Mutex::new(conn)),
            location: ":memory:".to_string(),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn lock(&self) -> SimResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SimulationError::Internal("observation store lock poisoned".to_string()))
    }

    /// Run migrations to set up the schema
    pub fn run_migrations(&self) -> SimResult<()> {
        let conn = self.lock()?;
        let migration_sql = include_str!("migrations/V1__observation_cache.sql");
        conn.execute_batch(migration_sql)?;
        Ok(())
    }

    /// Insert or replace rows, refreshing the per-pool row counts
    pub fn insert_observations(&self, rows: &[RawObservation]) -> SimResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO market_data (
                    pool_address, timestamp, market_cap, holders_count,
                    buy_volume_5s, buy_volume_10s, sell_volume_5s, sell_volume_10s,
                    net_volume_5s, net_volume_10s, ma_market_cap_10s, ma_market_cap_30s, ma_market_cap_60s,
                    market_cap_change_5s, market_cap_change_10s, market_cap_change_30s, market_cap_change_60s,
                    holder_delta_5s, holder_delta_10s, holder_delta_30s, holder_delta_60s,
                    price_change_percent, large_buy_5s
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                          ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            )?;
            for row in rows {
                // rows without a timestamp can't be keyed
                let Some(ts) = row.timestamp.as_ref() else {
                    continue;
                };
                inserted += stmt.execute(params![
                    row.pool_address,
                    ts.to_string(),
                    row.market_cap,
                    row.holders_count,
                    row.buy_volume_5s,
                    row.buy_volume_10s,
                    row.sell_volume_5s,
                    row.sell_volume_10s,
                    row.net_volume_5s,
                    row.net_volume_10s,
                    row.ma_market_cap_10s,
                    row.ma_market_cap_30s,
                    row.ma_market_cap_60s,
                    row.market_cap_change_5s,
                    row.market_cap_change_10s,
                    row.market_cap_change_30s,
                    row.market_cap_change_60s,
                    row.holder_delta_5s,
                    row.holder_delta_10s,
                    row.holder_delta_30s,
                    row.holder_delta_60s,
                    row.price_change_percent,
                    row.large_buy_5s,
                ])?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO pools (pool_address, data_points, imported_at)
             SELECT pool_address, COUNT(*), datetime('now') FROM market_data GROUP BY pool_address",
            [],
        )?;
        tx.commit()?;

        info!("💾 Stored {} observations in {}", inserted, self.location);
        Ok(inserted)
    }

    /// Pool ids with at least `min_points` rows, ascending
    pub fn pool_ids(&self, min_points: usize) -> SimResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT pool_address FROM pools WHERE data_points >= ?1 ORDER BY pool_address",
        )?;
        let ids = stmt
            .query_map(params![min_points as i64], |row| row.get::<_, String>(0))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(ids)
    }

    /// All rows of one pool ordered by timestamp
    pub fn pool_observations(&self, pool_address: &str) -> SimResult<Vec<RawObservation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM market_data WHERE pool_address = ?1 ORDER BY timestamp",
            SELECT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![pool_address], from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// Total row count across pools
    pub fn count(&self) -> SimResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM market_data", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Parse a row selected with [`SELECT_COLUMNS`]
fn from_row(row: &Row) -> SqlResult<RawObservation> {
    Ok(RawObservation {
        pool_address: row.get(0)?,
        timestamp: Some(RawTimestamp::Text(row.get(1)?)),
        market_cap: row.get(2)?,
        holders_count: row.get(3)?,
        buy_volume_5s: row.get(4)?,
        buy_volume_10s: row.get(5)?,
        sell_volume_5s: row.get(6)?,
        sell_volume_10s: row.get(7)?,
        net_volume_5s: row.get(8)?,
        net_volume_10s: row.get(9)?,
        ma_market_cap_10s: row.get(10)?,
        ma_market_cap_30s: row.get(11)?,
        ma_market_cap_60s: row.get(12)?,
        market_cap_change_5s: row.get(13)?,
        market_cap_change_10s: row.get(14)?,
        market_cap_change_30s: row.get(15)?,
        market_cap_change_60s: row.get(16)?,
        holder_delta_5s: row.get(17)?,
        holder_delta_10s: row.get(18)?,
        holder_delta_30s: row.get(19)?,
        holder_delta_60s: row.get(20)?,
        price_change_percent: row.get(21)?,
        large_buy_5s: row.get(22)?,
    })
}

impl ObservationSource for ObservationStore {
    fn fetch(&self, max_assets: Option<usize>) -> SimResult<Vec<RawObservation>> {
        let mut ids = self.pool_ids(1)?;
        if let Some(limit) = max_assets {
            ids.truncate(limit);
        }
        debug!("Fetching {} pools from {}", ids.len(), self.location);

        let mut rows = Vec::new();
        for id in &ids {
            rows.extend(self.pool_observations(id)?);
        }
        Ok(limit_assets(rows, max_assets))
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pool: &str, ms: i64) -> RawObservation {
        RawObservation {
            pool_address: pool.to_string(),
            timestamp: Some(RawTimestamp::Millis(ms)),
            market_cap: Some(1000.0 + ms as f64),
            holders_count: Some(5.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_store_creation() {
        let store = ObservationStore::new_in_memory().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_insert_and_fetch() {
        let store = ObservationStore::new_in_memory().unwrap();
        let rows = vec![sample("b", 1000), sample("a", 2000), sample("a", 1000), sample("c", 1000)];
        assert_eq!(store.insert_observations(&rows).unwrap(), 4);

        assert_eq!(store.pool_ids(1).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.pool_ids(2).unwrap(), vec!["a"]);

        let a = store.pool_observations("a").unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].market_cap, Some(2000.0));
        assert_eq!(a[0].sell_volume_5s, None);

        let limited = store.fetch(Some(2)).unwrap();
        assert_eq!(limited.len(), 3);
        assert!(limited.iter().all(|r| r.pool_address != "c"));
    }

    #[test]
    fn test_replace_on_duplicate_key() {
        let store = ObservationStore::new_in_memory().unwrap();
        store.insert_observations(&[sample("a", 1000)]).unwrap();
        let mut updated = sample("a", 1000);
        updated.market_cap = Some(9.0);
        store.insert_observations(&[updated]).unwrap();

        let rows = store.pool_observations("a").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].market_cap, Some(9.0));
    }

    #[test]
    fn test_open_existing_missing_file_is_unavailable() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = ObservationStore::open_existing(dir.path().join("absent.db"));
        assert!(matches!(result, Err(SimulationError::DataSourceUnavailable(_))));
    }
}
