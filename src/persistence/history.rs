//! Probability history store.
//!
//! SQLite-backed time series of probability observations per signal, used
//! for momentum queries and the stats surface.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS probability_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_id TEXT NOT NULL,
    probability REAL NOT NULL,
    source TEXT NOT NULL,
    market_id TEXT,
    recorded_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_signal_time
    ON probability_history(signal_id, recorded_at DESC);
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbabilityPoint {
    pub probability: f64,
    pub source: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Momentum {
    pub signal_id: String,
    pub current: f64,
    pub previous: f64,
    pub delta: f64,
    pub window_hours: i64,
    pub observations: usize,
}

pub struct SignalHistoryStore {
    conn: Mutex<Connection>,
}

impl SignalHistoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("open history db at {:?}", path.as_ref()))?;
        conn.execute_batch(SCHEMA_SQL).context("apply history schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory history db")?;
        conn.execute_batch(SCHEMA_SQL).context("apply history schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn record(
        &self,
        signal_id: &str,
        probability: f64,
        source: &str,
        market_id: Option<&str>,
        recorded_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO probability_history (signal_id, probability, source, market_id, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                signal_id,
                probability,
                source,
                market_id,
                recorded_at.timestamp()
            ],
        )
        .context("insert probability point")?;
        Ok(())
    }

    /// Probability series for a signal, oldest first.
    pub fn series(&self, signal_id: &str, limit: usize) -> Result<Vec<ProbabilityPoint>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT probability, source, recorded_at
                 FROM probability_history
                 WHERE signal_id = ?1
                 ORDER BY recorded_at DESC
                 LIMIT ?2",
            )
            .context("prepare series query")?;
        let mut points: Vec<ProbabilityPoint> = stmt
            .query_map(params![signal_id, limit as i64], |row| {
                Ok(ProbabilityPoint {
                    probability: row.get(0)?,
                    source: row.get(1)?,
                    recorded_at: DateTime::<Utc>::from_timestamp(row.get::<_, i64>(2)?, 0)
                        .unwrap_or_else(Utc::now),
                })
            })
            .context("query series")?
            .collect::<std::result::Result<_, _>>()
            .context("collect series rows")?;
        points.reverse();
        Ok(points)
    }

    /// Momentum over the given window: newest observation vs the oldest one
    /// inside the window.
    pub fn momentum(&self, signal_id: &str, window_hours: i64) -> Result<Option<Momentum>> {
        let cutoff = (Utc::now() - Duration::hours(window_hours)).timestamp();
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT probability FROM probability_history
                 WHERE signal_id = ?1 AND recorded_at >= ?2
                 ORDER BY recorded_at ASC",
            )
            .context("prepare momentum query")?;
        let probabilities: Vec<f64> = stmt
            .query_map(params![signal_id, cutoff], |row| row.get(0))
            .context("query momentum")?
            .collect::<std::result::Result<_, _>>()
            .context("collect momentum rows")?;

        if probabilities.len() < 2 {
            return Ok(None);
        }
        let previous = probabilities[0];
        let current = *probabilities.last().unwrap();
        Ok(Some(Momentum {
            signal_id: signal_id.to_string(),
            current,
            previous,
            delta: current - previous,
            window_hours,
            observations: probabilities.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_read_series() {
        let store = SignalHistoryStore::open_in_memory().unwrap();
        let t0 = Utc::now() - Duration::hours(2);
        store.record("OMEN-A", 0.40, "polymarket", Some("m1"), t0).unwrap();
        store
            .record("OMEN-A", 0.55, "polymarket", Some("m1"), t0 + Duration::hours(1))
            .unwrap();

        let series = store.series("OMEN-A", 10).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].probability, 0.40);
        assert_eq!(series[1].probability, 0.55);
    }

    #[test]
    fn momentum_needs_two_points() {
        let store = SignalHistoryStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.record("OMEN-A", 0.40, "polymarket", None, now - Duration::hours(3)).unwrap();
        assert!(store.momentum("OMEN-A", 24).unwrap().is_none());

        store.record("OMEN-A", 0.70, "polymarket", None, now).unwrap();
        let m = store.momentum("OMEN-A", 24).unwrap().unwrap();
        assert!((m.delta - 0.30).abs() < 1e-9);
        assert_eq!(m.observations, 2);
    }
}
