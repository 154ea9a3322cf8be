//! Shared second-chance cache tier backed by SQLite.
//! Lives behind the local tier: consulted only on local miss, written on
//! every store. Any failure here degrades to local-only caching and is
//! never surfaced to the caller.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::CachedTranslation;
use crate::task::TierName;

/// SQLite-backed shared translation cache.
pub struct SharedCache {
    conn: Mutex<Connection>,
    ttl_secs: u64,
}

impl SharedCache {
    /// Open (or create) the shared cache database at the given path.
    /// The busy timeout bounds shared-tier I/O independently of the local
    /// tier's latency.
    pub fn open(db_path: &Path, ttl: Duration, busy_timeout: Duration) -> Result<Self, String> {
        let conn = Connection::open(db_path)
            .map_err(|e| format!("failed to open shared cache: {e}"))?;

        conn.busy_timeout(busy_timeout)
            .map_err(|e| format!("busy_timeout failed: {e}"))?;

        // WAL mode for concurrent readers across processes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| format!("PRAGMA failed: {e}"))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS translation_cache (
                cache_key BLOB PRIMARY KEY,
                translated_text TEXT NOT NULL,
                confidence REAL NOT NULL,
                tier TEXT NOT NULL,
                src_lang TEXT NOT NULL,
                tgt_lang TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cache_created
                ON translation_cache(created_at);",
        )
        .map_err(|e| format!("create table failed: {e}"))?;

        info!(path = %db_path.display(), "shared cache tier opened");

        Ok(Self {
            conn: Mutex::new(conn),
            ttl_secs: ttl.as_secs(),
        })
    }

    /// Look up a cached translation. Returns None if absent, expired, or on
    /// any I/O error (degradation, not failure).
    pub fn get(&self, key: &[u8; 32]) -> Option<CachedTranslation> {
        let conn = self.conn.lock();
        let cutoff = now_unix() - self.ttl_secs as i64;

        let row: Option<(String, f64, String)> = conn
            .query_row(
                "SELECT translated_text, confidence, tier FROM translation_cache
                 WHERE cache_key = ?1 AND created_at > ?2",
                params![key.as_slice(), cutoff],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .unwrap_or_else(|e| {
                debug!(error = %e, "shared cache read failed, treating as miss");
                None
            });

        row.map(|(text, confidence, tier)| CachedTranslation {
            text,
            confidence: confidence as f32,
            tier: parse_tier(&tier),
        })
    }

    /// Insert a translation result. Errors are logged and swallowed.
    pub fn insert(
        &self,
        key: &[u8; 32],
        value: &CachedTranslation,
        src_lang: &str,
        tgt_lang: &str,
    ) {
        let conn = self.conn.lock();
        if let Err(e) = conn.execute(
            "INSERT OR REPLACE INTO translation_cache
             (cache_key, translated_text, confidence, tier, src_lang, tgt_lang, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key.as_slice(),
                value.text,
                value.confidence as f64,
                value.tier.as_str(),
                src_lang,
                tgt_lang,
                now_unix()
            ],
        ) {
            debug!(error = %e, "shared cache insert failed");
        }
    }

    /// Remove expired entries. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let conn = self.conn.lock();
        let cutoff = now_unix() - self.ttl_secs as i64;
        match conn.execute(
            "DELETE FROM translation_cache WHERE created_at <= ?1",
            params![cutoff],
        ) {
            Ok(count) => {
                if count > 0 {
                    info!(removed = count, "shared cache cleanup");
                }
                count
            }
            Err(e) => {
                warn!(error = %e, "shared cache cleanup failed");
                0
            }
        }
    }

    /// Periodic expiry sweep until shutdown.
    pub fn spawn_cleanup_loop(
        cache: std::sync::Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately; skip it.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        cache.cleanup_expired();
                    }
                }
            }
        })
    }
}

fn parse_tier(s: &str) -> TierName {
    match s {
        "premium" => TierName::Premium,
        "medium" => TierName::Medium,
        _ => TierName::Basic,
    }
}

/// Current time as Unix timestamp (seconds).
fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
