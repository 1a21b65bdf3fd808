//! Verdict cache with a 24-hour freshness window.
//!
//! Two layers: a `moka` in-process map for hot lookups and the `scan_cache`
//! table for persistence across restarts. Writes go to both. Reads try the
//! hot layer first, then SQLite, and promote what they find.
//!
//! Freshness is judged against an injected [`Clock`], never by moka's own
//! timers, so an entry obtained at `t` is a hit strictly before `t + ttl`
//! and a miss from then on regardless of which layer holds it. Expired rows
//! are deleted lazily on lookup or in bulk by [`ResultCache::purge_expired`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use moka::future::Cache;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use skillscan_api::{SkillIdentifier, Verdict};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// How long a verdict stays fresh, in seconds.
pub const DEFAULT_TTL_SECS: i64 = 24 * 60 * 60;

/// Upper bound on hot entries held in memory.
pub const DEFAULT_CAPACITY: u64 = 10_000;

// ── cache stats ──────────────────────────────────────────────────────

/// Hit/miss counters for the lifetime of one [`ResultCache`].
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_expired(&self) {
        self.expired.fetch_add(1, Ordering::Relaxed);
        self.record_miss();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Misses, including lookups that found only a stale entry.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Lookups that found an entry past its freshness window.
    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Hit rate in `0.0..=1.0`; `0.0` before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} expired={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.expired(),
            self.hit_rate() * 100.0,
        )
    }
}

// ── entries ──────────────────────────────────────────────────────────

/// A verdict and the moment it was obtained from the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub skill_key: String,
    pub source: String,
    pub verdict: Verdict,
    pub obtained_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.obtained_at < ttl
    }
}

/// Row counts of the persisted layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSummary {
    pub entries: u64,
    pub expired: u64,
}

// ── result cache ─────────────────────────────────────────────────────

/// Maps normalized skill identifiers to their most recent verdict.
pub struct ResultCache {
    db: Database,
    hot: Cache<String, Arc<CacheEntry>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    stats: Arc<CacheStats>,
}

impl ResultCache {
    /// Start building a cache over `db`.
    pub fn builder(db: Database) -> ResultCacheBuilder {
        ResultCacheBuilder {
            db,
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
            max_capacity: DEFAULT_CAPACITY,
            clock: Arc::new(SystemClock),
        }
    }

    /// The fresh verdict for `skill`, or `None` on a miss or a stale entry.
    pub async fn lookup(&self, skill: &SkillIdentifier) -> StoreResult<Option<Verdict>> {
        let key = skill.key();
        let now = self.clock.now();

        let entry = match self.hot.get(key).await {
            Some(entry) => Some(entry),
            None => self.load_persisted(key).await?.map(Arc::new),
        };

        let Some(entry) = entry else {
            self.stats.record_miss();
            debug!(skill = key, "cache miss");
            return Ok(None);
        };

        if !entry.is_fresh(now, self.ttl) {
            self.stats.record_expired();
            debug!(skill = key, obtained_at = %entry.obtained_at, "cache entry expired");
            self.evict(key).await?;
            return Ok(None);
        }

        self.hot.insert(key.to_string(), Arc::clone(&entry)).await;
        self.stats.record_hit();
        debug!(skill = key, score = entry.verdict.score, "cache hit");
        Ok(Some(entry.verdict.clone()))
    }

    /// Record `verdict` for `skill`, obtained now. Replaces any prior entry.
    pub async fn store(&self, skill: &SkillIdentifier, verdict: &Verdict) -> StoreResult<()> {
        let entry = CacheEntry {
            skill_key: skill.key().to_string(),
            source: skill.source().to_string(),
            verdict: verdict.clone(),
            obtained_at: self.clock.now(),
        };

        let json = serde_json::to_string(&entry.verdict)?;
        let (key, source, obtained_at) = (
            entry.skill_key.clone(),
            entry.source.clone(),
            entry.obtained_at.timestamp_millis(),
        );
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO scan_cache (skill_key, source, verdict, obtained_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(skill_key) DO UPDATE SET
                        source = excluded.source,
                        verdict = excluded.verdict,
                        obtained_at = excluded.obtained_at",
                    rusqlite::params![key, source, json, obtained_at],
                )?;
                Ok(())
            })
            .await?;

        debug!(skill = %entry.skill_key, score = entry.verdict.score, "verdict cached");
        self.hot.insert(entry.skill_key.clone(), Arc::new(entry)).await;
        Ok(())
    }

    /// Delete every entry past the freshness window. Returns how many rows
    /// were removed.
    pub async fn purge_expired(&self) -> StoreResult<usize> {
        let cutoff = (self.clock.now() - self.ttl).timestamp_millis();
        let removed = self
            .db
            .execute(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM scan_cache WHERE obtained_at <= ?1",
                    [cutoff],
                )?)
            })
            .await?;

        // Stale hot entries would be rejected on lookup anyway; drop them
        // so the counts line up.
        self.hot.invalidate_all();
        info!(removed, "expired verdicts purged");
        Ok(removed)
    }

    /// Drop every entry from both layers.
    pub async fn clear(&self) -> StoreResult<usize> {
        let removed = self
            .db
            .execute(|conn| Ok(conn.execute("DELETE FROM scan_cache", [])?))
            .await?;
        self.hot.invalidate_all();
        info!(removed, "verdict cache cleared");
        Ok(removed)
    }

    /// Persisted row counts, split by freshness.
    pub async fn summary(&self) -> StoreResult<CacheSummary> {
        let cutoff = (self.clock.now() - self.ttl).timestamp_millis();
        self.db
            .execute(move |conn| {
                let (entries, expired): (i64, i64) = conn.query_row(
                    "SELECT count(*), COALESCE(SUM(obtained_at <= ?1), 0) FROM scan_cache",
                    [cutoff],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                Ok(CacheSummary {
                    entries: entries.max(0) as u64,
                    expired: expired.max(0) as u64,
                })
            })
            .await
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn load_persisted(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        let owned_key = key.to_string();
        let row = self
            .db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT source, verdict, obtained_at FROM scan_cache WHERE skill_key = ?1",
                        [&owned_key],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, i64>(2)?,
                            ))
                        },
                    )
                    .optional()?)
            })
            .await?;

        let Some((source, json, millis)) = row else {
            return Ok(None);
        };

        let parsed = serde_json::from_str::<Verdict>(&json)
            .map_err(StoreError::from)
            .and_then(|verdict| {
                let obtained_at =
                    DateTime::from_timestamp_millis(millis).ok_or_else(|| StoreError::Corrupt {
                        entity: "scan_cache",
                        reason: format!("timestamp {millis} out of range"),
                    })?;
                Ok((verdict, obtained_at))
            });

        match parsed {
            Ok((verdict, obtained_at)) => Ok(Some(CacheEntry {
                skill_key: key.to_string(),
                source,
                verdict,
                obtained_at,
            })),
            Err(err) => {
                // Unreadable row: evict and treat as a miss.
                warn!(skill = key, %err, "cached verdict unreadable, evicting");
                self.evict(key).await?;
                Ok(None)
            }
        }
    }

    async fn evict(&self, key: &str) -> StoreResult<()> {
        self.hot.invalidate(key).await;
        let owned_key = key.to_string();
        self.db
            .execute(move |conn| {
                conn.execute("DELETE FROM scan_cache WHERE skill_key = ?1", [&owned_key])?;
                Ok(())
            })
            .await
    }
}

// ── builder ──────────────────────────────────────────────────────────

/// Builder for [`ResultCache`].
pub struct ResultCacheBuilder {
    db: Database,
    ttl: Duration,
    max_capacity: u64,
    clock: Arc<dyn Clock>,
}

impl ResultCacheBuilder {
    /// Freshness window. Defaults to [`DEFAULT_TTL_SECS`].
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Maximum number of hot entries kept in memory.
    pub fn max_capacity(mut self, cap: u64) -> Self {
        self.max_capacity = cap;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> ResultCache {
        let hot = Cache::builder().max_capacity(self.max_capacity).build();

        debug!(
            ttl_secs = self.ttl.num_seconds(),
            max_capacity = self.max_capacity,
            "result cache created"
        );

        ResultCache {
            db: self.db,
            hot,
            clock: self.clock,
            ttl: self.ttl,
            stats: Arc::new(CacheStats::default()),
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
