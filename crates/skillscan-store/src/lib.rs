//! Local state for SkillScan.
//!
//! Everything an agent needs to remember between install requests lives in
//! one SQLite file under the data directory:
//!
//! - [`CredentialStore`] keeps the single API key plus its plan and quota,
//!   and guarantees a registration happens at most once.
//! - [`ResultCache`] keeps the latest verdict per normalized skill for 24
//!   hours, with a `moka` layer in front of the `scan_cache` table.
//!
//! Both sit on a shared [`Database`] handle whose blocking work runs on
//! tokio's blocking pool.

pub mod cache;
pub mod clock;
pub mod credential;
pub mod db;
pub mod error;
pub mod migration;

pub use cache::{CacheEntry, CacheStats, CacheSummary, ResultCache, ResultCacheBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::CredentialStore;
pub use db::{DB_FILE_NAME, Database};
pub use error::{StoreError, StoreResult};
