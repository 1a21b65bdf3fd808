//! Credential store: the single API key shared by every install request.
//!
//! The current [`Credential`] lives in memory as an `Arc` behind a
//! `tokio::sync::RwLock` and is written through to the `credential` table.
//! Readers clone the `Arc`; writers build a new value and swap it in, so a
//! reader never observes a half-updated plan.
//!
//! Registration is serialized by a separate mutex. Two requests that both
//! find the store empty will register once: the second waits on the lock,
//! re-checks, and reuses what the first stored.

use std::future::Future;
use std::sync::Arc;

use rusqlite::OptionalExtension;
use skillscan_api::{Credential, Plan, Quota};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Shared, persisted holder of the agent credential.
pub struct CredentialStore {
    db: Database,
    current: RwLock<Option<Arc<Credential>>>,
    registration: Mutex<()>,
}

impl CredentialStore {
    /// Load whatever credential is persisted in `db`.
    pub async fn load(db: Database) -> StoreResult<Self> {
        let persisted = db.execute(read_row).await?;
        if let Some(cred) = &persisted {
            info!(plan = %cred.plan, scans_remaining = %cred.scans_remaining, "credential loaded");
        } else {
            debug!("no persisted credential");
        }

        Ok(Self {
            db,
            current: RwLock::new(persisted.map(Arc::new)),
            registration: Mutex::new(()),
        })
    }

    /// The current credential, if any.
    pub async fn get(&self) -> Option<Arc<Credential>> {
        self.current.read().await.clone()
    }

    /// Replace the stored credential.
    #[instrument(skip_all, fields(plan = %credential.plan))]
    pub async fn put(&self, credential: Credential) -> StoreResult<Arc<Credential>> {
        let mut slot = self.current.write().await;
        let credential = Arc::new(credential);
        self.persist(&credential).await?;
        *slot = Some(Arc::clone(&credential));
        debug!("credential stored");
        Ok(credential)
    }

    /// Record a plan change. The stored allowance is kept when
    /// `scans_remaining` is `None`. No-op (returns `None`) when nothing is
    /// stored.
    #[instrument(skip(self))]
    pub async fn update_plan(
        &self,
        plan: Plan,
        scans_remaining: Option<Quota>,
    ) -> StoreResult<Option<Arc<Credential>>> {
        self.modify(|cred| {
            cred.plan = plan;
            if let Some(quota) = scans_remaining {
                cred.scans_remaining = quota;
            }
        })
        .await
    }

    /// Record a new allowance reported alongside a scan.
    #[instrument(skip(self))]
    pub async fn update_quota(
        &self,
        scans_remaining: Quota,
    ) -> StoreResult<Option<Arc<Credential>>> {
        self.modify(|cred| cred.scans_remaining = scans_remaining).await
    }

    /// Return the stored credential, registering exactly once if there is
    /// none.
    ///
    /// `register` runs while the registration lock is held. Concurrent
    /// callers queue on that lock and pick up the freshly stored credential
    /// instead of issuing their own registration.
    pub async fn get_or_register<F, Fut, E>(&self, register: F) -> Result<Arc<Credential>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Credential, E>>,
        E: From<StoreError>,
    {
        if let Some(cred) = self.get().await {
            return Ok(cred);
        }

        let _registering = self.registration.lock().await;
        if let Some(cred) = self.get().await {
            debug!("reusing credential registered by a concurrent request");
            return Ok(cred);
        }

        let fresh = register().await?;
        let stored = self.put(fresh).await?;
        info!(plan = %stored.plan, key = %stored.masked_key(), "new credential registered");
        Ok(stored)
    }

    async fn modify<F>(&self, change: F) -> StoreResult<Option<Arc<Credential>>>
    where
        F: FnOnce(&mut Credential),
    {
        let mut slot = self.current.write().await;
        let Some(existing) = slot.as_ref() else {
            debug!("no credential to update");
            return Ok(None);
        };

        let mut next = Credential::clone(existing);
        change(&mut next);
        if next == **existing {
            return Ok(Some(Arc::clone(existing)));
        }

        let next = Arc::new(next);
        self.persist(&next).await?;
        *slot = Some(Arc::clone(&next));
        debug!(plan = %next.plan, scans_remaining = %next.scans_remaining, "credential updated");
        Ok(Some(next))
    }

    async fn persist(&self, credential: &Credential) -> StoreResult<()> {
        let api_key = credential.api_key.clone();
        let plan = credential.plan.as_str();
        let remaining: Option<u32> = credential.scans_remaining.into();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO credential (id, api_key, plan, scans_remaining, updated_at)
                     VALUES (1, ?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                        api_key = excluded.api_key,
                        plan = excluded.plan,
                        scans_remaining = excluded.scans_remaining,
                        updated_at = excluded.updated_at",
                    rusqlite::params![api_key, plan, remaining, chrono::Utc::now().timestamp()],
                )?;
                Ok(())
            })
            .await
    }
}

fn read_row(conn: &rusqlite::Connection) -> StoreResult<Option<Credential>> {
    let row = conn
        .query_row(
            "SELECT api_key, plan, scans_remaining FROM credential WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<u32>>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((api_key, plan, remaining)) = row else {
        return Ok(None);
    };
    let plan = plan.parse::<Plan>().map_err(|reason| StoreError::Corrupt {
        entity: "credential",
        reason,
    })?;
    Ok(Some(Credential::new(api_key, plan, Quota::from(remaining))))
}

// ── tests ────────────────────────────────────────────────────────────
