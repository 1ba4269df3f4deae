//! Durable plan storage with optimistic concurrency.
//!
//! Plans live in namespaced, versioned key/value records provided by a
//! [`ConfigStore`] backend. The encoded plan sits under the [`PLAN_DATA_KEY`]
//! key of its record; other keys are preserved untouched.
//!
//! Every write made through [`PlanStore`] is a compare-and-swap cycle:
//!
//! ```text
//! read record (version v) ─▶ mutate fresh copy ─▶ write if version == v
//!        ▲                                               │
//!        └──────────── conflict: back off, retry ◀───────┘
//! ```
//!
//! Retries follow the [`RetryPolicy`]; once the attempt budget is spent the
//! caller sees `RollerError::Conflict`. Cancelling the store's token during a
//! backoff sleep yields `RollerError::Cancelled`.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use roller_core::{
//!     models::{Plan, Status},
//!     store::{memory::MemoryConfigStore, PlanStore},
//! };
//!
//! # async fn example() -> roller_core::Result<()> {
//! let store = PlanStore::new(Arc::new(MemoryConfigStore::new()), "kube-system");
//!
//! let plan = Plan {
//!     parallelism: 1,
//!     ignore_errors: false,
//!     recreate: false,
//!     node: None,
//!     unique_id: None,
//!     batches: Vec::new(),
//!     status: Status::Pending,
//! };
//! store.save("roller-upgrade", &plan).await?;
//!
//! let updated = store
//!     .update("roller-upgrade", |plan| {
//!         plan.status = Status::Running;
//!         Ok(())
//!     })
//!     .await?;
//! assert_eq!(updated.status, Status::Running);
//! # Ok(())
//! # }
//! ```

use std::{collections::BTreeMap, sync::Arc};

use backoff::backoff::Backoff;
use jiff::Timestamp;
use log::{debug, warn};
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::{
    config::RetryPolicy,
    error::{Result, RollerError},
    models::Plan,
};

pub mod builder;
pub mod memory;
pub mod sqlite;


pub use builder::PlanStoreBuilder;
pub use memory::MemoryConfigStore;
pub use sqlite::SqliteConfigStore;

/// Record key holding the JSON-encoded plan.
pub const PLAN_DATA_KEY: &str = "upgrade";

/// A versioned key/value record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRecord {
    pub namespace: String,
    pub name: String,
    pub data: BTreeMap<String, String>,
    /// Opaque version token, bumped on every successful write
    pub version: u64,
    pub updated_at: Timestamp,
}

/// Namespaced key/value records with conditional writes.
///
/// Implementations are synchronous; [`PlanStore`] moves every call onto the
/// blocking thread pool.
pub trait ConfigStore: Send + Sync + 'static {
    /// Fetches a record, `None` when absent.
    fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigRecord>>;

    /// Creates a record. Fails with `RollerError::Conflict` if it already
    /// exists.
    fn create(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<ConfigRecord>;

    /// Replaces a record's data if its version still equals
    /// `expected_version`. Fails with `RollerError::Conflict` on a version
    /// mismatch and `RollerError::NotFound` when the record is gone.
    fn update(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
        expected_version: u64,
    ) -> Result<ConfigRecord>;
}

/// A decoded plan together with its record metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPlan {
    pub name: String,
    pub namespace: String,
    pub plan: Plan,
    pub version: u64,
    pub updated_at: Timestamp,
}

impl StoredPlan {
    fn from_record(record: &ConfigRecord) -> Result<Self> {
        Ok(Self {
            name: record.name.clone(),
            namespace: record.namespace.clone(),
            plan: decode_plan(record)?,
            version: record.version,
            updated_at: record.updated_at,
        })
    }
}

/// Decodes the plan held by `record`.
pub fn decode_plan(record: &ConfigRecord) -> Result<Plan> {
    let payload = record
        .data
        .get(PLAN_DATA_KEY)
        .ok_or_else(|| RollerError::Decode {
            name: record.name.clone(),
            reason: format!("record has no '{PLAN_DATA_KEY}' key"),
        })?;
    serde_json::from_str(payload).map_err(|e| RollerError::Decode {
        name: record.name.clone(),
        reason: e.to_string(),
    })
}

/// Conflict error raised by backends for a single failed conditional write.
pub(crate) fn version_conflict(name: &str) -> RollerError {
    RollerError::Conflict {
        name: name.to_string(),
        attempts: 1,
    }
}

/// Plan persistence over a [`ConfigStore`] backend.
pub struct PlanStore<S> {
    store: Arc<S>,
    namespace: String,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<S> Clone for PlanStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
            policy: self.policy.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: ConfigStore> PlanStore<S> {
    /// Creates a plan store over `store`, scoped to `namespace`.
    pub fn new(store: Arc<S>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            policy: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Aborts retry sleeps when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn backend(&self) -> &Arc<S> {
        &self.store
    }

    /// Loads the plan stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns `RollerError::NotFound` if the record does not exist and
    /// `RollerError::Decode` if its payload cannot be parsed.
    pub async fn load(&self, name: &str) -> Result<Plan> {
        Ok(self.load_record(name).await?.plan)
    }

    /// Loads the plan under `name` along with its version and timestamp.
    pub async fn load_record(&self, name: &str) -> Result<StoredPlan> {
        let record = self
            .get(name)
            .await?
            .ok_or_else(|| RollerError::plan_not_found(name))?;
        StoredPlan::from_record(&record)
    }

    /// Writes `plan` under `name`, creating the record if needed and
    /// overwriting any existing payload otherwise.
    pub async fn save(&self, name: &str, plan: &Plan) -> Result<Plan> {
        self.compare_and_swap(name, |_| Ok(plan.clone())).await
    }

    /// Applies `mutate` to the stored plan through a compare-and-swap loop.
    ///
    /// The closure runs on a freshly decoded copy on every attempt, so it must
    /// not depend on state from a previous attempt. An error returned by the
    /// closure stops the loop and is passed through unchanged.
    pub async fn update<F>(&self, name: &str, mut mutate: F) -> Result<Plan>
    where
        F: FnMut(&mut Plan) -> Result<()> + Send,
    {
        self.compare_and_swap(name, |record| {
            let record = record.ok_or_else(|| RollerError::plan_not_found(name))?;
            let mut plan = decode_plan(record)?;
            mutate(&mut plan)?;
            Ok(plan)
        })
        .await
    }

    async fn compare_and_swap<F>(&self, name: &str, mut apply: F) -> Result<Plan>
    where
        F: FnMut(Option<&ConfigRecord>) -> Result<Plan> + Send,
    {
        let mut backoff = self.policy.backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.try_write(name, &mut apply).await {
                Ok(plan) => {
                    if attempt > 1 {
                        debug!("Wrote plan '{name}' after {attempt} attempts");
                    }
                    return Ok(plan);
                }
                Err(e) if e.is_conflict() => {
                    if attempt >= self.policy.max_attempts {
                        warn!("Giving up on plan '{name}' after {attempt} conflicting attempts");
                        return Err(RollerError::Conflict {
                            name: name.to_string(),
                            attempts: attempt,
                        });
                    }
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(self.policy.max_interval);
                    debug!("Version conflict on plan '{name}' (attempt {attempt}), retrying in {delay:?}");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(RollerError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_write<F>(&self, name: &str, apply: &mut F) -> Result<Plan>
    where
        F: FnMut(Option<&ConfigRecord>) -> Result<Plan> + Send,
    {
        let current = self.get(name).await?;
        let plan = apply(current.as_ref())?;
        let payload = serde_json::to_string(&plan)?;

        let namespace = self.namespace.clone();
        let record_name = name.to_string();
        match current {
            None => {
                let data = BTreeMap::from([(PLAN_DATA_KEY.to_string(), payload)]);
                self.blocking(move |store| store.create(&namespace, &record_name, data))
                    .await?;
            }
            Some(record) => {
                let version = record.version;
                let mut data = record.data;
                data.insert(PLAN_DATA_KEY.to_string(), payload);
                // A record deleted since the read is retried from a fresh read,
                // which recreates it on save.
                self.blocking(move |store| store.update(&namespace, &record_name, data, version))
                    .await
                    .map_err(|e| if e.is_not_found() { version_conflict(name) } else { e })?;
            }
        }
        Ok(plan)
    }

    async fn get(&self, name: &str) -> Result<Option<ConfigRecord>> {
        let namespace = self.namespace.clone();
        let name = name.to_string();
        self.blocking(move |store| store.get(&namespace, &name)).await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&S) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| RollerError::Configuration {
                message: format!("Task join error: {e}"),
            })?
    }
}
