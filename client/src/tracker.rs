//! Reconciliation controller.
//!
//! Owns the in-memory collections (custom foods, daily entries, goals)
//! and decides where they persist: the local durable cache while no
//! session is active, the remote store once authenticated. Entry
//! mutations are optimistic — applied to memory synchronously, confirmed
//! against the remote afterward, rolled back wholesale on failure.
//!
//! Every remote write is a full-dataset replace rather than incremental
//! CRUD: the server assigns authoritative ids only on a full write, and
//! tracking a mapping from client-generated temporary ids to server ids
//! across partial updates is exactly the kind of bookkeeping that breeds
//! resurrection bugs. O(n) per mutation is an accepted ceiling at the
//! target scale (low thousands of entries per user).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

use nosh_core::integrity::{self, MacroTotals};
use nosh_core::models::{DailyEntry, FoodDraft, FoodItem, Goals, MEAL_TIMES, ServingUnit};
use nosh_core::validate;

use crate::error::SyncError;
use crate::remote::{RemoteClient, UserDataPatch};
use crate::session::SessionManager;
use crate::store::{LocalStore, keys};

/// Quiet interval before a debounced background save fires.
pub const AUTOSAVE_DEBOUNCE: Duration = Duration::from_millis(1000);

#[derive(Default)]
struct Collections {
    custom_foods: Vec<FoodItem>,
    daily_entries: Vec<DailyEntry>,
    goals: Goals,
}

/// Sets a flag for the duration of a foreground save and clears it on
/// drop, success or failure, so a panicked save cannot leave the
/// autosave suppressed forever.
struct FlagGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlagGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self { flag }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

struct TrackerInner {
    state: Mutex<Collections>,
    remote: Arc<RemoteClient>,
    store: Arc<dyn LocalStore>,
    authenticated: AtomicBool,
    // Foreground-save latches. While either is set, the debounced
    // background save suppresses itself instead of racing the foreground
    // push and resurrecting a just-deleted entry.
    is_deleting: AtomicBool,
    is_manual_saving: AtomicBool,
    autosave: Mutex<Option<JoinHandle<()>>>,
    debounce: Duration,
    last_id: AtomicI64,
    session: Mutex<Option<SessionManager>>,
}

/// The reconciliation controller. Cheap to clone; all clones share
/// state. Must live on a tokio runtime; the debounced autosave spawns
/// tasks.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl Tracker {
    pub fn new(remote: Arc<RemoteClient>, store: Arc<dyn LocalStore>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                state: Mutex::new(Collections::default()),
                remote,
                store,
                authenticated: AtomicBool::new(false),
                is_deleting: AtomicBool::new(false),
                is_manual_saving: AtomicBool::new(false),
                autosave: Mutex::new(None),
                debounce: AUTOSAVE_DEBOUNCE,
                last_id: AtomicI64::new(0),
                session: Mutex::new(None),
            }),
        }
    }

    /// Override the autosave quiet interval. Tests shrink it.
    #[must_use]
    pub fn with_debounce(self, debounce: Duration) -> Self {
        // Only meaningful before the first mutation.
        let inner = Arc::try_unwrap(self.inner).map_or_else(
            |arc| {
                tracing::warn!("with_debounce on a shared tracker has no effect");
                arc
            },
            |mut inner| {
                inner.debounce = debounce;
                Arc::new(inner)
            },
        );
        Self { inner }
    }

    /// Let the tracker force a logout when the remote store rejects the
    /// session mid-sync.
    pub fn attach_session(&self, session: SessionManager) {
        *lock(&self.inner.session) = Some(session);
    }

    fn authenticated(&self) -> bool {
        self.inner.authenticated.load(Ordering::SeqCst)
    }

    // --- Read access ---

    #[must_use]
    pub fn custom_foods(&self) -> Vec<FoodItem> {
        lock(&self.inner.state).custom_foods.clone()
    }

    #[must_use]
    pub fn daily_entries(&self) -> Vec<DailyEntry> {
        lock(&self.inner.state).daily_entries.clone()
    }

    #[must_use]
    pub fn entries_for(&self, date: &str) -> Vec<DailyEntry> {
        lock(&self.inner.state)
            .daily_entries
            .iter()
            .filter(|e| e.date == date)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn goals(&self) -> Goals {
        lock(&self.inner.state).goals
    }

    /// Safe macro totals for one day. Corrupted fields count as zero;
    /// the entries themselves stay visible until an explicit cleanup.
    #[must_use]
    pub fn totals_for(&self, date: &str) -> MacroTotals {
        integrity::safe_aggregate(&self.entries_for(date))
    }

    /// Corrupted entries currently in memory, for the repair prompt.
    #[must_use]
    pub fn corrupted_count(&self) -> usize {
        integrity::count_corrupted(&lock(&self.inner.state).daily_entries)
    }

    // --- Persistence-target transitions ---

    /// Load pre-login state from the local cache. Corrupted entries are
    /// filtered here, with the removal logged and the cleaned blob
    /// written back immediately, so the corruption cannot resurface on
    /// the next load. Goals are not cached pre-login and keep their
    /// defaults.
    pub fn load_local(&self) -> Result<(), SyncError> {
        let custom_foods: Vec<FoodItem> = match self.inner.store.get(keys::CUSTOM_FOODS)? {
            Some(blob) => serde_json::from_str(&blob)?,
            None => Vec::new(),
        };
        let raw: Vec<DailyEntry> = match self.inner.store.get(keys::DAILY_ENTRIES)? {
            Some(blob) => serde_json::from_str(&blob)?,
            None => Vec::new(),
        };

        let before = raw.len();
        let daily_entries = integrity::filter_corrupted(raw);
        if daily_entries.len() != before {
            tracing::warn!(
                removed = before - daily_entries.len(),
                "filtered corrupted entries while loading local cache"
            );
            self.save_local_entries(&daily_entries)?;
        }

        let mut state = lock(&self.inner.state);
        state.custom_foods = custom_foods;
        state.daily_entries = daily_entries;
        Ok(())
    }

    /// Switch to the remote store after authentication. The remote
    /// dataset replaces in-memory state wholesale; whatever lived in the
    /// local cache is not merged (last writer wins at the granularity of
    /// the active store). The switch happens only once the transition
    /// fetch succeeds: until then the controller stays on the local
    /// target, so a failed fetch cannot lead to the stale pre-login
    /// dataset being pushed over the remote one. Corrupted remote entries
    /// are kept and counted; removal is the user's call via
    /// [`Tracker::cleanup_corrupted`].
    pub async fn on_login(&self) -> Result<(), SyncError> {
        let data = match self.inner.remote.fetch_user_data().await {
            Ok(data) => data,
            Err(err) => {
                self.handle_rejection(&err);
                return Err(err);
            }
        };

        let corrupted = integrity::count_corrupted(&data.daily_entries);
        if corrupted > 0 {
            tracing::warn!(corrupted, "remote dataset contains corrupted entries");
        }

        self.inner.authenticated.store(true, Ordering::SeqCst);
        let mut state = lock(&self.inner.state);
        state.custom_foods = data.custom_foods;
        state.daily_entries = data.daily_entries;
        state.goals = data.goals;
        Ok(())
    }

    /// Switch back to the local cache. In-memory state is dropped, not
    /// migrated: data that existed only in memory at logout is gone. Any
    /// pending autosave dies with the session.
    pub fn on_logout(&self) -> Result<(), SyncError> {
        self.inner.authenticated.store(false, Ordering::SeqCst);
        if let Some(handle) = lock(&self.inner.autosave).take() {
            handle.abort();
        }
        *lock(&self.inner.state) = Collections::default();
        self.load_local()
    }

    // --- Entry mutations (optimistic, foreground-confirmed) ---

    /// Log a food. The entry snapshots the food's name and the
    /// portion-scaled macros, so later edits or deletion of the food
    /// cannot corrupt history. Returns the optimistic entry; while
    /// authenticated its temporary id is replaced by a server id on the
    /// confirming re-fetch.
    pub async fn add_entry(
        &self,
        food: &FoodItem,
        portion_raw: &str,
        date: &str,
        meal_time: &str,
    ) -> Result<DailyEntry, SyncError> {
        let mut report = validate::validate_portion_size(portion_raw);
        if !MEAL_TIMES.contains(&meal_time) {
            report.errors.push("Unknown meal time".to_string());
        }
        if !report.is_valid() {
            return Err(SyncError::Validation(report.errors));
        }
        let portion: f64 = portion_raw
            .trim()
            .parse()
            .map_err(|_| SyncError::Validation(vec!["Portion size must be a number".into()]))?;

        let scale = portion / 100.0;
        let entry = DailyEntry {
            id: self.next_id(),
            food_id: food.id,
            name: food.name.clone(),
            portion_size: portion,
            unit: food.serving_unit.as_str().to_string(),
            calories: food.calories * scale,
            protein: food.protein * scale,
            carbs: food.carbs * scale,
            fat: food.fat * scale,
            date: date.to_string(),
            meal_time: meal_time.to_string(),
        };

        // Pre-save integrity check: a food with corrupted macros must
        // not mint a corrupted entry.
        if integrity::is_corrupted(&entry) {
            return Err(SyncError::Validation(vec![
                "Food has invalid nutrition values and cannot be logged".into(),
            ]));
        }

        let snapshot = {
            let mut state = lock(&self.inner.state);
            let snapshot = state.daily_entries.clone();
            state.daily_entries.push(entry.clone());
            snapshot
        };

        self.confirm_entries(snapshot, &self.inner.is_manual_saving)
            .await?;
        Ok(entry)
    }

    /// Delete an entry. Returns `false` without touching anything when
    /// the id is unknown.
    pub async fn remove_entry(&self, id: i64) -> Result<bool, SyncError> {
        let snapshot = {
            let mut state = lock(&self.inner.state);
            if !state.daily_entries.iter().any(|e| e.id == id) {
                return Ok(false);
            }
            let snapshot = state.daily_entries.clone();
            state.daily_entries.retain(|e| e.id != id);
            snapshot
        };

        self.confirm_entries(snapshot, &self.inner.is_deleting).await?;
        Ok(true)
    }

    /// Remove all corrupted entries. This is the explicit repair action
    /// behind the prompt; corruption is never silently deleted between
    /// loads. The cleaned list becomes the new authoritative state.
    pub async fn cleanup_corrupted(&self) -> Result<usize, SyncError> {
        let snapshot = {
            let mut state = lock(&self.inner.state);
            if integrity::count_corrupted(&state.daily_entries) == 0 {
                return Ok(0);
            }
            let snapshot = state.daily_entries.clone();
            let entries = std::mem::take(&mut state.daily_entries);
            state.daily_entries = integrity::filter_corrupted(entries);
            snapshot
        };
        let removed = snapshot.len() - lock(&self.inner.state).daily_entries.len();

        self.confirm_entries(snapshot, &self.inner.is_deleting).await?;
        Ok(removed)
    }

    /// Push the mutated state to the active target, rolling the
    /// optimistic entry update back if the remote refuses it. The push
    /// carries the full three-field snapshot so it subsumes any food or
    /// goal edit still waiting on the debounce timer; the confirming
    /// re-fetch adopts only the entry collection, where server-assigned
    /// ids must replace temporary ones. Foods and goals keep their
    /// in-memory values, so an edit made while the push was in flight is
    /// not reverted.
    async fn confirm_entries(
        &self,
        snapshot: Vec<DailyEntry>,
        flag: &AtomicBool,
    ) -> Result<(), SyncError> {
        if !self.authenticated() {
            let entries = lock(&self.inner.state).daily_entries.clone();
            return self.save_local_entries(&entries);
        }

        let _guard = FlagGuard::set(flag);

        let patch = {
            let state = lock(&self.inner.state);
            UserDataPatch {
                custom_foods: Some(state.custom_foods.clone()),
                daily_entries: Some(state.daily_entries.clone()),
                goals: Some(state.goals),
            }
        };
        if let Err(err) = self.inner.remote.push_user_data(&patch).await {
            lock(&self.inner.state).daily_entries = snapshot;
            self.handle_rejection(&err);
            return Err(err);
        }

        match self.inner.remote.fetch_user_data().await {
            Ok(data) => {
                lock(&self.inner.state).daily_entries = data.daily_entries;
            }
            Err(err) => {
                // The push landed; only the id reconciliation is stale.
                // Temporary ids stand until the next successful fetch.
                tracing::warn!(error = %err, "re-fetch after push failed, keeping optimistic ids");
            }
        }
        Ok(())
    }

    // --- Custom foods and goals (optimistic, background-saved) ---

    /// Create a custom food. Applied to memory synchronously; while
    /// authenticated the push rides the debounced autosave, since food
    /// definitions have none of the id-ambiguity pressure entries have.
    pub fn add_custom_food(
        &self,
        draft: &FoodDraft,
        unit: ServingUnit,
    ) -> Result<FoodItem, SyncError> {
        let report = validate::validate_food(draft);
        if !report.is_valid() {
            return Err(SyncError::Validation(report.errors));
        }
        let food = draft
            .to_food(self.next_id(), unit, true)
            .ok_or_else(|| SyncError::Validation(vec!["Food values must be numbers".into()]))?;

        lock(&self.inner.state).custom_foods.push(food.clone());
        self.persist_custom_foods()?;
        Ok(food)
    }

    /// Replace a custom food's definition. Entries logged against it are
    /// untouched, they snapshotted their values at log time.
    pub fn update_custom_food(
        &self,
        id: i64,
        draft: &FoodDraft,
        unit: ServingUnit,
    ) -> Result<FoodItem, SyncError> {
        let report = validate::validate_food(draft);
        if !report.is_valid() {
            return Err(SyncError::Validation(report.errors));
        }
        let food = draft
            .to_food(id, unit, true)
            .ok_or_else(|| SyncError::Validation(vec!["Food values must be numbers".into()]))?;

        {
            let mut state = lock(&self.inner.state);
            let Some(slot) = state.custom_foods.iter_mut().find(|f| f.id == id) else {
                return Err(SyncError::Validation(vec!["Unknown custom food".into()]));
            };
            *slot = food.clone();
        }
        self.persist_custom_foods()?;
        Ok(food)
    }

    /// Delete a custom food. Entries referencing it keep their snapshot;
    /// the `food_id` back-reference simply dangles, which is why it is
    /// never dereferenced for display.
    pub fn remove_custom_food(&self, id: i64) -> Result<bool, SyncError> {
        {
            let mut state = lock(&self.inner.state);
            let before = state.custom_foods.len();
            state.custom_foods.retain(|f| !(f.id == id && f.is_custom));
            if state.custom_foods.len() == before {
                return Ok(false);
            }
        }
        self.persist_custom_foods()?;
        Ok(true)
    }

    /// Overwrite the daily goals. Full replace, no partial patch. Goals
    /// live in memory only until authenticated; the local cache never
    /// stores them.
    pub fn update_goals(&self, goals: Goals) -> Result<(), SyncError> {
        let report = validate::validate_goals(&goals);
        if !report.is_valid() {
            return Err(SyncError::Validation(report.errors));
        }
        lock(&self.inner.state).goals = goals;
        if self.authenticated() {
            self.schedule_autosave();
        }
        Ok(())
    }

    fn persist_custom_foods(&self) -> Result<(), SyncError> {
        if self.authenticated() {
            self.schedule_autosave();
            Ok(())
        } else {
            let foods = lock(&self.inner.state).custom_foods.clone();
            self.inner
                .store
                .set(keys::CUSTOM_FOODS, &serde_json::to_string(&foods)?)
        }
    }

    /// Trailing debounce: each change cancels the pending timer and
    /// starts a fresh one, so a burst of edits costs one push carrying
    /// the state as of the last change. When the timer fires during a
    /// foreground save, the autosave bows out: the foreground push is a
    /// full-state replace and already carries these changes, or the next
    /// change will reschedule.
    fn schedule_autosave(&self) {
        let inner = Arc::clone(&self.inner);
        let mut slot = lock(&self.inner.autosave);
        if let Some(pending) = slot.take() {
            pending.abort();
        }
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            if inner.is_deleting.load(Ordering::SeqCst)
                || inner.is_manual_saving.load(Ordering::SeqCst)
            {
                tracing::debug!("autosave suppressed by in-flight foreground save");
                return;
            }
            let patch = {
                let state = lock(&inner.state);
                UserDataPatch {
                    custom_foods: Some(state.custom_foods.clone()),
                    daily_entries: Some(state.daily_entries.clone()),
                    goals: Some(state.goals),
                }
            };
            if let Err(err) = inner.remote.push_user_data(&patch).await {
                // No rollback: the autosave may bundle several changes.
                // State stays dirty and the next change repushes it all.
                tracing::warn!(error = %err, "debounced autosave failed");
            }
        }));
    }

    // --- Plumbing ---

    fn save_local_entries(&self, entries: &[DailyEntry]) -> Result<(), SyncError> {
        self.inner
            .store
            .set(keys::DAILY_ENTRIES, &serde_json::to_string(entries)?)
    }

    /// An auth rejection mid-sync means the session is dead: force the
    /// logout and the switch back to the local cache.
    fn handle_rejection(&self, err: &SyncError) {
        if !matches!(err, SyncError::AuthRejected(_)) {
            return;
        }
        let session = lock(&self.inner.session).clone();
        if let Some(session) = session {
            if let Err(e) = session.logout() {
                tracing::warn!(error = %e, "failed to purge rejected session");
            }
        }
        if let Err(e) = self.on_logout() {
            tracing::warn!(error = %e, "failed to reload local cache after rejection");
        }
    }

    /// Wall-clock-derived temporary id, bumped to stay strictly
    /// increasing within this process. No cross-device uniqueness is
    /// promised; the server's ids are the real ones, installed on the
    /// re-fetch that follows every confirmed push.
    fn next_id(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut assigned = now;
        let _ = self
            .inner
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                assigned = now.max(prev + 1);
                Some(assigned)
            });
        assigned
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
