use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use kindred_shared::errors::{AppError, AppResult};

use super::{ProfileStore, RelationshipLedger};
use crate::matching::pair::PairKey;
use crate::models::{
    Context, EdgeState, MatchDenial, MatchRecord, NewEdge, NewReport, PairRequest, ProfileRecord,
    RelationshipEdge, Report, ReportScope,
};

#[derive(Default)]
struct Inner {
    profiles: BTreeMap<(Context, Uuid), ProfileRecord>,
    edges: HashMap<Uuid, Vec<RelationshipEdge>>,
    pair_requests: HashMap<String, PairRequest>,
    matches: HashMap<String, MatchRecord>,
    denials: HashMap<String, MatchDenial>,
    reports: Vec<Report>,

    failing_owners: HashSet<Uuid>,
    failing_global_reports: bool,
    unavailable: bool,
    page_delay: Option<Duration>,
    ledger_delay: Option<Duration>,
}

impl Inner {
    fn check_available(&self) -> AppResult<()> {
        if self.unavailable {
            return Err(AppError::unavailable("memory store offline"));
        }
        Ok(())
    }

    fn check_owner_writable(&self, owner: Uuid) -> AppResult<()> {
        self.check_available()?;
        if self.failing_owners.contains(&owner) {
            return Err(AppError::unavailable(format!("writes to {owner} are failing")));
        }
        Ok(())
    }
}

/// In-process store with the same insert-if-absent semantics as the
/// Postgres one, plus fault injection for exercising partial writes.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_profile(&self, record: ProfileRecord) {
        self.lock()
            .profiles
            .insert((record.context, record.user_id), record);
    }

    /// Make every edge write and report copy owned by `owner` fail with
    /// `StoreUnavailable` until [`MemoryStore::heal`] is called.
    pub fn fail_writes_for(&self, owner: Uuid) {
        self.lock().failing_owners.insert(owner);
    }

    /// Report copies stored in one ledger.
    pub fn report_copies(&self, scope: ReportScope) -> Vec<Report> {
        let owner = scope.owner_id();
        self.lock()
            .reports
            .iter()
            .filter(|r| r.owner_id == owner)
            .cloned()
            .collect()
    }

    pub fn fail_global_reports(&self) {
        self.lock().failing_global_reports = true;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Delay each profile page, for exercising the scan deadline.
    pub fn set_page_delay(&self, delay: Duration) {
        self.lock().page_delay = Some(delay);
    }

    /// Delay reads of a user's edge collection.
    pub fn set_ledger_delay(&self, delay: Duration) {
        self.lock().ledger_delay = Some(delay);
    }

    pub fn heal(&self) {
        let mut inner = self.lock();
        inner.failing_owners.clear();
        inner.failing_global_reports = false;
        inner.unavailable = false;
        inner.page_delay = None;
        inner.ledger_delay = None;
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn profile(&self, user_id: Uuid, context: Context) -> AppResult<Option<ProfileRecord>> {
        let inner = self.lock();
        inner.check_available()?;
        Ok(inner.profiles.get(&(context, user_id)).cloned())
    }

    async fn profiles_page(
        &self,
        context: Context,
        after: Option<Uuid>,
        limit: usize,
    ) -> AppResult<Vec<ProfileRecord>> {
        let delay = self.lock().page_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let inner = self.lock();
        inner.check_available()?;
        let lower = match after {
            Some(after) => Bound::Excluded((context, after)),
            None => Bound::Included((context, Uuid::nil())),
        };
        let page = inner
            .profiles
            .range((lower, Bound::Unbounded))
            .take_while(|((ctx, _), _)| *ctx == context)
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect();
        Ok(page)
    }

    async fn update_location(&self, user_id: Uuid, latitude: f64, longitude: f64) -> AppResult<usize> {
        let mut inner = self.lock();
        inner.check_available()?;
        let mut touched = 0;
        for context in Context::ALL {
            if let Some(record) = inner.profiles.get_mut(&(context, user_id)) {
                record.latitude = Some(latitude);
                record.longitude = Some(longitude);
                record.updated_at = Utc::now();
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn ping(&self) -> AppResult<()> {
        self.lock().check_available()
    }
}

#[async_trait]
impl RelationshipLedger for MemoryStore {
    async fn edges(&self, owner: Uuid) -> AppResult<Vec<RelationshipEdge>> {
        let delay = self.lock().ledger_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let inner = self.lock();
        inner.check_available()?;
        Ok(inner.edges.get(&owner).cloned().unwrap_or_default())
    }

    async fn edges_between(&self, owner: Uuid, counterpart: Uuid) -> AppResult<Vec<RelationshipEdge>> {
        let inner = self.lock();
        inner.check_available()?;
        Ok(inner
            .edges
            .get(&owner)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|e| e.counterpart_id == counterpart)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn edges_for_request(&self, owner: Uuid, request_id: Uuid) -> AppResult<Vec<RelationshipEdge>> {
        let inner = self.lock();
        inner.check_available()?;
        Ok(inner
            .edges
            .get(&owner)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|e| e.request_id == request_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn put_edge(&self, edge: NewEdge) -> AppResult<RelationshipEdge> {
        let mut inner = self.lock();
        inner.check_owner_writable(edge.owner_id)?;

        let owned = inner.edges.entry(edge.owner_id).or_default();
        if let Some(existing) = owned
            .iter()
            .find(|e| e.request_id == edge.request_id && e.state == edge.state)
        {
            return Ok(existing.clone());
        }

        let stored = RelationshipEdge {
            id: edge.id,
            owner_id: edge.owner_id,
            counterpart_id: edge.counterpart_id,
            request_id: edge.request_id,
            state: edge.state,
            context: edge.context,
            snapshot: edge.snapshot,
            created_at: Utc::now(),
        };
        owned.push(stored.clone());
        Ok(stored)
    }

    async fn delete_edge(&self, owner: Uuid, request_id: Uuid, state: EdgeState) -> AppResult<bool> {
        let mut inner = self.lock();
        inner.check_owner_writable(owner)?;
        let Some(owned) = inner.edges.get_mut(&owner) else {
            return Ok(false);
        };
        let before = owned.len();
        owned.retain(|e| !(e.request_id == request_id && e.state == state));
        Ok(owned.len() < before)
    }

    async fn claim_request(&self, request: PairRequest) -> AppResult<PairRequest> {
        let mut inner = self.lock();
        inner.check_available()?;
        let stored = inner
            .pair_requests
            .entry(request.pair_key.clone())
            .or_insert(request);
        Ok(stored.clone())
    }

    async fn pair_request(&self, pair: &PairKey) -> AppResult<Option<PairRequest>> {
        let inner = self.lock();
        inner.check_available()?;
        Ok(inner.pair_requests.get(pair.as_str()).cloned())
    }

    async fn pair_requests_involving(&self, user: Uuid) -> AppResult<Vec<PairRequest>> {
        let inner = self.lock();
        inner.check_available()?;
        Ok(inner
            .pair_requests
            .values()
            .filter(|r| r.involves(user))
            .cloned()
            .collect())
    }

    async fn insert_match(&self, record: MatchRecord) -> AppResult<bool> {
        let mut inner = self.lock();
        inner.check_available()?;
        if inner.matches.contains_key(&record.pair_key) {
            return Ok(false);
        }
        inner.matches.insert(record.pair_key.clone(), record);
        Ok(true)
    }

    async fn find_match(&self, pair: &PairKey) -> AppResult<Option<MatchRecord>> {
        let inner = self.lock();
        inner.check_available()?;
        Ok(inner.matches.get(pair.as_str()).cloned())
    }

    async fn matches_involving(&self, user: Uuid) -> AppResult<Vec<MatchRecord>> {
        let inner = self.lock();
        inner.check_available()?;
        let mut found: Vec<MatchRecord> = inner
            .matches
            .values()
            .filter(|m| m.other(user).is_some())
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn insert_denial(&self, denial: MatchDenial) -> AppResult<bool> {
        let mut inner = self.lock();
        inner.check_available()?;
        if inner.denials.contains_key(&denial.pair_key) {
            return Ok(false);
        }
        inner.denials.insert(denial.pair_key.clone(), denial);
        Ok(true)
    }

    async fn find_denial(&self, pair: &PairKey) -> AppResult<Option<MatchDenial>> {
        let inner = self.lock();
        inner.check_available()?;
        Ok(inner.denials.get(pair.as_str()).cloned())
    }

    async fn denials_involving(&self, user: Uuid) -> AppResult<Vec<MatchDenial>> {
        let inner = self.lock();
        inner.check_available()?;
        Ok(inner
            .denials
            .values()
            .filter(|d| d.counterpart_of(user).is_some())
            .cloned()
            .collect())
    }

    async fn append_report(&self, report: NewReport) -> AppResult<()> {
        let mut inner = self.lock();
        match report.owner_id {
            Some(owner) => inner.check_owner_writable(owner)?,
            None => {
                inner.check_available()?;
                if inner.failing_global_reports {
                    return Err(AppError::unavailable("global report ledger is failing"));
                }
            }
        }
        inner.reports.push(Report {
            id: report.id,
            owner_id: report.owner_id,
            reporter_id: report.reporter_id,
            reported_id: report.reported_id,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn reports_involving(&self, user: Uuid) -> AppResult<Vec<Report>> {
        let inner = self.lock();
        inner.check_available()?;
        Ok(inner
            .reports
            .iter()
            .filter(|r| r.counterpart_of(user).is_some())
            .cloned()
            .collect())
    }
}
