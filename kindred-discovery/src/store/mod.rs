//! Persistence seams.
//!
//! The engine talks to two collaborators: the profile store, which it only
//! reads (plus location refreshes), and the relationship ledger, which holds
//! every user's edge collections and the shared pair namespace. Neither
//! offers multi-document transactions; the shared namespace instead offers
//! insert-if-absent writes, which the lifecycle service uses as its
//! compare-and-set primitive.

use async_trait::async_trait;
use uuid::Uuid;

use kindred_shared::errors::AppResult;

use crate::matching::pair::PairKey;
use crate::models::{
    Context, EdgeState, MatchDenial, MatchRecord, NewEdge, NewReport, PairRequest, ProfileRecord,
    RelationshipEdge, Report,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn profile(&self, user_id: Uuid, context: Context) -> AppResult<Option<ProfileRecord>>;

    /// One page of the context's population ordered by user id, starting
    /// strictly after `after`.
    async fn profiles_page(
        &self,
        context: Context,
        after: Option<Uuid>,
        limit: usize,
    ) -> AppResult<Vec<ProfileRecord>>;

    /// Refresh the location on every context profile of the user. Returns
    /// the number of profiles touched.
    async fn update_location(&self, user_id: Uuid, latitude: f64, longitude: f64) -> AppResult<usize>;

    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait RelationshipLedger: Send + Sync {
    // Per-user sub-collections

    async fn edges(&self, owner: Uuid) -> AppResult<Vec<RelationshipEdge>>;

    async fn edges_between(&self, owner: Uuid, counterpart: Uuid) -> AppResult<Vec<RelationshipEdge>>;

    async fn edges_for_request(&self, owner: Uuid, request_id: Uuid) -> AppResult<Vec<RelationshipEdge>>;

    /// Idempotent on `(owner_id, request_id, state)`: an existing edge is
    /// returned unchanged.
    async fn put_edge(&self, edge: NewEdge) -> AppResult<RelationshipEdge>;

    async fn delete_edge(&self, owner: Uuid, request_id: Uuid, state: EdgeState) -> AppResult<bool>;

    // Shared pair namespace

    /// Insert the request unless the pair already has one; either way the
    /// stored request is returned.
    async fn claim_request(&self, request: PairRequest) -> AppResult<PairRequest>;

    async fn pair_request(&self, pair: &PairKey) -> AppResult<Option<PairRequest>>;

    async fn pair_requests_involving(&self, user: Uuid) -> AppResult<Vec<PairRequest>>;

    /// Returns `true` when this call created the record.
    async fn insert_match(&self, record: MatchRecord) -> AppResult<bool>;

    async fn find_match(&self, pair: &PairKey) -> AppResult<Option<MatchRecord>>;

    async fn matches_involving(&self, user: Uuid) -> AppResult<Vec<MatchRecord>>;

    /// Returns `true` when this call created the record.
    async fn insert_denial(&self, denial: MatchDenial) -> AppResult<bool>;

    async fn find_denial(&self, pair: &PairKey) -> AppResult<Option<MatchDenial>>;

    async fn denials_involving(&self, user: Uuid) -> AppResult<Vec<MatchDenial>>;

    // Reports

    async fn append_report(&self, report: NewReport) -> AppResult<()>;

    /// Every stored copy of every report the user filed or received,
    /// whichever ledger it landed in.
    async fn reports_involving(&self, user: Uuid) -> AppResult<Vec<Report>>;
}
