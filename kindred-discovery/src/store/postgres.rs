use async_trait::async_trait;
use chrono::Utc;
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use uuid::Uuid;

use kindred_shared::clients::db::DbPool;
use kindred_shared::errors::{AppError, AppResult};

use super::{ProfileStore, RelationshipLedger};
use crate::matching::pair::PairKey;
use crate::models::{
    Context, EdgeState, MatchDenial, MatchRecord, NewEdge, NewReport, PairRequest, ProfileRecord,
    RelationshipEdge, Report,
};
use crate::schema::{match_denials, matches, pair_requests, profiles, relationship_edges, reports};

/// Postgres-backed profile store and relationship ledger.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Run a diesel closure on a pooled connection off the async runtime.
    async fn run<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut PgConnection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| AppError::unavailable(format!("database pool: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| AppError::internal(format!("database task failed: {e}")))?
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn profile(&self, user_id: Uuid, context: Context) -> AppResult<Option<ProfileRecord>> {
        self.run(move |conn| {
            let record = profiles::table
                .find((user_id, context))
                .select(ProfileRecord::as_select())
                .first(conn)
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn profiles_page(
        &self,
        context: Context,
        after: Option<Uuid>,
        limit: usize,
    ) -> AppResult<Vec<ProfileRecord>> {
        self.run(move |conn| {
            let mut query: profiles::BoxedQuery<'static, Pg> = profiles::table
                .filter(profiles::context.eq(context))
                .into_boxed();
            if let Some(after) = after {
                query = query.filter(profiles::user_id.gt(after));
            }
            let page = query
                .order(profiles::user_id.asc())
                .limit(limit as i64)
                .select(ProfileRecord::as_select())
                .load(conn)?;
            Ok(page)
        })
        .await
    }

    async fn update_location(&self, user_id: Uuid, latitude: f64, longitude: f64) -> AppResult<usize> {
        self.run(move |conn| {
            let touched = diesel::update(profiles::table.filter(profiles::user_id.eq(user_id)))
                .set((
                    profiles::latitude.eq(Some(latitude)),
                    profiles::longitude.eq(Some(longitude)),
                    profiles::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
            Ok(touched)
        })
        .await
    }

    async fn ping(&self) -> AppResult<()> {
        self.run(|conn| {
            diesel::sql_query("SELECT 1").execute(conn)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl RelationshipLedger for PgStore {
    async fn edges(&self, owner: Uuid) -> AppResult<Vec<RelationshipEdge>> {
        self.run(move |conn| {
            let edges = relationship_edges::table
                .filter(relationship_edges::owner_id.eq(owner))
                .order(relationship_edges::created_at.asc())
                .load::<RelationshipEdge>(conn)?;
            Ok(edges)
        })
        .await
    }

    async fn edges_between(&self, owner: Uuid, counterpart: Uuid) -> AppResult<Vec<RelationshipEdge>> {
        self.run(move |conn| {
            let edges = relationship_edges::table
                .filter(relationship_edges::owner_id.eq(owner))
                .filter(relationship_edges::counterpart_id.eq(counterpart))
                .load::<RelationshipEdge>(conn)?;
            Ok(edges)
        })
        .await
    }

    async fn edges_for_request(&self, owner: Uuid, request_id: Uuid) -> AppResult<Vec<RelationshipEdge>> {
        self.run(move |conn| {
            let edges = relationship_edges::table
                .filter(relationship_edges::owner_id.eq(owner))
                .filter(relationship_edges::request_id.eq(request_id))
                .load::<RelationshipEdge>(conn)?;
            Ok(edges)
        })
        .await
    }

    async fn put_edge(&self, edge: NewEdge) -> AppResult<RelationshipEdge> {
        self.run(move |conn| {
            diesel::insert_into(relationship_edges::table)
                .values(&edge)
                .on_conflict((
                    relationship_edges::owner_id,
                    relationship_edges::request_id,
                    relationship_edges::state,
                ))
                .do_nothing()
                .execute(conn)?;

            let stored = relationship_edges::table
                .filter(relationship_edges::owner_id.eq(edge.owner_id))
                .filter(relationship_edges::request_id.eq(edge.request_id))
                .filter(relationship_edges::state.eq(edge.state))
                .first::<RelationshipEdge>(conn)?;
            Ok(stored)
        })
        .await
    }

    async fn delete_edge(&self, owner: Uuid, request_id: Uuid, state: EdgeState) -> AppResult<bool> {
        self.run(move |conn| {
            let deleted = diesel::delete(
                relationship_edges::table
                    .filter(relationship_edges::owner_id.eq(owner))
                    .filter(relationship_edges::request_id.eq(request_id))
                    .filter(relationship_edges::state.eq(state)),
            )
            .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn claim_request(&self, request: PairRequest) -> AppResult<PairRequest> {
        self.run(move |conn| {
            diesel::insert_into(pair_requests::table)
                .values(&request)
                .on_conflict(pair_requests::pair_key)
                .do_nothing()
                .execute(conn)?;

            let stored = pair_requests::table
                .find(&request.pair_key)
                .first::<PairRequest>(conn)?;
            Ok(stored)
        })
        .await
    }

    async fn pair_request(&self, pair: &PairKey) -> AppResult<Option<PairRequest>> {
        let key = pair.as_str().to_string();
        self.run(move |conn| {
            let stored = pair_requests::table
                .find(key)
                .first::<PairRequest>(conn)
                .optional()?;
            Ok(stored)
        })
        .await
    }

    async fn pair_requests_involving(&self, user: Uuid) -> AppResult<Vec<PairRequest>> {
        self.run(move |conn| {
            let requests = pair_requests::table
                .filter(pair_requests::sender_id.eq(user).or(pair_requests::receiver_id.eq(user)))
                .load::<PairRequest>(conn)?;
            Ok(requests)
        })
        .await
    }

    async fn insert_match(&self, record: MatchRecord) -> AppResult<bool> {
        self.run(move |conn| {
            let inserted = diesel::insert_into(matches::table)
                .values(&record)
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn find_match(&self, pair: &PairKey) -> AppResult<Option<MatchRecord>> {
        let key = pair.as_str().to_string();
        self.run(move |conn| {
            let record = matches::table.find(key).first::<MatchRecord>(conn).optional()?;
            Ok(record)
        })
        .await
    }

    async fn matches_involving(&self, user: Uuid) -> AppResult<Vec<MatchRecord>> {
        self.run(move |conn| {
            let records = matches::table
                .filter(matches::user_a_id.eq(user).or(matches::user_b_id.eq(user)))
                .order(matches::created_at.desc())
                .load::<MatchRecord>(conn)?;
            Ok(records)
        })
        .await
    }

    async fn insert_denial(&self, denial: MatchDenial) -> AppResult<bool> {
        self.run(move |conn| {
            let inserted = diesel::insert_into(match_denials::table)
                .values(&denial)
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn find_denial(&self, pair: &PairKey) -> AppResult<Option<MatchDenial>> {
        let key = pair.as_str().to_string();
        self.run(move |conn| {
            let denial = match_denials::table
                .find(key)
                .first::<MatchDenial>(conn)
                .optional()?;
            Ok(denial)
        })
        .await
    }

    async fn denials_involving(&self, user: Uuid) -> AppResult<Vec<MatchDenial>> {
        self.run(move |conn| {
            let denials = match_denials::table
                .filter(match_denials::denier_id.eq(user).or(match_denials::sender_id.eq(user)))
                .load::<MatchDenial>(conn)?;
            Ok(denials)
        })
        .await
    }

    async fn append_report(&self, report: NewReport) -> AppResult<()> {
        self.run(move |conn| {
            diesel::insert_into(reports::table)
                .values(&report)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn reports_involving(&self, user: Uuid) -> AppResult<Vec<Report>> {
        self.run(move |conn| {
            let found = reports::table
                .filter(reports::reporter_id.eq(user).or(reports::reported_id.eq(user)))
                .order(reports::created_at.asc())
                .load::<Report>(conn)?;
            Ok(found)
        })
        .await
    }
}
