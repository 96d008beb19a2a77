//! Connection request state machine.
//!
//! Per unordered pair: no relation, then a pending request from one side,
//! then accepted or denied; an accepted pair can later be unmatched. Denied
//! and unmatched pairs are permanent.
//!
//! The ledger has no multi-document transactions, so every transition is a
//! sequence of idempotent writes followed by a read-back. A transition that
//! stopped halfway is finished by invoking it again. Races between the two
//! members of a pair are settled by the insert-if-absent [`PairRequest`]
//! claim: whoever claims second is told the other side's request is already
//! pending, and that request stays open for them to accept or deny.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use kindred_shared::errors::{AppError, AppResult, ErrorCode};

use super::discovery::own_profile;
use crate::events::publisher;
use crate::events::EventPublisher;
use crate::matching::pair::PairKey;
use crate::models::{
    Context, EdgeState, GeoPoint, MatchDenial, MatchRecord, NewEdge, NewReport, PairRequest, Profile,
    ProfileView, RelationshipEdge, ReportScope,
};
use crate::store::{ProfileStore, RelationshipLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// Every write of the transition was performed by this call.
    Applied,
    /// Some writes were already in place and the missing ones were added.
    Repaired,
    /// Nothing left to do.
    AlreadyApplied,
    /// The receiver accepted while the request was still being written.
    Matched,
}

impl TransitionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionOutcome::Applied => "applied",
            TransitionOutcome::Repaired => "repaired",
            TransitionOutcome::AlreadyApplied => "already_applied",
            TransitionOutcome::Matched => "matched",
        }
    }

    fn from_progress(written_before: usize, total: usize) -> Self {
        match written_before {
            0 => TransitionOutcome::Applied,
            n if n >= total => TransitionOutcome::AlreadyApplied,
            _ => TransitionOutcome::Repaired,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionReceipt {
    pub request_id: Uuid,
    pub outcome: TransitionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportReceipt {
    /// Ledger copies that were written, out of three.
    pub recorded: usize,
}

/// One row of a user's chat list.
#[derive(Debug, Clone, Serialize)]
pub struct MatchSummary {
    pub match_id: String,
    pub request_id: Uuid,
    pub other_id: Uuid,
    pub context: Context,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileView>,
}

fn record_transition(operation: &'static str, outcome: TransitionOutcome) {
    counter!(
        "lifecycle_transitions_total",
        "operation" => operation,
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

fn partial_write(request_id: Uuid, step: &'static str, cause: &AppError) -> AppError {
    tracing::warn!(
        request_id = %request_id,
        step,
        error = %cause,
        "transition stopped after a partial write"
    );
    AppError::with_details(
        ErrorCode::PartialWriteDetected,
        "transition was only partially written, retry to complete it",
        json!({ "request_id": request_id, "step": step }),
    )
}

fn unverified(request_id: Uuid, missing: &'static str) -> AppError {
    tracing::warn!(request_id = %request_id, missing, "transition read-back failed");
    AppError::with_details(
        ErrorCode::PartialWriteDetected,
        "transition could not be verified, retry to complete it",
        json!({ "request_id": request_id, "missing": missing }),
    )
}

fn has_state(edges: &[RelationshipEdge], state: EdgeState) -> bool {
    edges.iter().any(|e| e.state == state)
}

/// Rebuild the request record from a receiver's edge when the pair claim
/// is missing.
fn request_from_edge(edge: &RelationshipEdge) -> PairRequest {
    PairRequest {
        pair_key: PairKey::new(edge.owner_id, edge.counterpart_id).into_string(),
        request_id: edge.request_id,
        sender_id: edge.counterpart_id,
        receiver_id: edge.owner_id,
        context: edge.context,
        created_at: edge.created_at,
    }
}

pub struct LifecycleService {
    profiles: Arc<dyn ProfileStore>,
    ledger: Arc<dyn RelationshipLedger>,
    events: Arc<dyn EventPublisher>,
}

impl LifecycleService {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        ledger: Arc<dyn RelationshipLedger>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            profiles,
            ledger,
            events,
        }
    }

    pub fn events(&self) -> &dyn EventPublisher {
        self.events.as_ref()
    }

    // --- send ---

    pub async fn send_request(
        &self,
        sender: Uuid,
        receiver: Uuid,
        context: Context,
    ) -> AppResult<TransitionReceipt> {
        if sender == receiver {
            return Err(AppError::new(
                ErrorCode::CannotTargetSelf,
                "cannot send a request to yourself",
            ));
        }

        let sender_profile = own_profile(self.profiles.as_ref(), sender, context).await?;
        let receiver_profile = self.receiver_profile(receiver, context).await?;

        let pair = PairKey::new(sender, receiver);
        self.ensure_not_suppressed(&pair, sender, receiver).await?;
        if self.ledger.find_match(&pair).await?.is_some() {
            return Err(AppError::new(ErrorCode::AlreadyMatched, "already matched with this user"));
        }

        let proposed = PairRequest::new(sender, receiver, context);
        let proposed_id = proposed.request_id;
        let claimed = match self.ledger.pair_request(&pair).await? {
            Some(existing) => existing,
            None => self.ledger.claim_request(proposed).await?,
        };

        if claimed.sender_id != sender {
            // The other side asked first; their request stays pending.
            let repaired = self.write_pending_edges(&claimed).await?;
            if let Some(record) = self.ledger.find_match(&pair).await? {
                self.clear_pending(&claimed).await?;
                return Err(AppError::with_details(
                    ErrorCode::AlreadyMatched,
                    "already matched with this user",
                    json!({ "match_id": record.pair_key }),
                ));
            }
            tracing::info!(
                sender_id = %sender,
                receiver_id = %receiver,
                request_id = %claimed.request_id,
                repaired,
                "counterpart's request already pending"
            );
            return Err(AppError::with_details(
                ErrorCode::AlreadyRequested,
                "this user has already sent you a request",
                json!({ "request_id": claimed.request_id }),
            ));
        }

        let request_id = claimed.request_id;
        let fresh = request_id == proposed_id;
        let receiver_edges = self.ledger.edges_for_request(receiver, request_id).await?;
        let sender_edges = self.ledger.edges_for_request(sender, request_id).await?;
        let written_before = has_state(&receiver_edges, EdgeState::Received) as usize
            + has_state(&sender_edges, EdgeState::Sent) as usize;

        if !fresh && written_before == 2 {
            return Err(AppError::with_details(
                ErrorCode::AlreadyRequested,
                "a request to this user is already pending",
                json!({ "request_id": request_id }),
            ));
        }

        self.ledger
            .put_edge(NewEdge::new(
                receiver,
                sender,
                request_id,
                EdgeState::Received,
                claimed.context,
                Some(&ProfileView::from(&sender_profile)),
            ))
            .await
            .map_err(|e| partial_write(request_id, "receiver_received", &e))?;
        self.ledger
            .put_edge(NewEdge::new(
                sender,
                receiver,
                request_id,
                EdgeState::Sent,
                claimed.context,
                Some(&ProfileView::from(&receiver_profile)),
            ))
            .await
            .map_err(|e| partial_write(request_id, "sender_sent", &e))?;

        // An accept that raced the edge writes leaves pending edges behind.
        if let Some(record) = self.ledger.find_match(&pair).await? {
            self.clear_pending(&claimed).await?;
            record_transition("send", TransitionOutcome::Matched);
            return Ok(TransitionReceipt {
                request_id,
                outcome: TransitionOutcome::Matched,
                match_id: Some(record.pair_key),
            });
        }

        if !has_state(&self.ledger.edges_for_request(receiver, request_id).await?, EdgeState::Received) {
            return Err(unverified(request_id, "receiver_received"));
        }
        if !has_state(&self.ledger.edges_for_request(sender, request_id).await?, EdgeState::Sent) {
            return Err(unverified(request_id, "sender_sent"));
        }

        let outcome = if fresh {
            TransitionOutcome::Applied
        } else {
            TransitionOutcome::from_progress(written_before, 2)
        };
        record_transition("send", outcome);

        if outcome == TransitionOutcome::Applied {
            publisher::publish_request_sent(
                self.events(),
                request_id,
                sender,
                receiver,
                claimed.context,
                &sender_profile.name,
            )
            .await;
        }

        tracing::info!(
            request_id = %request_id,
            sender_id = %sender,
            receiver_id = %receiver,
            outcome = outcome.as_str(),
            "request sent"
        );

        Ok(TransitionReceipt {
            request_id,
            outcome,
            match_id: None,
        })
    }

    async fn receiver_profile(&self, receiver: Uuid, context: Context) -> AppResult<Profile> {
        let record = self.profiles.profile(receiver, context).await?.ok_or_else(|| {
            AppError::new(
                ErrorCode::ProfileNotFound,
                format!("recipient has no {context} profile"),
            )
        })?;

        Profile::try_from(record).map_err(|defect| {
            AppError::new(
                ErrorCode::ProfileIncomplete,
                format!("recipient's {context} profile is incomplete: {defect}"),
            )
        })
    }

    /// Denied, unmatched and reported pairs cannot be contacted again.
    async fn ensure_not_suppressed(&self, pair: &PairKey, user: Uuid, other: Uuid) -> AppResult<()> {
        if self.ledger.find_denial(pair).await?.is_some() {
            return Err(AppError::new(ErrorCode::PairSuppressed, "request was denied"));
        }

        for (owner, counterpart) in [(user, other), (other, user)] {
            let terminal = self
                .ledger
                .edges_between(owner, counterpart)
                .await?
                .iter()
                .any(|e| e.state.is_terminal());
            if terminal {
                return Err(AppError::new(ErrorCode::PairSuppressed, "pair is closed"));
            }
        }

        let reported = self
            .ledger
            .reports_involving(user)
            .await?
            .iter()
            .any(|r| r.counterpart_of(user) == Some(other));
        if reported {
            return Err(AppError::new(ErrorCode::PairSuppressed, "pair has been reported"));
        }

        Ok(())
    }

    // --- accept ---

    pub async fn accept_request(&self, receiver: Uuid, request_id: Uuid) -> AppResult<TransitionReceipt> {
        let request = self.resolve_request(receiver, request_id).await?;
        if request.sender_id == receiver || request.receiver_id != receiver {
            return Err(AppError::new(
                ErrorCode::SelfAcceptDenied,
                "cannot accept your own request",
            ));
        }

        let pair = PairKey::new(request.sender_id, request.receiver_id);
        if self.ledger.find_denial(&pair).await?.is_some() {
            return Err(AppError::new(ErrorCode::PairSuppressed, "request was denied"));
        }
        let unmatched = self
            .ledger
            .edges_between(receiver, request.sender_id)
            .await?
            .iter()
            .any(|e| e.state == EdgeState::Unmatched);
        if unmatched {
            return Err(AppError::new(ErrorCode::PairSuppressed, "pair was unmatched"));
        }

        let (outcome, record) = self.complete_accept(&request).await?;
        record_transition("accept", outcome);

        if outcome == TransitionOutcome::Applied {
            publisher::publish_request_accepted(
                self.events(),
                request_id,
                &record.pair_key,
                request.sender_id,
                receiver,
            )
            .await;
        }

        tracing::info!(
            request_id = %request_id,
            receiver_id = %receiver,
            outcome = outcome.as_str(),
            "request accepted"
        );

        Ok(TransitionReceipt {
            request_id,
            outcome,
            match_id: Some(record.pair_key),
        })
    }

    /// Find the request `request_id` that `user` takes part in.
    async fn resolve_request(&self, user: Uuid, request_id: Uuid) -> AppResult<PairRequest> {
        let claimed = self
            .ledger
            .pair_requests_involving(user)
            .await?
            .into_iter()
            .find(|r| r.request_id == request_id);
        if let Some(request) = claimed {
            return Ok(request);
        }

        self.ledger
            .edges_for_request(user, request_id)
            .await?
            .iter()
            .find(|e| e.state == EdgeState::Received)
            .map(request_from_edge)
            .ok_or_else(|| AppError::new(ErrorCode::RequestNotFound, "request not found"))
    }

    /// Receiver's accepted edge, the Match, sender's accepted edge, then the
    /// pending edges are removed. Every step is safe to repeat.
    async fn complete_accept(&self, request: &PairRequest) -> AppResult<(TransitionOutcome, MatchRecord)> {
        let (sender, receiver, request_id) = (request.sender_id, request.receiver_id, request.request_id);
        let pair = PairKey::new(sender, receiver);

        let receiver_edges = self.ledger.edges_for_request(receiver, request_id).await?;
        let sender_edges = self.ledger.edges_for_request(sender, request_id).await?;
        let existing_match = self.ledger.find_match(&pair).await?;
        let written_before = has_state(&receiver_edges, EdgeState::Accepted) as usize
            + existing_match.is_some() as usize
            + has_state(&sender_edges, EdgeState::Accepted) as usize
            + !has_state(&receiver_edges, EdgeState::Received) as usize
            + !has_state(&sender_edges, EdgeState::Sent) as usize;

        if let Some(existing) = &existing_match {
            if existing.request_id != request_id {
                return Err(AppError::new(ErrorCode::AlreadyMatched, "pair matched through another request"));
            }
        }

        let sender_view = self.view_of(sender, request.context).await;
        let receiver_view = self.view_of(receiver, request.context).await;

        self.ledger
            .put_edge(NewEdge::new(
                receiver,
                sender,
                request_id,
                EdgeState::Accepted,
                request.context,
                sender_view.as_ref(),
            ))
            .await?;

        self.ledger
            .insert_match(MatchRecord::new(request))
            .await
            .map_err(|e| partial_write(request_id, "match", &e))?;

        self.ledger
            .put_edge(NewEdge::new(
                sender,
                receiver,
                request_id,
                EdgeState::Accepted,
                request.context,
                receiver_view.as_ref(),
            ))
            .await
            .map_err(|e| partial_write(request_id, "sender_accepted", &e))?;

        self.clear_pending(request).await?;

        if !has_state(&self.ledger.edges_for_request(receiver, request_id).await?, EdgeState::Accepted) {
            return Err(unverified(request_id, "receiver_accepted"));
        }
        if !has_state(&self.ledger.edges_for_request(sender, request_id).await?, EdgeState::Accepted) {
            return Err(unverified(request_id, "sender_accepted"));
        }
        let record = self
            .ledger
            .find_match(&pair)
            .await?
            .ok_or_else(|| unverified(request_id, "match"))?;

        Ok((TransitionOutcome::from_progress(written_before, 5), record))
    }

    /// Write whichever pending edges of `request` are missing. Returns how
    /// many were written.
    async fn write_pending_edges(&self, request: &PairRequest) -> AppResult<usize> {
        let (sender, receiver, request_id) = (request.sender_id, request.receiver_id, request.request_id);
        let mut written = 0;

        if !has_state(&self.ledger.edges_for_request(receiver, request_id).await?, EdgeState::Received) {
            let sender_view = self.view_of(sender, request.context).await;
            self.ledger
                .put_edge(NewEdge::new(
                    receiver,
                    sender,
                    request_id,
                    EdgeState::Received,
                    request.context,
                    sender_view.as_ref(),
                ))
                .await
                .map_err(|e| partial_write(request_id, "receiver_received", &e))?;
            written += 1;
        }

        if !has_state(&self.ledger.edges_for_request(sender, request_id).await?, EdgeState::Sent) {
            let receiver_view = self.view_of(receiver, request.context).await;
            self.ledger
                .put_edge(NewEdge::new(
                    sender,
                    receiver,
                    request_id,
                    EdgeState::Sent,
                    request.context,
                    receiver_view.as_ref(),
                ))
                .await
                .map_err(|e| partial_write(request_id, "sender_sent", &e))?;
            written += 1;
        }

        Ok(written)
    }

    async fn clear_pending(&self, request: &PairRequest) -> AppResult<()> {
        let request_id = request.request_id;
        self.ledger
            .delete_edge(request.receiver_id, request_id, EdgeState::Received)
            .await
            .map_err(|e| partial_write(request_id, "receiver_received_cleanup", &e))?;
        self.ledger
            .delete_edge(request.sender_id, request_id, EdgeState::Sent)
            .await
            .map_err(|e| partial_write(request_id, "sender_sent_cleanup", &e))?;
        Ok(())
    }

    async fn view_of(&self, user: Uuid, context: Context) -> Option<ProfileView> {
        match self.profiles.profile(user, context).await {
            Ok(Some(record)) => Profile::try_from(record).ok().map(|p| ProfileView::from(&p)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(user_id = %user, error = %e, "profile snapshot unavailable");
                None
            }
        }
    }

    // --- deny ---

    pub async fn deny_request(&self, receiver: Uuid, request_id: Uuid) -> AppResult<TransitionReceipt> {
        let request = self.resolve_request(receiver, request_id).await?;
        if request.sender_id == receiver || request.receiver_id != receiver {
            return Err(AppError::new(
                ErrorCode::SelfAcceptDenied,
                "cannot deny your own request",
            ));
        }

        let sender = request.sender_id;
        let pair = PairKey::new(sender, receiver);
        if let Some(record) = self.ledger.find_match(&pair).await? {
            if record.request_id == request_id {
                return Err(AppError::new(ErrorCode::AlreadyMatched, "request was already accepted"));
            }
        }

        let receiver_edges = self.ledger.edges_for_request(receiver, request_id).await?;
        let existing_denial = self.ledger.find_denial(&pair).await?;
        let written_before = has_state(&receiver_edges, EdgeState::Denied) as usize
            + existing_denial.is_some() as usize
            + !has_state(&receiver_edges, EdgeState::Received) as usize;

        let sender_view = self.view_of(sender, request.context).await;
        self.ledger
            .put_edge(NewEdge::new(
                receiver,
                sender,
                request_id,
                EdgeState::Denied,
                request.context,
                sender_view.as_ref(),
            ))
            .await?;
        self.ledger
            .insert_denial(MatchDenial::new(&request))
            .await
            .map_err(|e| partial_write(request_id, "denial", &e))?;
        self.ledger
            .delete_edge(receiver, request_id, EdgeState::Received)
            .await
            .map_err(|e| partial_write(request_id, "receiver_received_cleanup", &e))?;

        if !has_state(&self.ledger.edges_for_request(receiver, request_id).await?, EdgeState::Denied) {
            return Err(unverified(request_id, "receiver_denied"));
        }
        if self.ledger.find_denial(&pair).await?.is_none() {
            return Err(unverified(request_id, "denial"));
        }

        let outcome = TransitionOutcome::from_progress(written_before, 3);
        record_transition("deny", outcome);
        if outcome == TransitionOutcome::Applied {
            publisher::publish_request_denied(self.events(), request_id, sender, receiver).await;
        }

        tracing::info!(
            request_id = %request_id,
            receiver_id = %receiver,
            outcome = outcome.as_str(),
            "request denied"
        );

        Ok(TransitionReceipt {
            request_id,
            outcome,
            match_id: None,
        })
    }

    // --- unmatch ---

    pub async fn unmatch(&self, user: Uuid, other: Uuid) -> AppResult<TransitionReceipt> {
        if user == other {
            return Err(AppError::new(ErrorCode::CannotTargetSelf, "cannot unmatch yourself"));
        }

        let pair = PairKey::new(user, other);
        let record = self
            .ledger
            .find_match(&pair)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::MatchNotFound, "no match with this user"))?;
        let request_id = record.request_id;

        let mut written_before = 0;
        for (step, (owner, counterpart)) in [(user, other), (other, user)].into_iter().enumerate() {
            let present = self
                .ledger
                .edges_between(owner, counterpart)
                .await?
                .iter()
                .any(|e| e.state == EdgeState::Unmatched);
            if present {
                written_before += 1;
                continue;
            }

            let write = self
                .ledger
                .put_edge(NewEdge::new(
                    owner,
                    counterpart,
                    request_id,
                    EdgeState::Unmatched,
                    record.context,
                    None,
                ))
                .await;
            match write {
                Ok(_) => {}
                Err(e) if step == 0 => return Err(e),
                Err(e) => return Err(partial_write(request_id, "counterpart_unmatched", &e)),
            }
        }

        for owner in [user, other] {
            self.ledger
                .delete_edge(owner, request_id, EdgeState::Accepted)
                .await
                .map_err(|e| partial_write(request_id, "accepted_cleanup", &e))?;
        }

        let outcome = TransitionOutcome::from_progress(written_before, 2);
        record_transition("unmatch", outcome);
        if outcome == TransitionOutcome::Applied {
            publisher::publish_match_unmatched(self.events(), &record.pair_key, user, other).await;
        }

        tracing::info!(
            match_id = %record.pair_key,
            user_id = %user,
            outcome = outcome.as_str(),
            "match removed"
        );

        Ok(TransitionReceipt {
            request_id,
            outcome,
            match_id: Some(record.pair_key),
        })
    }

    // --- report ---

    /// Append the report to both participants' ledgers and the global one.
    /// Copies are independent; the call only fails when none was written.
    pub async fn report(&self, reporter: Uuid, reported: Uuid) -> AppResult<ReportReceipt> {
        if reporter == reported {
            return Err(AppError::new(ErrorCode::CannotTargetSelf, "cannot report yourself"));
        }

        let scopes = [
            ReportScope::Participant(reporter),
            ReportScope::Participant(reported),
            ReportScope::Global,
        ];
        let mut recorded = 0;
        let mut last_error = None;
        for scope in scopes {
            match self.ledger.append_report(NewReport::new(scope, reporter, reported)).await {
                Ok(()) => recorded += 1,
                Err(e) => {
                    tracing::warn!(
                        reporter_id = %reporter,
                        reported_id = %reported,
                        scope = ?scope,
                        error = %e,
                        "report copy not written"
                    );
                    counter!("report_copy_failures_total").increment(1);
                    last_error = Some(e);
                }
            }
        }

        if recorded == 0 {
            let detail = last_error.map(|e| e.to_string()).unwrap_or_default();
            return Err(AppError::unavailable(format!("report could not be recorded: {detail}")));
        }

        publisher::publish_user_reported(self.events(), reporter, reported).await;
        tracing::info!(reporter_id = %reporter, reported_id = %reported, recorded, "user reported");

        Ok(ReportReceipt { recorded })
    }

    // --- location ---

    pub async fn update_location(&self, user: Uuid, latitude: f64, longitude: f64) -> AppResult<usize> {
        if !(GeoPoint { latitude, longitude }).is_valid() {
            return Err(AppError::Validation("coordinates out of range".into()));
        }

        let touched = self.profiles.update_location(user, latitude, longitude).await?;
        if touched == 0 {
            return Err(AppError::new(ErrorCode::ProfileNotFound, "no profile to update"));
        }

        tracing::debug!(user_id = %user, touched, "location refreshed");
        Ok(touched)
    }

    // --- queries ---

    /// Pending requests addressed to `user`, newest first.
    pub async fn list_incoming_requests(&self, user: Uuid) -> AppResult<Vec<RelationshipEdge>> {
        let mut incoming: Vec<RelationshipEdge> = self
            .ledger
            .edges(user)
            .await?
            .into_iter()
            .filter(|e| e.state == EdgeState::Received)
            .collect();
        incoming.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(incoming)
    }

    /// The chat list: matches minus unmatched and reported counterparts.
    pub async fn list_matches(&self, user: Uuid) -> AppResult<Vec<MatchSummary>> {
        let edges = self.ledger.edges(user).await?;
        let mut hidden: HashSet<Uuid> = edges
            .iter()
            .filter(|e| e.state == EdgeState::Unmatched)
            .map(|e| e.counterpart_id)
            .collect();
        for report in self.ledger.reports_involving(user).await? {
            hidden.extend(report.counterpart_of(user));
        }

        let summaries = self
            .ledger
            .matches_involving(user)
            .await?
            .into_iter()
            .filter_map(|record| {
                let other_id = record.other(user)?;
                if hidden.contains(&other_id) {
                    return None;
                }
                let profile = edges
                    .iter()
                    .find(|e| e.request_id == record.request_id && e.state == EdgeState::Accepted)
                    .and_then(|e| e.snapshot.clone())
                    .and_then(|snapshot| serde_json::from_value(snapshot).ok());
                Some(MatchSummary {
                    match_id: record.pair_key,
                    request_id: record.request_id,
                    other_id,
                    context: record.context,
                    created_at: record.created_at,
                    profile,
                })
            })
            .collect();

        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::publisher::recording::RecordingPublisher;
    use crate::services::discovery::{DiscoveryConfig, DiscoveryService};
    use crate::services::fixtures::{person, seed_everywhere};
    use crate::store::MemoryStore;
    use kindred_shared::types::event::routing_keys;

    struct Harness {
        store: Arc<MemoryStore>,
        events: Arc<RecordingPublisher>,
        lifecycle: LifecycleService,
        discovery: DiscoveryService,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(RecordingPublisher::default());
        let lifecycle = LifecycleService::new(store.clone(), store.clone(), events.clone());
        let discovery = DiscoveryService::new(store.clone(), store.clone(), DiscoveryConfig::default());
        Harness {
            store,
            events,
            lifecycle,
            discovery,
        }
    }

    fn pair(h: &Harness) -> (Uuid, Uuid) {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        seed_everywhere(&h.store, a, "Ana");
        seed_everywhere(&h.store, b, "Ben");
        (a, b)
    }

    async fn states(h: &Harness, owner: Uuid) -> Vec<EdgeState> {
        let mut states: Vec<EdgeState> = h.store.edges(owner).await.unwrap().iter().map(|e| e.state).collect();
        states.sort_by_key(|s| s.as_str());
        states
    }

    fn pending_id(err: &AppError) -> Option<String> {
        match err {
            AppError::Known { details: Some(details), .. } => {
                details["request_id"].as_str().map(str::to_string)
            }
            _ => None,
        }
    }

    #[tokio::test]
    async fn send_writes_both_edges_with_snapshots() {
        let h = harness();
        let (a, b) = pair(&h);

        let receipt = h.lifecycle.send_request(a, b, Context::Attraction).await.unwrap();
        assert_eq!(receipt.outcome, TransitionOutcome::Applied);

        let sent = h.store.edges(a).await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].state, EdgeState::Sent);
        assert_eq!(sent[0].snapshot.as_ref().unwrap()["name"], "Ben");

        let received = h.lifecycle.list_incoming_requests(b).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].request_id, receipt.request_id);
        assert_eq!(received[0].snapshot.as_ref().unwrap()["name"], "Ana");

        assert_eq!(h.events.routing_keys(), vec![routing_keys::DISCOVERY_REQUEST_SENT]);
    }

    #[tokio::test]
    async fn send_preconditions() {
        let h = harness();
        let (a, b) = pair(&h);
        let stranger = Uuid::new_v4();

        let err = h.lifecycle.send_request(a, a, Context::Friend).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CannotTargetSelf);

        let err = h.lifecycle.send_request(stranger, a, Context::Friend).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProfileIncomplete);

        let err = h.lifecycle.send_request(a, stranger, Context::Friend).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProfileNotFound);

        let broken = person(Context::Friend).without_location().seed(&h.store);
        let err = h.lifecycle.send_request(a, broken, Context::Friend).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProfileIncomplete);

        h.lifecycle.send_request(a, b, Context::Friend).await.unwrap();
        let err = h.lifecycle.send_request(a, b, Context::Friend).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyRequested);
    }

    #[tokio::test]
    async fn send_then_accept_matches_and_clears_both_contexts() {
        let h = harness();
        let (a, b) = pair(&h);

        let sent = h.lifecycle.send_request(a, b, Context::Attraction).await.unwrap();
        let accepted = h.lifecycle.accept_request(b, sent.request_id).await.unwrap();
        assert_eq!(accepted.outcome, TransitionOutcome::Applied);
        let match_id = accepted.match_id.unwrap();
        assert_eq!(match_id, PairKey::new(a, b).into_string());

        assert_eq!(states(&h, a).await, vec![EdgeState::Accepted]);
        assert_eq!(states(&h, b).await, vec![EdgeState::Accepted]);

        for context in Context::ALL {
            let for_a = h.discovery.find_candidates(a, context).await.unwrap();
            let for_b = h.discovery.find_candidates(b, context).await.unwrap();
            assert!(for_a.iter().all(|v| v.user_id != b));
            assert!(for_b.iter().all(|v| v.user_id != a));
        }

        let chats = h.lifecycle.list_matches(a).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].other_id, b);
        assert_eq!(chats[0].profile.as_ref().unwrap().name, "Ben");

        let err = h.lifecycle.send_request(b, a, Context::Friend).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyMatched);
    }

    #[tokio::test]
    async fn accept_is_idempotent() {
        let h = harness();
        let (a, b) = pair(&h);
        let sent = h.lifecycle.send_request(a, b, Context::Friend).await.unwrap();

        h.lifecycle.accept_request(b, sent.request_id).await.unwrap();
        let again = h.lifecycle.accept_request(b, sent.request_id).await.unwrap();

        assert_eq!(again.outcome, TransitionOutcome::AlreadyApplied);
        assert_eq!(h.store.matches_involving(a).await.unwrap().len(), 1);
        assert_eq!(states(&h, a).await, vec![EdgeState::Accepted]);
        assert_eq!(states(&h, b).await, vec![EdgeState::Accepted]);
        assert_eq!(h.events.events(routing_keys::DISCOVERY_REQUEST_ACCEPTED).len(), 1);
    }

    #[tokio::test]
    async fn sender_cannot_accept_or_deny_own_request() {
        let h = harness();
        let (a, b) = pair(&h);
        let sent = h.lifecycle.send_request(a, b, Context::Friend).await.unwrap();

        let err = h.lifecycle.accept_request(a, sent.request_id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SelfAcceptDenied);
        let err = h.lifecycle.deny_request(a, sent.request_id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SelfAcceptDenied);

        let err = h.lifecycle.accept_request(b, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RequestNotFound);
    }

    #[tokio::test]
    async fn reverse_request_leaves_the_first_one_pending() {
        let h = harness();
        let (a, b) = pair(&h);

        let first = h.lifecycle.send_request(a, b, Context::Friend).await.unwrap();
        let err = h.lifecycle.send_request(b, a, Context::Friend).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyRequested);
        assert_eq!(pending_id(&err), Some(first.request_id.to_string()));

        assert!(h.store.matches_involving(a).await.unwrap().is_empty());
        assert_eq!(states(&h, a).await, vec![EdgeState::Sent]);
        assert_eq!(states(&h, b).await, vec![EdgeState::Received]);

        let accepted = h.lifecycle.accept_request(b, first.request_id).await.unwrap();
        assert_eq!(accepted.outcome, TransitionOutcome::Applied);
        assert_eq!(h.store.matches_involving(a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reverse_request_repairs_the_pending_edges() {
        let h = harness();
        let (a, b) = pair(&h);

        h.store.fail_writes_for(a);
        let err = h.lifecycle.send_request(a, b, Context::Friend).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PartialWriteDetected);
        h.store.heal();

        let err = h.lifecycle.send_request(b, a, Context::Friend).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyRequested);
        assert_eq!(states(&h, a).await, vec![EdgeState::Sent]);
        assert_eq!(states(&h, b).await, vec![EdgeState::Received]);
        assert!(h.store.matches_involving(a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn simultaneous_requests_leave_one_pending_request() {
        let h = harness();
        let (a, b) = pair(&h);

        let (from_a, from_b) = tokio::join!(
            h.lifecycle.send_request(a, b, Context::Attraction),
            h.lifecycle.send_request(b, a, Context::Attraction),
        );
        let (sent, receiver, err) = match (from_a, from_b) {
            (Ok(sent), Err(err)) => (sent, b, err),
            (Err(err), Ok(sent)) => (sent, a, err),
            other => panic!("expected one request and one rejection, got {other:?}"),
        };
        assert_eq!(sent.outcome, TransitionOutcome::Applied);
        assert_eq!(err.code(), ErrorCode::AlreadyRequested);
        assert_eq!(pending_id(&err), Some(sent.request_id.to_string()));

        assert!(h.store.matches_involving(a).await.unwrap().is_empty());
        let incoming = h.lifecycle.list_incoming_requests(receiver).await.unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].request_id, sent.request_id);

        h.lifecycle.accept_request(receiver, sent.request_id).await.unwrap();
        assert_eq!(h.store.matches_involving(a).await.unwrap().len(), 1);
        assert_eq!(states(&h, a).await, vec![EdgeState::Accepted]);
        assert_eq!(states(&h, b).await, vec![EdgeState::Accepted]);
    }

    #[tokio::test]
    async fn pending_request_hides_both_sides_in_every_context() {
        let h = harness();
        let (a, b) = pair(&h);
        let before = h.discovery.find_candidates(a, Context::Attraction).await.unwrap();
        assert!(before.iter().any(|v| v.user_id == b));

        h.lifecycle.send_request(a, b, Context::Attraction).await.unwrap();

        for context in Context::ALL {
            let for_a = h.discovery.find_candidates(a, context).await.unwrap();
            let for_b = h.discovery.find_candidates(b, context).await.unwrap();
            assert!(for_a.iter().all(|v| v.user_id != b));
            assert!(for_b.iter().all(|v| v.user_id != a));
        }
    }

    #[tokio::test]
    async fn half_written_request_still_hides_both_sides() {
        let h = harness();
        let (a, b) = pair(&h);

        h.store.fail_writes_for(a);
        let err = h.lifecycle.send_request(a, b, Context::Friend).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PartialWriteDetected);
        assert!(states(&h, a).await.is_empty());
        assert_eq!(states(&h, b).await, vec![EdgeState::Received]);

        for context in Context::ALL {
            let for_a = h.discovery.find_candidates(a, context).await.unwrap();
            let for_b = h.discovery.find_candidates(b, context).await.unwrap();
            assert!(for_a.iter().all(|v| v.user_id != b));
            assert!(for_b.iter().all(|v| v.user_id != a));
        }
    }

    #[tokio::test]
    async fn denied_pair_never_reappears_after_location_update() {
        let h = harness();
        let (a, b) = pair(&h);

        let sent = h.lifecycle.send_request(a, b, Context::Attraction).await.unwrap();
        let denied = h.lifecycle.deny_request(b, sent.request_id).await.unwrap();
        assert_eq!(denied.outcome, TransitionOutcome::Applied);

        let again = h.lifecycle.deny_request(b, sent.request_id).await.unwrap();
        assert_eq!(again.outcome, TransitionOutcome::AlreadyApplied);

        h.lifecycle.update_location(a, 40.7130, -74.0062).await.unwrap();
        h.lifecycle.update_location(b, 40.7131, -74.0061).await.unwrap();

        for context in Context::ALL {
            assert!(h.discovery.find_candidates(a, context).await.unwrap().is_empty());
            assert!(h.discovery.find_candidates(b, context).await.unwrap().is_empty());
        }

        let err = h.lifecycle.send_request(b, a, Context::Friend).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PairSuppressed);
        let err = h.lifecycle.accept_request(b, sent.request_id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PairSuppressed);
    }

    #[tokio::test]
    async fn partial_send_is_detected_and_repaired() {
        let h = harness();
        let (a, b) = pair(&h);

        h.store.fail_writes_for(a);
        let err = h.lifecycle.send_request(a, b, Context::Friend).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PartialWriteDetected);
        assert_eq!(states(&h, b).await, vec![EdgeState::Received]);

        h.store.heal();
        let repaired = h.lifecycle.send_request(a, b, Context::Friend).await.unwrap();
        assert_eq!(repaired.outcome, TransitionOutcome::Repaired);
        assert_eq!(states(&h, a).await, vec![EdgeState::Sent]);
        assert!(h.events.routing_keys().is_empty());
    }

    #[tokio::test]
    async fn partial_accept_is_repaired_without_a_second_match() {
        let h = harness();
        let (a, b) = pair(&h);
        let sent = h.lifecycle.send_request(a, b, Context::Friend).await.unwrap();

        h.store.fail_writes_for(a);
        let err = h.lifecycle.accept_request(b, sent.request_id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PartialWriteDetected);
        assert_eq!(h.store.matches_involving(b).await.unwrap().len(), 1);

        h.store.heal();
        let repaired = h.lifecycle.accept_request(b, sent.request_id).await.unwrap();
        assert_eq!(repaired.outcome, TransitionOutcome::Repaired);
        assert_eq!(h.store.matches_involving(b).await.unwrap().len(), 1);
        assert_eq!(states(&h, a).await, vec![EdgeState::Accepted]);
    }

    #[tokio::test]
    async fn unmatch_requires_a_match_and_hides_the_chat() {
        let h = harness();
        let (a, b) = pair(&h);

        let err = h.lifecycle.unmatch(a, b).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MatchNotFound);

        let sent = h.lifecycle.send_request(a, b, Context::Friend).await.unwrap();
        h.lifecycle.accept_request(b, sent.request_id).await.unwrap();

        let receipt = h.lifecycle.unmatch(a, b).await.unwrap();
        assert_eq!(receipt.outcome, TransitionOutcome::Applied);
        let again = h.lifecycle.unmatch(b, a).await.unwrap();
        assert_eq!(again.outcome, TransitionOutcome::AlreadyApplied);

        assert_eq!(states(&h, a).await, vec![EdgeState::Unmatched]);
        assert_eq!(states(&h, b).await, vec![EdgeState::Unmatched]);
        assert!(h.lifecycle.list_matches(a).await.unwrap().is_empty());
        assert!(h.lifecycle.list_matches(b).await.unwrap().is_empty());

        let err = h.lifecycle.send_request(a, b, Context::Attraction).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PairSuppressed);
    }

    #[tokio::test]
    async fn report_is_best_effort() {
        let h = harness();
        let (a, b) = pair(&h);

        h.store.fail_global_reports();
        let receipt = h.lifecycle.report(a, b).await.unwrap();
        assert_eq!(receipt.recorded, 2);
        assert_eq!(h.store.report_copies(ReportScope::Participant(b)).len(), 1);

        assert!(h.discovery.find_candidates(a, Context::Friend).await.unwrap().is_empty());
        assert!(h.discovery.find_candidates(b, Context::Friend).await.unwrap().is_empty());

        h.store.set_unavailable(true);
        let err = h.lifecycle.report(a, b).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StoreUnavailable);
    }

    #[tokio::test]
    async fn reported_match_leaves_the_chat_list() {
        let h = harness();
        let (a, b) = pair(&h);
        let sent = h.lifecycle.send_request(a, b, Context::Friend).await.unwrap();
        h.lifecycle.accept_request(b, sent.request_id).await.unwrap();

        h.lifecycle.report(b, a).await.unwrap();
        assert!(h.lifecycle.list_matches(a).await.unwrap().is_empty());
        assert!(h.lifecycle.list_matches(b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn report_counts_when_only_the_reported_copy_landed() {
        let h = harness();
        let (a, b) = pair(&h);
        let sent = h.lifecycle.send_request(a, b, Context::Friend).await.unwrap();
        h.lifecycle.accept_request(b, sent.request_id).await.unwrap();

        h.store.fail_writes_for(a);
        let receipt = h.lifecycle.report(a, b).await.unwrap();
        assert_eq!(receipt.recorded, 2);
        h.store.heal();
        assert!(h.store.report_copies(ReportScope::Participant(a)).is_empty());

        assert!(h.lifecycle.list_matches(a).await.unwrap().is_empty());
        assert!(h.discovery.find_candidates(a, Context::Attraction).await.unwrap().is_empty());
        let err = h.lifecycle.send_request(a, b, Context::Attraction).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PairSuppressed);
    }

    #[tokio::test]
    async fn location_update_validates_and_needs_a_profile() {
        let h = harness();
        let (a, _) = pair(&h);

        assert_eq!(h.lifecycle.update_location(a, 10.0, 10.0).await.unwrap(), 2);
        let err = h.lifecycle.update_location(a, 91.0, 0.0).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        let err = h.lifecycle.update_location(Uuid::new_v4(), 1.0, 1.0).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProfileNotFound);
    }
}
