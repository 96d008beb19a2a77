use std::collections::HashSet;

use serde::Deserialize;
use uuid::Uuid;

use kindred_shared::errors::AppResult;

use crate::models::Context;
use crate::store::RelationshipLedger;

/// Whether contact in one context hides the pair in the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionScope {
    #[default]
    AllContexts,
    PerContext,
}

impl SuppressionScope {
    fn admits(&self, record: Context, wanted: Context) -> bool {
        match self {
            SuppressionScope::AllContexts => true,
            SuppressionScope::PerContext => record == wanted,
        }
    }
}

/// Everyone a user must not be shown as a candidate, read once per
/// discovery call.
#[derive(Debug, Default)]
pub struct RelationshipSnapshot {
    suppressed: HashSet<Uuid>,
}

impl RelationshipSnapshot {
    pub async fn load(
        ledger: &dyn RelationshipLedger,
        user: Uuid,
        context: Context,
        scope: SuppressionScope,
    ) -> AppResult<Self> {
        let mut suppressed = HashSet::new();

        for edge in ledger.edges(user).await? {
            if scope.admits(edge.context, context) {
                suppressed.insert(edge.counterpart_id);
            }
        }

        // Shared records cover edges the counterpart wrote but ours is missing.
        for request in ledger.pair_requests_involving(user).await? {
            if scope.admits(request.context, context) {
                suppressed.extend(request.counterpart_of(user));
            }
        }
        for record in ledger.matches_involving(user).await? {
            if scope.admits(record.context, context) {
                suppressed.extend(record.other(user));
            }
        }
        for denial in ledger.denials_involving(user).await? {
            if scope.admits(denial.context, context) {
                suppressed.extend(denial.counterpart_of(user));
            }
        }

        // Reports carry no context and always suppress. Any surviving copy
        // counts, since copies are written independently.
        for report in ledger.reports_involving(user).await? {
            suppressed.extend(report.counterpart_of(user));
        }

        suppressed.remove(&user);
        Ok(Self { suppressed })
    }

    pub fn suppresses(&self, candidate: Uuid) -> bool {
        self.suppressed.contains(&candidate)
    }

    pub fn len(&self) -> usize {
        self.suppressed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suppressed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EdgeState, MatchDenial, NewEdge, NewReport, PairRequest, ReportScope};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn collects_edges_shared_records_and_reports() {
        let store = MemoryStore::new();
        let me = Uuid::new_v4();
        let (sent_to, denied_by, reported) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        store
            .put_edge(NewEdge::new(me, sent_to, Uuid::new_v4(), EdgeState::Sent, Context::Friend, None))
            .await
            .unwrap();
        let request = PairRequest::new(me, denied_by, Context::Attraction);
        store.insert_denial(MatchDenial::new(&request)).await.unwrap();
        store
            .append_report(NewReport::new(ReportScope::Participant(me), reported, me))
            .await
            .unwrap();

        let snapshot = RelationshipSnapshot::load(&store, me, Context::Attraction, SuppressionScope::AllContexts)
            .await
            .unwrap();

        assert!(snapshot.suppresses(sent_to));
        assert!(snapshot.suppresses(denied_by));
        assert!(snapshot.suppresses(reported));
        assert!(!snapshot.suppresses(me));
        assert_eq!(snapshot.len(), 3);
    }

    #[tokio::test]
    async fn report_suppresses_through_the_counterparts_copy() {
        let store = MemoryStore::new();
        let (reporter, reported) = (Uuid::new_v4(), Uuid::new_v4());
        store
            .append_report(NewReport::new(ReportScope::Participant(reported), reporter, reported))
            .await
            .unwrap();

        let snapshot = RelationshipSnapshot::load(&store, reporter, Context::Friend, SuppressionScope::PerContext)
            .await
            .unwrap();
        assert!(snapshot.suppresses(reported));
    }

    #[tokio::test]
    async fn per_context_scope_ignores_the_other_survey() {
        let store = MemoryStore::new();
        let (me, friend) = (Uuid::new_v4(), Uuid::new_v4());
        store
            .claim_request(PairRequest::new(friend, me, Context::Friend))
            .await
            .unwrap();

        let scoped = RelationshipSnapshot::load(&store, me, Context::Attraction, SuppressionScope::PerContext)
            .await
            .unwrap();
        assert!(scoped.is_empty());

        let global = RelationshipSnapshot::load(&store, me, Context::Attraction, SuppressionScope::AllContexts)
            .await
            .unwrap();
        assert!(global.suppresses(friend));
    }
}
