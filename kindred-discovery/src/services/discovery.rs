use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::time::Instant;
use uuid::Uuid;

use kindred_shared::errors::{AppError, AppResult, ErrorCode};

use super::snapshot::{RelationshipSnapshot, SuppressionScope};
use crate::matching::compat::{compatible, CompatibilityMode};
use crate::matching::geo::{distance_meters, within_proximity, DEFAULT_PROXIMITY_M};
use crate::models::{Context, Profile, ProfileView};
use crate::store::{ProfileStore, RelationshipLedger};

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub proximity_threshold_meters: f64,
    pub scan_page_size: usize,
    pub scan_deadline: Duration,
    pub compatibility_mode: CompatibilityMode,
    pub suppression_scope: SuppressionScope,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            proximity_threshold_meters: DEFAULT_PROXIMITY_M,
            scan_page_size: 200,
            scan_deadline: Duration::from_millis(2000),
            compatibility_mode: CompatibilityMode::default(),
            suppression_scope: SuppressionScope::default(),
        }
    }
}

/// Load and validate a user's own profile for `context`.
pub(crate) async fn own_profile(
    profiles: &dyn ProfileStore,
    user_id: Uuid,
    context: Context,
) -> AppResult<Profile> {
    let record = profiles.profile(user_id, context).await?.ok_or_else(|| {
        AppError::new(
            ErrorCode::ProfileIncomplete,
            format!("no {context} profile for this user"),
        )
    })?;

    Profile::try_from(record).map_err(|defect| {
        AppError::new(
            ErrorCode::ProfileIncomplete,
            format!("{context} profile is incomplete: {defect}"),
        )
    })
}

/// Computes the compatible, nearby, not-yet-contacted population for a user.
pub struct DiscoveryService {
    profiles: Arc<dyn ProfileStore>,
    ledger: Arc<dyn RelationshipLedger>,
    config: DiscoveryConfig,
}

impl DiscoveryService {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        ledger: Arc<dyn RelationshipLedger>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            profiles,
            ledger,
            config,
        }
    }

    /// Candidates in user-id order. The whole call is bounded by the scan
    /// deadline; when it elapses the candidates found so far are returned.
    pub async fn find_candidates(&self, user_id: Uuid, context: Context) -> AppResult<Vec<ProfileView>> {
        let deadline = Instant::now() + self.config.scan_deadline;

        let prepare = async {
            let me = own_profile(self.profiles.as_ref(), user_id, context).await?;
            let snapshot = RelationshipSnapshot::load(
                self.ledger.as_ref(),
                user_id,
                context,
                self.config.suppression_scope,
            )
            .await?;
            Ok::<_, AppError>((me, snapshot))
        };
        let (me, snapshot) = match tokio::time::timeout_at(deadline, prepare).await {
            Ok(prepared) => prepared?,
            Err(_) => {
                tracing::warn!(
                    user_id = %user_id,
                    context = %context,
                    "candidate scan deadline elapsed before the scan started"
                );
                counter!("discovery_scan_truncated_total", "context" => context.as_str()).increment(1);
                return Ok(Vec::new());
            }
        };

        let page_size = self.config.scan_page_size.max(1);
        let mut after = None;
        let mut candidates = Vec::new();
        let mut scanned = 0usize;
        let mut skipped = 0u64;

        loop {
            let page = match tokio::time::timeout_at(
                deadline,
                self.profiles.profiles_page(context, after, page_size),
            )
            .await
            {
                Ok(page) => page?,
                Err(_) => {
                    tracing::warn!(
                        user_id = %user_id,
                        context = %context,
                        scanned,
                        returned = candidates.len(),
                        "candidate scan deadline elapsed, returning partial result"
                    );
                    counter!("discovery_scan_truncated_total", "context" => context.as_str()).increment(1);
                    break;
                }
            };

            let full_page = page.len() == page_size;
            after = page.last().map(|record| record.user_id);
            scanned += page.len();

            for record in page {
                if record.user_id == user_id || snapshot.suppresses(record.user_id) {
                    continue;
                }

                let candidate_id = record.user_id;
                let candidate = match Profile::try_from(record) {
                    Ok(candidate) => candidate,
                    Err(defect) => {
                        tracing::warn!(
                            candidate_id = %candidate_id,
                            context = %context,
                            error = %defect,
                            "skipping malformed profile"
                        );
                        skipped += 1;
                        continue;
                    }
                };

                if !compatible(&me, &candidate, self.config.compatibility_mode) {
                    continue;
                }

                let distance = distance_meters(
                    me.location.latitude,
                    me.location.longitude,
                    candidate.location.latitude,
                    candidate.location.longitude,
                );
                if within_proximity(distance, self.config.proximity_threshold_meters) {
                    candidates.push(ProfileView::from(&candidate));
                }
            }

            if !full_page {
                break;
            }
        }

        if skipped > 0 {
            counter!("discovery_records_skipped", "context" => context.as_str()).increment(skipped);
        }
        histogram!("discovery_candidates_returned", "context" => context.as_str())
            .record(candidates.len() as f64);

        tracing::debug!(
            user_id = %user_id,
            context = %context,
            scanned,
            suppressed = snapshot.len(),
            returned = candidates.len(),
            "candidates computed"
        );

        Ok(candidates)
    }
}
