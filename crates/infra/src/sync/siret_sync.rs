//! SIRET synchronisation against the INSEE registry.
//!
//! Walks the partners needing a sync in id order, `batch_size` at a time.
//! After each batch the last partner id is saved as the job cursor, so a
//! cancelled or crashed run resumes after the last committed batch. A
//! completed run clears the cursor.
//!
//! A batch commits only once every lookup answered and every outcome was
//! accepted by its partner; a failure before that leaves the whole batch
//! for the next run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use watergile_parties::{
    MarkSiretInvalid, MarkSyncPendingRetry, PartnerCommand, PartnerId, RecordEnrichment, Siret,
};

use super::checkpoint::CheckpointStore;
use crate::external::{ExternalError, InseeClient, InseeEstablishment};
use crate::projections::PartnerSummary;
use crate::read_model::StoreError;

pub const JOB_NAME: &str = "parties.siret_sync";
pub const MAX_BATCH_SIZE: usize = 50;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("checkpoint store failed: {0}")]
    Checkpoint(#[from] StoreError),

    #[error("registry unusable: {0}")]
    External(ExternalError),

    #[error("partner update failed: {0}")]
    Gateway(String),

    #[error("invalid sync settings: {0}")]
    Settings(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    batch_size: usize,
    resync_after: Duration,
}

impl SyncSettings {
    pub fn new(batch_size: usize, resync_after: Duration) -> Result<Self, SyncError> {
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(SyncError::Settings(format!(
                "batch size must be between 1 and {MAX_BATCH_SIZE}, got {batch_size}"
            )));
        }
        Ok(Self {
            batch_size,
            resync_after,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn resync_after(&self) -> Duration {
        self.resync_after
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            resync_after: Duration::days(30),
        }
    }
}

/// Cooperative cancellation, honoured between batches only.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[async_trait]
pub trait SiretLookup: Send + Sync {
    async fn establishment(&self, siret: &Siret) -> Result<InseeEstablishment, ExternalError>;
}

#[async_trait]
impl SiretLookup for InseeClient {
    async fn establishment(&self, siret: &Siret) -> Result<InseeEstablishment, ExternalError> {
        InseeClient::establishment(self, siret).await
    }
}

#[async_trait]
impl<T> SiretLookup for Arc<T>
where
    T: SiretLookup + ?Sized,
{
    async fn establishment(&self, siret: &Siret) -> Result<InseeEstablishment, ExternalError> {
        (**self).establishment(siret).await
    }
}

/// Where the job reads its work and writes its outcomes.
pub trait PartnerGateway: Send + Sync {
    fn needing_sync(
        &self,
        now: DateTime<Utc>,
        resync_after: Duration,
    ) -> Result<Vec<PartnerSummary>, SyncError>;

    /// Decide `command` against the partner's current state without
    /// committing it.
    fn check(&self, command: &PartnerCommand) -> Result<(), SyncError>;

    fn apply(&self, command: PartnerCommand) -> Result<(), SyncError>;
}

impl<T> PartnerGateway for Arc<T>
where
    T: PartnerGateway + ?Sized,
{
    fn needing_sync(
        &self,
        now: DateTime<Utc>,
        resync_after: Duration,
    ) -> Result<Vec<PartnerSummary>, SyncError> {
        (**self).needing_sync(now, resync_after)
    }

    fn check(&self, command: &PartnerCommand) -> Result<(), SyncError> {
        (**self).check(command)
    }

    fn apply(&self, command: PartnerCommand) -> Result<(), SyncError> {
        (**self).apply(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Enriched,
    PendingRetry,
    Invalid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub batches: usize,
    pub failed_batches: usize,
    pub enriched: usize,
    pub pending_retry: usize,
    pub invalid: usize,
    pub cancelled: bool,
}

impl SyncReport {
    fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Enriched => self.enriched += 1,
            SyncOutcome::PendingRetry => self.pending_retry += 1,
            SyncOutcome::Invalid => self.invalid += 1,
        }
    }
}

/// Partner command recording the result of one registry lookup.
///
/// Transient and undecodable answers defer the partner to the next run; a
/// rejected SIRET is marked invalid. A misconfigured client is returned as
/// an error since no partner-level outcome applies.
pub fn registry_outcome(
    partner_id: PartnerId,
    siret: &Siret,
    looked_up: Result<InseeEstablishment, ExternalError>,
    now: DateTime<Utc>,
) -> Result<(PartnerCommand, SyncOutcome), ExternalError> {
    match looked_up {
        Ok(est) => Ok((
            PartnerCommand::RecordEnrichment(RecordEnrichment {
                partner_id,
                siret: siret.clone(),
                legal_name: est.legal_name,
                trade_name: est.trade_name,
                naf_code: est.naf_code,
                occurred_at: now,
            }),
            SyncOutcome::Enriched,
        )),
        Err(err @ (ExternalError::Transient(_) | ExternalError::Decode(_))) => {
            warn!(%partner_id, error = %err, "registry lookup failed; will retry");
            Ok((
                PartnerCommand::MarkSyncPendingRetry(MarkSyncPendingRetry {
                    partner_id,
                    reason: err.to_string(),
                    occurred_at: now,
                }),
                SyncOutcome::PendingRetry,
            ))
        }
        Err(err @ (ExternalError::Permanent { .. } | ExternalError::InvalidRequest(_))) => Ok((
            PartnerCommand::MarkSiretInvalid(MarkSiretInvalid {
                partner_id,
                reason: err.to_string(),
                occurred_at: now,
            }),
            SyncOutcome::Invalid,
        )),
        Err(err @ ExternalError::Config(_)) => Err(err),
    }
}

pub struct SiretSyncJob<L, G, C> {
    lookup: L,
    partners: G,
    checkpoints: C,
    settings: SyncSettings,
}

impl<L, G, C> SiretSyncJob<L, G, C>
where
    L: SiretLookup,
    G: PartnerGateway,
    C: CheckpointStore,
{
    pub fn new(lookup: L, partners: G, checkpoints: C, settings: SyncSettings) -> Self {
        Self {
            lookup,
            partners,
            checkpoints,
            settings,
        }
    }

    pub async fn run(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationFlag,
    ) -> Result<SyncReport, SyncError> {
        let cursor: Option<PartnerId> = self
            .checkpoints
            .load(JOB_NAME)?
            .and_then(|c| c.parse().ok());

        let mut pending: Vec<(PartnerId, Siret)> = self
            .partners
            .needing_sync(now, self.settings.resync_after)?
            .into_iter()
            .filter_map(|p| p.siret.map(|s| (p.partner_id, s)))
            .filter(|(id, _)| cursor.is_none_or(|c| *id > c))
            .collect();
        pending.sort_by_key(|(id, _)| *id);

        info!(
            job = JOB_NAME,
            pending = pending.len(),
            resumed = cursor.is_some(),
            "siret sync started"
        );

        let mut report = SyncReport::default();
        for batch in pending.chunks(self.settings.batch_size) {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.batches += 1;

            match self.process_batch(batch, now).await {
                Ok(outcomes) => outcomes.into_iter().for_each(|o| report.record(o)),
                Err(err) => {
                    report.failed_batches += 1;
                    warn!(job = JOB_NAME, batch = report.batches, error = %err, "siret sync batch aborted");
                }
            }

            if let Some((last, _)) = batch.last() {
                self.checkpoints.save(JOB_NAME, &last.to_string())?;
            }
        }

        if !report.cancelled {
            self.checkpoints.clear(JOB_NAME)?;
        }
        info!(
            job = JOB_NAME,
            batches = report.batches,
            failed_batches = report.failed_batches,
            enriched = report.enriched,
            pending_retry = report.pending_retry,
            invalid = report.invalid,
            cancelled = report.cancelled,
            "siret sync finished"
        );
        Ok(report)
    }

    async fn process_batch(
        &self,
        batch: &[(PartnerId, Siret)],
        now: DateTime<Utc>,
    ) -> Result<Vec<SyncOutcome>, SyncError> {
        let mut decided = Vec::with_capacity(batch.len());
        for (partner_id, siret) in batch {
            let looked_up = self.lookup.establishment(siret).await;
            decided.push(
                registry_outcome(*partner_id, siret, looked_up, now).map_err(SyncError::External)?,
            );
        }
        for (command, _) in &decided {
            self.partners.check(command)?;
        }

        let mut outcomes = Vec::with_capacity(decided.len());
        for (command, outcome) in decided {
            self.partners.apply(command)?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::InMemoryCheckpointStore;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use watergile_parties::{PartnerRelation, SyncState};

    const VALID: &str = "73282932000074";

    fn summary(partner_id: PartnerId) -> PartnerSummary {
        PartnerSummary {
            partner_id,
            name: "ACME".to_string(),
            is_company: true,
            parent_id: None,
            relation: PartnerRelation::Other,
            siret: Some(Siret::parse(VALID).unwrap()),
            blaz_id: None,
            active: true,
            enrichment: None,
            sync_state: SyncState::Never,
            last_sync_error: None,
        }
    }

    #[derive(Default)]
    struct FakePartners {
        rows: Vec<PartnerSummary>,
        applied: Mutex<Vec<PartnerCommand>>,
        fail_on: Option<PartnerId>,
    }

    impl PartnerGateway for FakePartners {
        fn needing_sync(
            &self,
            _now: DateTime<Utc>,
            _resync_after: Duration,
        ) -> Result<Vec<PartnerSummary>, SyncError> {
            Ok(self.rows.clone())
        }

        fn check(&self, command: &PartnerCommand) -> Result<(), SyncError> {
            if self.fail_on == Some(target(command)) {
                return Err(SyncError::Gateway("stale SIRET".to_string()));
            }
            Ok(())
        }

        fn apply(&self, command: PartnerCommand) -> Result<(), SyncError> {
            self.applied.lock().unwrap().push(command);
            Ok(())
        }
    }

    fn target(command: &PartnerCommand) -> PartnerId {
        match command {
            PartnerCommand::RecordEnrichment(c) => c.partner_id,
            PartnerCommand::MarkSyncPendingRetry(c) => c.partner_id,
            PartnerCommand::MarkSiretInvalid(c) => c.partner_id,
            _ => unreachable!(),
        }
    }

    /// Answers per partner position; cancels the run once `cancel_after`
    /// lookups happened.
    struct FakeRegistry {
        answers: BTreeMap<usize, ExternalError>,
        calls: Mutex<usize>,
        cancel: CancellationFlag,
        cancel_after: Option<usize>,
    }

    #[async_trait]
    impl SiretLookup for FakeRegistry {
        async fn establishment(&self, siret: &Siret) -> Result<InseeEstablishment, ExternalError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if self.cancel_after == Some(n) {
                self.cancel.cancel();
            }
            match self.answers.get(&n) {
                Some(err) => Err(err.clone()),
                None => Ok(InseeEstablishment {
                    siret: siret.as_str().to_string(),
                    siren: siret.siren().to_string(),
                    legal_name: Some("ACME".to_string()),
                    trade_name: None,
                    naf_code: Some("62.01Z".to_string()),
                    active: true,
                }),
            }
        }
    }

    fn registry(
        answers: BTreeMap<usize, ExternalError>,
        cancel: &CancellationFlag,
        cancel_after: Option<usize>,
    ) -> Arc<FakeRegistry> {
        Arc::new(FakeRegistry {
            answers,
            calls: Mutex::new(0),
            cancel: cancel.clone(),
            cancel_after,
        })
    }

    fn job(
        lookup: &Arc<FakeRegistry>,
        gateway: &Arc<FakePartners>,
        checkpoints: &Arc<InMemoryCheckpointStore>,
    ) -> SiretSyncJob<Arc<FakeRegistry>, Arc<FakePartners>, Arc<InMemoryCheckpointStore>> {
        SiretSyncJob::new(
            lookup.clone(),
            gateway.clone(),
            checkpoints.clone(),
            SyncSettings::new(2, Duration::days(30)).unwrap(),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 2, 0, 0).unwrap()
    }

    fn partners(n: usize) -> FakePartners {
        let mut rows: Vec<_> = (0..n).map(|_| summary(PartnerId::generate())).collect();
        rows.sort_by_key(|p| p.partner_id);
        FakePartners {
            rows,
            ..Default::default()
        }
    }

    #[test]
    fn batch_size_is_bounded() {
        assert!(SyncSettings::new(0, Duration::days(30)).is_err());
        assert!(SyncSettings::new(51, Duration::days(30)).is_err());
        assert_eq!(SyncSettings::new(50, Duration::days(30)).unwrap().batch_size(), 50);
    }

    #[tokio::test]
    async fn outcomes_follow_the_failure_kind() {
        let cancel = CancellationFlag::new();
        let gateway = Arc::new(partners(3));
        let lookup = registry(
            BTreeMap::from([
                (2, ExternalError::Transient("status 503".to_string())),
                (
                    3,
                    ExternalError::Permanent {
                        status: 404,
                        message: "unknown".to_string(),
                    },
                ),
            ]),
            &cancel,
            None,
        );
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());

        let report = job(&lookup, &gateway, &checkpoints).run(now(), &cancel).await.unwrap();

        assert_eq!(report.batches, 2);
        assert_eq!((report.enriched, report.pending_retry, report.invalid), (1, 1, 1));
        assert!(matches!(gateway.applied.lock().unwrap()[2], PartnerCommand::MarkSiretInvalid(_)));
        assert_eq!(checkpoints.load(JOB_NAME).unwrap(), None);
    }

    #[tokio::test]
    async fn cancellation_stops_between_batches_and_resumes_from_the_checkpoint() {
        let cancel = CancellationFlag::new();
        let gateway = Arc::new(partners(5));
        let lookup = registry(BTreeMap::new(), &cancel, Some(1));
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());

        let job = job(&lookup, &gateway, &checkpoints);
        let first = job.run(now(), &cancel).await.unwrap();

        // The batch in flight finishes; the next one never starts.
        assert!(first.cancelled);
        assert_eq!(first.enriched, 2);
        assert_eq!(
            checkpoints.load(JOB_NAME).unwrap(),
            Some(gateway.rows[1].partner_id.to_string())
        );

        let resume = CancellationFlag::new();
        let second = job.run(now(), &resume).await.unwrap();
        assert_eq!(second.enriched, 3);
        assert_eq!(gateway.applied.lock().unwrap().len(), 5);
        assert_eq!(checkpoints.load(JOB_NAME).unwrap(), None);
    }

    #[tokio::test]
    async fn a_failing_batch_does_not_stop_the_run() {
        let cancel = CancellationFlag::new();
        let mut gateway = partners(4);
        gateway.fail_on = Some(gateway.rows[0].partner_id);
        let gateway = Arc::new(gateway);
        let lookup = registry(BTreeMap::new(), &cancel, None);
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());

        let report = job(&lookup, &gateway, &checkpoints).run(now(), &cancel).await.unwrap();

        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.enriched, 2);
    }

    #[tokio::test]
    async fn a_rejected_outcome_mid_batch_commits_nothing_of_that_batch() {
        let cancel = CancellationFlag::new();
        let mut gateway = partners(4);
        gateway.fail_on = Some(gateway.rows[1].partner_id);
        let gateway = Arc::new(gateway);
        let lookup = registry(BTreeMap::new(), &cancel, None);
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());

        let report = job(&lookup, &gateway, &checkpoints).run(now(), &cancel).await.unwrap();

        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.enriched, 2);
        let applied: Vec<_> = gateway.applied.lock().unwrap().iter().map(target).collect();
        assert_eq!(applied, vec![gateway.rows[2].partner_id, gateway.rows[3].partner_id]);
    }

    #[tokio::test]
    async fn a_misconfigured_registry_mid_batch_commits_nothing_of_that_batch() {
        let cancel = CancellationFlag::new();
        let gateway = Arc::new(partners(2));
        let lookup = registry(
            BTreeMap::from([(2, ExternalError::Config("no API key".to_string()))]),
            &cancel,
            None,
        );
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());

        let report = job(&lookup, &gateway, &checkpoints).run(now(), &cancel).await.unwrap();

        assert_eq!(report.failed_batches, 1);
        assert!(gateway.applied.lock().unwrap().is_empty());
    }
}
