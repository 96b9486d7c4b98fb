//! Partners, their blaz organisations and SIRET enrichment.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use watergile_core::{Aggregate, DomainError};
use watergile_parties::{
    ArchivePartner, AssignBlaz, Blaz, BlazId, BlazRef, HierarchyBadge, Partner, PartnerCommand,
    PartnerId, PartnerRelation, RegisterPartner, RenamePartner, SetParent, SetRelation, SetSiret,
};

use super::{Dispatcher, ServiceError, ServiceResult, SharedCursors, SharedRecords, not_found};
use crate::aggregate_types::PARTNER;
use crate::projections::{Checkpointed, PartnerDirectory, PartnerSummary};
use crate::sync::{PartnerGateway, SiretLookup, SyncError, SyncOutcome, registry_outcome};

pub type PartnerDirectoryView =
    Checkpointed<PartnerDirectory<SharedRecords<PartnerId, PartnerSummary>>, SharedCursors>;

#[derive(Debug, Clone, Deserialize)]
pub struct NewPartner {
    pub name: String,
    #[serde(default)]
    pub is_company: bool,
    #[serde(default)]
    pub parent_id: Option<PartnerId>,
    #[serde(default)]
    pub relation: PartnerRelation,
    #[serde(default)]
    pub siret: Option<String>,
}

pub struct PartnerService {
    dispatcher: Arc<Dispatcher>,
    directory: Arc<PartnerDirectoryView>,
    blazes: SharedRecords<BlazId, Blaz>,
    registry: Option<Arc<dyn SiretLookup>>,
}

impl PartnerService {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        directory: Arc<PartnerDirectoryView>,
        blazes: SharedRecords<BlazId, Blaz>,
        registry: Option<Arc<dyn SiretLookup>>,
    ) -> Self {
        Self {
            dispatcher,
            directory,
            blazes,
            registry,
        }
    }

    pub fn directory(&self) -> &Arc<PartnerDirectoryView> {
        &self.directory
    }

    fn execute(&self, partner_id: PartnerId, command: PartnerCommand) -> ServiceResult<Partner> {
        self.dispatcher
            .dispatch(partner_id.aggregate_id(), PARTNER, command, |id| {
                Partner::empty(PartnerId::new(id))
            })?;
        self.directory
            .refresh_stream(self.dispatcher.store(), partner_id.aggregate_id())?;
        self.get(partner_id)
    }

    pub fn get(&self, partner_id: PartnerId) -> ServiceResult<Partner> {
        let partner = self
            .dispatcher
            .load(partner_id.aggregate_id(), |id| Partner::empty(PartnerId::new(id)))?;
        if !partner.is_created() {
            return Err(not_found());
        }
        Ok(partner)
    }

    pub fn list(&self) -> ServiceResult<Vec<PartnerSummary>> {
        Ok(self.directory.read_model().list()?)
    }

    pub fn badge(&self, partner_id: PartnerId) -> ServiceResult<Option<HierarchyBadge>> {
        self.get(partner_id)?;
        Ok(self.directory.read_model().badge(&partner_id)?)
    }

    pub fn register(&self, input: NewPartner) -> ServiceResult<Partner> {
        if let Some(parent_id) = input.parent_id {
            self.get(parent_id)
                .map_err(|_| DomainError::validation(format!("parent partner {parent_id} is unknown")))?;
        }
        let partner_id = PartnerId::generate();
        let command = PartnerCommand::RegisterPartner(RegisterPartner {
            partner_id,
            name: input.name,
            is_company: input.is_company,
            parent_id: input.parent_id,
            relation: input.relation,
            siret: input.siret,
            occurred_at: Utc::now(),
        });
        let partner = self.execute(partner_id, command)?;
        info!(%partner_id, name = partner.name(), "partner registered");
        Ok(partner)
    }

    pub fn rename(&self, partner_id: PartnerId, name: String) -> ServiceResult<Partner> {
        self.execute(
            partner_id,
            PartnerCommand::RenamePartner(RenamePartner {
                partner_id,
                name,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn set_parent(
        &self,
        partner_id: PartnerId,
        parent_id: Option<PartnerId>,
    ) -> ServiceResult<Partner> {
        if let Some(parent_id) = parent_id {
            self.get(parent_id)
                .map_err(|_| DomainError::validation(format!("parent partner {parent_id} is unknown")))?;
        }
        self.execute(
            partner_id,
            PartnerCommand::SetParent(SetParent {
                partner_id,
                parent_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn set_relation(
        &self,
        partner_id: PartnerId,
        relation: PartnerRelation,
    ) -> ServiceResult<Partner> {
        self.execute(
            partner_id,
            PartnerCommand::SetRelation(SetRelation {
                partner_id,
                relation,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn set_siret(&self, partner_id: PartnerId, siret: Option<String>) -> ServiceResult<Partner> {
        self.execute(
            partner_id,
            PartnerCommand::SetSiret(SetSiret {
                partner_id,
                siret,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn archive(&self, partner_id: PartnerId) -> ServiceResult<Partner> {
        self.execute(
            partner_id,
            PartnerCommand::ArchivePartner(ArchivePartner {
                partner_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn create_blaz(&self, name: &str, owner_id: PartnerId) -> ServiceResult<Blaz> {
        let owner = self.get(owner_id)?;
        let blaz = Blaz::new(BlazId::generate(), name, owner_id, owner.is_company())?;
        self.blazes.upsert(blaz.id, blaz.clone())?;
        Ok(blaz)
    }

    pub fn list_blazes(&self) -> ServiceResult<Vec<Blaz>> {
        Ok(self.blazes.list()?)
    }

    pub fn assign_blaz(&self, partner_id: PartnerId, blaz_id: Option<BlazId>) -> ServiceResult<Partner> {
        let blaz = match blaz_id {
            Some(id) => {
                let blaz = self
                    .blazes
                    .get(&id)?
                    .ok_or_else(|| DomainError::validation(format!("blaz {id} is unknown")))?;
                if !blaz.active {
                    return Err(DomainError::validation(format!("blaz '{}' is archived", blaz.name)).into());
                }
                Some(BlazRef::from(&blaz))
            }
            None => None,
        };
        self.execute(
            partner_id,
            PartnerCommand::AssignBlaz(AssignBlaz {
                partner_id,
                blaz,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Look the partner's SIRET up right away instead of waiting for the
    /// scheduled sync.
    ///
    /// A registry outage leaves the partner pending retry rather than
    /// failing the request.
    pub async fn enrich(&self, partner_id: PartnerId) -> ServiceResult<(Partner, SyncOutcome)> {
        let partner = self.get(partner_id)?;
        let siret = partner
            .siret()
            .cloned()
            .ok_or_else(|| DomainError::validation("partner has no SIRET to look up"))?;
        let registry = self.registry.as_ref().ok_or_else(|| {
            ServiceError::External(crate::external::ExternalError::Config(
                "SIRET enrichment is disabled (no INSEE API key)".to_string(),
            ))
        })?;

        let looked_up = registry.establishment(&siret).await;
        let (command, outcome) = registry_outcome(partner_id, &siret, looked_up, Utc::now())?;
        let partner = self.execute(partner_id, command)?;
        Ok((partner, outcome))
    }
}

impl PartnerGateway for PartnerService {
    fn needing_sync(
        &self,
        now: DateTime<Utc>,
        resync_after: Duration,
    ) -> Result<Vec<PartnerSummary>, SyncError> {
        self.directory
            .read_model()
            .needing_sync(now, resync_after)
            .map_err(SyncError::Checkpoint)
    }

    fn check(&self, command: &PartnerCommand) -> Result<(), SyncError> {
        let partner_id = sync_target(command)?;
        let partner = self
            .get(partner_id)
            .map_err(|e| SyncError::Gateway(e.to_string()))?;
        partner
            .handle(command)
            .map(|_| ())
            .map_err(|e| SyncError::Gateway(format!("partner {partner_id}: {e}")))
    }

    fn apply(&self, command: PartnerCommand) -> Result<(), SyncError> {
        let partner_id = sync_target(&command)?;
        self.execute(partner_id, command).map(|_| ()).map_err(|e| {
            warn!(%partner_id, error = %e, "sync outcome not recorded");
            SyncError::Gateway(e.to_string())
        })
    }
}

fn sync_target(command: &PartnerCommand) -> Result<PartnerId, SyncError> {
    match command {
        PartnerCommand::RecordEnrichment(c) => Ok(c.partner_id),
        PartnerCommand::MarkSyncPendingRetry(c) => Ok(c.partner_id),
        PartnerCommand::MarkSiretInvalid(c) => Ok(c.partner_id),
        other => Err(SyncError::Gateway(format!(
            "unexpected command from the sync job: {other:?}"
        ))),
    }
}
