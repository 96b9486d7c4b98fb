use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use watergile_core::{Aggregate, AggregateRoot, DomainError};
use watergile_events::Event;

use crate::blaz::{BlazId, BlazRef, check_blaz_usage};
use crate::hierarchy::PartnerRelation;
use crate::siret::Siret;

watergile_core::domain_id!(
    /// Partner identifier (companies, contacts, stakeholders).
    PartnerId
);

/// Progress of the registry synchronisation for a partner's SIRET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Never,
    Synced,
    /// Last attempt failed transiently; retried by the next sync run.
    PendingRetry,
    /// The registry rejected the SIRET; not retried until the user edits it.
    Invalid,
}

/// Data pulled from the company registry. Last writer wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiretEnrichment {
    pub siren: String,
    pub vat_number: String,
    pub legal_name: Option<String>,
    pub trade_name: Option<String>,
    pub naf_code: Option<String>,
    pub synced_at: DateTime<Utc>,
}

/// Aggregate root: Partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partner {
    id: PartnerId,
    name: String,
    is_company: bool,
    parent_id: Option<PartnerId>,
    relation: PartnerRelation,
    siret: Option<Siret>,
    blaz_id: Option<BlazId>,
    active: bool,
    enrichment: Option<SiretEnrichment>,
    sync_state: SyncState,
    last_sync_error: Option<String>,
    version: u64,
    created: bool,
}

impl Partner {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PartnerId) -> Self {
        Self {
            id,
            name: String::new(),
            is_company: false,
            parent_id: None,
            relation: PartnerRelation::Other,
            siret: None,
            blaz_id: None,
            active: true,
            enrichment: None,
            sync_state: SyncState::Never,
            last_sync_error: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PartnerId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_company(&self) -> bool {
        self.is_company
    }

    pub fn parent_id(&self) -> Option<PartnerId> {
        self.parent_id
    }

    pub fn relation(&self) -> PartnerRelation {
        self.relation
    }

    pub fn siret(&self) -> Option<&Siret> {
        self.siret.as_ref()
    }

    pub fn blaz_id(&self) -> Option<BlazId> {
        self.blaz_id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn enrichment(&self) -> Option<&SiretEnrichment> {
        self.enrichment.as_ref()
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    pub fn last_sync_error(&self) -> Option<&str> {
        self.last_sync_error.as_deref()
    }

    /// Whether the registry synchronisation should pick this partner up.
    pub fn needs_sync(&self, now: DateTime<Utc>, resync_after: Duration) -> bool {
        if !self.created || !self.active || !self.is_company || self.siret.is_none() {
            return false;
        }
        match self.sync_state {
            SyncState::Invalid => false,
            SyncState::Never | SyncState::PendingRetry => true,
            SyncState::Synced => self
                .enrichment
                .as_ref()
                .is_none_or(|e| now - e.synced_at > resync_after),
        }
    }
}

impl AggregateRoot for Partner {
    type Id = PartnerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterPartner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPartner {
    pub partner_id: PartnerId,
    pub name: String,
    pub is_company: bool,
    pub parent_id: Option<PartnerId>,
    pub relation: PartnerRelation,
    /// Raw user input; validated with the Luhn checksum.
    pub siret: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamePartner {
    pub partner_id: PartnerId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetParent {
    pub partner_id: PartnerId,
    pub parent_id: Option<PartnerId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRelation {
    pub partner_id: PartnerId,
    pub relation: PartnerRelation,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSiret {
    pub partner_id: PartnerId,
    pub siret: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordEnrichment.
///
/// `siret` is the number that was looked up; a stale lookup (the user edited
/// the SIRET meanwhile) is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEnrichment {
    pub partner_id: PartnerId,
    pub siret: Siret,
    pub legal_name: Option<String>,
    pub trade_name: Option<String>,
    pub naf_code: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSyncPendingRetry {
    pub partner_id: PartnerId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSiretInvalid {
    pub partner_id: PartnerId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignBlaz {
    pub partner_id: PartnerId,
    pub blaz: Option<BlazRef>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivePartner {
    pub partner_id: PartnerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartnerCommand {
    RegisterPartner(RegisterPartner),
    RenamePartner(RenamePartner),
    SetParent(SetParent),
    SetRelation(SetRelation),
    SetSiret(SetSiret),
    RecordEnrichment(RecordEnrichment),
    MarkSyncPendingRetry(MarkSyncPendingRetry),
    MarkSiretInvalid(MarkSiretInvalid),
    AssignBlaz(AssignBlaz),
    ArchivePartner(ArchivePartner),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerRegistered {
    pub partner_id: PartnerId,
    pub name: String,
    pub is_company: bool,
    pub parent_id: Option<PartnerId>,
    pub relation: PartnerRelation,
    pub siret: Option<Siret>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerRenamed {
    pub partner_id: PartnerId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerParentChanged {
    pub partner_id: PartnerId,
    pub parent_id: Option<PartnerId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerRelationChanged {
    pub partner_id: PartnerId,
    pub relation: PartnerRelation,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerSiretChanged {
    pub partner_id: PartnerId,
    pub siret: Option<Siret>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerEnriched {
    pub partner_id: PartnerId,
    pub enrichment: SiretEnrichment,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerSyncDeferred {
    pub partner_id: PartnerId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerSiretRejected {
    pub partner_id: PartnerId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerBlazAssigned {
    pub partner_id: PartnerId,
    pub blaz_id: Option<BlazId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerArchived {
    pub partner_id: PartnerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartnerEvent {
    PartnerRegistered(PartnerRegistered),
    PartnerRenamed(PartnerRenamed),
    PartnerParentChanged(PartnerParentChanged),
    PartnerRelationChanged(PartnerRelationChanged),
    PartnerSiretChanged(PartnerSiretChanged),
    PartnerEnriched(PartnerEnriched),
    PartnerSyncDeferred(PartnerSyncDeferred),
    PartnerSiretRejected(PartnerSiretRejected),
    PartnerBlazAssigned(PartnerBlazAssigned),
    PartnerArchived(PartnerArchived),
}

impl Event for PartnerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PartnerEvent::PartnerRegistered(_) => "parties.partner.registered",
            PartnerEvent::PartnerRenamed(_) => "parties.partner.renamed",
            PartnerEvent::PartnerParentChanged(_) => "parties.partner.parent_changed",
            PartnerEvent::PartnerRelationChanged(_) => "parties.partner.relation_changed",
            PartnerEvent::PartnerSiretChanged(_) => "parties.partner.siret_changed",
            PartnerEvent::PartnerEnriched(_) => "parties.partner.enriched",
            PartnerEvent::PartnerSyncDeferred(_) => "parties.partner.sync_deferred",
            PartnerEvent::PartnerSiretRejected(_) => "parties.partner.siret_rejected",
            PartnerEvent::PartnerBlazAssigned(_) => "parties.partner.blaz_assigned",
            PartnerEvent::PartnerArchived(_) => "parties.partner.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PartnerEvent::PartnerRegistered(e) => e.occurred_at,
            PartnerEvent::PartnerRenamed(e) => e.occurred_at,
            PartnerEvent::PartnerParentChanged(e) => e.occurred_at,
            PartnerEvent::PartnerRelationChanged(e) => e.occurred_at,
            PartnerEvent::PartnerSiretChanged(e) => e.occurred_at,
            PartnerEvent::PartnerEnriched(e) => e.occurred_at,
            PartnerEvent::PartnerSyncDeferred(e) => e.occurred_at,
            PartnerEvent::PartnerSiretRejected(e) => e.occurred_at,
            PartnerEvent::PartnerBlazAssigned(e) => e.occurred_at,
            PartnerEvent::PartnerArchived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Partner {
    type Command = PartnerCommand;
    type Event = PartnerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PartnerEvent::PartnerRegistered(e) => {
                self.id = e.partner_id;
                self.name = e.name.clone();
                self.is_company = e.is_company;
                self.parent_id = e.parent_id;
                self.relation = e.relation;
                self.siret = e.siret.clone();
                self.active = true;
                self.created = true;
            }
            PartnerEvent::PartnerRenamed(e) => {
                self.name = e.name.clone();
            }
            PartnerEvent::PartnerParentChanged(e) => {
                self.parent_id = e.parent_id;
            }
            PartnerEvent::PartnerRelationChanged(e) => {
                self.relation = e.relation;
            }
            PartnerEvent::PartnerSiretChanged(e) => {
                self.siret = e.siret.clone();
                self.enrichment = None;
                self.sync_state = SyncState::Never;
                self.last_sync_error = None;
            }
            PartnerEvent::PartnerEnriched(e) => {
                self.enrichment = Some(e.enrichment.clone());
                self.sync_state = SyncState::Synced;
                self.last_sync_error = None;
            }
            PartnerEvent::PartnerSyncDeferred(e) => {
                self.sync_state = SyncState::PendingRetry;
                self.last_sync_error = Some(e.reason.clone());
            }
            PartnerEvent::PartnerSiretRejected(e) => {
                self.sync_state = SyncState::Invalid;
                self.last_sync_error = Some(e.reason.clone());
            }
            PartnerEvent::PartnerBlazAssigned(e) => {
                self.blaz_id = e.blaz_id;
            }
            PartnerEvent::PartnerArchived(_) => {
                self.active = false;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PartnerCommand::RegisterPartner(cmd) => self.handle_register(cmd),
            PartnerCommand::RenamePartner(cmd) => self.handle_rename(cmd),
            PartnerCommand::SetParent(cmd) => self.handle_set_parent(cmd),
            PartnerCommand::SetRelation(cmd) => self.handle_set_relation(cmd),
            PartnerCommand::SetSiret(cmd) => self.handle_set_siret(cmd),
            PartnerCommand::RecordEnrichment(cmd) => self.handle_record_enrichment(cmd),
            PartnerCommand::MarkSyncPendingRetry(cmd) => self.handle_mark_pending(cmd),
            PartnerCommand::MarkSiretInvalid(cmd) => self.handle_mark_invalid(cmd),
            PartnerCommand::AssignBlaz(cmd) => self.handle_assign_blaz(cmd),
            PartnerCommand::ArchivePartner(cmd) => self.handle_archive(cmd),
        }
    }
}

impl Partner {
    fn ensure_partner_id(&self, partner_id: PartnerId) -> Result<(), DomainError> {
        if self.id != partner_id {
            return Err(DomainError::invariant("partner_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, partner_id: PartnerId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_partner_id(partner_id)
    }

    fn validate_name(name: &str) -> Result<String, DomainError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        Ok(name.to_string())
    }

    fn parse_siret(raw: Option<&str>) -> Result<Option<Siret>, DomainError> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => Siret::parse(s).map(Some),
            None => Ok(None),
        }
    }

    fn handle_register(&self, cmd: &RegisterPartner) -> Result<Vec<PartnerEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("partner already exists"));
        }
        let name = Self::validate_name(&cmd.name)?;
        if cmd.parent_id == Some(cmd.partner_id) {
            return Err(DomainError::validation("a partner cannot be its own parent"));
        }
        let siret = Self::parse_siret(cmd.siret.as_deref())?;

        Ok(vec![PartnerEvent::PartnerRegistered(PartnerRegistered {
            partner_id: cmd.partner_id,
            name,
            is_company: cmd.is_company,
            parent_id: cmd.parent_id,
            relation: cmd.relation,
            siret,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_rename(&self, cmd: &RenamePartner) -> Result<Vec<PartnerEvent>, DomainError> {
        self.ensure_exists(cmd.partner_id)?;
        let name = Self::validate_name(&cmd.name)?;
        if name == self.name {
            return Ok(vec![]);
        }
        Ok(vec![PartnerEvent::PartnerRenamed(PartnerRenamed {
            partner_id: cmd.partner_id,
            name,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_parent(&self, cmd: &SetParent) -> Result<Vec<PartnerEvent>, DomainError> {
        self.ensure_exists(cmd.partner_id)?;
        if cmd.parent_id == Some(self.id) {
            return Err(DomainError::validation("a partner cannot be its own parent"));
        }
        Ok(vec![PartnerEvent::PartnerParentChanged(PartnerParentChanged {
            partner_id: cmd.partner_id,
            parent_id: cmd.parent_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_relation(&self, cmd: &SetRelation) -> Result<Vec<PartnerEvent>, DomainError> {
        self.ensure_exists(cmd.partner_id)?;
        Ok(vec![PartnerEvent::PartnerRelationChanged(PartnerRelationChanged {
            partner_id: cmd.partner_id,
            relation: cmd.relation,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_siret(&self, cmd: &SetSiret) -> Result<Vec<PartnerEvent>, DomainError> {
        self.ensure_exists(cmd.partner_id)?;
        let siret = Self::parse_siret(cmd.siret.as_deref())?;
        Ok(vec![PartnerEvent::PartnerSiretChanged(PartnerSiretChanged {
            partner_id: cmd.partner_id,
            siret,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn ensure_current_siret(&self, looked_up: &Siret) -> Result<(), DomainError> {
        match &self.siret {
            Some(current) if current == looked_up => Ok(()),
            _ => Err(DomainError::conflict(format!(
                "SIRET {looked_up} is no longer the partner's SIRET"
            ))),
        }
    }

    fn handle_record_enrichment(
        &self,
        cmd: &RecordEnrichment,
    ) -> Result<Vec<PartnerEvent>, DomainError> {
        self.ensure_exists(cmd.partner_id)?;
        self.ensure_current_siret(&cmd.siret)?;

        Ok(vec![PartnerEvent::PartnerEnriched(PartnerEnriched {
            partner_id: cmd.partner_id,
            enrichment: SiretEnrichment {
                siren: cmd.siret.siren().to_string(),
                vat_number: cmd.siret.vat_number(),
                legal_name: cmd.legal_name.clone(),
                trade_name: cmd.trade_name.clone(),
                naf_code: cmd.naf_code.clone(),
                synced_at: cmd.occurred_at,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_pending(
        &self,
        cmd: &MarkSyncPendingRetry,
    ) -> Result<Vec<PartnerEvent>, DomainError> {
        self.ensure_exists(cmd.partner_id)?;
        if self.siret.is_none() {
            return Err(DomainError::invariant("partner has no SIRET to synchronise"));
        }
        Ok(vec![PartnerEvent::PartnerSyncDeferred(PartnerSyncDeferred {
            partner_id: cmd.partner_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_invalid(&self, cmd: &MarkSiretInvalid) -> Result<Vec<PartnerEvent>, DomainError> {
        self.ensure_exists(cmd.partner_id)?;
        if self.siret.is_none() {
            return Err(DomainError::invariant("partner has no SIRET to synchronise"));
        }
        if self.sync_state == SyncState::Invalid {
            return Ok(vec![]);
        }
        Ok(vec![PartnerEvent::PartnerSiretRejected(PartnerSiretRejected {
            partner_id: cmd.partner_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_blaz(&self, cmd: &AssignBlaz) -> Result<Vec<PartnerEvent>, DomainError> {
        self.ensure_exists(cmd.partner_id)?;
        if let Some(blaz) = &cmd.blaz {
            check_blaz_usage(self.id, self.is_company, self.parent_id, blaz)?;
        }
        Ok(vec![PartnerEvent::PartnerBlazAssigned(PartnerBlazAssigned {
            partner_id: cmd.partner_id,
            blaz_id: cmd.blaz.map(|b| b.blaz_id),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchivePartner) -> Result<Vec<PartnerEvent>, DomainError> {
        self.ensure_exists(cmd.partner_id)?;
        if !self.active {
            return Err(DomainError::conflict("partner is already archived"));
        }
        Ok(vec![PartnerEvent::PartnerArchived(PartnerArchived {
            partner_id: cmd.partner_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
