use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use watergile_core::AggregateId;
use watergile_parties::{
    BlazId, HierarchyBadge, PartnerEvent, PartnerId, PartnerRelation, Siret, SiretEnrichment,
    SyncState, compute_badge,
};

use super::{ProjectionFailure, ReadModel, decode};
use crate::read_model::{RecordStore, StoreError};

/// Queryable partner row: directory listing, hierarchy badges and the SIRET
/// synchronisation queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerSummary {
    pub partner_id: PartnerId,
    pub name: String,
    pub is_company: bool,
    pub parent_id: Option<PartnerId>,
    pub relation: PartnerRelation,
    pub siret: Option<Siret>,
    pub blaz_id: Option<BlazId>,
    pub active: bool,
    pub enrichment: Option<SiretEnrichment>,
    pub sync_state: SyncState,
    pub last_sync_error: Option<String>,
}

impl PartnerSummary {
    /// Mirrors `Partner::needs_sync`.
    pub fn needs_sync(&self, now: DateTime<Utc>, resync_after: Duration) -> bool {
        if !self.active || !self.is_company || self.siret.is_none() {
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

#[derive(Debug)]
pub struct PartnerDirectory<S>
where
    S: RecordStore<PartnerId, PartnerSummary>,
{
    store: S,
}

impl<S> PartnerDirectory<S>
where
    S: RecordStore<PartnerId, PartnerSummary>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn get(&self, id: &PartnerId) -> Result<Option<PartnerSummary>, StoreError> {
        self.store.get(id)
    }

    pub fn list(&self) -> Result<Vec<PartnerSummary>, StoreError> {
        self.store.list()
    }

    /// Partners the SIRET job should pick up, ordered by id.
    pub fn needing_sync(
        &self,
        now: DateTime<Utc>,
        resync_after: Duration,
    ) -> Result<Vec<PartnerSummary>, StoreError> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|p| p.needs_sync(now, resync_after))
            .collect())
    }

    pub fn badge(&self, id: &PartnerId) -> Result<Option<HierarchyBadge>, StoreError> {
        let Some(partner) = self.store.get(id)? else {
            return Ok(None);
        };
        let all = self.store.list()?;
        let parent_relation = partner
            .parent_id
            .and_then(|pid| all.iter().find(|p| p.partner_id == pid))
            .map(|p| p.relation);
        let has_children = all
            .iter()
            .any(|p| p.active && p.parent_id == Some(partner.partner_id));
        Ok(compute_badge(partner.relation, parent_relation, has_children))
    }

    fn update(
        &self,
        id: PartnerId,
        f: impl FnOnce(&mut PartnerSummary),
    ) -> Result<(), ProjectionFailure> {
        if let Some(mut row) = self.store.get(&id)? {
            f(&mut row);
            self.store.upsert(id, row)?;
        }
        Ok(())
    }
}

impl<S> ReadModel for PartnerDirectory<S>
where
    S: RecordStore<PartnerId, PartnerSummary>,
{
    fn name(&self) -> &'static str {
        "parties.directory"
    }

    fn aggregate_type(&self) -> &'static str {
        crate::aggregate_types::PARTNER
    }

    fn apply_event(
        &self,
        _aggregate_id: AggregateId,
        payload: &JsonValue,
    ) -> Result<(), ProjectionFailure> {
        match decode::<PartnerEvent>(payload)? {
            PartnerEvent::PartnerRegistered(e) => {
                self.store.upsert(
                    e.partner_id,
                    PartnerSummary {
                        partner_id: e.partner_id,
                        name: e.name,
                        is_company: e.is_company,
                        parent_id: e.parent_id,
                        relation: e.relation,
                        siret: e.siret,
                        blaz_id: None,
                        active: true,
                        enrichment: None,
                        sync_state: SyncState::Never,
                        last_sync_error: None,
                    },
                )?;
            }
            PartnerEvent::PartnerRenamed(e) => self.update(e.partner_id, |p| p.name = e.name)?,
            PartnerEvent::PartnerParentChanged(e) => {
                self.update(e.partner_id, |p| p.parent_id = e.parent_id)?
            }
            PartnerEvent::PartnerRelationChanged(e) => {
                self.update(e.partner_id, |p| p.relation = e.relation)?
            }
            PartnerEvent::PartnerSiretChanged(e) => self.update(e.partner_id, |p| {
                p.siret = e.siret;
                p.enrichment = None;
                p.sync_state = SyncState::Never;
                p.last_sync_error = None;
            })?,
            PartnerEvent::PartnerEnriched(e) => self.update(e.partner_id, |p| {
                p.enrichment = Some(e.enrichment);
                p.sync_state = SyncState::Synced;
                p.last_sync_error = None;
            })?,
            PartnerEvent::PartnerSyncDeferred(e) => self.update(e.partner_id, |p| {
                p.sync_state = SyncState::PendingRetry;
                p.last_sync_error = Some(e.reason);
            })?,
            PartnerEvent::PartnerSiretRejected(e) => self.update(e.partner_id, |p| {
                p.sync_state = SyncState::Invalid;
                p.last_sync_error = Some(e.reason);
            })?,
            PartnerEvent::PartnerBlazAssigned(e) => {
                self.update(e.partner_id, |p| p.blaz_id = e.blaz_id)?
            }
            PartnerEvent::PartnerArchived(e) => self.update(e.partner_id, |p| p.active = false)?,
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryRecordStore;
    use chrono::TimeZone;
    use watergile_parties::{PartnerEnriched, PartnerRegistered};

    fn register(
        dir: &PartnerDirectory<InMemoryRecordStore<PartnerId, PartnerSummary>>,
        id: PartnerId,
        parent_id: Option<PartnerId>,
        relation: PartnerRelation,
        siret: Option<&str>,
    ) {
        let ev = PartnerEvent::PartnerRegistered(PartnerRegistered {
            partner_id: id,
            name: "ACME".to_string(),
            is_company: true,
            parent_id,
            relation,
            siret: siret.map(|s| Siret::parse(s).unwrap()),
            occurred_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        });
        dir.apply_event(id.aggregate_id(), &serde_json::to_value(ev).unwrap())
            .unwrap();
    }

    #[test]
    fn sync_queue_skips_recently_enriched_partners() {
        let dir = PartnerDirectory::new(InMemoryRecordStore::new());
        let fresh = PartnerId::generate();
        let stale = PartnerId::generate();
        register(&dir, fresh, None, PartnerRelation::Other, Some("73282932000074"));
        register(&dir, stale, None, PartnerRelation::Other, Some("73282932000074"));
        register(&dir, PartnerId::generate(), None, PartnerRelation::Other, None);

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        for (id, synced_at) in [(fresh, now - Duration::days(2)), (stale, now - Duration::days(40))] {
            let ev = PartnerEvent::PartnerEnriched(PartnerEnriched {
                partner_id: id,
                enrichment: SiretEnrichment {
                    siren: "732829320".to_string(),
                    vat_number: "FR44732829320".to_string(),
                    legal_name: None,
                    trade_name: None,
                    naf_code: None,
                    synced_at,
                },
                occurred_at: synced_at,
            });
            dir.apply_event(id.aggregate_id(), &serde_json::to_value(ev).unwrap())
                .unwrap();
        }

        let queue = dir.needing_sync(now, Duration::days(30)).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].partner_id, stale);
    }

    #[test]
    fn badge_uses_parent_relation_and_children() {
        let dir = PartnerDirectory::new(InMemoryRecordStore::new());
        let group = PartnerId::generate();
        let head = PartnerId::generate();
        register(&dir, group, None, PartnerRelation::Other, None);
        register(&dir, head, Some(group), PartnerRelation::Headquarters, None);

        assert_eq!(dir.badge(&group).unwrap(), Some(HierarchyBadge::ParentCompany));
        assert_eq!(dir.badge(&head).unwrap(), Some(HierarchyBadge::HeadOffice));
    }
}
