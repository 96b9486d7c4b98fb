//! Parties domain module: partners, SIRET identity, hierarchy, blaz and
//! delivery addresses.
//!
//! Deterministic domain logic only (no IO, no HTTP, no storage).

pub mod address;
pub mod blaz;
pub mod hierarchy;
pub mod partner;
pub mod siret;

pub use address::{
    AddressId, AddressInput, AddressType, BanEnrichment, Coordinates, FormatQuality,
    PartnerAddress, format_quality,
};
pub use blaz::{Blaz, BlazId, BlazRef, check_blaz_usage};
pub use hierarchy::{HierarchyBadge, PartnerRelation, compute_badge};
pub use partner::{
    ArchivePartner, AssignBlaz, MarkSiretInvalid, MarkSyncPendingRetry, Partner, PartnerArchived,
    PartnerBlazAssigned, PartnerCommand, PartnerEnriched, PartnerEvent, PartnerId,
    PartnerParentChanged, PartnerRegistered, PartnerRelationChanged, PartnerRenamed,
    PartnerSiretChanged, PartnerSiretRejected, PartnerSyncDeferred, RecordEnrichment,
    RegisterPartner, RenamePartner, SetParent, SetRelation, SetSiret, SiretEnrichment, SyncState,
};
pub use siret::{Siret, luhn_valid, vat_number_for_siren};
