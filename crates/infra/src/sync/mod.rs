//! Scheduled synchronisation jobs.

pub mod checkpoint;
pub mod siret_sync;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore, PostgresCheckpointStore};
pub use siret_sync::{
    CancellationFlag, MAX_BATCH_SIZE, PartnerGateway, SiretLookup, SiretSyncJob, SyncError,
    SyncOutcome, SyncReport, SyncSettings, registry_outcome,
};
