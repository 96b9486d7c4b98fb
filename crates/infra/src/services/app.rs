//! Service graph: every service built once over one set of [`Backends`].

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tracing::info;

use watergile_delivery::{Carrier, CarrierId, DeliveryZone, SlotId, TimeSlot, ZoneId};
use watergile_parties::{AddressId, Blaz, BlazId, PartnerAddress};
use watergile_products::{Equipment, EquipmentId, Pricelist, PricelistId};

use super::partners::PartnerDirectoryView;
use super::sales::{DispatchesView, SalesOrdersView};
use super::{
    AddressService, Backends, CatalogService, DeliveryService, Dispatcher, PartnerService,
    SalesService, SharedRecords, StockService,
};
use crate::aggregate_types::{PARTNER, SALE_ORDER};
use crate::config::AppConfig;
use crate::external::{
    BanClient, ExternalError, HttpSession, InseeClient, NominatimClient, TtlCache,
};
use crate::projections::{
    Checkpointed, DispatchesProjection, PartnerDirectory, ProjectionFailure, SalesOrdersProjection,
};
use crate::sync::{CheckpointStore, SiretLookup, SiretSyncJob, SyncError, SyncSettings};
use crate::workers::{ProjectionWorker, WorkerHandle};

/// Clients of the public validation services.
#[derive(Clone)]
pub struct Clients {
    pub ban: Arc<BanClient>,
    pub nominatim: Arc<NominatimClient>,
    pub insee: Arc<InseeClient>,
}

impl Clients {
    pub fn from_config(config: &AppConfig) -> Result<Self, ExternalError> {
        let policy = config.http_retry.policy();
        let ttl = config.cache.validator_ttl();

        let ban = HttpSession::new(
            &config.ban.base_url,
            std::time::Duration::from_secs(config.ban.timeout_secs),
            policy,
            None,
        )?;
        let nominatim = HttpSession::new(
            &config.nominatim.base_url,
            std::time::Duration::from_secs(config.nominatim.timeout_secs),
            policy,
            Some(&config.nominatim.user_agent),
        )?;
        let insee = HttpSession::new(
            &config.insee.base_url,
            std::time::Duration::from_secs(config.insee.timeout_secs),
            policy,
            None,
        )?;

        Ok(Self {
            ban: Arc::new(BanClient::new(ban, TtlCache::new(ttl))),
            nominatim: Arc::new(NominatimClient::new(nominatim)),
            insee: Arc::new(InseeClient::new(
                insee,
                config.insee.api_key.clone(),
                TtlCache::new(ttl),
            )),
        })
    }
}

#[derive(Clone)]
pub struct AppServices {
    pub backends: Backends,
    pub dispatcher: Arc<Dispatcher>,
    pub partners: Arc<PartnerService>,
    pub addresses: Arc<AddressService>,
    pub delivery: Arc<DeliveryService>,
    pub catalog: Arc<CatalogService>,
    pub sales: Arc<SalesService>,
    pub stock: Arc<StockService>,
    pub clients: Clients,
    directory: Arc<PartnerDirectoryView>,
}

impl AppServices {
    pub fn build(backends: Backends, clients: Clients) -> Self {
        let dispatcher = Arc::new(backends.dispatcher());

        // Collections read by more than one service are created once.
        let addresses: SharedRecords<AddressId, PartnerAddress> = backends.records("addresses");
        let zones: SharedRecords<ZoneId, DeliveryZone> = backends.records("delivery_zones");
        let carriers: SharedRecords<CarrierId, Carrier> = backends.records("carriers");
        let slots: SharedRecords<SlotId, TimeSlot> = backends.records("time_slots");
        let blazes: SharedRecords<BlazId, Blaz> = backends.records("blazes");
        let pricelists: SharedRecords<PricelistId, Pricelist> = backends.records("pricelists");
        let equipment: SharedRecords<EquipmentId, Equipment> = backends.records("equipment");

        let directory: Arc<PartnerDirectoryView> = Arc::new(Checkpointed::new(
            PartnerDirectory::new(backends.records("partner_directory")),
            backends.cursors.clone(),
        ));
        let orders: Arc<SalesOrdersView> = Arc::new(Checkpointed::new(
            SalesOrdersProjection::new(backends.records("sale_orders")),
            backends.cursors.clone(),
        ));
        let dispatches: Arc<DispatchesView> = Arc::new(Checkpointed::new(
            DispatchesProjection::new(backends.records("dispatches")),
            backends.cursors.clone(),
        ));

        let registry: Option<Arc<dyn SiretLookup>> = if clients.insee.is_enabled() {
            Some(clients.insee.clone())
        } else {
            None
        };
        let partners = Arc::new(PartnerService::new(
            dispatcher.clone(),
            directory.clone(),
            blazes,
            registry,
        ));
        let delivery = Arc::new(DeliveryService::new(zones.clone(), carriers, slots));
        let catalog = Arc::new(CatalogService::new(
            dispatcher.clone(),
            pricelists,
            equipment,
            zones,
        ));
        let address_service = Arc::new(AddressService::new(
            dispatcher.clone(),
            addresses.clone(),
            dispatches.clone(),
            clients.ban.clone(),
            clients.nominatim.clone(),
        ));
        let sales = Arc::new(SalesService::new(
            dispatcher.clone(),
            orders,
            dispatches,
            backends.groups.clone(),
            addresses.clone(),
            delivery.clone(),
            catalog.clone(),
        ));
        let stock = Arc::new(StockService::new(
            dispatcher.clone(),
            sales.clone(),
            catalog.clone(),
            addresses,
        ));

        Self {
            backends,
            dispatcher,
            partners,
            addresses: address_service,
            delivery,
            catalog,
            sales,
            stock,
            clients,
            directory,
        }
    }

    /// Bring every projection up to date with the event store.
    pub fn catch_up(&self) -> Result<usize, ProjectionFailure> {
        let store = self.dispatcher.store();
        let applied = self.directory.catch_up(store)?
            + self.sales.orders().catch_up(store)?
            + self.sales.dispatch_view().catch_up(store)?;
        info!(applied, "projections caught up");
        Ok(applied)
    }

    /// Feed the projections from the bus, for events committed by another
    /// writer than the service that refreshes inline.
    pub fn spawn_projection_worker(&self) -> std::io::Result<WorkerHandle> {
        let directory = self.directory.clone();
        let orders = self.sales.orders().clone();
        let dispatches = self.sales.dispatch_view().clone();
        ProjectionWorker::spawn(
            "projections",
            self.backends.bus.clone(),
            &[PARTNER, SALE_ORDER],
            move |envelope| {
                directory.apply_envelope(&envelope)?;
                orders.apply_envelope(&envelope)?;
                dispatches.apply_envelope(&envelope)?;
                Ok::<(), ProjectionFailure>(())
            },
        )
    }

    /// SIRET enrichment job; `None` when no INSEE key is configured.
    pub fn siret_sync_job(
        &self,
        config: &AppConfig,
    ) -> Result<
        Option<SiretSyncJob<Arc<InseeClient>, Arc<PartnerService>, Arc<dyn CheckpointStore>>>,
        SyncError,
    > {
        if !self.clients.insee.is_enabled() {
            return Ok(None);
        }
        let settings = SyncSettings::new(
            config.insee.batch_size,
            ChronoDuration::days(config.insee.resync_after_days),
        )?;
        Ok(Some(SiretSyncJob::new(
            self.clients.insee.clone(),
            self.partners.clone(),
            self.backends.checkpoints.clone(),
            settings,
        )))
    }
}
