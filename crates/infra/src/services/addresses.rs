//! Partner delivery addresses and their validation against the BAN.

use std::sync::Arc;

use tracing::{debug, warn};

use watergile_core::DomainError;
use watergile_parties::{AddressId, AddressInput, Coordinates, Partner, PartnerAddress, PartnerId};

use super::sales::DispatchesView;
use super::{Dispatcher, ServiceResult, SharedRecords, not_found};
use crate::external::{AddressQuery, BanClient, BanFeature, NominatimClient, NominatimPlace};

pub struct AddressService {
    dispatcher: Arc<Dispatcher>,
    addresses: SharedRecords<AddressId, PartnerAddress>,
    dispatches: Arc<DispatchesView>,
    ban: Arc<BanClient>,
    nominatim: Arc<NominatimClient>,
}

impl AddressService {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        addresses: SharedRecords<AddressId, PartnerAddress>,
        dispatches: Arc<DispatchesView>,
        ban: Arc<BanClient>,
        nominatim: Arc<NominatimClient>,
    ) -> Self {
        Self {
            dispatcher,
            addresses,
            dispatches,
            ban,
            nominatim,
        }
    }

    fn ensure_partners_exist(&self, owners: &[PartnerId]) -> ServiceResult<()> {
        for owner in owners {
            let partner = self
                .dispatcher
                .load(owner.aggregate_id(), |id| Partner::empty(PartnerId::new(id)))?;
            if !partner.is_created() {
                return Err(DomainError::validation(format!("partner {owner} is unknown")).into());
            }
        }
        Ok(())
    }

    pub fn create(&self, input: AddressInput) -> ServiceResult<PartnerAddress> {
        self.ensure_partners_exist(&input.owners)?;
        let address = PartnerAddress::new(AddressId::generate(), input)?;
        self.addresses.upsert(address.id, address.clone())?;
        Ok(address)
    }

    pub fn update(&self, id: AddressId, input: AddressInput) -> ServiceResult<PartnerAddress> {
        self.ensure_partners_exist(&input.owners)?;
        let mut address = self.get(id)?;
        address.replace(input)?;
        self.addresses.upsert(id, address.clone())?;
        Ok(address)
    }

    pub fn get(&self, id: AddressId) -> ServiceResult<PartnerAddress> {
        self.addresses.get(&id)?.ok_or_else(not_found)
    }

    pub fn list(&self) -> ServiceResult<Vec<PartnerAddress>> {
        Ok(self.addresses.list()?)
    }

    pub fn for_partner(&self, partner: PartnerId) -> ServiceResult<Vec<PartnerAddress>> {
        Ok(self
            .addresses
            .list()?
            .into_iter()
            .filter(|a| a.belongs_to(partner))
            .collect())
    }

    /// Refused while any dispatch, whatever its state, targets the address.
    pub fn delete(&self, id: AddressId) -> ServiceResult<()> {
        let address = self.get(id)?;
        let referencing = self.dispatches.read_model().for_address(id)?.len();
        address.ensure_deletable(referencing)?;
        self.addresses.remove(&id)?;
        Ok(())
    }

    pub fn archive(&self, id: AddressId) -> ServiceResult<PartnerAddress> {
        let mut address = self.get(id)?;
        let in_progress = self
            .dispatches
            .read_model()
            .for_address(id)?
            .iter()
            .filter(|d| d.is_in_progress())
            .count();
        address.archive(in_progress)?;
        self.addresses.upsert(id, address.clone())?;
        Ok(address)
    }

    pub fn unarchive(&self, id: AddressId) -> ServiceResult<PartnerAddress> {
        let mut address = self.get(id)?;
        address.unarchive();
        self.addresses.upsert(id, address.clone())?;
        Ok(address)
    }

    /// Match a French address against the BAN and keep the best candidate's
    /// score and coordinates.
    ///
    /// When the BAN is unreachable the address is returned unchanged; its
    /// enrichment stays as it was.
    pub async fn validate(&self, id: AddressId) -> ServiceResult<PartnerAddress> {
        let mut address = self.get(id)?;
        if address.country.as_str() != "FR" {
            return Err(DomainError::validation(
                "only French addresses can be checked against the BAN",
            )
            .into());
        }
        let street = address
            .street
            .clone()
            .ok_or_else(|| DomainError::validation("address has no street to check"))?;
        let query = AddressQuery {
            q: street,
            postcode: address.zip.clone(),
            city: address.city.clone(),
            limit: Some(1),
        };

        let best = match self.ban.search(&query).await {
            Ok(features) => features.into_iter().next(),
            Err(err) if err.is_transient() => {
                warn!(address_id = %id, error = %err, "BAN unavailable; address left unvalidated");
                return Ok(address);
            }
            Err(err) => return Err(err.into()),
        };

        match best {
            Some(feature) => {
                debug!(address_id = %id, ban_id = %feature.id, score = feature.score, "BAN match");
                let coordinates = Coordinates {
                    latitude: feature.lat,
                    longitude: feature.lon,
                };
                address.record_ban_match(feature.id, feature.score, Some(coordinates));
                self.addresses.upsert(id, address.clone())?;
            }
            None => debug!(address_id = %id, "no BAN candidate"),
        }
        Ok(address)
    }

    pub async fn search(&self, query: &AddressQuery) -> ServiceResult<Vec<BanFeature>> {
        Ok(self.ban.search(query).await?)
    }

    pub async fn reverse(&self, lat: f64, lon: f64, limit: Option<u32>) -> ServiceResult<Vec<BanFeature>> {
        Ok(self.ban.reverse(lat, lon, limit).await?)
    }

    pub async fn geocode(&self, query: &str, limit: Option<u32>) -> ServiceResult<Vec<NominatimPlace>> {
        Ok(self.nominatim.search(query, limit).await?)
    }
}
