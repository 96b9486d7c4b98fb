//! INSEE Sirene registry (`/api-sirene/3.11`).

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use watergile_parties::Siret;

use super::{ExternalError, HttpSession, TtlCache};

pub const API_KEY_HEADER: &str = "X-INSEE-Api-Key-Integration";

/// Registry data mapped onto the partner enrichment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InseeEstablishment {
    pub siret: String,
    pub siren: String,
    pub legal_name: Option<String>,
    pub trade_name: Option<String>,
    pub naf_code: Option<String>,
    pub active: bool,
}

#[derive(Debug, Deserialize)]
struct SiretResponse {
    etablissement: Etablissement,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Etablissement {
    siret: String,
    siren: String,
    #[serde(default)]
    unite_legale: UniteLegale,
    #[serde(default)]
    periodes_etablissement: Vec<Periode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UniteLegale {
    denomination_unite_legale: Option<String>,
    nom_unite_legale: Option<String>,
    prenom1_unite_legale: Option<String>,
    activite_principale_unite_legale: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Periode {
    enseigne1_etablissement: Option<String>,
    denomination_usuelle_etablissement: Option<String>,
    activite_principale_etablissement: Option<String>,
    etat_administratif_etablissement: Option<String>,
}

impl From<Etablissement> for InseeEstablishment {
    fn from(e: Etablissement) -> Self {
        // The first period is the current one.
        let current = e.periodes_etablissement.into_iter().next();
        let ul = e.unite_legale;
        let legal_name = ul.denomination_unite_legale.or_else(|| {
            ul.nom_unite_legale.map(|nom| match ul.prenom1_unite_legale {
                Some(prenom) => format!("{prenom} {nom}"),
                None => nom,
            })
        });
        let (trade_name, naf_code, active) = match current {
            Some(p) => (
                p.enseigne1_etablissement
                    .or(p.denomination_usuelle_etablissement),
                p.activite_principale_etablissement
                    .or(ul.activite_principale_unite_legale),
                p.etat_administratif_etablissement.as_deref() != Some("F"),
            ),
            None => (None, ul.activite_principale_unite_legale, true),
        };
        Self {
            siret: e.siret,
            siren: e.siren,
            legal_name,
            trade_name,
            naf_code,
            active,
        }
    }
}

#[derive(Debug)]
pub struct InseeClient {
    session: HttpSession,
    api_key: Option<String>,
    cache: TtlCache<String, InseeEstablishment>,
}

impl InseeClient {
    pub fn new(
        session: HttpSession,
        api_key: Option<String>,
        cache: TtlCache<String, InseeEstablishment>,
    ) -> Self {
        Self {
            session,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            cache,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Look an establishment up. 404 (unknown SIRET) is a permanent failure.
    #[instrument(skip(self, siret), fields(siret = %siret.as_str()), err)]
    pub async fn establishment(&self, siret: &Siret) -> Result<InseeEstablishment, ExternalError> {
        let Some(api_key) = &self.api_key else {
            return Err(ExternalError::Config("no INSEE API key configured".to_string()));
        };
        let key = siret.as_str().to_string();
        if let Some(hit) = self.cache.get(&key) {
            debug!("INSEE cache hit");
            return Ok(hit);
        }

        let path = format!("/api-sirene/3.11/siret/{}", siret.as_str());
        let body: SiretResponse = self
            .session
            .get_json(&path, &[], &[(API_KEY_HEADER, api_key.as_str()), ("Accept", "application/json")])
            .await?;

        let establishment = InseeEstablishment::from(body.etablissement);
        self.cache.insert(key, establishment.clone());
        Ok(establishment)
    }

    /// Drop the memoised answer (after the user edits a SIRET).
    pub fn invalidate(&self, siret: &Siret) {
        self.cache.invalidate(&siret.as_str().to_string());
    }
}
