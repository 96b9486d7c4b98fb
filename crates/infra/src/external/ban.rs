//! Base Adresse Nationale (api-adresse.data.gouv.fr).

use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{ExternalError, HttpSession, TtlCache};

pub const DEFAULT_LIMIT: u32 = 5;
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Housenumber,
    Street,
    Municipality,
}

impl SearchType {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchType::Housenumber => "housenumber",
            SearchType::Street => "street",
            SearchType::Municipality => "municipality",
        }
    }
}

/// `municipality` when the query is the city itself, `housenumber` when it
/// contains a digit, `street` otherwise.
pub fn detect_search_type(query: &str, city: Option<&str>) -> SearchType {
    let query = query.trim();
    if city.is_some_and(|c| c.trim() == query) {
        SearchType::Municipality
    } else if query.chars().any(|c| c.is_ascii_digit()) {
        SearchType::Housenumber
    } else {
        SearchType::Street
    }
}

pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressQuery {
    pub q: String,
    pub postcode: Option<String>,
    pub city: Option<String>,
    pub limit: Option<u32>,
}

/// One candidate address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanFeature {
    pub id: String,
    pub label: String,
    pub score: f64,
    pub kind: Option<String>,
    pub housenumber: Option<String>,
    pub street: Option<String>,
    pub postcode: Option<String>,
    pub city: Option<String>,
    pub citycode: Option<String>,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<RawFeature>,
}

#[derive(Debug, Deserialize)]
struct RawFeature {
    geometry: Geometry,
    properties: Properties,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    /// `[lon, lat]`
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct Properties {
    #[serde(default)]
    id: String,
    label: String,
    score: f64,
    #[serde(rename = "type")]
    kind: Option<String>,
    housenumber: Option<String>,
    street: Option<String>,
    postcode: Option<String>,
    city: Option<String>,
    citycode: Option<String>,
}

impl TryFrom<RawFeature> for BanFeature {
    type Error = ExternalError;

    fn try_from(raw: RawFeature) -> Result<Self, Self::Error> {
        let [lon, lat] = raw.geometry.coordinates[..] else {
            return Err(ExternalError::Decode(
                "feature geometry is not a [lon, lat] point".to_string(),
            ));
        };
        let p = raw.properties;
        Ok(Self {
            id: p.id,
            label: p.label,
            score: p.score,
            kind: p.kind,
            housenumber: p.housenumber,
            street: p.street,
            postcode: p.postcode,
            city: p.city,
            citycode: p.citycode,
            lat,
            lon,
        })
    }
}

#[derive(Debug)]
pub struct BanClient {
    session: HttpSession,
    cache: TtlCache<String, Vec<BanFeature>>,
}

impl BanClient {
    pub fn new(session: HttpSession, cache: TtlCache<String, Vec<BanFeature>>) -> Self {
        Self { session, cache }
    }

    #[instrument(skip(self, query), fields(q = %query.q), err)]
    pub async fn search(&self, query: &AddressQuery) -> Result<Vec<BanFeature>, ExternalError> {
        let q = query.q.trim();
        if q.is_empty() {
            return Err(ExternalError::InvalidRequest(
                "the search query cannot be empty".to_string(),
            ));
        }
        let postcode = query
            .postcode
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());
        if let Some(pc) = postcode {
            if pc.len() != 5 || !pc.chars().all(|c| c.is_ascii_digit()) {
                return Err(ExternalError::InvalidRequest(format!(
                    "postcode '{pc}' must be 5 digits"
                )));
            }
        }
        let city = query.city.as_deref().map(str::trim).filter(|c| !c.is_empty());

        let mut params = vec![
            ("q", q.to_string()),
            ("limit", clamp_limit(query.limit).to_string()),
            ("type", detect_search_type(q, city).as_str().to_string()),
        ];
        if let Some(pc) = postcode {
            params.push(("postcode", pc.to_string()));
        }
        if let Some(c) = city {
            params.push(("city", c.to_string()));
        }

        let key = params
            .iter()
            .map(|(k, v)| format!("{k}={}", v.to_lowercase()))
            .collect::<Vec<_>>()
            .join("&");
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let features = self.fetch("/search/", &params).await?;
        self.cache.insert(key, features.clone());
        Ok(features)
    }

    #[instrument(skip(self), err)]
    pub async fn reverse(
        &self,
        lat: f64,
        lon: f64,
        limit: Option<u32>,
    ) -> Result<Vec<BanFeature>, ExternalError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(ExternalError::InvalidRequest(format!(
                "coordinates ({lat}, {lon}) are out of range"
            )));
        }
        let params = [
            ("lat", lat.to_string()),
            ("lon", lon.to_string()),
            ("limit", clamp_limit(limit).to_string()),
        ];
        self.fetch("/reverse/", &params).await
    }

    pub fn invalidate(&self, key: &str) {
        self.cache.invalidate(&key.to_string());
    }

    async fn fetch(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<BanFeature>, ExternalError> {
        let body: FeatureCollection = self.session.get_json(path, params, &[]).await?;
        body.features.into_iter().map(BanFeature::try_from).collect()
    }
}
