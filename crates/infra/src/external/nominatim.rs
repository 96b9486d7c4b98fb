//! OpenStreetMap Nominatim geocoding (worldwide fallback to the BAN).

use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{ExternalError, HttpSession, clamp_limit};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NominatimPlace {
    pub display_name: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Deserialize)]
struct RawPlace {
    display_name: String,
    lat: String,
    lon: String,
}

#[derive(Debug)]
pub struct NominatimClient {
    session: HttpSession,
}

impl NominatimClient {
    /// Nominatim's usage policy requires a user agent; set it on the session.
    pub fn new(session: HttpSession) -> Self {
        Self { session }
    }

    #[instrument(skip(self), err)]
    pub async fn search(
        &self,
        query: &str,
        limit: Option<u32>,
    ) -> Result<Vec<NominatimPlace>, ExternalError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ExternalError::InvalidRequest(
                "the search query cannot be empty".to_string(),
            ));
        }
        let params = [
            ("q", query.to_string()),
            ("format", "jsonv2".to_string()),
            ("limit", clamp_limit(limit).to_string()),
        ];
        let raw: Vec<RawPlace> = self.session.get_json("/search", &params, &[]).await?;
        raw.into_iter()
            .map(|p| {
                let lat = p.lat.parse::<f64>();
                let lon = p.lon.parse::<f64>();
                match (lat, lon) {
                    (Ok(lat), Ok(lon)) => Ok(NominatimPlace {
                        display_name: p.display_name,
                        lat,
                        lon,
                    }),
                    _ => Err(ExternalError::Decode(format!(
                        "invalid coordinates '{}', '{}'",
                        p.lat, p.lon
                    ))),
                }
            })
            .collect()
    }
}
