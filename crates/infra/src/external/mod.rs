//! Clients for the public validation services (BAN, Nominatim, INSEE).
//!
//! All calls go through [`HttpSession`], which owns the retry policy: only
//! 5xx answers, timeouts and connection failures are retried; any 4xx is
//! final.

pub mod ban;
pub mod cache;
pub mod insee;
pub mod nominatim;
pub mod session;

use thiserror::Error;

pub use ban::{AddressQuery, BanClient, BanFeature, SearchType, clamp_limit, detect_search_type};
pub use cache::TtlCache;
pub use insee::{InseeClient, InseeEstablishment};
pub use nominatim::{NominatimClient, NominatimPlace};
pub use session::{HttpSession, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalError {
    /// 5xx, timeout or connection failure after every attempt.
    #[error("service temporarily unavailable: {0}")]
    Transient(String),

    /// 4xx; retrying the same input will not help.
    #[error("request rejected with status {status}: {message}")]
    Permanent { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("client misconfigured: {0}")]
    Config(String),
}

impl ExternalError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExternalError::Transient(_))
    }
}
