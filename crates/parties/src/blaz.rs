//! Blaz: brand/signboard grouping of partners, owned by a company.

use serde::{Deserialize, Serialize};

use watergile_core::{DomainError, Entity};

use crate::partner::PartnerId;

watergile_core::domain_id!(
    /// Blaz identifier.
    BlazId
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blaz {
    pub id: BlazId,
    /// Stored upper-case.
    pub name: String,
    pub owner_id: PartnerId,
    pub active: bool,
}

impl Blaz {
    /// Create a blaz. The owner must be a company.
    pub fn new(
        id: BlazId,
        name: &str,
        owner_id: PartnerId,
        owner_is_company: bool,
    ) -> Result<Self, DomainError> {
        let name = name.trim().to_uppercase();
        if name.is_empty() {
            return Err(DomainError::validation("blaz name cannot be empty"));
        }
        if !owner_is_company {
            return Err(DomainError::validation("the owner of a blaz must be a company"));
        }
        Ok(Self {
            id,
            name,
            owner_id,
            active: true,
        })
    }
}

impl Entity for Blaz {
    type Id = BlazId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// What a partner needs to know about a blaz before using it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlazRef {
    pub blaz_id: BlazId,
    pub owner_id: PartnerId,
}

impl From<&Blaz> for BlazRef {
    fn from(blaz: &Blaz) -> Self {
        Self {
            blaz_id: blaz.id,
            owner_id: blaz.owner_id,
        }
    }
}

/// Usage rules: a company may only use a blaz it owns; a non-company partner
/// attached to a parent may only use a blaz owned by that parent.
pub fn check_blaz_usage(
    partner_id: PartnerId,
    is_company: bool,
    parent_id: Option<PartnerId>,
    blaz: &BlazRef,
) -> Result<(), DomainError> {
    if is_company {
        if blaz.owner_id != partner_id {
            return Err(DomainError::invariant(
                "a company can only use a blaz it owns",
            ));
        }
        return Ok(());
    }
    match parent_id {
        Some(parent) if parent != blaz.owner_id => Err(DomainError::invariant(
            "partners must be attached to the company owning the blaz",
        )),
        _ => Ok(()),
    }
}
