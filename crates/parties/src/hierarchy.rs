//! Partner hierarchy badges (parent company, subsidiary, head office, ...).

use serde::{Deserialize, Serialize};

/// Role of a partner inside its group of companies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerRelation {
    #[default]
    Other,
    Agency,
    Headquarters,
}

/// Badge displayed next to a company, derived from its place in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyBadge {
    ParentCompany,
    Subsidiary,
    HeadOffice,
    Branch,
    Antenna,
}

impl HierarchyBadge {
    pub fn label(self) -> &'static str {
        match self {
            HierarchyBadge::ParentCompany => "Maison mère",
            HierarchyBadge::Subsidiary => "Filiale",
            HierarchyBadge::HeadOffice => "Siège",
            HierarchyBadge::Branch => "Agence",
            HierarchyBadge::Antenna => "Antenne",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            HierarchyBadge::ParentCompany => "primary",
            HierarchyBadge::Subsidiary => "success",
            HierarchyBadge::HeadOffice | HierarchyBadge::Antenna => "warning",
            HierarchyBadge::Branch => "info",
        }
    }
}

/// Compute the badge of a partner.
///
/// `parent_relation` is `None` when the partner has no parent.
pub fn compute_badge(
    relation: PartnerRelation,
    parent_relation: Option<PartnerRelation>,
    has_children: bool,
) -> Option<HierarchyBadge> {
    use PartnerRelation::*;

    match (parent_relation, relation) {
        (None, Other) if has_children => Some(HierarchyBadge::ParentCompany),
        (Some(Other), Other) => Some(HierarchyBadge::Subsidiary),
        (Some(Other), Headquarters) => Some(HierarchyBadge::HeadOffice),
        (Some(Headquarters), Agency) => Some(HierarchyBadge::Branch),
        (Some(Headquarters), Headquarters) => Some(HierarchyBadge::Antenna),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PartnerRelation::*;

    #[test]
    fn root_with_children_is_parent_company() {
        assert_eq!(compute_badge(Other, None, true), Some(HierarchyBadge::ParentCompany));
        assert_eq!(compute_badge(Other, None, false), None);
    }

    #[test]
    fn badges_follow_parent_and_own_relation() {
        assert_eq!(compute_badge(Other, Some(Other), false), Some(HierarchyBadge::Subsidiary));
        assert_eq!(compute_badge(Headquarters, Some(Other), false), Some(HierarchyBadge::HeadOffice));
        assert_eq!(compute_badge(Agency, Some(Headquarters), false), Some(HierarchyBadge::Branch));
        assert_eq!(compute_badge(Headquarters, Some(Headquarters), true), Some(HierarchyBadge::Antenna));
        assert_eq!(compute_badge(Agency, Some(Other), false), None);
    }

    #[test]
    fn labels_are_french() {
        assert_eq!(HierarchyBadge::ParentCompany.label(), "Maison mère");
        assert_eq!(HierarchyBadge::Branch.label(), "Agence");
    }
}
