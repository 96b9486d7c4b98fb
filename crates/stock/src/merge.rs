//! Move merge discipline.
//!
//! Logically identical moves of a picking are merged into one. The merge key
//! carries the dispatch reference, so two moves that differ only by dispatch
//! are never merged and every dispatch keeps its own move.

use rust_decimal::Decimal;

use watergile_products::ProductId;
use watergile_sales::DispatchId;

use crate::picking::StockMove;

/// Fields that must agree for two moves to merge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MergeKey {
    pub product_id: ProductId,
    pub unit_price: Decimal,
    pub dispatch_id: Option<DispatchId>,
    pub origin: String,
}

impl MergeKey {
    pub fn of(mv: &StockMove) -> Self {
        Self {
            product_id: mv.product_id,
            // Normalised so 10 and 10.00 compare as one price.
            unit_price: mv.unit_price.normalize(),
            dispatch_id: mv.dispatch_id,
            origin: mv.origin.clone(),
        }
    }
}

/// Merge moves sharing a [`MergeKey`]; the first move of each run survives
/// and absorbs the quantities of the others.
///
/// Output is ordered by merge key, which includes the dispatch reference.
pub fn merge_moves(moves: &[StockMove]) -> Vec<StockMove> {
    let mut sorted: Vec<&StockMove> = moves.iter().collect();
    sorted.sort_by(|a, b| MergeKey::of(a).cmp(&MergeKey::of(b)).then(a.id.cmp(&b.id)));

    let mut merged: Vec<StockMove> = Vec::with_capacity(sorted.len());
    let mut last_key: Option<MergeKey> = None;
    for mv in sorted {
        let key = MergeKey::of(mv);
        match merged.last_mut() {
            Some(current) if last_key.as_ref() == Some(&key) => {
                current.quantity += mv.quantity;
            }
            _ => {
                merged.push(mv.clone());
                last_key = Some(key);
            }
        }
    }
    merged
}
