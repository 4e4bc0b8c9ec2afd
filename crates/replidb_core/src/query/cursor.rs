//! Cursor boundary evaluation.
//!
//! A cursor marks one position in a query's total order. An entity passes
//! the boundary if, scanning order keys left to right, its first non-tied
//! key falls after the cursor value in that key's direction. If every order
//! key ties, the entity id (the implicit final ascending key) decides; a tie
//! through the id as well passes only when the boundary is inclusive. The
//! passing set is therefore a contiguous suffix of the sorted sequence, so
//! concatenated pages reproduce an unbounded fetch exactly.

use super::order::order_key;
use super::{Cursor, Direction, OrderSpec};
use crate::changes::EntityId;
use crate::value::Value;
use std::cmp::Ordering;

/// Returns true if `(id, entity)` lies after (or at, when `inclusive`) the
/// cursor boundary under the query's order.
pub(super) fn passes_boundary(
    order: &[OrderSpec],
    cursor: &Cursor,
    inclusive: bool,
    id: &EntityId,
    entity: &Value,
) -> bool {
    for (index, spec) in order.iter().enumerate() {
        // A short cursor pins only the leading keys.
        let Some(boundary) = cursor.values.get(index) else {
            break;
        };
        let ord = order_key(entity, spec).total_cmp(boundary);
        let ord = match spec.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        match ord {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => {}
        }
    }
    match id.cmp(&cursor.id) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => inclusive,
    }
}

/// Builds the cursor that resumes after `(id, entity)`.
pub(super) fn cursor_for(order: &[OrderSpec], id: &EntityId, entity: &Value) -> Cursor {
    Cursor {
        values: order
            .iter()
            .map(|spec| order_key(entity, spec).clone())
            .collect(),
        id: id.clone(),
    }
}
