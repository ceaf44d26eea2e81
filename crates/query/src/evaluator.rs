use std::ops::Bound;

use cachecore_primitives::RecordId;
use cachecore_schema::{KeyRole, KeyValue};
use cachecore_table::{Record, TypeStore};
use indexmap::IndexSet;
use thiserror::Error;

use crate::model::{AndBlock, Op, Predicate, Query};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("key `{0}` is not declared on this type")]
    UnknownKey(String),
    #[error("`{0:?}` against key `{1}` is not supported: {2}")]
    InvalidPredicate(Op, String, &'static str),
    #[error("and-block has no indexable predicate")]
    NotIndexable,
}

/// Evaluates `query` against `table`, returning every matching record id in
/// first-match order, de-duplicated across and-blocks.
///
/// For each and-block, a single *driving* predicate is chosen to produce a
/// candidate set from an index; every other predicate in the block is then
/// applied as a post-filter over that candidate set. An and-block with no
/// indexable predicate fails with [`QueryError::NotIndexable`] — a block
/// with zero predicates is the one exception, matching every record instead.
/// Driving-predicate priority is primary eq, then unique eq, then
/// dictionary-index eq, then ordered-index range, then list-index
/// `contains` — mirroring the table layer's own index-scan-then-filter shape
/// (see `locking_tx_datastore`'s index scan iterators). When more than one
/// predicate in a block is eligible at the same priority, the one whose
/// index bucket is currently smallest is chosen, so the filter pass runs
/// over the fewest candidate records.
#[tracing::instrument(skip_all)]
pub fn evaluate(query: &Query, table: &TypeStore) -> Result<Vec<RecordId>, QueryError> {
    let mut seen = IndexSet::new();
    for block in &query.or_blocks {
        for id in evaluate_block(block, table)? {
            seen.insert(id);
        }
    }
    Ok(seen.into_iter().collect())
}

fn evaluate_block(block: &AndBlock, table: &TypeStore) -> Result<Vec<RecordId>, QueryError> {
    if block.predicates.is_empty() {
        return Ok(table.scan().map(|(id, _)| id).collect());
    }

    let mut best: Option<(usize, u8, Vec<RecordId>)> = None;
    for (i, predicate) in block.predicates.iter().enumerate() {
        let Some((rank, ids)) = driving_candidate(table, predicate)? else {
            continue;
        };
        let better = match &best {
            None => true,
            Some((_, best_rank, best_ids)) => {
                (rank, ids.len()) < (*best_rank, best_ids.len())
            }
        };
        if better {
            best = Some((i, rank, ids));
        }
    }

    let (driving_index, _, candidate_ids) = match best {
        Some(found) => found,
        None => return Err(QueryError::NotIndexable),
    };

    let mut matched = Vec::with_capacity(candidate_ids.len());
    'outer: for id in candidate_ids {
        let Some(record) = table.get_record(id) else { continue };
        for (i, predicate) in block.predicates.iter().enumerate() {
            if i == driving_index {
                continue;
            }
            if !record_matches(record, predicate)? {
                continue 'outer;
            }
        }
        matched.push(id);
    }
    Ok(matched)
}

/// Returns `(priority_rank, candidate_ids)` if `predicate` can drive an
/// index scan, `None` if it can only ever be a post-filter.
fn driving_candidate(
    table: &TypeStore,
    predicate: &Predicate,
) -> Result<Option<(u8, Vec<RecordId>)>, QueryError> {
    let key_desc = table
        .description()
        .find_key(&predicate.key)
        .ok_or_else(|| QueryError::UnknownKey(predicate.key.to_string()))?;

    let ids = match (&key_desc.role, predicate.op) {
        (KeyRole::Primary, Op::Eq) | (KeyRole::Primary, Op::In) => {
            let ids = eq_or_in(predicate, |v| table.primary_index().seek_eq(v).collect());
            return Ok(Some((0, ids)));
        }
        (KeyRole::Unique, Op::Eq) | (KeyRole::Unique, Op::In) => {
            let index = table.unique_index(&predicate.key);
            let ids = eq_or_in(predicate, |v| {
                index.map(|idx| idx.seek_eq(v).collect::<Vec<_>>()).unwrap_or_default()
            });
            return Ok(Some((1, ids)));
        }
        (KeyRole::Index { .. }, Op::Eq) | (KeyRole::Index { .. }, Op::In) => {
            let index = table.scalar_index(&predicate.key);
            let ids = eq_or_in(predicate, |v| {
                index.map(|idx| idx.seek_eq(v).collect::<Vec<_>>()).unwrap_or_default()
            });
            return Ok(Some((2, ids)));
        }
        (KeyRole::Index { ordered: true }, op) if op.is_range() => {
            let Some(index) = table.scalar_index(&predicate.key) else {
                return Ok(None);
            };
            let value = predicate
                .operand
                .as_scalar()
                .ok_or(QueryError::InvalidPredicate(predicate.op, predicate.key.to_string(), "range predicates take a single value"))?
                .clone();
            let (lower, upper) = match op {
                Op::Lt => (Bound::Unbounded, Bound::Excluded(value)),
                Op::Le => (Bound::Unbounded, Bound::Included(value)),
                Op::Gt => (Bound::Excluded(value), Bound::Unbounded),
                Op::Ge => (Bound::Included(value), Bound::Unbounded),
                _ => unreachable!(),
            };
            index.seek_range(lower, upper).collect()
        }
        (KeyRole::ListIndex, Op::Contains) => {
            let Some(index) = table.list_index(&predicate.key) else {
                return Ok(None);
            };
            index.seek_contains_any(predicate.operand.as_set()).collect()
        }
        _ => return Ok(None),
    };
    Ok(Some((3, ids)))
}

fn eq_or_in(predicate: &Predicate, seek: impl Fn(&KeyValue) -> Vec<RecordId>) -> Vec<RecordId> {
    let mut out = Vec::new();
    for value in predicate.operand.as_set() {
        out.extend(seek(value));
    }
    out
}

fn record_matches(record: &Record, predicate: &Predicate) -> Result<bool, QueryError> {
    if predicate.op == Op::Contains {
        let targets = predicate.operand.as_set();
        let list = record.list(&predicate.key).unwrap_or(&[]);
        return Ok(targets.iter().any(|t| list.contains(t)));
    }

    let Some(value) = record.scalar(&predicate.key) else {
        return Ok(false);
    };
    Ok(match predicate.op {
        Op::Eq => predicate.operand.as_scalar() == Some(value),
        Op::Ne => predicate.operand.as_scalar() != Some(value),
        Op::Lt => predicate.operand.as_scalar().is_some_and(|o| value < o),
        Op::Le => predicate.operand.as_scalar().is_some_and(|o| value <= o),
        Op::Gt => predicate.operand.as_scalar().is_some_and(|o| value > o),
        Op::Ge => predicate.operand.as_scalar().is_some_and(|o| value >= o),
        Op::In => predicate.operand.as_set().contains(value),
        Op::Contains => unreachable!("handled above"),
    })
}
