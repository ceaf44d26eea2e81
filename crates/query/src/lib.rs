//! The query model (a union of and-blocks of atomic predicates) and the
//! evaluator that turns one into index scans against a [`cachecore_table::TypeStore`].

mod evaluator;
mod model;

pub use evaluator::{evaluate, QueryError};
pub use model::{AndBlock, Op, Operand, Predicate, Query};

#[cfg(test)]
mod tests {
    use super::*;
    use cachecore_schema::{KeyDescriptor, KeyKind, KeyRole, KeyValue, TypeDescription};
    use cachecore_table::{Record, TypeStore};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn schema() -> Arc<TypeDescription> {
        Arc::new(
            TypeDescription::new("Item", KeyDescriptor::new("pk", KeyKind::Int, KeyRole::Primary))
                .with_unique(KeyDescriptor::new("unique", KeyKind::Int, KeyRole::Unique))
                .with_index(KeyDescriptor::new(
                    "folder",
                    KeyKind::Str,
                    KeyRole::Index { ordered: false },
                ))
                .with_index(KeyDescriptor::new(
                    "qty",
                    KeyKind::Int,
                    KeyRole::Index { ordered: true },
                ))
                .with_list_index(KeyDescriptor::new("tags", KeyKind::Str, KeyRole::ListIndex)),
        )
    }

    fn item(pk: i64, unique: i64, folder: &str, qty: i64, tags: &[&str]) -> Record {
        Record::new(vec![])
            .with_scalar("pk", KeyValue::Int(pk))
            .with_scalar("unique", KeyValue::Int(unique))
            .with_scalar("folder", KeyValue::Str(folder.into()))
            .with_scalar("qty", KeyValue::Int(qty))
            .with_list("tags", tags.iter().map(|t| KeyValue::Str((*t).into())).collect())
    }

    fn populated() -> TypeStore {
        let mut store = TypeStore::new(schema());
        store.put(item(1, 101, "aaa", 5, &["red", "blue"])).unwrap();
        store.put(item(2, 102, "aaa", 10, &["green"])).unwrap();
        store.put(item(3, 103, "bbb", 15, &["blue"])).unwrap();
        store
    }

    #[test]
    fn primary_eq_finds_exactly_one() {
        let store = populated();
        let query = Query::new(vec![AndBlock::new(vec![Predicate::eq("pk", KeyValue::Int(2))])]);
        let ids = evaluate(&query, &store).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.get_record(ids[0]).unwrap().scalar(&"folder".into()), Some(&KeyValue::Str("aaa".into())));
    }

    #[test]
    fn and_block_combines_index_eq_with_post_filter() {
        let store = populated();
        let query = Query::new(vec![AndBlock::new(vec![
            Predicate::eq("folder", KeyValue::Str("aaa".into())),
            Predicate::new("qty", Op::Gt, Operand::Scalar(KeyValue::Int(7))),
        ])]);
        let ids = evaluate(&query, &store).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.get_record(ids[0]).unwrap().scalar(&"pk".into()), Some(&KeyValue::Int(2)));
    }

    #[test]
    fn ordered_index_range_predicate() {
        let store = populated();
        let query = Query::new(vec![AndBlock::new(vec![Predicate::new(
            "qty",
            Op::Ge,
            Operand::Scalar(KeyValue::Int(10)),
        )])]);
        let mut ids = evaluate(&query, &store).unwrap();
        ids.sort();
        let pks: Vec<_> = ids
            .iter()
            .map(|id| store.get_record(*id).unwrap().scalar(&"pk".into()).cloned().unwrap())
            .collect();
        assert_eq!(pks.len(), 2);
        assert!(pks.contains(&KeyValue::Int(2)));
        assert!(pks.contains(&KeyValue::Int(3)));
    }

    #[test]
    fn list_index_contains() {
        let store = populated();
        let query = Query::new(vec![AndBlock::new(vec![Predicate::contains(
            "tags",
            KeyValue::Str("blue".into()),
        )])]);
        let ids = evaluate(&query, &store).unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn or_of_and_blocks_unions_and_dedups() {
        let store = populated();
        let query = Query::new(vec![
            AndBlock::new(vec![Predicate::eq("pk", KeyValue::Int(1))]),
            AndBlock::new(vec![Predicate::eq("folder", KeyValue::Str("aaa".into()))]),
        ]);
        let ids = evaluate(&query, &store).unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn match_all_returns_every_record() {
        let store = populated();
        let ids = evaluate(&Query::match_all(), &store).unwrap();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn unknown_key_is_an_error() {
        let store = populated();
        let query = Query::new(vec![AndBlock::new(vec![Predicate::eq("nope", KeyValue::Int(1))])]);
        assert!(evaluate(&query, &store).is_err());
    }

    #[test]
    fn and_block_with_no_indexable_predicate_is_not_indexable() {
        let store = populated();
        // `folder` only supports eq/in as a dictionary index; `!=` alone
        // can't drive a scan and there's no other predicate in the block.
        let query = Query::new(vec![AndBlock::new(vec![Predicate::new(
            "folder",
            Op::Ne,
            Operand::Scalar(KeyValue::Str("aaa".into())),
        )])]);
        assert_eq!(evaluate(&query, &store).unwrap_err(), QueryError::NotIndexable);
    }

    #[test]
    fn driving_predicate_prefers_smaller_bucket_on_tie() {
        let mut store = TypeStore::new(schema());
        for i in 0..20 {
            store.put(item(i, 1000 + i, "common", 1, &[])).unwrap();
        }
        store.put(item(99, 1999, "rare", 1, &[])).unwrap();

        let query = Query::new(vec![AndBlock::new(vec![
            Predicate::eq("folder", KeyValue::Str("rare".into())),
            Predicate::eq("qty", KeyValue::Int(1)),
        ])]);
        let ids = evaluate(&query, &store).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.get_record(ids[0]).unwrap().scalar(&"pk".into()), Some(&KeyValue::Int(99)));
    }

    proptest! {
        /// Invariant 3 (query half): whatever index an and-block's predicates
        /// pick to drive the scan, the result is exactly what a brute-force
        /// per-record predicate check would have returned. The chosen index
        /// is only ever an optimization, never a source of truth of its own.
        #[test]
        fn eq_block_matches_a_brute_force_scan(
            folder_filter in "aaa|bbb|ccc",
            qty_floor in 0i64..20,
            rows in prop::collection::vec((0i64..1000, "aaa|bbb|ccc", 0i64..20), 0..40),
        ) {
            let mut store = TypeStore::new(schema());
            let mut unique = 0i64;
            for (pk, folder, qty) in &rows {
                unique += 1;
                let _ = store.put(item(*pk, unique, folder, *qty, &[]));
            }

            let query = Query::new(vec![AndBlock::new(vec![
                Predicate::eq("folder", KeyValue::Str(folder_filter.clone())),
                Predicate::new("qty", Op::Ge, Operand::Scalar(KeyValue::Int(qty_floor))),
            ])]);
            let mut via_index: Vec<_> = evaluate(&query, &store).unwrap();
            via_index.sort();

            let mut via_scan: Vec<_> = store
                .scan()
                .filter(|(_, record)| {
                    record.scalar(&"folder".into()) == Some(&KeyValue::Str(folder_filter.clone()))
                        && matches!(record.scalar(&"qty".into()), Some(KeyValue::Int(q)) if *q >= qty_floor)
                })
                .map(|(id, _)| id)
                .collect();
            via_scan.sort();

            prop_assert_eq!(via_index, via_scan);
        }
    }
}
