use quarry::collection::Namespace;
use quarry::common::Value;
use quarry::doc;
use quarry::errors::ErrorKind;
use quarry::store::{cursor_batch, cursor_id};
use quarry_int_test::test_util::{cleanup, create_test_context, run_test};

#[ctor::ctor]
fn init() {
    colog::init();
}

const DB: &str = "shop";

fn numbers(n: i64) -> Value {
    Value::Array((1..=n).map(|i| Value::Document(doc! { _id: i, n: i })).collect())
}

#[test]
fn test_find_applies_skip_before_limit() {
    run_test(
        || create_test_context(),
        |ctx| {
            let mut insert = doc! { insert: "nums" };
            insert.insert("documents", numbers(10));
            ctx.bridge().run_command(DB, insert)?;

            let found = ctx.find_all(
                DB,
                doc! { find: "nums", filter: { n: { "$gt": 2 } }, sort: { n: (-1) }, skip: 2, limit: 3 },
            )?;
            let ns: Vec<i64> = found.iter().filter_map(|d| d.get("n").and_then(|n| n.as_i64())).collect();
            assert_eq!(ns, vec![8, 7, 6]);

            let projected = ctx.find_all(DB, doc! { find: "nums", filter: { _id: 4 }, projection: { _id: 0 } })?;
            assert_eq!(projected, vec![doc! { n: 4 }]);

            let count = ctx.bridge().run_command(DB, doc! { count: "nums", query: { n: { "$lte": 5 } } })?;
            assert_eq!(count.get("n"), Some(&Value::from(5)));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_cursor_batches_and_kill() {
    run_test(
        || create_test_context(),
        |ctx| {
            let bridge = ctx.bridge();
            let mut insert = doc! { insert: "nums" };
            insert.insert("documents", numbers(7));
            bridge.run_command(DB, insert)?;

            let ns = Namespace::new(DB, "nums");
            let reply = bridge.dispatch(&ns, doc! { find: "nums", batchSize: 3 })?;
            assert_eq!(cursor_batch(&reply).len(), 3);
            let id = cursor_id(&reply);
            assert_ne!(id, 0);

            let more = bridge.dispatch(&ns, doc! { getMore: id, collection: "nums", batchSize: 3 })?;
            assert_eq!(cursor_batch(&more).len(), 3);
            assert_eq!(cursor_id(&more), id);

            let killed = bridge.dispatch(&ns, doc! { killCursors: "nums", cursors: [id, 12345] })?;
            assert_eq!(killed.get("cursorsKilled"), Some(&Value::Array(vec![Value::from(id)])));
            assert_eq!(killed.get("cursorsNotFound"), Some(&Value::Array(vec![Value::from(12345)])));

            let err = bridge
                .dispatch(&ns, doc! { getMore: id, collection: "nums" })
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::CursorNotFound);

            let single = bridge.dispatch(&ns, doc! { find: "nums", batchSize: 2, singleBatch: true })?;
            assert_eq!(cursor_batch(&single).len(), 2);
            assert_eq!(cursor_id(&single), 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_validation_is_all_or_nothing() {
    run_test(
        || create_test_context(),
        |ctx| {
            let bridge = ctx.bridge();
            bridge.run_command(
                DB,
                doc! {
                    create: "orders",
                    validator: { "$jsonSchema": { required: ["item"], properties: { qty: { bsonType: "int" } } } }
                },
            )?;

            let err = bridge
                .run_command(
                    DB,
                    doc! { insert: "orders", documents: [{ _id: 1, item: "pen", qty: 2 }, { _id: 2, qty: 1 }] },
                )
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ValidationError);
            assert!(ctx.find_all(DB, doc! { find: "orders" })?.is_empty());

            bridge.run_command(DB, doc! { insert: "orders", documents: [{ _id: 1, item: "pen", qty: 2 }] })?;
            let err = bridge
                .run_command(
                    DB,
                    doc! { update: "orders", updates: [{ q: { _id: 1 }, u: { "$unset": { item: "" } } }] },
                )
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ValidationError);
            assert_eq!(
                ctx.find_all(DB, doc! { find: "orders" })?,
                vec![doc! { _id: 1, item: "pen", qty: 2 }]
            );
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_duplicate_key() {
    run_test(
        || create_test_context(),
        |ctx| {
            let bridge = ctx.bridge();
            bridge.run_command(DB, doc! { insert: "users", documents: [{ _id: "a" }] })?;

            let err = bridge
                .run_command(DB, doc! { insert: "users", documents: [{ _id: "b" }, { _id: "a" }] })
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::DuplicateKey);
            assert_eq!(err.details().and_then(|d| d.get("_id")), Some(&Value::from("a")));
            assert_eq!(ctx.find_all(DB, doc! { find: "users" })?.len(), 1);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_update_upsert_and_multi() {
    run_test(
        || create_test_context(),
        |ctx| {
            let bridge = ctx.bridge();
            let reply = bridge.run_command(
                DB,
                doc! {
                    update: "stock",
                    updates: [
                        { q: { sku: "x" }, u: { "$inc": { qty: 5 } }, upsert: true },
                        { q: { sku: "x" }, u: { "$inc": { qty: 1 } } }
                    ]
                },
            )?;
            assert_eq!(reply.get("n"), Some(&Value::from(2)));
            assert_eq!(reply.get("nModified"), Some(&Value::from(1)));
            let upserted = reply.get("upserted").and_then(|u| u.as_array()).cloned().unwrap_or_default();
            assert_eq!(upserted.len(), 1);

            let stock = ctx.find_all(DB, doc! { find: "stock", projection: { _id: 0 } })?;
            assert_eq!(stock, vec![doc! { sku: "x", qty: 6 }]);

            bridge.run_command(DB, doc! { insert: "stock", documents: [{ sku: "y", qty: 0 }, { sku: "z", qty: 0 }] })?;
            let reply = bridge.run_command(
                DB,
                doc! { update: "stock", updates: [{ q: { qty: 0 }, u: { "$set": { empty: true } }, multi: true }] },
            )?;
            assert_eq!(reply.get("nModified"), Some(&Value::from(2)));

            let reply = bridge.run_command(DB, doc! { delete: "stock", deletes: [{ q: { empty: true }, limit: 0 }] })?;
            assert_eq!(reply.get("n"), Some(&Value::from(2)));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_aggregate_and_views() {
    run_test(
        || create_test_context(),
        |ctx| {
            let bridge = ctx.bridge();
            bridge.run_command(
                DB,
                doc! {
                    insert: "sales",
                    documents: [
                        { _id: 1, region: "north", amount: 10 },
                        { _id: 2, region: "south", amount: 5 },
                        { _id: 3, region: "north", amount: 7 }
                    ]
                },
            )?;

            let totals = ctx.find_all(
                DB,
                doc! {
                    aggregate: "sales",
                    pipeline: [
                        { "$group": { _id: "$region", total: { "$sum": "$amount" } } },
                        { "$sort": { total: (-1) } }
                    ],
                    cursor: {}
                },
            )?;
            assert_eq!(
                totals,
                vec![doc! { _id: "north", total: 17 }, doc! { _id: "south", total: 5 }]
            );

            bridge.run_command(
                DB,
                doc! { create: "big_sales", viewOn: "sales", pipeline: [{ "$match": { amount: { "$gte": 7 } } }] },
            )?;
            let big = ctx.find_all(DB, doc! { find: "big_sales", sort: { _id: 1 } })?;
            let ids: Vec<i64> = big.iter().filter_map(|d| d.id().and_then(|id| id.as_i64())).collect();
            assert_eq!(ids, vec![1, 3]);

            let err = bridge
                .run_command(DB, doc! { insert: "big_sales", documents: [{ amount: 100 }] })
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InvalidOperation);

            let listed = bridge.run_command(DB, doc! { listCollections: 1, filter: { "type": "view" } })?;
            let views = cursor_batch(&listed);
            assert_eq!(views.len(), 1);
            assert_eq!(views[0].get("name"), Some(&Value::from("big_sales")));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_unknown_command() {
    run_test(
        || create_test_context(),
        |ctx| {
            let err = ctx.bridge().run_command(DB, doc! { compact: "sales" }).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::CommandNotFound);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
