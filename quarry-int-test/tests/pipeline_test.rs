use quarry::aggregation::OperatorImpl;
use quarry::collection::Document;
use quarry::common::{collect_documents, stream_of, DocumentStream, PluginRegistrar, QuarryModule, Value};
use quarry::doc;
use quarry::errors::{ErrorKind, QuarryResult};
use quarry::Quarry;
use quarry_int_test::test_util::{cleanup, create_context_with, run_test, FILE_DB};
use quarry::store::file::FileStoreConfig;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[ctor::ctor]
fn init() {
    colog::init();
}

fn counting_source(pulled: Arc<AtomicUsize>) -> DocumentStream {
    Box::new((0i64..).map(move |i| {
        pulled.fetch_add(1, Ordering::SeqCst);
        Ok(doc! { i: i })
    }))
}

#[test]
fn test_pipeline_pulls_only_what_it_needs() {
    let quarry = Quarry::builder().build().unwrap();
    let pulled = Arc::new(AtomicUsize::new(0));
    let stages = vec![
        doc! { "$match": { i: { "$gte": 10 } } },
        doc! { "$skip": 2 },
        doc! { "$limit": 3 },
    ];

    let result = collect_documents(quarry.aggregate(&stages, counting_source(pulled.clone())).unwrap()).unwrap();
    assert_eq!(result, vec![doc! { i: 12 }, doc! { i: 13 }, doc! { i: 14 }]);
    assert_eq!(pulled.load(Ordering::SeqCst), 15);
}

#[test]
fn test_compile_errors_surface_before_reading() {
    let quarry = Quarry::builder().build().unwrap();
    let pulled = Arc::new(AtomicUsize::new(0));
    let err = quarry
        .aggregate(&[doc! { "$frobnicate": {} }], counting_source(pulled.clone()))
        .err()
        .unwrap();
    assert_eq!(err.kind(), &ErrorKind::UnknownOperator);
    assert_eq!(pulled.load(Ordering::SeqCst), 0);
}

#[test]
fn test_codec_operators_in_pipelines() {
    let quarry = Quarry::builder().build().unwrap();
    let input = stream_of(vec![doc! { raw: r#"{"a":1,"b":[true]}"# }]);
    let stages = vec![
        doc! { "$set": { parsed: { "$jsonToObject": "$raw" } } },
        doc! { "$project": { _id: 0, a: "$parsed.a", yaml: { "$objectToYaml": { input: "$parsed" } } } },
    ];
    let result = collect_documents(quarry.aggregate(&stages, input).unwrap()).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].get("a"), Some(&Value::from(1)));
    let yaml = result[0].get("yaml").and_then(|y| y.as_str()).unwrap_or_default();
    assert!(yaml.contains("a: 1"));
}

/// Counts words of a string.
struct WordCountModule;

impl QuarryModule for WordCountModule {
    fn name(&self) -> &str {
        "word-count"
    }

    fn load(&self, registrar: &PluginRegistrar) -> QuarryResult<()> {
        registrar.register_operator(
            "$wordCount",
            OperatorImpl::expression(|args: Vec<Value>, _: &Document| {
                let count = args
                    .first()
                    .and_then(|text| text.as_str())
                    .map(|text| text.split_whitespace().count())
                    .unwrap_or(0);
                Ok(Some(Value::from(count)))
            }),
        )
    }
}

#[test]
fn test_module_operator_over_text_collection() {
    run_test(
        || {
            let quarry = Quarry::builder().load_module(WordCountModule).build()?;
            create_context_with(quarry, |root| FileStoreConfig::new(root))
        },
        |ctx| {
            let bridge = ctx.bridge();
            bridge.run_command(FILE_DB, doc! { create: "notes", format: "text" })?;
            fs::write(ctx.file("site/notes/short.txt"), "one two")?;
            fs::write(ctx.file("site/notes/long.txt"), "one two three four")?;

            let found = ctx.find_all(
                FILE_DB,
                doc! {
                    aggregate: "notes",
                    pipeline: [
                        { "$project": { words: { "$wordCount": "$content" } } },
                        { "$sort": { words: (-1) } }
                    ]
                },
            )?;
            assert_eq!(
                found,
                vec![doc! { _id: "long", words: 4 }, doc! { _id: "short", words: 2 }]
            );
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
