use criterion::{black_box, criterion_group, criterion_main, Criterion};
use packflow_core::merge::deep_merge;
use packflow_core::ChainableConfig;
use serde_json::json;

fn bench_chain_build(c: &mut Criterion) {
    c.bench_function("chain_set_and_snapshot", |b| {
        b.iter(|| {
            let config = ChainableConfig::new();
            config
                .set("entry", json!("src/index.js"))
                .set("output.path", json!("build/web"))
                .set("output.publicPath", json!("/"))
                .set("devServer.port", json!(3000))
                .set("mode", json!("production"));
            black_box(config.to_config())
        })
    });
}

fn bench_deep_merge(c: &mut Criterion) {
    let base = json!({
        "port": 9999,
        "host": "127.0.0.1",
        "headers": {"Access-Control-Allow-Origin": "*"},
        "static": ["public"],
    });
    let overlay = json!({
        "port": 3000,
        "headers": {"X-Dev": "1"},
        "static": ["assets"],
    });

    c.bench_function("deep_merge_server_config", |b| {
        b.iter(|| {
            let mut merged = base.clone();
            deep_merge(&mut merged, black_box(&overlay));
            black_box(merged)
        })
    });
}

criterion_group!(benches, bench_chain_build, bench_deep_merge);
criterion_main!(benches);
