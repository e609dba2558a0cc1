mod common;

use std::collections::HashSet;

use bytes::Bytes;
use common::Fixture;
use metrics_util::debugging::DebuggingRecorder;
use pressroom::application::repos::ArticleQuery;
use pressroom::domain::articles::{ArticlePatch, ArticleWrite};
use pressroom::infra::telemetry;

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let fx = Fixture::new();
    let ada = fx.author("ada").await;
    let id = fx.article(ada, "Measured", &["metrics"]).await;

    // miss, then hit, on both read paths
    fx.service.read_one(id).await.expect("miss");
    fx.service.read_one(id).await.expect("hit");
    fx.service
        .read_list(&ArticleQuery::default())
        .await
        .expect("list");

    // decode fault
    let key = fx.service.keys().detail(id);
    assert!(fx.backend.memory().corrupt(&key, Bytes::from_static(b"not json")));
    fx.service.read_one(id).await.expect_err("corrupt entry");

    // backend failure: bypass, failed fill, failed invalidation
    fx.backend.set_down(true);
    fx.service.read_one(id).await.expect("bypass");
    fx.service
        .write(ArticleWrite::Update {
            id,
            patch: ArticlePatch {
                content: Some("changed".to_string()),
                ..ArticlePatch::default()
            },
        })
        .await
        .expect("write commits");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for expected in [
        "pressroom_cache_hit_total",
        "pressroom_cache_miss_total",
        "pressroom_cache_bypass_total",
        "pressroom_cache_corrupt_total",
        "pressroom_cache_fill_failed_total",
        "pressroom_cache_invalidation_failed_total",
        "pressroom_cache_backend_error_total",
        "pressroom_store_query_total",
        "pressroom_load_ms",
    ] {
        assert!(names.contains(expected), "missing metric `{expected}`");
    }
}
