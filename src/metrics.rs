use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("imretrieval_search_count", "count of the search requests", &["status"])
        .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "imretrieval_search_duration",
        "duration of the per-image search in seconds"
    )
    .unwrap()
});

static METRIC_SEARCH_TOP_SCORE: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "imretrieval_search_top_score",
        "cosine similarity of the best match",
        (-10..=10).map(|x| x as f64 / 10.).collect()
    )
    .unwrap()
});

static METRIC_BUILD_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("imretrieval_build_count", "count of the index builds", &["status"])
        .unwrap()
});

static METRIC_BUILD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "imretrieval_build_duration",
        "duration of the index build in seconds",
        exponential_buckets(0.1, 2., 14).unwrap()
    )
    .unwrap()
});

static METRIC_INDEXED_IMAGES: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("imretrieval_indexed_images", "number of images in the serving index")
        .unwrap()
});

/// 记录一次搜索，status 为 `ok` 或错误代码
pub fn inc_search_count(status: &str) {
    METRIC_SEARCH_COUNT.with_label_values(&[status]).inc();
}

pub fn observe_search_duration(duration: f32) {
    METRIC_SEARCH_DURATION.observe(duration as f64);
}

pub fn observe_search_top_score(score: f32) {
    METRIC_SEARCH_TOP_SCORE.observe(score as f64);
}

/// 记录一次构建，status 为 `ok` 或错误代码
pub fn inc_build_count(status: &str) {
    METRIC_BUILD_COUNT.with_label_values(&[status]).inc();
}

pub fn observe_build_duration(duration: f32) {
    METRIC_BUILD_DURATION.observe(duration as f64);
}

pub fn set_indexed_images(count: usize) {
    METRIC_INDEXED_IMAGES.set(count as i64);
}

/// 以文本格式导出所有指标
pub fn render() -> anyhow::Result<String> {
    let metric_families = prometheus::gather();
    Ok(TextEncoder::new().encode_to_string(&metric_families)?)
}
