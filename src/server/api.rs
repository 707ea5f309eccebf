use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum_typed_multipart::TypedMultipart;
use log::info;
use utoipa::OpenApi;

use super::ApiDoc;
use super::error::{AppError, ErrorResponse, Result};
use super::state::AppState;
use super::types::*;
use crate::index::Stats;
use crate::metrics;
use crate::utils::public_image_url;

const DEFAULT_GALLERY_LIMIT: usize = 40;

/// 健康检查，会等待索引就绪
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, body = HealthResponse),
        (status = 503, body = ErrorResponse),
    )
)]
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>> {
    state.retrieval.ensure_index_ready_timeout(state.build_timeout).await?;
    Ok(Json(HealthResponse { status: "ok".to_string() }))
}

/// 图库概览
#[utoipa::path(
    get,
    path = "/api/gallery",
    params(GalleryQuery),
    responses(
        (status = 200, body = GalleryResponse),
    )
)]
pub async fn gallery_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GalleryQuery>,
) -> Result<Json<GalleryResponse>> {
    state.retrieval.ensure_index_ready_timeout(state.build_timeout).await?;
    let limit = parse_count(query.limit.as_deref()).unwrap_or(DEFAULT_GALLERY_LIMIT);
    let gallery = state.retrieval.gallery(limit).await?;
    let items = gallery
        .items
        .into_iter()
        .map(|item| GalleryItemView {
            image_url: public_image_url(&state.static_prefix, &item.relative_path),
            item,
        })
        .collect();
    Ok(Json(GalleryResponse { total: gallery.total, categories: gallery.categories, items }))
}

/// 索引统计信息
#[utoipa::path(
    get,
    path = "/api/stats",
    responses(
        (status = 200, body = Stats),
    )
)]
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<Json<Stats>> {
    let snapshot = state.retrieval.ensure_index_ready_timeout(state.build_timeout).await?;
    Ok(Json(snapshot.stats.clone()))
}

/// 搜索一张图片
#[utoipa::path(
    post,
    path = "/api/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponseView),
        (status = 400, body = ErrorResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(data): TypedMultipart<SearchRequest>,
) -> Result<Json<SearchResponseView>> {
    let image = data.image.ok_or_else(|| AppError::BadRequest("缺少图片字段 image".to_string()))?;
    let top_k = parse_count(data.top_k.as_deref()).unwrap_or(state.top_k);

    info!(
        "正在搜索上传图片 {}，{} 字节",
        image.metadata.file_name.as_deref().unwrap_or("<unnamed>"),
        image.contents.len()
    );

    state.retrieval.ensure_index_ready_timeout(state.build_timeout).await?;
    let response = state.retrieval.search(image.contents, top_k).await?;
    Ok(Json(SearchResponseView::new(response.results, &state.static_prefix)))
}

/// 重新构建索引
#[utoipa::path(
    post,
    path = "/api/rebuild",
    responses(
        (status = 200, body = Stats),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn rebuild_handler(State(state): State<Arc<AppState>>) -> Result<Json<Stats>> {
    info!("收到重建索引请求");
    let snapshot = state.retrieval.rebuild().await?;
    Ok(Json(snapshot.stats.clone()))
}

/// prometheus 指标
pub async fn metrics_handler() -> Result<impl IntoResponse> {
    let body = metrics::render()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

pub async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub async fn not_found_handler() -> impl IntoResponse {
    let body = ErrorResponse { code: "not_found".to_string(), message: "Not found".to_string() };
    (StatusCode::NOT_FOUND, Json(body))
}
