use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::index::GalleryItem;
use crate::search::SearchHit;
use crate::utils::public_image_url;

/// 搜索请求参数
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    #[form_data(limit = "unlimited")]
    pub image: Option<FieldData<Bytes>>,
    /// 不是正整数时使用默认值
    #[form_data(field_name = "topK")]
    pub top_k: Option<String>,
}

/// 解析可选的正整数参数，为空、非数字或为 0 时返回 `None`
pub fn parse_count(value: Option<&str>) -> Option<usize> {
    value.and_then(|value| value.trim().parse::<usize>().ok()).filter(|&count| count > 0)
}

/// 搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 上传的图片，JPEG 或 PNG
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub image: String,
    /// 返回的结果数量
    #[schema(rename = "topK")]
    pub top_k: Option<usize>,
}

/// 带访问地址的搜索结果
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchHitView {
    #[serde(flatten)]
    pub hit: SearchHit,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
}

/// 搜索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponseView {
    pub results: Vec<SearchHitView>,
}

impl SearchResponseView {
    pub fn new(hits: Vec<SearchHit>, prefix: &str) -> Self {
        let results = hits
            .into_iter()
            .map(|hit| SearchHitView {
                image_url: public_image_url(prefix, &hit.item.relative_path),
                hit,
            })
            .collect();
        Self { results }
    }
}

/// 带访问地址的图库图片
#[derive(Debug, Serialize, ToSchema)]
pub struct GalleryItemView {
    #[serde(flatten)]
    pub item: GalleryItem,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
}

/// 图库概览
#[derive(Debug, Serialize, ToSchema)]
pub struct GalleryResponse {
    /// 图片总数
    pub total: usize,
    /// 所有类别，已排序去重
    pub categories: Vec<String>,
    pub items: Vec<GalleryItemView>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct GalleryQuery {
    /// 返回的图片数量，不是正整数时默认为 40
    #[param(value_type = Option<usize>)]
    pub limit: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}
