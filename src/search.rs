use std::cmp::Ordering;

use ndarray::ArrayView1;
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{Result, RetrievalError};
use crate::index::{GalleryItem, Index};
use crate::utils::l2_normalize;

/// 单条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SearchHit {
    /// 排名，从 1 开始
    pub rank: usize,
    /// 余弦相似度
    pub score: f32,
    #[serde(flatten)]
    pub item: GalleryItem,
}

/// 搜索响应
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

/// 将 top_k 限制在 `[1, total]` 内
pub fn clamp_top_k(top_k: usize, total: usize) -> usize {
    top_k.clamp(1, total.max(1))
}

/// 对索引中的所有图片按与查询向量的余弦相似度排序，返回前 top_k 个
///
/// 分数相同时行号小的排在前面，保证结果可复现。
pub fn rank(index: &Index, query: ArrayView1<f32>, top_k: usize) -> Result<Vec<SearchHit>> {
    if query.len() != index.dim() {
        return Err(RetrievalError::CorruptIndex(format!(
            "查询向量维度 {} 与索引维度 {} 不一致",
            query.len(),
            index.dim()
        )));
    }
    if index.is_empty() {
        return Ok(vec![]);
    }

    let mut query = query.to_owned();
    let norm = query.dot(&query).sqrt();
    if (norm - 1.).abs() > 1e-3 {
        l2_normalize(query.view_mut());
    }

    let scores = index.embeddings().dot(&query);
    let k = clamp_top_k(top_k, index.len());

    let cmp = |a: &usize, b: &usize| -> Ordering {
        scores[*b].total_cmp(&scores[*a]).then_with(|| a.cmp(b))
    };
    let mut order = (0..index.len()).collect::<Vec<_>>();
    if k < order.len() {
        order.select_nth_unstable_by(k - 1, cmp);
        order.truncate(k);
    }
    order.sort_unstable_by(cmp);

    Ok(order
        .into_iter()
        .enumerate()
        .map(|(i, id)| SearchHit { rank: i + 1, score: scores[id], item: index.items()[id].clone() })
        .collect())
}
