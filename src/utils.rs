use std::path::Path;

use indicatif::ProgressStyle;
use ndarray::{Array2, ArrayViewMut1};
use regex::Regex;

/// 进度条样式
pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .expect("invalid progress template")
        .progress_chars("#>-")
}

/// 原地归一化为单位向量，长度为 0 时返回 false 且不修改
pub fn l2_normalize(mut v: ArrayViewMut1<f32>) -> bool {
    let norm = v.dot(&v).sqrt();
    if norm <= f32::EPSILON || !norm.is_finite() {
        return false;
    }
    v /= norm;
    true
}

/// 将长度不为 1 的行归一化，返回被调整的行数
pub fn normalize_rows(m: &mut Array2<f32>) -> usize {
    let mut adjusted = 0;
    for row in m.rows_mut() {
        let norm = row.dot(&row).sqrt();
        if (norm - 1.).abs() > 1e-3 && l2_normalize(row) {
            adjusted += 1;
        }
    }
    adjusted
}

/// 将逗号分隔的后缀列表转换为大小写不敏感的匹配正则
pub fn suffix_regex(suffix: &str) -> Result<Regex, regex::Error> {
    let alternatives = suffix
        .split(',')
        .map(|s| regex::escape(s.trim().trim_start_matches('.')))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    Regex::new(&format!("(?i)^({})$", alternatives.join("|")))
}

/// 计算相对路径，并统一使用 `/` 作为分隔符
pub fn relative_slash_path(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>();
    Some(parts.join("/"))
}

/// 将图库中的相对路径映射为可访问的 URL
pub fn public_image_url(prefix: &str, relative_path: &str) -> String {
    let normalized = relative_path.replace('\\', "/");
    let normalized = normalized.trim_start_matches("dataset/");
    format!("{}/{}", prefix.trim_end_matches('/'), normalized.trim_start_matches('/'))
}
