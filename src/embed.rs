use std::f32::consts::PI;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage};
use log::debug;
use ndarray::prelude::*;

use crate::error::{Result, RetrievalError};
use crate::utils::l2_normalize;

/// HSV 直方图的分箱数量：色相 × 饱和度 × 明度
const HUE_BINS: usize = 8;
const SAT_BINS: usize = 4;
const VAL_BINS: usize = 4;
const COLOR_DIM: usize = HUE_BINS * SAT_BINS * VAL_BINS;

/// 空间颜色布局的网格边长
const LAYOUT_GRID: u32 = 4;
const LAYOUT_DIM: usize = (LAYOUT_GRID * LAYOUT_GRID * 3) as usize;

/// DCT 缩略图边长，以及保留的低频块边长
const DCT_SIZE: usize = 32;
const DCT_KEEP: usize = 8;
const DCT_DIM: usize = DCT_KEEP * DCT_KEEP - 1;

/// 梯度方向直方图：方向分箱 × 网格
const EDGE_BINS: usize = 8;
const EDGE_GRID: usize = 2;
const EDGE_DIM: usize = EDGE_BINS * EDGE_GRID * EDGE_GRID;

/// 颜色和梯度特征使用的工作尺寸
const WORK_SIZE: u32 = 64;

/// 特征向量总维度
pub const EMBEDDING_DIM: usize = COLOR_DIM + LAYOUT_DIM + DCT_DIM + EDGE_DIM;

/// 将图片映射为定长向量
pub trait Embedder: Send + Sync {
    /// 模型名称，会写入索引统计信息
    fn name(&self) -> &str;
    /// 向量维度
    fn dim(&self) -> usize;
    /// 计算设备
    fn device(&self) -> &str;
    /// 计算图片的特征向量，返回的向量为单位长度
    fn embed(&self, bytes: &[u8]) -> Result<Array1<f32>>;
}

/// 预先计算的变换表，首次使用时加载
struct FeatureModel {
    /// DCT-II 正交基，形状为 (DCT_SIZE, DCT_SIZE)
    dct_basis: Array2<f32>,
}

impl FeatureModel {
    fn load() -> Self {
        let n = DCT_SIZE as f32;
        let dct_basis = Array2::from_shape_fn((DCT_SIZE, DCT_SIZE), |(k, i)| {
            let scale = if k == 0 { (1. / n).sqrt() } else { (2. / n).sqrt() };
            scale * (PI * (2. * i as f32 + 1.) * k as f32 / (2. * n)).cos()
        });
        Self { dct_basis }
    }
}

/// 基于颜色、布局、DCT 低频和梯度方向的全局图像描述子
pub struct ImageEmbedder {
    model: OnceLock<FeatureModel>,
    loads: AtomicUsize,
}

impl Default for ImageEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageEmbedder {
    pub fn new() -> Self {
        Self { model: OnceLock::new(), loads: AtomicUsize::new(0) }
    }

    /// 模型被加载的次数，最多为 1
    pub fn model_loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn model(&self) -> &FeatureModel {
        self.model.get_or_init(|| {
            debug!("正在加载特征模型");
            self.loads.fetch_add(1, Ordering::SeqCst);
            FeatureModel::load()
        })
    }

    /// 对已解码的图片计算特征
    pub fn embed_image(&self, image: &DynamicImage) -> Result<Array1<f32>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(RetrievalError::InvalidImage("图片尺寸为 0".to_string()));
        }
        let model = self.model();

        let work = image.resize_exact(WORK_SIZE, WORK_SIZE, FilterType::Triangle);
        let rgb = work.to_rgb8();
        let gray = work.to_luma8();
        let thumb = image.resize_exact(DCT_SIZE as u32, DCT_SIZE as u32, FilterType::Triangle).to_luma8();

        let mut feature = Array1::<f32>::zeros(EMBEDDING_DIM);
        let blocks = [
            (0, color_histogram(&rgb)),
            (COLOR_DIM, color_layout(&rgb)),
            (COLOR_DIM + LAYOUT_DIM, dct_lowfreq(&thumb, &model.dct_basis)),
            (COLOR_DIM + LAYOUT_DIM + DCT_DIM, edge_histogram(&gray)),
        ];
        for (offset, mut block) in blocks {
            l2_normalize(block.view_mut());
            feature.slice_mut(s![offset..offset + block.len()]).assign(&block);
        }

        if !feature.iter().all(|v| v.is_finite()) {
            return Err(RetrievalError::EmbeddingFailure("特征向量包含非有限值".to_string()));
        }
        if !l2_normalize(feature.view_mut()) {
            return Err(RetrievalError::EmbeddingFailure("特征向量长度为 0".to_string()));
        }
        Ok(feature)
    }
}

impl Embedder for ImageEmbedder {
    fn name(&self) -> &str {
        "color-dct-edge-v1"
    }

    fn dim(&self) -> usize {
        EMBEDDING_DIM
    }

    fn device(&self) -> &str {
        "cpu"
    }

    fn embed(&self, bytes: &[u8]) -> Result<Array1<f32>> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| RetrievalError::InvalidImage(e.to_string()))?;
        self.embed_image(&image)
    }
}

/// HSV 颜色直方图，按像素数归一化
fn color_histogram(rgb: &RgbImage) -> Array1<f32> {
    let mut hist = Array1::<f32>::zeros(COLOR_DIM);
    for pixel in rgb.pixels() {
        let (h, s, v) = rgb_to_hsv(pixel.0);
        let hb = ((h / 360. * HUE_BINS as f32) as usize).min(HUE_BINS - 1);
        let sb = ((s * SAT_BINS as f32) as usize).min(SAT_BINS - 1);
        let vb = ((v * VAL_BINS as f32) as usize).min(VAL_BINS - 1);
        hist[(hb * SAT_BINS + sb) * VAL_BINS + vb] += 1.;
    }
    hist /= (rgb.width() * rgb.height()) as f32;
    hist
}

/// 每个网格单元的平均 RGB
fn color_layout(rgb: &RgbImage) -> Array1<f32> {
    let grid = LAYOUT_GRID as usize;
    let cell_w = rgb.width() / LAYOUT_GRID;
    let cell_h = rgb.height() / LAYOUT_GRID;
    let mut layout = Array1::<f32>::zeros(LAYOUT_DIM);
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let cx = ((x / cell_w) as usize).min(grid - 1);
        let cy = ((y / cell_h) as usize).min(grid - 1);
        let base = (cy * grid + cx) * 3;
        for c in 0..3 {
            layout[base + c] += pixel.0[c] as f32 / 255.;
        }
    }
    layout /= (cell_w * cell_h) as f32;
    layout
}

/// 缩略图二维 DCT 的低频系数，去掉直流分量
fn dct_lowfreq(thumb: &GrayImage, basis: &Array2<f32>) -> Array1<f32> {
    let pixels =
        Array2::from_shape_fn((DCT_SIZE, DCT_SIZE), |(r, c)| thumb.get_pixel(c as u32, r as u32).0[0] as f32 / 255.);
    let coeffs = basis.dot(&pixels).dot(&basis.t());
    coeffs.slice(s![..DCT_KEEP, ..DCT_KEEP]).iter().skip(1).copied().collect()
}

/// 按幅值加权的 Sobel 梯度方向直方图
fn edge_histogram(gray: &GrayImage) -> Array1<f32> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let at = |x: usize, y: usize| gray.get_pixel(x as u32, y as u32).0[0] as f32 / 255.;
    let mut hist = Array1::<f32>::zeros(EDGE_DIM);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = at(x + 1, y - 1) + 2. * at(x + 1, y) + at(x + 1, y + 1)
                - at(x - 1, y - 1)
                - 2. * at(x - 1, y)
                - at(x - 1, y + 1);
            let gy = at(x - 1, y + 1) + 2. * at(x, y + 1) + at(x + 1, y + 1)
                - at(x - 1, y - 1)
                - 2. * at(x, y - 1)
                - at(x + 1, y - 1);
            let magnitude = (gx * gx + gy * gy).sqrt();
            if magnitude < 1e-6 {
                continue;
            }
            // 方向不区分正负，映射到 [0, π)
            let theta = gy.atan2(gx).rem_euclid(PI);
            let bin = ((theta / PI * EDGE_BINS as f32) as usize).min(EDGE_BINS - 1);
            let cell = (y * EDGE_GRID / h) * EDGE_GRID + x * EDGE_GRID / w;
            hist[cell * EDGE_BINS + bin] += magnitude;
        }
    }
    hist
}

fn rgb_to_hsv([r, g, b]: [u8; 3]) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32 / 255., g as f32 / 255., b as f32 / 255.);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let h = if delta == 0. {
        0.
    } else if max == r {
        60. * ((g - b) / delta).rem_euclid(6.)
    } else if max == g {
        60. * ((b - r) / delta + 2.)
    } else {
        60. * ((r - g) / delta + 4.)
    };
    let s = if max == 0. { 0. } else { delta / max };
    (h, s, max)
}
