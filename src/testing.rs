//! 测试用的图片生成工具

use std::fs;
use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::index::GalleryItem;

/// 根据种子生成一张各不相同的图片
pub fn image_bytes(seed: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(96, 72, |x, y| {
        let r = (x * (seed + 1) * 5 + seed * 40) % 256;
        let g = (y * (seed + 2) * 3 + seed * 90) % 256;
        let b = ((x + y) * (seed % 5 + 1) + seed * 17) % 256;
        Rgb([r as u8, g as u8, b as u8])
    });
    let mut buf = Cursor::new(vec![]);
    DynamicImage::ImageRgb8(img).write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// 写入图片，格式由后缀决定
pub fn write_image(path: &Path, seed: u32) {
    let ext = path.extension().unwrap().to_string_lossy().to_lowercase();
    let format = match ext.as_str() {
        "png" => ImageFormat::Png,
        _ => ImageFormat::Jpeg,
    };
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, image_bytes(seed, format)).unwrap();
}

/// `cat/a.jpg`、`cat/b.jpg`、`dog/c.jpg`
pub fn sample_dataset(root: &Path) {
    write_image(&root.join("cat/a.jpg"), 1);
    write_image(&root.join("cat/b.jpg"), 2);
    write_image(&root.join("dog/c.jpg"), 3);
}

/// 根据 `label/filename` 形式的路径构造图片信息
pub fn item(path: &str) -> GalleryItem {
    let (label, filename) = path.rsplit_once('/').unwrap();
    GalleryItem {
        id: 0,
        relative_path: path.to_string(),
        label: label.rsplit('/').next().unwrap().to_string(),
        filename: filename.to_string(),
    }
}
