#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

/// 根据种子生成图片，格式由后缀决定
pub fn write_image(path: &Path, seed: u32) {
    let img = RgbImage::from_fn(80, 60, |x, y| {
        let r = (x * (seed + 3) * 7 + seed * 31) % 256;
        let g = (y * (seed + 1) * 5 + seed * 73) % 256;
        let b = ((x * y) / (seed + 1) + seed * 11) % 256;
        Rgb([r as u8, g as u8, b as u8])
    });
    let format = match path.extension().map(|ext| ext.to_string_lossy().to_lowercase()).as_deref() {
        Some("png") => ImageFormat::Png,
        _ => ImageFormat::Jpeg,
    };
    let mut buf = Cursor::new(vec![]);
    DynamicImage::ImageRgb8(img).write_to(&mut buf, format).unwrap();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, buf.into_inner()).unwrap();
}

/// 两个类别共四张图片，另有一个损坏的文件
pub fn dataset(root: &Path) {
    write_image(&root.join("cat/a.jpg"), 1);
    write_image(&root.join("cat/b.jpg"), 2);
    write_image(&root.join("dog/c.png"), 3);
    write_image(&root.join("dog/d.jpg"), 4);
    fs::write(root.join("dog/broken.jpg"), b"broken").unwrap();
}
