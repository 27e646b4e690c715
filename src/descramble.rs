//! 图片反混淆
//!
//! 远端把部分章节的图片横向切成若干条带后倒序拼接，这里负责推算条带数
//! 并把图片还原。

use std::io::Cursor;

use image::{DynamicImage, GenericImage, GenericImageView, ImageFormat, RgbaImage};
use md5::{Digest, Md5};
use thiserror::Error;

/// 远端默认的 scramble_id
pub const DEFAULT_SCRAMBLE_THRESHOLD: u64 = 220980;

const FIXED_STRIP_LIMIT: u64 = 268850;
const EIGHT_MODULUS_FROM: u64 = 421926;

#[derive(Debug, Error)]
pub enum DescrambleError {
    #[error("图片加载失败: {0}")]
    Decode(image::ImageError),

    #[error("图片编码失败: {0}")]
    Encode(image::ImageError),

    #[error("无效的条带数: {0}")]
    InvalidStripCount(u32),
}

/// 推算一张图片被切成了几条，0 表示无需还原
pub fn strip_count(scramble_threshold: u64, chapter_id: u64, filename_stem: &str) -> u32 {
    if chapter_id < scramble_threshold {
        return 0;
    }
    if chapter_id < FIXED_STRIP_LIMIT {
        return 10;
    }

    let modulus: u32 = if chapter_id >= EIGHT_MODULUS_FROM { 8 } else { 10 };
    let mut hasher = Md5::new();
    hasher.update(format!("{}{}", chapter_id, filename_stem).as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    let last = digest.chars().last().map(u32::from).unwrap_or(0);
    (last % modulus) * 2 + 2
}

/// 一条带的复制区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub src_y: u32,
    pub dst_y: u32,
    pub height: u32,
}

/// 计算每条带在原图中的位置和在输出图中的位置。
/// 第一条带吸收 `height % strips` 的余数。
pub fn band_layout(height: u32, strips: u32) -> Vec<Band> {
    if strips == 0 {
        return Vec::new();
    }
    let base = height / strips;
    let remainder = height % strips;

    (0..strips)
        .map(|i| {
            let src_y = height - base * (i + 1) - remainder;
            if i == 0 {
                Band {
                    src_y,
                    dst_y: 0,
                    height: base + remainder,
                }
            } else {
                Band {
                    src_y,
                    dst_y: base * i + remainder,
                    height: base,
                }
            }
        })
        .collect()
}

/// 还原后的图片。数据归调用方所有，drop 即释放。
#[derive(Debug, Clone)]
pub struct ReconstructedImage {
    pub data: Vec<u8>,
    pub format: ImageFormat,
}

impl ReconstructedImage {
    pub fn extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("png")
    }
}

/// 把条带重新拼回原图
pub fn reconstruct_raster(source: &DynamicImage, strips: u32) -> Result<RgbaImage, DescrambleError> {
    if strips == 0 {
        return Err(DescrambleError::InvalidStripCount(strips));
    }
    let (width, height) = source.dimensions();
    let mut output = RgbaImage::new(width, height);

    for band in band_layout(height, strips) {
        if band.height == 0 {
            continue;
        }
        let strip = source.view(0, band.src_y, width, band.height).to_image();
        output
            .copy_from(&strip, 0, band.dst_y)
            .map_err(DescrambleError::Encode)?;
    }

    Ok(output)
}

/// 解码、还原并按原格式重新编码，原格式无法编码时输出 PNG
pub fn reconstruct(bytes: &[u8], strips: u32) -> Result<ReconstructedImage, DescrambleError> {
    let source_format = image::guess_format(bytes).ok();
    let source = image::load_from_memory(bytes).map_err(DescrambleError::Decode)?;
    let raster = reconstruct_raster(&source, strips)?;

    let format = match source_format {
        Some(ImageFormat::Jpeg) => ImageFormat::Jpeg,
        Some(ImageFormat::WebP) => ImageFormat::WebP,
        Some(ImageFormat::Gif) => ImageFormat::Gif,
        Some(ImageFormat::Bmp) => ImageFormat::Bmp,
        _ => ImageFormat::Png,
    };

    match encode(raster.clone(), format) {
        Ok(data) => Ok(ReconstructedImage { data, format }),
        Err(e) if format != ImageFormat::Png => {
            tracing::debug!("按 {:?} 编码失败，改用 PNG: {}", format, e);
            let data = encode(raster, ImageFormat::Png)?;
            Ok(ReconstructedImage {
                data,
                format: ImageFormat::Png,
            })
        }
        Err(e) => Err(e),
    }
}

fn encode(raster: RgbaImage, format: ImageFormat) -> Result<Vec<u8>, DescrambleError> {
    let image = match format {
        // JPEG 不支持透明通道
        ImageFormat::Jpeg | ImageFormat::Bmp => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(raster).to_rgb8()),
        _ => DynamicImage::ImageRgba8(raster),
    };
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, format)
        .map_err(DescrambleError::Encode)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn below_threshold_needs_no_reconstruction() {
        assert_eq!(strip_count(DEFAULT_SCRAMBLE_THRESHOLD, 220979, "00001"), 0);
        assert_eq!(strip_count(DEFAULT_SCRAMBLE_THRESHOLD, 1, "00001"), 0);
    }

    #[test]
    fn fixed_band_count_before_hash_era() {
        assert_eq!(strip_count(DEFAULT_SCRAMBLE_THRESHOLD, 220980, "00001"), 10);
        assert_eq!(strip_count(DEFAULT_SCRAMBLE_THRESHOLD, 268849, "00042"), 10);
    }

    #[test]
    fn hashed_band_count_is_even_and_bounded() {
        for chapter in [268850u64, 300000, 421925, 421926, 500000, 1_200_000] {
            for name in ["00001", "00002", "00017", "cover"] {
                let n = strip_count(DEFAULT_SCRAMBLE_THRESHOLD, chapter, name);
                assert!((2..=18).contains(&n), "{chapter}/{name} -> {n}");
                assert_eq!(n % 2, 0);
                if chapter >= 421926 {
                    assert!(n <= 16);
                }
                assert_eq!(n, strip_count(DEFAULT_SCRAMBLE_THRESHOLD, chapter, name));
            }
        }
    }

    #[test]
    fn hashed_band_count_matches_digest() {
        let mut hasher = Md5::new();
        hasher.update(b"30000000001");
        let digest = format!("{:x}", hasher.finalize());
        let last = u32::from(digest.chars().last().unwrap());
        assert_eq!(
            strip_count(DEFAULT_SCRAMBLE_THRESHOLD, 300000, "00001"),
            (last % 10) * 2 + 2
        );
    }

    #[test]
    fn band_layout_puts_remainder_on_first_band() {
        let bands = band_layout(103, 10);
        assert_eq!(bands.len(), 10);
        assert_eq!(
            bands[0],
            Band {
                src_y: 90,
                dst_y: 0,
                height: 13
            }
        );
        assert_eq!(
            bands[1],
            Band {
                src_y: 80,
                dst_y: 13,
                height: 10
            }
        );
        assert_eq!(
            bands[9],
            Band {
                src_y: 0,
                dst_y: 93,
                height: 10
            }
        );
        let covered: u32 = bands.iter().map(|b| b.height).sum();
        assert_eq!(covered, 103);
    }

    #[test]
    fn band_layout_with_fewer_rows_than_strips() {
        let bands = band_layout(3, 10);
        assert_eq!(bands[0].height, 3);
        assert!(bands[1..].iter().all(|b| b.height == 0));
    }

    fn striped(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |_, y| Rgba([y as u8, 0, 0, 255]))
    }

    #[test]
    fn reconstruct_reverses_band_order() {
        // 2 条带，高 4: 原图下半部分应移到顶部
        let scrambled = DynamicImage::ImageRgba8(striped(2, 4));
        let out = reconstruct_raster(&scrambled, 2).unwrap();
        let rows: Vec<u8> = (0..4).map(|y| out.get_pixel(0, y)[0]).collect();
        assert_eq!(rows, vec![2, 3, 0, 1]);
    }

    #[test]
    fn reconstruct_round_trips_through_png() {
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(striped(3, 7))
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();

        let restored = reconstruct(png.get_ref(), 3).unwrap();
        assert_eq!(restored.format, ImageFormat::Png);
        assert_eq!(restored.extension(), "png");

        let decoded = image::load_from_memory(&restored.data).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (3, 7));
        // 高 7 / 3 条: base=2, rem=1, 第一条取 [4,7)
        let rows: Vec<u8> = (0..7).map(|y| decoded.get_pixel(0, y)[0]).collect();
        assert_eq!(rows, vec![4, 5, 6, 2, 3, 0, 1]);
    }

    #[test]
    fn zero_strips_is_rejected() {
        let img = DynamicImage::ImageRgba8(striped(1, 1));
        assert!(matches!(
            reconstruct_raster(&img, 0),
            Err(DescrambleError::InvalidStripCount(0))
        ));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            reconstruct(b"not an image", 4),
            Err(DescrambleError::Decode(_))
        ));
    }
}
