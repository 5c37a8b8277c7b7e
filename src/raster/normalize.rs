//! 居中裁剪 + 缩放到精确目标尺寸。
//!
//! 只裁剪、不填充；填充是遮罩合成的职责。

use image::{DynamicImage, GenericImageView};

use super::{RasterImage, resize_exact};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::resolution::Dimensions;

/// 裁剪窗口（源图坐标系）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// 计算把 `source` 裁到 `target` 宽高比的居中窗口。
///
/// 比例差小于 `tolerance` 时返回 `None`，表示直接缩放。
pub fn crop_window(source: Dimensions, target: Dimensions, tolerance: f64) -> Option<CropWindow> {
    let source_aspect = source.aspect();
    let target_aspect = target.aspect();

    if (source_aspect - target_aspect).abs() < tolerance {
        return None;
    }

    if source_aspect > target_aspect {
        // 源图更宽：保留全高，取居中竖条
        let width = ((source.height as f64 * target_aspect).round() as u32).clamp(1, source.width);
        Some(CropWindow {
            x: (source.width - width) / 2,
            y: 0,
            width,
            height: source.height,
        })
    } else {
        let height = ((source.width as f64 / target_aspect).round() as u32).clamp(1, source.height);
        Some(CropWindow {
            x: 0,
            y: (source.height - height) / 2,
            width: source.width,
            height,
        })
    }
}

pub(crate) fn normalize_image(
    image: &DynamicImage,
    target: Dimensions,
    config: &PipelineConfig,
) -> DynamicImage {
    let (width, height) = image.dimensions();
    let source = Dimensions::new(width, height);

    match crop_window(source, target, config.aspect_tolerance) {
        Some(window) => {
            log::debug!(
                "✂️ 居中裁剪 {} -> {}x{}@({},{})，再缩放到 {}",
                source,
                window.width,
                window.height,
                window.x,
                window.y,
                target
            );
            let cropped = image.crop_imm(window.x, window.y, window.width, window.height);
            resize_exact(&cropped, target, config.resample_filter)
        }
        None => resize_exact(image, target, config.resample_filter),
    }
}

/// 将源图规范化到目标尺寸。
///
/// 源图已经是目标尺寸时原样返回，不重新编码。
pub fn normalize(
    source: &RasterImage,
    target: Dimensions,
    config: &PipelineConfig,
) -> Result<RasterImage, PipelineError> {
    let decoded = source.decode(config)?;
    let (width, height) = decoded.dimensions();
    if width == target.width && height == target.height {
        return Ok(source.clone());
    }

    let normalized = normalize_image(&decoded, target, config);
    RasterImage::encode_png(&normalized)
}
