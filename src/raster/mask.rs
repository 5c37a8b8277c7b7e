//! # 遮罩合成模块
//!
//! ## 设计思路
//!
//! 下游 inpainting 模型只认严格双色的遮罩：白色可重绘，黑色保持不变。
//! 所有遮罩（矩形或栅格）都在这里被转换成 `CanonicalMask`，其它模块不再自行处理遮罩像素。
//!
//! ## 实现思路
//!
//! 1. 栅格化：矩形在参考尺寸的黑底上填白；栅格遮罩按原样解码，自身尺寸覆盖参考尺寸
//! 2. 二值化：R、G、B 全部大于阈值为白，否则为黑
//! 3. 比例填充：参考与目标比例不同时，补黑边到目标比例，边距按 `bias` 分配；
//!    分配画布前按解码上限校验画布像素
//! 4. 非等比缩放到目标尺寸后再次二值化（重采样会引入灰度）
//!
//! 填充像素一律为纯黑，即“不可重绘”。

use image::{DynamicImage, Rgba, RgbaImage, imageops};
use serde::{Deserialize, Serialize};

use super::{RasterImage, resize_exact, validate_limits};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::resolution::Dimensions;

pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// 遮罩输入。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskSpec {
    /// `[x, y, w, h]`，坐标相对于调用方给定的参考尺寸。
    Rectangle(Vec<i64>),
    /// 任意图像，按阈值二值化。
    Raster(RasterImage),
}

/// 填充偏置 0..=4，对应前缘（上/左）占总填充的 0、1/4、1/2、3/4、1。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct MaskBias(u8);

impl MaskBias {
    pub const CENTER: Self = Self(2);

    pub fn new(value: u8) -> Result<Self, PipelineError> {
        if value > 4 {
            return Err(PipelineError::Spec(format!(
                "mask_bias 必须在 0~4 之间：{}",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// 前缘分得的填充比例。
    pub fn leading_fraction(self) -> f64 {
        self.0 as f64 * 0.25
    }
}

impl Default for MaskBias {
    fn default() -> Self {
        Self::CENTER
    }
}

impl TryFrom<u8> for MaskBias {
    type Error = PipelineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MaskBias> for u8 {
    fn from(bias: MaskBias) -> Self {
        bias.0
    }
}

/// 四边填充量以及填充后的画布尺寸。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
    pub canvas: Dimensions,
}

/// 规范化遮罩：每个像素要么纯黑要么纯白。
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalMask {
    image: RasterImage,
    dimensions: Dimensions,
}

impl CanonicalMask {
    pub fn as_raster(&self) -> &RasterImage {
        &self.image
    }

    pub fn into_raster(self) -> RasterImage {
        self.image
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }
}

/// 计算把 `reference` 补到 `target` 比例所需的填充。
///
/// 比例差小于 `tolerance` 时返回 `None`。画布总能完整容纳未缩放的参考图。
pub fn padding_for(
    reference: Dimensions,
    target: Dimensions,
    bias: MaskBias,
    tolerance: f64,
) -> Option<Padding> {
    let reference_aspect = reference.aspect();
    let target_aspect = target.aspect();

    if (reference_aspect - target_aspect).abs() < tolerance {
        return None;
    }

    let split = |total: u32| {
        let leading = ((total as f64 * bias.leading_fraction()).round() as u32).min(total);
        (leading, total - leading)
    };

    if reference_aspect < target_aspect {
        let width = ((reference.height as f64 * target_aspect).round() as u32).max(reference.width);
        let (left, right) = split(width - reference.width);
        Some(Padding {
            left,
            right,
            top: 0,
            bottom: 0,
            canvas: Dimensions::new(width, reference.height),
        })
    } else {
        let height = ((reference.width as f64 / target_aspect).round() as u32).max(reference.height);
        let (top, bottom) = split(height - reference.height);
        Some(Padding {
            left: 0,
            right: 0,
            top,
            bottom,
            canvas: Dimensions::new(reference.width, height),
        })
    }
}

/// 把遮罩贴到黑色画布上，返回填充后的未缩放画布。
pub fn apply_padding(mask: &RgbaImage, padding: &Padding) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(padding.canvas.width, padding.canvas.height, BLACK);
    imageops::replace(&mut canvas, mask, padding.left as i64, padding.top as i64);
    canvas
}

/// 阈值二值化（原地）。
pub fn binarize(image: &mut RgbaImage, threshold: u8) {
    for pixel in image.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        *pixel = if r > threshold && g > threshold && b > threshold {
            WHITE
        } else {
            BLACK
        };
    }
}

/// 是否严格双色。
pub fn is_two_color(image: &RgbaImage) -> bool {
    image.pixels().all(|p| *p == BLACK || *p == WHITE)
}

fn rasterize_rectangle(rect: &[i64], reference: Dimensions) -> Result<RgbaImage, PipelineError> {
    let [x, y, w, h] = <[i64; 4]>::try_from(rect).map_err(|_| {
        PipelineError::Spec(format!("矩形遮罩需要 [x, y, w, h] 四个值，实际 {} 个", rect.len()))
    })?;
    if w <= 0 || h <= 0 {
        return Err(PipelineError::Spec(format!(
            "矩形遮罩宽高必须为正：w={} h={}",
            w, h
        )));
    }

    let mut canvas = RgbaImage::from_pixel(reference.width, reference.height, BLACK);

    // 超出画布的部分直接丢弃
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = x.saturating_add(w).min(reference.width as i64);
    let y1 = y.saturating_add(h).min(reference.height as i64);
    for py in y0..y1 {
        for px in x0..x1 {
            canvas.put_pixel(px as u32, py as u32, WHITE);
        }
    }

    Ok(canvas)
}

/// 栅格化 + 二值化。栅格遮罩的输出尺寸就是它自身的尺寸。
pub fn rasterize(
    spec: &MaskSpec,
    reference: Dimensions,
    config: &PipelineConfig,
) -> Result<RgbaImage, PipelineError> {
    let mut image = match spec {
        MaskSpec::Rectangle(rect) => rasterize_rectangle(rect, reference)?,
        MaskSpec::Raster(raster) => raster.decode(config)?.to_rgba8(),
    };
    binarize(&mut image, config.binarize_threshold);
    Ok(image)
}

/// 合成规范化遮罩。
pub fn composite(
    spec: &MaskSpec,
    reference: Dimensions,
    target: Dimensions,
    bias: MaskBias,
    config: &PipelineConfig,
) -> Result<CanonicalMask, PipelineError> {
    let image = composite_pixels(spec, reference, target, bias, config)?;
    let encoded = RasterImage::encode_png(&DynamicImage::ImageRgba8(image))?;
    Ok(CanonicalMask {
        image: encoded,
        dimensions: target,
    })
}

fn check_extent(dims: Dimensions, role: &str) -> Result<(), PipelineError> {
    if dims.width == 0 || dims.height == 0 {
        return Err(PipelineError::Spec(format!("遮罩{}尺寸必须为正：{}", role, dims)));
    }
    Ok(())
}

pub(crate) fn composite_pixels(
    spec: &MaskSpec,
    reference: Dimensions,
    target: Dimensions,
    bias: MaskBias,
    config: &PipelineConfig,
) -> Result<RgbaImage, PipelineError> {
    check_extent(reference, "参考")?;
    check_extent(target, "目标")?;
    validate_limits(config, target)?;
    if matches!(spec, MaskSpec::Rectangle(_)) {
        validate_limits(config, reference)?;
    }

    let rasterized = rasterize(spec, reference, config)?;
    let (width, height) = rasterized.dimensions();
    let actual_reference = Dimensions::new(width, height);

    let canvas = match padding_for(actual_reference, target, bias, config.aspect_tolerance) {
        Some(padding) => {
            log::debug!(
                "🧱 遮罩补边 {} -> {}（左{} 右{} 上{} 下{}，bias={}）",
                actual_reference,
                padding.canvas,
                padding.left,
                padding.right,
                padding.top,
                padding.bottom,
                bias.value()
            );
            // 极端长宽比的遮罩补边后画布可能远大于解码上限
            validate_limits(config, padding.canvas)?;
            apply_padding(&rasterized, &padding)
        }
        None => rasterized,
    };

    let mut scaled = if canvas.dimensions() == (target.width, target.height) {
        canvas
    } else {
        resize_exact(&DynamicImage::ImageRgba8(canvas), target, config.resample_filter).to_rgba8()
    };
    binarize(&mut scaled, config.binarize_threshold);

    debug_assert!(is_two_color(&scaled));
    debug_assert_eq!(scaled.dimensions(), (target.width, target.height));
    Ok(scaled)
}
