//! # 栅格图像模块
//!
//! ## 设计思路
//!
//! `RasterImage` 是在各步骤之间按值传递的“不透明编码字节”。底层使用
//! `bytes::Bytes`，克隆只增加引用计数，内容不可变，天然满足写时复制：
//! 任何变换都产出新的 `RasterImage`，不会在步骤之间共享可变状态。
//!
//! ## 实现思路
//!
//! 1. 校验文件签名（`infer`），尽早拒绝非图片内容
//! 2. 读取 header 尺寸，按像素/内存上限快速拒绝
//! 3. 完整解码
//! 4. 缩放优先走 `fast_image_resize`，失败时回退 `image::resize_exact`
//!
//! 子模块：
//! - `normalize`：居中裁剪 + 缩放（Raster Normalizer）
//! - `mask`：规范化双色遮罩（Mask Compositor）

pub mod mask;
pub mod normalize;

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use fast_image_resize as fr;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageBuffer, ImageFormat, ImageReader, Rgba};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::Cursor;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::resolution::Dimensions;

/// 编码后的图像字节（PNG / JPEG / WebP ...）。
#[derive(Clone, PartialEq, Eq)]
pub struct RasterImage {
    bytes: Bytes,
}

impl RasterImage {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 解析 Base64（支持 Data URL 与纯 Base64 字符串），并限制解码后体积。
    pub fn from_base64(data: &str, max_bytes: u64) -> Result<Self, PipelineError> {
        let normalized = data.trim();
        let payload = if normalized.starts_with("data:") {
            let start = normalized
                .find(";base64,")
                .ok_or_else(|| PipelineError::Decode("缺少 base64 标记".to_string()))?;
            &normalized[start + 8..]
        } else {
            normalized
        };

        let estimated = (payload.len() as u64).div_ceil(4).saturating_mul(3);
        if estimated > max_bytes {
            return Err(PipelineError::ResourceLimit(format!(
                "Base64 预计解码体积过大：{:.2} MB（限制：{:.2} MB）",
                estimated as f64 / 1024.0 / 1024.0,
                max_bytes as f64 / 1024.0 / 1024.0
            )));
        }

        let bytes = general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| PipelineError::Decode(format!("Base64 解码失败：{}", e)))?;
        Ok(Self::from_bytes(bytes))
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }

    /// 校验字节签名为图片类型。
    pub fn validate_signature(&self) -> Result<(), PipelineError> {
        if self.bytes.is_empty() {
            return Err(PipelineError::Decode("图片内容为空".to_string()));
        }

        let kind = infer::get(&self.bytes)
            .ok_or_else(|| PipelineError::Decode("无法识别图片类型".to_string()))?;

        if kind.matcher_type() != infer::MatcherType::Image {
            return Err(PipelineError::Decode(format!(
                "文件签名不是图片类型：{}",
                kind.mime_type()
            )));
        }

        Ok(())
    }

    /// 仅通过 header 读取宽高。
    pub fn dimensions(&self) -> Result<Dimensions, PipelineError> {
        let reader = ImageReader::new(Cursor::new(self.as_bytes()))
            .with_guessed_format()
            .map_err(|e| PipelineError::Decode(format!("无法识别图片格式：{}", e)))?;

        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| PipelineError::Decode(format!("无法读取图片尺寸：{}", e)))?;
        Ok(Dimensions::new(width, height))
    }

    /// 带资源限制的完整解码。
    pub(crate) fn decode(&self, config: &PipelineConfig) -> Result<DynamicImage, PipelineError> {
        self.validate_signature()?;

        let header = self.dimensions()?;
        validate_limits(config, header)?;

        let decoded = image::load_from_memory(self.as_bytes())
            .map_err(|e| PipelineError::Decode(format!("图片解码失败：{}", e)))?;

        let (width, height) = decoded.dimensions();
        validate_limits(config, Dimensions::new(width, height))?;
        if width == 0 || height == 0 {
            return Err(PipelineError::Decode("图片尺寸为 0".to_string()));
        }

        Ok(decoded)
    }

    /// 编码为 PNG。
    pub(crate) fn encode_png(image: &DynamicImage) -> Result<Self, PipelineError> {
        let mut cursor = Cursor::new(Vec::new());
        image
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(|e| PipelineError::Decode(format!("PNG 编码失败：{}", e)))?;
        Ok(Self::from_bytes(cursor.into_inner()))
    }
}

impl fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mime = infer::get(&self.bytes)
            .map(|kind| kind.mime_type())
            .unwrap_or("unknown");
        f.debug_struct("RasterImage")
            .field("len", &self.bytes.len())
            .field("mime", &mime)
            .finish()
    }
}

impl Serialize for RasterImage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for RasterImage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded, u64::MAX).map_err(serde::de::Error::custom)
    }
}

pub(crate) fn validate_limits(config: &PipelineConfig, dims: Dimensions) -> Result<(), PipelineError> {
    let pixels = dims.pixels();
    if pixels > config.max_decoded_pixels {
        return Err(PipelineError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, config.max_decoded_pixels
        )));
    }

    let estimated = pixels.saturating_mul(4);
    if estimated > config.max_decoded_bytes {
        return Err(PipelineError::ResourceLimit(format!(
            "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
            estimated as f64 / 1024.0 / 1024.0,
            config.max_decoded_bytes as f64 / 1024.0 / 1024.0
        )));
    }

    Ok(())
}

/// 非等比缩放到精确尺寸。
pub(crate) fn resize_exact(image: &DynamicImage, target: Dimensions, filter: FilterType) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width == target.width && height == target.height {
        return image.clone();
    }

    match resize_with_fast_image_resize(image, target, filter) {
        Ok(resized) => resized,
        Err(err) => {
            log::warn!(
                "⚠️ fast_image_resize 缩放失败，回退 image::resize_exact：{}",
                err
            );
            image.resize_exact(target.width, target.height, filter)
        }
    }
}

fn resize_with_fast_image_resize(
    image: &DynamicImage,
    target: Dimensions,
    filter: FilterType,
) -> Result<DynamicImage, PipelineError> {
    let src = image.to_rgba8();
    let (src_width, src_height) = src.dimensions();

    let src_image =
        fr::images::Image::from_vec_u8(src_width, src_height, src.into_raw(), fr::PixelType::U8x4)
            .map_err(|e| PipelineError::Decode(format!("构建源图像缓冲失败：{}", e)))?;

    let mut dst_image = fr::images::Image::new(target.width, target.height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    let options =
        fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(to_fast_filter(filter)));

    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| PipelineError::Decode(format!("fast_image_resize 执行失败：{}", e)))?;

    let rgba =
        ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(target.width, target.height, dst_image.into_vec())
            .ok_or_else(|| PipelineError::Decode("fast_image_resize 输出缓冲长度异常".to_string()))?;

    Ok(DynamicImage::ImageRgba8(rgba))
}

fn to_fast_filter(filter: FilterType) -> fr::FilterType {
    match filter {
        FilterType::Nearest => fr::FilterType::Box,
        FilterType::Triangle => fr::FilterType::Bilinear,
        FilterType::CatmullRom => fr::FilterType::CatmullRom,
        FilterType::Gaussian => fr::FilterType::Mitchell,
        FilterType::Lanczos3 => fr::FilterType::Lanczos3,
    }
}
