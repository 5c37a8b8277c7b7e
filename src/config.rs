//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `PipelineConfig`，以显式、不可变的值传入每次执行，
//! 引擎内部不读取任何全局可变状态（预设表、模型表都从这里或协作方注入）。
//! 其中重采样档位（quality / balanced / speed）作为高层语义，映射到具体滤镜。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的配置。
//! - `ResampleProfile` 负责档位字符串解析与反向输出。
//! - `apply_resample_profile` / `infer_resample_profile` 在档位与滤镜之间互转。
//! - `inpainting_variant` 查询模型对应的 inpainting 变体。

use std::collections::HashMap;
use std::time::Duration;

use image::imageops::FilterType;

use crate::error::PipelineError;

const INPAINTING_SUFFIX: &str = "-inpainting";

/// 步骤间的节奏控制参数。
///
/// 这是对外部服务的礼貌性退避，不影响正确性。
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// 通用流水线随机延迟下界。
    pub generic_min: Duration,
    /// 通用流水线随机延迟上界（含）。
    pub generic_max: Duration,
    /// 命名两层流水线在 inpaint 之前的固定延迟。
    pub named_fixed: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            generic_min: Duration::from_millis(12_000),
            generic_max: Duration::from_millis(30_000),
            named_fixed: Duration::from_secs(5),
        }
    }
}

/// 流水线配置。
///
/// 字段覆盖了解码限制、重采样、遮罩合成、inpaint 默认参数与节奏控制。
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 解码阶段允许的预计内存上限（按 RGBA 估算，字节）。
    pub max_decoded_bytes: u64,
    /// Base64 / 素材文件原始字节上限。
    pub max_source_bytes: u64,
    /// 缩放滤镜策略。
    pub resample_filter: FilterType,
    /// 宽高比差值小于该值视为相同比例。
    pub aspect_tolerance: f64,
    /// 二值化阈值：R、G、B 全部大于该值才判为白色。
    pub binarize_threshold: u8,
    /// 通用流水线 inpaint 层的遮罩偏置。
    pub generic_mask_bias: u8,
    /// 命名流水线未指定 `mask_bias` 时的默认偏置。
    pub named_mask_bias: u8,
    /// 通用 inpaint 默认 strength。
    pub inpaint_strength: f32,
    /// 通用 inpaint 默认 noise。
    pub inpaint_noise: f32,
    /// 命名流水线默认 inpainting strength。
    pub named_inpainting_strength: f32,
    /// 预设自带底图时的默认 img2img 参数。
    pub base_image_strength: f32,
    pub base_image_noise: f32,
    pub pacing: PacingConfig,
    /// 模型 → inpainting 变体映射表。
    pub inpainting_models: HashMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let inpainting_models = [
            "nai-diffusion-3",
            "nai-diffusion-furry-3",
            "nai-diffusion-4-curated-preview",
            "nai-diffusion-4-full",
            "nai-diffusion-4-5-curated",
            "nai-diffusion-4-5-full",
        ]
        .into_iter()
        .map(|model| (model.to_string(), format!("{model}{INPAINTING_SUFFIX}")))
        .collect();

        Self {
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: 160 * 1024 * 1024,
            max_source_bytes: 50 * 1024 * 1024,
            resample_filter: FilterType::Triangle,
            aspect_tolerance: 0.01,
            binarize_threshold: 127,
            generic_mask_bias: 2,
            named_mask_bias: 2,
            inpaint_strength: 1.0,
            inpaint_noise: 0.1,
            named_inpainting_strength: 0.7,
            base_image_strength: 0.7,
            base_image_noise: 0.0,
            pacing: PacingConfig::default(),
            inpainting_models,
        }
    }
}

/// 重采样档位（面向调用方语义）。
///
/// - `Quality`：尽量保真
/// - `Balanced`：质量与性能平衡
/// - `Speed`：优先速度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleProfile {
    Quality,
    Balanced,
    Speed,
}

impl ResampleProfile {
    /// 从外部字符串解析档位。
    ///
    /// # 示例
    /// ```rust
    /// use gen_pipeline::ResampleProfile;
    ///
    /// let p = ResampleProfile::parse("Balanced")?;
    /// assert_eq!(p.as_str(), "balanced");
    /// # Ok::<(), gen_pipeline::PipelineError>(())
    /// ```
    pub fn parse(profile: &str) -> Result<Self, PipelineError> {
        match profile.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "balanced" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            other => Err(PipelineError::Spec(format!(
                "未知重采样档位：{}（可选：quality / balanced / speed）",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }
}

impl PipelineConfig {
    /// 应用指定档位到实际滤镜。
    pub fn apply_resample_profile(&mut self, profile: ResampleProfile) {
        self.resample_filter = match profile {
            ResampleProfile::Quality => FilterType::Lanczos3,
            ResampleProfile::Balanced => FilterType::Triangle,
            ResampleProfile::Speed => FilterType::Nearest,
        };
    }

    /// 基于当前滤镜反推档位。
    pub fn infer_resample_profile(&self) -> ResampleProfile {
        match self.resample_filter {
            FilterType::Lanczos3 | FilterType::CatmullRom => ResampleProfile::Quality,
            FilterType::Nearest => ResampleProfile::Speed,
            FilterType::Triangle | FilterType::Gaussian => ResampleProfile::Balanced,
        }
    }

    /// 查询模型的 inpainting 变体。
    ///
    /// 已经是 inpainting 模型时返回自身；表中没有时返回 `None`。
    pub fn inpainting_variant(&self, model: &str) -> Option<String> {
        if model.ends_with(INPAINTING_SUFFIX) {
            return Some(model.to_string());
        }
        self.inpainting_models.get(model).cloned()
    }
}
