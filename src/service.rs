//! # 外部协作方接口
//!
//! ## 设计思路
//!
//! 生成模型、放大服务、预设配置、素材存储都在引擎之外。这里只定义接口与数据模型，
//! 引擎通过 `Arc<dyn Trait>` 注入它们，测试可以替换为记录调用的内存实现。
//!
//! - `GenerationService`：文生图 / 图生图 / inpaint，返回图像与种子
//! - `UpscaleService`：按倍率放大
//! - `PresetStore`：只读的预设解析
//! - `ArtifactStore`：只读的 `image_path` 解析

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::raster::RasterImage;
use crate::raster::mask::CanonicalMask;
use crate::resolution::Dimensions;

fn default_steps() -> u32 {
    28
}

fn default_scale() -> f32 {
    5.0
}

fn default_sampler() -> String {
    "k_euler_ancestral".to_string()
}

/// 生成参数预设。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    pub model: String,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default = "default_sampler")]
    pub sampler: String,
    /// 预设自带的固定种子。
    #[serde(default)]
    pub seed: Option<u64>,
    /// 预设自带底图时，第 0 层改为 img2img。
    #[serde(default)]
    pub base_image: Option<RasterImage>,
    #[serde(default)]
    pub strength: Option<f32>,
    #[serde(default)]
    pub noise: Option<f32>,
}

impl Preset {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            model: model.into(),
            steps: default_steps(),
            scale: default_scale(),
            sampler: default_sampler(),
            seed: None,
            base_image: None,
            strength: None,
            noise: None,
        }
    }
}

/// 预设来源：按名引用或内联。
///
/// JSON 中字符串视为引用，对象视为内联预设。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PresetSource {
    Ref(String),
    Inline(Preset),
}

impl PresetSource {
    /// 通过预设库解析；未知引用属于规格错误。
    pub fn resolve(&self, store: &dyn PresetStore) -> Result<Preset, PipelineError> {
        match self {
            Self::Ref(name) => store
                .preset(name)
                .ok_or_else(|| PipelineError::Spec(format!("未知预设：{}", name))),
            Self::Inline(preset) => Ok(preset.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    TextToImage,
    ImageToImage,
    Inpaint,
}

/// 随请求透传的溯源信息。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub pipeline: Option<String>,
    pub layer: usize,
    pub layer1_seed: Option<u64>,
}

/// 一次生成调用的全部参数。
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: GenerationKind,
    pub preset: Preset,
    /// 实际使用的模型（inpaint 时可能是变体）。
    pub model: String,
    pub dimensions: Dimensions,
    pub image: Option<RasterImage>,
    pub mask: Option<CanonicalMask>,
    /// 调用方原始遮罩字节，仅回显给服务。
    pub source_mask: Option<RasterImage>,
    pub strength: Option<f32>,
    pub noise: Option<f32>,
    pub inpainting_strength: Option<f32>,
    pub seed: Option<u64>,
    /// 是否允许进入付费档。
    pub allow_paid: bool,
    pub provenance: Provenance,
}

impl GenerationRequest {
    pub(crate) fn text_to_image(preset: Preset, dimensions: Dimensions) -> Self {
        Self {
            kind: GenerationKind::TextToImage,
            model: preset.model.clone(),
            seed: preset.seed,
            preset,
            dimensions,
            image: None,
            mask: None,
            source_mask: None,
            strength: None,
            noise: None,
            inpainting_strength: None,
            allow_paid: false,
            provenance: Provenance::default(),
        }
    }

    pub(crate) fn image_to_image(
        preset: Preset,
        dimensions: Dimensions,
        image: RasterImage,
        strength: f32,
        noise: f32,
    ) -> Self {
        Self {
            kind: GenerationKind::ImageToImage,
            image: Some(image),
            strength: Some(strength),
            noise: Some(noise),
            ..Self::text_to_image(preset, dimensions)
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub image: RasterImage,
    pub seed: u64,
    pub filename: Option<String>,
}

/// 外部生成服务。
///
/// 预计费用超过免费额度且请求未设置 `allow_paid` 时，应返回
/// `PipelineError::CreditRequired`；其它失败返回 `PipelineError::Upstream`。
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, PipelineError>;
}

/// 外部放大服务。`scale <= 1` 时应原样返回输入。
#[async_trait]
pub trait UpscaleService: Send + Sync {
    async fn upscale(
        &self,
        image: RasterImage,
        scale: f32,
        width: u32,
        height: u32,
    ) -> Result<RasterImage, PipelineError>;
}

pub trait PresetStore: Send + Sync {
    fn preset(&self, name: &str) -> Option<Preset>;
}

pub trait ArtifactStore: Send + Sync {
    fn load(&self, path: &str) -> Result<RasterImage, PipelineError>;
}
