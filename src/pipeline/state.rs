//! # 执行计划与单次执行状态
//!
//! ## 设计思路
//!
//! 两种流水线（通用 N 层 / 命名两层）都先被翻译成同一种 `ExecutionPlan`，
//! 再交给同一个顺序执行器。计划里的步骤已经解析好预设与模型，
//! 遮罩在任何外部调用之前合成完毕，执行阶段只剩下服务调用与状态传递。
//!
//! `PipelineState` 每次执行新建、执行结束即丢弃，不在执行之间共享，因此无需加锁。

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pacing::Pacing;
use crate::raster::RasterImage;
use crate::raster::mask::{self, CanonicalMask, MaskBias, MaskSpec};
use crate::resolution::Dimensions;
use crate::service::{GenerationOutput, Preset};

pub(crate) const ENHANCE_NEEDS_PRESET: &str = "增强层必须跟在预设层之后";
pub(crate) const UPSCALE_NEEDS_IMAGE: &str = "放大层必须跟在预设层或增强层之后";
pub(crate) const INPAINT_NEEDS_MASK: &str = "未提供遮罩";
pub(crate) const INPAINT_NEEDS_IMAGE: &str = "inpaint 层之前没有可用图像";

#[derive(Debug, Clone)]
pub(crate) struct InpaintStep {
    pub(crate) preset: Preset,
    /// 解析后的 inpainting 模型。
    pub(crate) model: String,
    pub(crate) mask: Option<MaskSpec>,
    pub(crate) mask_reference: Dimensions,
    pub(crate) bias: MaskBias,
    pub(crate) strength: f32,
    pub(crate) noise: Option<f32>,
    pub(crate) inpainting_strength: Option<f32>,
    /// 是否把调用方原始栅格遮罩一并回显给服务。
    pub(crate) forward_source_mask: bool,
    /// `ExecutionPlan::prepare` 之后才有值。
    pub(crate) canonical: Option<CanonicalMask>,
}

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Generate { preset: Preset, seed: Option<u64> },
    /// 已规范化到目标尺寸的外部底图。
    Source { image: RasterImage },
    Enhance { strength: f32, noise: f32 },
    Upscale { scale: f32 },
    Inpaint(Box<InpaintStep>),
}

impl Step {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Generate { .. } => "generate",
            Self::Source { .. } => "source",
            Self::Enhance { .. } => "enhance",
            Self::Upscale { .. } => "upscale",
            Self::Inpaint(_) => "inpaint",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ExecutionPlan {
    pub(crate) name: String,
    pub(crate) target: Dimensions,
    pub(crate) steps: Vec<Step>,
    pub(crate) pacing: Pacing,
    pub(crate) allow_paid: bool,
}

impl ExecutionPlan {
    /// 顺序检查 + 遮罩合成，均不触发外部调用。
    pub(crate) fn prepare(&mut self, config: &PipelineConfig) -> Result<(), PipelineError> {
        check_sequence(&self.steps)?;

        for step in &mut self.steps {
            if let Step::Inpaint(inpaint) = step {
                if let Some(spec) = &inpaint.mask {
                    inpaint.canonical = Some(mask::composite(
                        spec,
                        inpaint.mask_reference,
                        self.target,
                        inpaint.bias,
                        config,
                    )?);
                }
            }
        }

        Ok(())
    }
}

/// 按步骤模拟状态，提前检出位置前置条件违规。
pub(crate) fn check_sequence(steps: &[Step]) -> Result<(), PipelineError> {
    let mut has_image = false;
    let mut has_preset = false;

    for (index, step) in steps.iter().enumerate() {
        let violation = match step {
            Step::Generate { .. } => {
                has_image = true;
                has_preset = true;
                None
            }
            Step::Source { .. } => {
                has_image = true;
                None
            }
            Step::Enhance { .. } => (!has_image || !has_preset).then_some(ENHANCE_NEEDS_PRESET),
            Step::Upscale { .. } => (!has_image).then_some(UPSCALE_NEEDS_IMAGE),
            Step::Inpaint(inpaint) => {
                if inpaint.mask.is_none() {
                    Some(INPAINT_NEEDS_MASK)
                } else if !has_image {
                    Some(INPAINT_NEEDS_IMAGE)
                } else {
                    has_preset = true;
                    None
                }
            }
        };

        if let Some(message) = violation {
            return Err(PipelineError::Sequence(format!("第 {} 层：{}", index, message)));
        }
    }

    Ok(())
}

/// 单次执行的可变状态。
#[derive(Debug, Default)]
pub(crate) struct PipelineState {
    pub(crate) last_image: Option<RasterImage>,
    pub(crate) last_preset: Option<Preset>,
    pub(crate) last_seed: Option<u64>,
    pub(crate) last_filename: Option<String>,
    pub(crate) last_dimensions: Option<Dimensions>,
    pub(crate) layer1_seed: Option<u64>,
}

impl PipelineState {
    pub(crate) fn require_image(&self, message: &str) -> Result<RasterImage, PipelineError> {
        self.last_image
            .clone()
            .ok_or_else(|| PipelineError::Sequence(message.to_string()))
    }

    pub(crate) fn require_preset(&self, message: &str) -> Result<Preset, PipelineError> {
        self.last_preset
            .clone()
            .ok_or_else(|| PipelineError::Sequence(message.to_string()))
    }

    /// 记录一次生成调用的产出，旧图随之释放。
    pub(crate) fn record_generation(
        &mut self,
        output: GenerationOutput,
        preset: Option<Preset>,
        dimensions: Dimensions,
    ) {
        self.last_image = Some(output.image);
        self.last_seed = Some(output.seed);
        self.last_filename = output.filename;
        self.last_dimensions = Some(dimensions);
        if let Some(preset) = preset {
            self.last_preset = Some(preset);
        }
    }
}
