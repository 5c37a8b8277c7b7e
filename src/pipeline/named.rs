//! # 命名两层流水线
//!
//! ## 设计思路
//!
//! 第一层产出底图（生成 / 素材路径 / Base64 三选一），第二层是带遮罩的 inpaint。
//! 它不是另一套执行逻辑，而是翻译成两步的 `ExecutionPlan` 后交给通用执行器，
//! 与通用流水线共享遮罩合成与底图规范化。
//!
//! ## 实现思路
//!
//! 1. 解析预设；预检第二层模型的 inpainting 变体，没有则在任何生成调用之前失败
//! 2. 第一层为图片时：读取/解码 → 居中裁剪缩放到目标尺寸（底图从不补边）
//! 3. 遮罩：矩形按声明的参考分辨率栅格化，栅格遮罩以自身尺寸为参考，补边后缩放到目标
//! 4. 第二层固定 strength = 1，inpainting strength 默认 0.7，并透传 layer1 种子与流水线名
//! 5. 两层之间固定等待 5 秒
//!
//! 不做任何重试：调用方用相同的 `layer1_seed` 重新调用即可复现第一层，只改变第二层。

use super::result::PipelineResult;
use super::spec::{Layer1Source, NamedPipelineSpec};
use super::state::{ExecutionPlan, InpaintStep, Step};
use super::PipelineEngine;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pacing::Pacing;
use crate::raster::mask::MaskBias;
use crate::raster::{RasterImage, normalize};
use crate::resolution::Dimensions;

/// 命名流水线第二层的固定 strength。
const NAMED_INPAINT_STRENGTH: f32 = 1.0;

impl PipelineEngine {
    /// 执行命名两层流水线。
    pub async fn run_named(
        &self,
        spec: &NamedPipelineSpec,
    ) -> Result<PipelineResult, PipelineError> {
        self.run_named_with_cancel(spec, || false).await
    }

    pub async fn run_named_with_cancel<C>(
        &self,
        spec: &NamedPipelineSpec,
        is_cancelled: C,
    ) -> Result<PipelineResult, PipelineError>
    where
        C: Fn() -> bool + Send + Sync,
    {
        let config = self.config_snapshot()?;
        let mut plan = self.plan_named(spec, &config)?;
        plan.prepare(&config)?;

        log::info!(
            "🎯 命名流水线 {} - layer1={} 目标尺寸 {}",
            spec.name,
            spec.layer1.label(),
            plan.target
        );
        self.execute_plan(plan, &config, &is_cancelled).await
    }

    fn plan_named(
        &self,
        spec: &NamedPipelineSpec,
        config: &PipelineConfig,
    ) -> Result<ExecutionPlan, PipelineError> {
        let (target, mask_reference) = spec.validate()?;
        let bias = match spec.mask_bias {
            Some(bias) => bias,
            None => MaskBias::new(config.named_mask_bias)?,
        };

        let layer2 = spec.layer2.resolve(self.presets.as_ref())?;

        // 预检：先于任何生成调用与素材读取
        let model = config.inpainting_variant(&layer2.model).ok_or_else(|| {
            PipelineError::Configuration(format!("模型 {} 没有可用的 inpainting 变体", layer2.model))
        })?;

        let layer1 = match &spec.layer1 {
            Layer1Source::Prompt {
                preset,
                layer1_seed,
            } => Step::Generate {
                preset: preset.resolve(self.presets.as_ref())?,
                seed: *layer1_seed,
            },
            Layer1Source::ImagePath { image_path } => {
                let raw = self.artifacts.load(image_path)?;
                Step::Source {
                    image: self.normalize_base(&raw, target, config)?,
                }
            }
            Layer1Source::ImageBase64 { image_base64 } => {
                let raw = RasterImage::from_base64(image_base64, config.max_source_bytes)?;
                Step::Source {
                    image: self.normalize_base(&raw, target, config)?,
                }
            }
        };

        let inpainting_strength = spec
            .inpainting_strength
            .unwrap_or(config.named_inpainting_strength);
        let inpaint = InpaintStep {
            preset: layer2,
            model,
            mask: Some(spec.mask.clone()),
            mask_reference,
            bias,
            strength: NAMED_INPAINT_STRENGTH,
            noise: None,
            inpainting_strength: Some(inpainting_strength),
            forward_source_mask: false,
            canonical: None,
        };

        Ok(ExecutionPlan {
            name: spec.name.clone(),
            target,
            steps: vec![layer1, Step::Inpaint(Box::new(inpaint))],
            pacing: Pacing::Fixed(config.pacing.named_fixed),
            allow_paid: spec.allow_paid,
        })
    }

    fn normalize_base(
        &self,
        raw: &RasterImage,
        target: Dimensions,
        config: &PipelineConfig,
    ) -> Result<RasterImage, PipelineError> {
        let source = raw.dimensions()?;
        let normalized = normalize::normalize(raw, target, config)?;
        log::info!("🖼️ 第一层底图规范化 {} -> {}", source, target);
        Ok(normalized)
    }
}
