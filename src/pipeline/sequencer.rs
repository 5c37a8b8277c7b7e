//! # 层顺序执行器
//!
//! ## 设计思路
//!
//! 对层列表做一次前向遍历，不分支、不循环；第 N 层的输入就是第 N-1 层的产出。
//!
//! - 生成层：文生图（预设自带底图时为图生图），记录图像与种子
//! - 增强层：对上一张图做图生图，需要此前有预设层
//! - 放大层：调用放大服务，只替换图像
//! - inpaint 层：用预先合成的遮罩重绘，替换图像与预设
//!
//! 相邻两层之间插入一次等待（通用流水线为 12~30 秒随机）。
//!
//! ## 实现思路
//!
//! `plan_layers` 把 `PipelineSpec` 翻译成 `ExecutionPlan`，`execute_plan` 由两种流水线共用。
//! 记录每层与总耗时，便于性能诊断。

use std::time::Instant;

use super::result::{PipelineResult, default_filename};
use super::spec::{PipelineLayer, PipelineSpec};
use super::state::{
    ENHANCE_NEEDS_PRESET, ExecutionPlan, INPAINT_NEEDS_IMAGE, INPAINT_NEEDS_MASK, InpaintStep,
    PipelineState, Step, UPSCALE_NEEDS_IMAGE,
};
use super::PipelineEngine;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pacing::Pacing;
use crate::raster::mask::{MaskBias, MaskSpec};
use crate::raster::normalize;
use crate::resolution::Dimensions;
use crate::service::{GenerationKind, GenerationRequest, Provenance};

impl PipelineEngine {
    /// 执行通用 N 层流水线。
    ///
    /// # 示例
    /// ```rust,ignore
    /// use gen_pipeline::{PipelineLayer, PipelineSpec, PresetSource};
    ///
    /// # async fn demo(engine: gen_pipeline::PipelineEngine) -> Result<(), gen_pipeline::PipelineError> {
    /// let spec = PipelineSpec::new(
    ///     "normal_square",
    ///     vec![PipelineLayer::Generation { preset: PresetSource::Ref("A".into()) }],
    /// );
    /// let result = engine.run(&spec).await?;
    /// assert_eq!(result.dimensions.width, 1024);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(&self, spec: &PipelineSpec) -> Result<PipelineResult, PipelineError> {
        self.run_with_cancel(spec, || false).await
    }

    /// 与 `run` 相同，但在每层开始前和每次等待后检查 `is_cancelled`。
    pub async fn run_with_cancel<C>(
        &self,
        spec: &PipelineSpec,
        is_cancelled: C,
    ) -> Result<PipelineResult, PipelineError>
    where
        C: Fn() -> bool + Send + Sync,
    {
        let config = self.config_snapshot()?;
        let mut plan = self.plan_layers(spec, &config)?;
        plan.prepare(&config)?;
        self.execute_plan(plan, &config, &is_cancelled).await
    }

    fn plan_layers(
        &self,
        spec: &PipelineSpec,
        config: &PipelineConfig,
    ) -> Result<ExecutionPlan, PipelineError> {
        let target = spec.validate()?;
        let bias = MaskBias::new(config.generic_mask_bias)?;

        let mut steps = Vec::with_capacity(spec.layers.len());
        for layer in &spec.layers {
            let step = match layer {
                PipelineLayer::Generation { preset } => {
                    let preset = preset.resolve(self.presets.as_ref())?;
                    Step::Generate { preset, seed: None }
                }
                PipelineLayer::Enhance { strength, noise } => Step::Enhance {
                    strength: *strength,
                    noise: *noise,
                },
                PipelineLayer::Upscale { scale } => Step::Upscale { scale: *scale },
                PipelineLayer::Inpaint {
                    preset,
                    mask,
                    strength,
                    noise,
                } => {
                    let preset = preset.resolve(self.presets.as_ref())?;
                    let model = config
                        .inpainting_variant(&preset.model)
                        .unwrap_or_else(|| preset.model.clone());
                    Step::Inpaint(Box::new(InpaintStep {
                        preset,
                        model,
                        mask: mask.clone(),
                        mask_reference: target,
                        bias,
                        strength: strength.unwrap_or(config.inpaint_strength),
                        noise: Some(noise.unwrap_or(config.inpaint_noise)),
                        inpainting_strength: None,
                        forward_source_mask: true,
                        canonical: None,
                    }))
                }
            };
            steps.push(step);
        }

        Ok(ExecutionPlan {
            name: spec.name.clone(),
            target,
            steps,
            pacing: Pacing::Randomized {
                min: config.pacing.generic_min,
                max: config.pacing.generic_max,
            },
            allow_paid: spec.allow_paid,
        })
    }

    /// 按顺序执行计划中的每一步。
    ///
    /// 任何一步失败都中止整次执行，不返回部分结果。
    pub(super) async fn execute_plan<C>(
        &self,
        plan: ExecutionPlan,
        config: &PipelineConfig,
        is_cancelled: &C,
    ) -> Result<PipelineResult, PipelineError>
    where
        C: Fn() -> bool + Send + Sync,
    {
        let ExecutionPlan {
            name,
            target,
            steps,
            pacing,
            allow_paid,
        } = plan;
        let total_steps = steps.len();
        let total_start = Instant::now();
        let mut state = PipelineState::default();

        log::info!(
            "🚀 开始执行流水线 {} - 目标尺寸 {}，共 {} 层",
            name,
            target,
            total_steps
        );

        for (index, step) in steps.into_iter().enumerate() {
            ensure_not_cancelled(is_cancelled, index)?;
            if index > 0 {
                let delay = pacing.next_delay();
                log::info!("⏳ 第 {} 层开始前等待 {}ms", index, delay.as_millis());
                self.delay.wait(delay).await;
                ensure_not_cancelled(is_cancelled, index)?;
            }

            let label = step.label();
            let step_start = Instant::now();
            let provenance = Provenance {
                pipeline: Some(name.clone()),
                layer: index,
                layer1_seed: state.layer1_seed,
            };

            self.execute_step(step, &mut state, target, allow_paid, provenance, config)
                .await?;

            if index == 0 {
                state.layer1_seed = state.last_seed;
            }

            log::info!(
                "✅ 第 {}/{} 层完成 - {} {}ms",
                index + 1,
                total_steps,
                label,
                step_start.elapsed().as_millis()
            );
        }

        let buffer = state
            .last_image
            .take()
            .ok_or_else(|| PipelineError::Sequence("流水线没有产出图像".to_string()))?;
        let seed = state
            .last_seed
            .ok_or_else(|| PipelineError::Sequence("流水线没有产出种子".to_string()))?;
        let filename = state
            .last_filename
            .take()
            .unwrap_or_else(|| default_filename(&name, seed));

        log::info!(
            "🏁 流水线 {} 完成 - seed={} total={}ms",
            name,
            seed,
            total_start.elapsed().as_millis()
        );

        Ok(PipelineResult {
            buffer,
            filename: Some(filename),
            seed,
            layer1_seed: state.layer1_seed,
            dimensions: state.last_dimensions.unwrap_or(target),
        })
    }

    async fn execute_step(
        &self,
        step: Step,
        state: &mut PipelineState,
        target: Dimensions,
        allow_paid: bool,
        provenance: Provenance,
        config: &PipelineConfig,
    ) -> Result<(), PipelineError> {
        match step {
            Step::Generate { preset, seed } => {
                let mut request = match &preset.base_image {
                    Some(base) => {
                        let normalized = normalize::normalize(base, target, config)?;
                        GenerationRequest::image_to_image(
                            preset.clone(),
                            target,
                            normalized,
                            preset.strength.unwrap_or(config.base_image_strength),
                            preset.noise.unwrap_or(config.base_image_noise),
                        )
                    }
                    None => GenerationRequest::text_to_image(preset.clone(), target),
                };
                request.seed = seed.or(preset.seed);
                request.allow_paid = allow_paid;
                request.provenance = provenance;

                let output = self.generation.generate(request).await?;
                state.record_generation(output, Some(preset), target);
            }
            Step::Source { image } => {
                state.last_image = Some(image);
                state.last_dimensions = Some(target);
            }
            Step::Enhance { strength, noise } => {
                let image = state.require_image(ENHANCE_NEEDS_PRESET)?;
                let preset = state.require_preset(ENHANCE_NEEDS_PRESET)?;
                warn_on_size_mismatch(state, target, "enhance");

                let mut request =
                    GenerationRequest::image_to_image(preset, target, image, strength, noise);
                request.allow_paid = allow_paid;
                request.provenance = provenance;

                let output = self.generation.generate(request).await?;
                state.record_generation(output, None, target);
            }
            Step::Upscale { scale } => {
                let image = state.require_image(UPSCALE_NEEDS_IMAGE)?;
                let scaled = target.scaled(scale);

                let upscaled = self
                    .upscaler
                    .upscale(image, scale, scaled.width, scaled.height)
                    .await?;
                state.last_image = Some(upscaled);
                state.last_dimensions = Some(scaled);
            }
            Step::Inpaint(inpaint) => {
                let image = state.require_image(INPAINT_NEEDS_IMAGE)?;
                warn_on_size_mismatch(state, target, "inpaint");
                let InpaintStep {
                    preset,
                    model,
                    mask,
                    strength,
                    noise,
                    inpainting_strength,
                    forward_source_mask,
                    canonical,
                    ..
                } = *inpaint;
                let canonical = canonical
                    .ok_or_else(|| PipelineError::Sequence(INPAINT_NEEDS_MASK.to_string()))?;
                let source_mask = match mask {
                    Some(MaskSpec::Raster(raw)) if forward_source_mask => Some(raw),
                    _ => None,
                };

                let request = GenerationRequest {
                    kind: GenerationKind::Inpaint,
                    model,
                    dimensions: target,
                    image: Some(image),
                    mask: Some(canonical),
                    source_mask,
                    strength: Some(strength),
                    noise,
                    inpainting_strength,
                    seed: preset.seed,
                    allow_paid,
                    provenance,
                    preset: preset.clone(),
                };

                let output = self.generation.generate(request).await?;
                state.record_generation(output, Some(preset), target);
            }
        }

        Ok(())
    }
}

fn ensure_not_cancelled<C>(is_cancelled: &C, index: usize) -> Result<(), PipelineError>
where
    C: Fn() -> bool,
{
    if is_cancelled() {
        log::warn!("🛑 流水线在第 {} 层之前被取消", index);
        return Err(PipelineError::Cancelled(format!("在第 {} 层之前取消", index)));
    }
    Ok(())
}

/// 放大之后的层仍按目标尺寸请求，输入图与请求尺寸（及遮罩）会不一致。
fn warn_on_size_mismatch(state: &PipelineState, target: Dimensions, label: &str) {
    if let Some(current) = state.last_dimensions {
        if current != target {
            log::warn!(
                "⚠️ {} 层输入图为 {}，请求与遮罩仍按目标尺寸 {} 发送",
                label,
                current,
                target
            );
        }
    }
}
