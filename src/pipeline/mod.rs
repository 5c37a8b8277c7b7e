//! # 流水线模块
//!
//! ## 设计思路
//!
//! `PipelineEngine` 只负责流程编排与配置管理，外部服务全部通过 trait 注入。
//! 两种流水线共享同一条执行链路：
//!
//! ```text
//! PipelineSpec ──────┐                        ┌─ mask::composite（预先合成）
//!   (sequencer.rs)   ├─→ ExecutionPlan ─→ prepare ─┤
//! NamedPipelineSpec ─┘                        └─ check_sequence（预先检查）
//!   (named.rs)                 ↓
//!                      execute_plan（逐层调用服务 + 步骤间等待）
//!                              ↓
//!                       PipelineResult
//! ```
//!
//! ## 实现思路
//!
//! - 配置通过 `Arc<RwLock<PipelineConfig>>` 支持运行时调整。
//! - 单次执行使用同一份配置快照，执行中途的配置变化不会生效。
//! - 步骤之间的等待通过 `StepDelay` 注入，测试可替换为零延迟。

mod named;
mod result;
mod sequencer;
mod spec;
mod state;

use std::sync::{Arc, RwLock};

use crate::config::{PipelineConfig, ResampleProfile};
use crate::error::PipelineError;
use crate::pacing::{StepDelay, TokioDelay};
use crate::raster::mask::{self, CanonicalMask, MaskBias, MaskSpec};
use crate::resolution::Dimensions;
use crate::service::{ArtifactStore, GenerationService, PresetStore, UpscaleService};

pub use result::PipelineResult;
pub use spec::{Layer1Source, NamedPipelineSpec, PipelineLayer, PipelineSpec};

/// 流水线引擎。
///
/// 持有配置与外部协作方，本身不保存任何执行状态，可在多个请求间共享。
pub struct PipelineEngine {
    config: Arc<RwLock<PipelineConfig>>,
    generation: Arc<dyn GenerationService>,
    upscaler: Arc<dyn UpscaleService>,
    presets: Arc<dyn PresetStore>,
    artifacts: Arc<dyn ArtifactStore>,
    delay: Arc<dyn StepDelay>,
}

impl PipelineEngine {
    /// 创建引擎，步骤间等待默认使用 `TokioDelay`。
    pub fn new(
        config: PipelineConfig,
        generation: Arc<dyn GenerationService>,
        upscaler: Arc<dyn UpscaleService>,
        presets: Arc<dyn PresetStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            generation,
            upscaler,
            presets,
            artifacts,
            delay: Arc::new(TokioDelay),
        }
    }

    /// 替换步骤间等待钩子。
    pub fn with_delay(mut self, delay: Arc<dyn StepDelay>) -> Self {
        self.delay = delay;
        self
    }

    /// 获取配置快照，保证单次执行使用一致参数。
    pub fn config_snapshot(&self) -> Result<PipelineConfig, PipelineError> {
        self.config
            .read()
            .map(|cfg| cfg.clone())
            .map_err(|_| PipelineError::ResourceLimit("配置读取锁已中毒".to_string()))
    }

    /// 原地修改配置，只影响之后开始的执行。
    pub fn update_config<F>(&self, update: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut PipelineConfig),
    {
        let mut config = self
            .config
            .write()
            .map_err(|_| PipelineError::ResourceLimit("配置写入锁已中毒".to_string()))?;
        update(&mut config);
        Ok(())
    }

    pub fn set_resample_profile(&self, profile: &str) -> Result<(), PipelineError> {
        let profile = ResampleProfile::parse(profile)?;
        self.update_config(|config| config.apply_resample_profile(profile))?;
        log::info!("⚙️ 已切换重采样档位：{}", profile.as_str());
        Ok(())
    }

    pub fn get_resample_profile(&self) -> Result<String, PipelineError> {
        let config = self
            .config
            .read()
            .map_err(|_| PipelineError::ResourceLimit("配置读取锁已中毒".to_string()))?;
        Ok(config.infer_resample_profile().as_str().to_string())
    }

    /// 用当前配置预览规范化遮罩，不触发任何外部调用。
    pub fn preview_mask(
        &self,
        spec: &MaskSpec,
        reference: Dimensions,
        target: Dimensions,
        bias: MaskBias,
    ) -> Result<CanonicalMask, PipelineError> {
        let config = self.config_snapshot()?;
        mask::composite(spec, reference, target, bias, &config)
    }
}
