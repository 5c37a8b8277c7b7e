//! # 生成流水线与遮罩合成引擎 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │              外层 HTTP / 队列（不在本库内）              │
//! │   PipelineSpec / NamedPipelineSpec (JSON)                │
//! └───────┼──────────────────────────────────────────────────┘
//!         ↕ Result<PipelineResult, PipelineError>
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            引擎 (Rust)                           │
//! │                                                          │
//! │  ┌─ pipeline ─── PipelineEngine (编排 + 配置快照)        │
//! │  │   ├─ sequencer      通用 N 层顺序执行                 │
//! │  │   ├─ named          命名两层（底图 + inpaint）        │
//! │  │   └─ state          ExecutionPlan + 顺序预检          │
//! │  │                                                       │
//! │  ├─ raster ───── RasterImage (Bytes + Base64)            │
//! │  │   ├─ normalize      居中裁剪 + 缩放                    │
//! │  │   └─ mask           补边 · 缩放 · 二值化              │
//! │  │                                                       │
//! │  ├─ resolution         命名分辨率表                       │
//! │  ├─ pacing             步骤间等待（随机 / 固定）          │
//! │  ├─ service            生成 / 放大 / 预设 / 素材 trait    │
//! │  ├─ store              PresetRegistry · FsArtifactStore   │
//! │  ├─ config             PipelineConfig（运行时可调）       │
//! │  └─ error              PipelineError（统一错误类型）      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `PipelineError`，携带错误码与阶段 |
//! | [`config`] | 解码上限、重采样档位、遮罩偏置、等待区间等可调参数 |
//! | [`resolution`] | 分辨率名称与像素尺寸的双向查找 |
//! | [`raster`] | 图像字节容器、底图规范化、遮罩合成 |
//! | [`pacing`] | 步骤间等待策略与可注入的等待钩子 |
//! | [`service`] | 外部协作方接口与请求数据模型 |
//! | [`store`] | 预设库与文件系统素材存储的默认实现 |
//! | [`pipeline`] | 两种流水线的规格、计划与执行 |

pub mod config;
pub mod error;
pub mod pacing;
pub mod pipeline;
pub mod raster;
pub mod resolution;
pub mod service;
pub mod store;

pub use config::{PacingConfig, PipelineConfig, ResampleProfile};
pub use error::PipelineError;
pub use pacing::{NoDelay, Pacing, StepDelay, TokioDelay};
pub use pipeline::{
    Layer1Source, NamedPipelineSpec, PipelineEngine, PipelineLayer, PipelineResult, PipelineSpec,
};
pub use raster::RasterImage;
pub use raster::mask::{CanonicalMask, MaskBias, MaskSpec};
pub use resolution::Dimensions;
pub use service::{
    ArtifactStore, GenerationKind, GenerationOutput, GenerationRequest, GenerationService,
    Preset, PresetSource, PresetStore, Provenance, UpscaleService,
};
pub use store::{FsArtifactStore, PresetRegistry};
