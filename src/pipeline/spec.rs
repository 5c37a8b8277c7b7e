//! # 流水线规格
//!
//! ## 设计思路
//!
//! 规格由调用方按请求构造，构造后不可变。这里只负责数据形状与“与状态无关”的校验：
//! 分辨率能否解析、层列表是否为空、参数是否在允许区间。
//! 与层位置相关的前置条件由顺序检查负责（见 `state.rs`）。

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::raster::mask::{MaskBias, MaskSpec};
use crate::resolution::{self, Dimensions};
use crate::service::PresetSource;

/// 通用流水线中的一层。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineLayer {
    Generation {
        preset: PresetSource,
    },
    Enhance {
        /// (0, 1]
        strength: f32,
        /// [0, 1]
        noise: f32,
    },
    Upscale {
        /// > 1
        scale: f32,
    },
    Inpaint {
        preset: PresetSource,
        #[serde(default)]
        mask: Option<MaskSpec>,
        #[serde(default)]
        strength: Option<f32>,
        #[serde(default)]
        noise: Option<f32>,
    },
}

impl PipelineLayer {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Generation { .. } => "generation",
            Self::Enhance { .. } => "enhance",
            Self::Upscale { .. } => "upscale",
            Self::Inpaint { .. } => "inpaint",
        }
    }

    fn validate(&self, index: usize) -> Result<(), PipelineError> {
        match self {
            Self::Generation { .. } => Ok(()),
            Self::Enhance { strength, noise } => {
                check_open_unit(*strength, "strength", index)?;
                check_unit(*noise, "noise", index)
            }
            Self::Upscale { scale } => {
                if !scale.is_finite() || *scale <= 1.0 {
                    return Err(PipelineError::Spec(format!(
                        "第 {} 层 upscale 倍率必须大于 1：{}",
                        index, scale
                    )));
                }
                Ok(())
            }
            Self::Inpaint {
                strength, noise, ..
            } => {
                if let Some(strength) = strength {
                    check_open_unit(*strength, "strength", index)?;
                }
                if let Some(noise) = noise {
                    check_unit(*noise, "noise", index)?;
                }
                Ok(())
            }
        }
    }
}

fn check_unit(value: f32, field: &str, index: usize) -> Result<(), PipelineError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(PipelineError::Spec(format!(
            "第 {} 层 {} 必须在 [0, 1] 之间：{}",
            index, field, value
        )));
    }
    Ok(())
}

fn check_open_unit(value: f32, field: &str, index: usize) -> Result<(), PipelineError> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(PipelineError::Spec(format!(
            "第 {} 层 {} 必须在 (0, 1] 之间：{}",
            index, field, value
        )));
    }
    Ok(())
}

fn default_pipeline_name() -> String {
    "pipeline".to_string()
}

/// 通用 N 层流水线规格。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    #[serde(default = "default_pipeline_name")]
    pub name: String,
    pub resolution: String,
    pub layers: Vec<PipelineLayer>,
    #[serde(default)]
    pub allow_paid: bool,
}

impl PipelineSpec {
    pub fn new(resolution: impl Into<String>, layers: Vec<PipelineLayer>) -> Self {
        Self {
            name: default_pipeline_name(),
            resolution: resolution.into(),
            layers,
            allow_paid: false,
        }
    }

    /// 校验并返回目标尺寸。
    pub fn validate(&self) -> Result<Dimensions, PipelineError> {
        let target = resolution::resolve_or_err(&self.resolution)?;
        if self.layers.is_empty() {
            return Err(PipelineError::Spec("流水线至少需要一层".to_string()));
        }
        for (index, layer) in self.layers.iter().enumerate() {
            layer.validate(index)?;
        }
        Ok(target)
    }
}

/// 命名流水线第一层的来源，三选一。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layer1_type", rename_all = "snake_case")]
pub enum Layer1Source {
    /// 调用生成服务，可固定种子以便 reroll。
    Prompt {
        preset: PresetSource,
        #[serde(default)]
        layer1_seed: Option<u64>,
    },
    /// 从素材存储读取后规范化到目标尺寸。
    ImagePath { image_path: String },
    /// Base64 解码后规范化到目标尺寸。
    ImageBase64 { image_base64: String },
}

impl Layer1Source {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Prompt { .. } => "prompt",
            Self::ImagePath { .. } => "image_path",
            Self::ImageBase64 { .. } => "image_base64",
        }
    }
}

/// 命名两层流水线：第一层产出底图，第二层是带遮罩的 inpaint。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedPipelineSpec {
    pub name: String,
    pub layer1: Layer1Source,
    pub layer2: PresetSource,
    pub mask: MaskSpec,
    pub resolution: String,
    /// 矩形遮罩坐标所参照的分辨率，缺省与 `resolution` 相同。
    #[serde(default)]
    pub mask_resolution: Option<String>,
    #[serde(default)]
    pub mask_bias: Option<MaskBias>,
    /// [0, 1]
    #[serde(default)]
    pub inpainting_strength: Option<f32>,
    #[serde(default)]
    pub allow_paid: bool,
}

impl NamedPipelineSpec {
    /// 校验并返回 `(目标尺寸, 遮罩参考尺寸)`。
    pub fn validate(&self) -> Result<(Dimensions, Dimensions), PipelineError> {
        let target = resolution::resolve_or_err(&self.resolution)?;
        let reference = match &self.mask_resolution {
            Some(name) => resolution::resolve_or_err(name)?,
            None => target,
        };
        if let Some(strength) = self.inpainting_strength {
            if !(0.0..=1.0).contains(&strength) {
                return Err(PipelineError::Spec(format!(
                    "inpainting_strength 必须在 [0, 1] 之间：{}",
                    strength
                )));
            }
        }
        Ok((target, reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_parse_from_tagged_json() {
        let spec: PipelineSpec = serde_json::from_str(
            r#"{
                "resolution": "normal_square",
                "layers": [
                    {"type": "generation", "preset": "A"},
                    {"type": "enhance", "strength": 0.4, "noise": 0.1},
                    {"type": "upscale", "scale": 2.0},
                    {"type": "inpaint", "preset": {"prompt": "hat", "model": "nai-diffusion-3"},
                     "mask": {"rectangle": [0, 0, 10, 10]}}
                ]
            }"#,
        )
        .expect("parse spec");

        assert_eq!(spec.name, "pipeline");
        assert!(!spec.allow_paid);
        let labels: Vec<_> = spec.layers.iter().map(PipelineLayer::label).collect();
        assert_eq!(labels, ["generation", "enhance", "upscale", "inpaint"]);
        assert_eq!(spec.validate().expect("valid"), Dimensions::new(1024, 1024));
    }

    #[test]
    fn empty_layers_and_unknown_resolution_are_rejected() {
        let empty = PipelineSpec::new("normal_square", vec![]);
        assert!(matches!(empty.validate(), Err(PipelineError::Spec(_))));

        let unknown = PipelineSpec::new(
            "giant",
            vec![PipelineLayer::Generation {
                preset: PresetSource::Ref("A".into()),
            }],
        );
        assert!(matches!(unknown.validate(), Err(PipelineError::Spec(_))));
    }

    #[test]
    fn parameter_ranges_are_enforced() {
        let generation = PipelineLayer::Generation {
            preset: PresetSource::Ref("A".into()),
        };
        let bad_layers = [
            PipelineLayer::Enhance {
                strength: 0.0,
                noise: 0.1,
            },
            PipelineLayer::Enhance {
                strength: 0.5,
                noise: 1.5,
            },
            PipelineLayer::Upscale { scale: 1.0 },
            PipelineLayer::Upscale { scale: f32::NAN },
            PipelineLayer::Inpaint {
                preset: PresetSource::Ref("B".into()),
                mask: None,
                strength: Some(1.2),
                noise: None,
            },
        ];

        for bad in bad_layers {
            let spec = PipelineSpec::new("normal_square", vec![generation.clone(), bad]);
            assert!(matches!(spec.validate(), Err(PipelineError::Spec(_))));
        }
    }

    #[test]
    fn named_spec_parses_layer1_modes() {
        let spec: NamedPipelineSpec = serde_json::from_str(
            r#"{
                "name": "hat-swap",
                "layer1": {"layer1_type": "prompt", "preset": "A", "layer1_seed": 42},
                "layer2": "B",
                "mask": {"rectangle": [10, 10, 100, 100]},
                "resolution": "large_portrait",
                "mask_resolution": "normal_portrait",
                "mask_bias": 1
            }"#,
        )
        .expect("parse named spec");

        assert_eq!(spec.layer1.label(), "prompt");
        assert_eq!(spec.mask_bias, Some(MaskBias::new(1).expect("bias")));
        let (target, reference) = spec.validate().expect("valid");
        assert_eq!(target, Dimensions::new(1024, 1536));
        assert_eq!(reference, Dimensions::new(832, 1216));
    }

    #[test]
    fn named_spec_rejects_bad_strength_and_bias() {
        let mut spec = NamedPipelineSpec {
            name: "n".into(),
            layer1: Layer1Source::ImagePath {
                image_path: "base.png".into(),
            },
            layer2: PresetSource::Ref("B".into()),
            mask: MaskSpec::Rectangle(vec![0, 0, 1, 1]),
            resolution: "normal_square".into(),
            mask_resolution: None,
            mask_bias: None,
            inpainting_strength: Some(1.5),
            allow_paid: false,
        };
        assert!(matches!(spec.validate(), Err(PipelineError::Spec(_))));

        spec.inpainting_strength = Some(0.7);
        assert!(spec.validate().is_ok());

        let parsed: Result<NamedPipelineSpec, _> = serde_json::from_str(
            r#"{"name":"n","layer1":{"layer1_type":"image_path","image_path":"a.png"},
                "layer2":"B","mask":{"rectangle":[0,0,1,1]},"resolution":"normal_square",
                "mask_bias": 9}"#,
        );
        assert!(parsed.is_err());
    }
}
