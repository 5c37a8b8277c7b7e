//! 分辨率解析：符号名 ↔ 像素尺寸的固定双向表。

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::PipelineError;

/// 像素尺寸，宽高均为正整数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// 按倍率放大，四舍五入到整数像素。
    pub fn scaled(&self, scale: f32) -> Self {
        let scale = scale as f64;
        Self {
            width: ((self.width as f64 * scale).round() as u32).max(1),
            height: ((self.height as f64 * scale).round() as u32).max(1),
        }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// 纵向 / 横向 / 方形 × small / normal / large / wallpaper。
const RESOLUTIONS: [(&str, Dimensions); 11] = [
    ("small_portrait", Dimensions::new(512, 768)),
    ("small_landscape", Dimensions::new(768, 512)),
    ("small_square", Dimensions::new(640, 640)),
    ("normal_portrait", Dimensions::new(832, 1216)),
    ("normal_landscape", Dimensions::new(1216, 832)),
    ("normal_square", Dimensions::new(1024, 1024)),
    ("large_portrait", Dimensions::new(1024, 1536)),
    ("large_landscape", Dimensions::new(1536, 1024)),
    ("large_square", Dimensions::new(1472, 1472)),
    ("wallpaper_portrait", Dimensions::new(1088, 1920)),
    ("wallpaper_landscape", Dimensions::new(1920, 1088)),
];

static BY_NAME: Lazy<HashMap<&'static str, Dimensions>> =
    Lazy::new(|| RESOLUTIONS.iter().copied().collect());

static BY_DIMENSIONS: Lazy<HashMap<Dimensions, &'static str>> =
    Lazy::new(|| RESOLUTIONS.iter().map(|(name, dims)| (*dims, *name)).collect());

/// 大小写不敏感地解析分辨率名。
pub fn resolve(name: &str) -> Option<Dimensions> {
    BY_NAME.get(name.trim().to_lowercase().as_str()).copied()
}

/// 与 `resolve` 相同，但未找到时返回 `PipelineError::Spec`。
pub fn resolve_or_err(name: &str) -> Result<Dimensions, PipelineError> {
    resolve(name).ok_or_else(|| PipelineError::Spec(format!("未知分辨率：{}", name)))
}

/// 反向查询：尺寸 → 分辨率名。
pub fn name_of(dimensions: Dimensions) -> Option<&'static str> {
    BY_DIMENSIONS.get(&dimensions).copied()
}

/// 全部已知分辨率（按表顺序）。
pub fn all() -> impl Iterator<Item = (&'static str, Dimensions)> {
    RESOLUTIONS.iter().copied()
}
