//! # 预设库与素材存储
//!
//! ## 设计思路
//!
//! 两个只读协作方的默认实现：
//! - `PresetRegistry`：内存中的预设表，可从 JSON 对象加载
//! - `FsArtifactStore`：以目录为根的素材读取，`image_path` 只能指向根目录之内
//!
//! ## 实现思路
//!
//! 素材读取沿用“尽早失败”的顺序：路径校验 → 存在性 → 体积上限 → 读取 → 签名校验。

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::error::PipelineError;
use crate::raster::RasterImage;
use crate::service::{ArtifactStore, Preset, PresetStore};

/// 允许的素材路径字符。
static SAFE_ARTIFACT_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-./ ]+$").expect("artifact path pattern is valid"));

/// 内存预设表。
#[derive(Debug, Clone, Default)]
pub struct PresetRegistry {
    presets: HashMap<String, Preset>,
}

impl PresetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 `{"name": {preset...}, ...}` 形式的 JSON 加载。
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let presets: HashMap<String, Preset> = serde_json::from_str(json)
            .map_err(|e| PipelineError::Spec(format!("解析预设 JSON 失败：{}", e)))?;
        Ok(Self { presets })
    }

    pub fn insert(&mut self, name: impl Into<String>, preset: Preset) {
        self.presets.insert(name.into(), preset);
    }

    pub fn with(mut self, name: impl Into<String>, preset: Preset) -> Self {
        self.insert(name, preset);
        self
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

impl PresetStore for PresetRegistry {
    fn preset(&self, name: &str) -> Option<Preset> {
        self.presets.get(name).cloned()
    }
}

/// 基于本地目录的素材存储。
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    max_file_size: u64,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            root: root.into(),
            max_file_size,
        }
    }

    /// 把相对路径解析到根目录下，拒绝绝对路径与 `..`。
    fn resolve_path(&self, path: &str) -> Result<PathBuf, PipelineError> {
        if path.is_empty() || !SAFE_ARTIFACT_PATH.is_match(path) {
            return Err(PipelineError::Spec(format!("非法素材路径：{}", path)));
        }

        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(PipelineError::Spec(format!("素材路径越界：{}", path)));
        }

        Ok(self.root.join(relative))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn load(&self, path: &str) -> Result<RasterImage, PipelineError> {
        let file_path = self.resolve_path(path)?;
        log::info!("📁 读取素材 - 路径: {}", file_path.display());

        if !file_path.is_file() {
            return Err(PipelineError::FileSystem(format!("素材不存在：{}", path)));
        }

        let metadata = std::fs::metadata(&file_path)
            .map_err(|e| PipelineError::FileSystem(format!("无法读取文件信息：{}", e)))?;

        if metadata.len() > self.max_file_size {
            return Err(PipelineError::ResourceLimit(format!(
                "素材过大：{:.2} MB（限制：{:.2} MB）",
                metadata.len() as f64 / 1024.0 / 1024.0,
                self.max_file_size as f64 / 1024.0 / 1024.0
            )));
        }

        let bytes = std::fs::read(&file_path)
            .map_err(|e| PipelineError::FileSystem(format!("无法读取素材文件：{}", e)))?;
        let image = RasterImage::from_bytes(bytes);
        image.validate_signature()?;
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::test_support::gradient_png;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = std::env::temp_dir().join(format!("gen-pipeline-{}-{}", tag, nanos));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn registry_loads_from_json_with_defaults() {
        let registry = PresetRegistry::from_json(
            r#"{"A": {"prompt": "1girl, garden", "model": "nai-diffusion-3"}}"#,
        )
        .expect("parse presets");

        let preset = registry.preset("A").expect("preset A");
        assert_eq!(preset.model, "nai-diffusion-3");
        assert_eq!(preset.steps, 28);
        assert!(registry.preset("B").is_none());
    }

    #[test]
    fn registry_rejects_malformed_json() {
        assert!(matches!(
            PresetRegistry::from_json("{not json"),
            Err(PipelineError::Spec(_))
        ));
    }

    #[test]
    fn artifact_store_reads_images_under_root() {
        let root = temp_root("read");
        std::fs::create_dir_all(root.join("sub")).expect("create sub dir");
        let png = gradient_png(16, 8);
        std::fs::write(root.join("sub/base.png"), png.as_bytes()).expect("write png");

        let store = FsArtifactStore::new(&root, 1024 * 1024);
        let loaded = store.load("sub/base.png").expect("load artifact");
        assert_eq!(loaded, png);

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn artifact_store_rejects_escaping_paths() {
        let store = FsArtifactStore::new(temp_root("escape"), 1024);
        for path in ["../secret.png", "/etc/passwd", "a/../../b.png", "名字.png"] {
            assert!(matches!(store.load(path), Err(PipelineError::Spec(_))), "{path}");
        }
    }

    #[test]
    fn artifact_store_enforces_size_and_signature() {
        let root = temp_root("limits");
        std::fs::write(root.join("big.png"), gradient_png(64, 64).as_bytes()).expect("write png");
        std::fs::write(root.join("notes.png"), b"plain text, not an image").expect("write txt");

        let store = FsArtifactStore::new(&root, 16);
        assert!(matches!(
            store.load("big.png"),
            Err(PipelineError::ResourceLimit(_))
        ));

        let store = FsArtifactStore::new(&root, 1024 * 1024);
        assert!(matches!(store.load("notes.png"), Err(PipelineError::Decode(_))));
        assert!(matches!(
            store.load("missing.png"),
            Err(PipelineError::FileSystem(_))
        ));

        let _ = std::fs::remove_dir_all(root);
    }
}
