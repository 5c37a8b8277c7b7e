//! 集成测试共用的内存协作方。

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use gen_pipeline::{
    Dimensions, FsArtifactStore, GenerationOutput, GenerationRequest, GenerationService,
    PipelineConfig, PipelineEngine, PipelineError, Preset, PresetRegistry, RasterImage, StepDelay,
    UpscaleService,
};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn encode_png(image: DynamicImage) -> RasterImage {
    let mut cursor = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageFormat::Png)
        .expect("encode png");
    RasterImage::from_bytes(cursor.into_inner())
}

/// 以种子决定像素内容的纯色图。
pub fn seeded_png(dimensions: Dimensions, seed: u64) -> RasterImage {
    let color = Rgba([
        (seed % 251) as u8,
        (seed / 251 % 251) as u8,
        (seed / 63_001 % 251) as u8,
        255,
    ]);
    encode_png(DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
        dimensions.width,
        dimensions.height,
        color,
    )))
}

pub fn gradient_png(width: u32, height: u32) -> RasterImage {
    encode_png(DynamicImage::ImageRgba8(ImageBuffer::from_fn(
        width,
        height,
        |x, y| Rgba([(x % 255) as u8, (y % 255) as u8, ((x * y) % 255) as u8, 255]),
    )))
}

/// 左半黑、右半白的双色遮罩。
pub fn half_mask_png(width: u32, height: u32) -> RasterImage {
    encode_png(DynamicImage::ImageRgba8(ImageBuffer::from_fn(
        width,
        height,
        |x, _| {
            if x >= width / 2 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        },
    )))
}

pub fn decode(image: &RasterImage) -> image::RgbaImage {
    image::load_from_memory(image.as_bytes())
        .expect("decode image")
        .to_rgba8()
}

#[derive(Debug, Clone)]
pub enum Failure {
    CreditRequired,
    Upstream,
}

/// 记录所有请求的生成服务。
///
/// 未固定种子时从计数器分配，图像内容只由尺寸与种子决定。
pub struct MockGeneration {
    requests: Mutex<Vec<GenerationRequest>>,
    next_seed: AtomicU64,
    fail_at: Option<(usize, Failure)>,
    filename: Option<String>,
}

impl MockGeneration {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            next_seed: AtomicU64::new(1_000),
            fail_at: None,
            filename: None,
        }
    }

    /// 第 `call` 次调用（从 0 计）返回指定错误。
    pub fn failing_at(call: usize, failure: Failure) -> Self {
        Self {
            fail_at: Some((call, failure)),
            ..Self::new()
        }
    }

    pub fn with_filename(filename: &str) -> Self {
        Self {
            filename: Some(filename.to_string()),
            ..Self::new()
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

#[async_trait]
impl GenerationService for MockGeneration {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, PipelineError> {
        let call = {
            let mut requests = self.requests.lock().expect("requests lock");
            requests.push(request.clone());
            requests.len() - 1
        };

        if let Some((at, failure)) = &self.fail_at {
            if *at == call {
                return Err(match failure {
                    Failure::CreditRequired => {
                        PipelineError::CreditRequired("预计消耗 12 Anlas".to_string())
                    }
                    Failure::Upstream => PipelineError::Upstream("HTTP 500".to_string()),
                });
            }
        }

        let seed = request
            .seed
            .unwrap_or_else(|| self.next_seed.fetch_add(1, Ordering::Relaxed));
        Ok(GenerationOutput {
            image: seeded_png(request.dimensions, seed),
            seed,
            filename: self.filename.clone(),
        })
    }
}

/// 生成目标尺寸纯色图的放大服务。
#[derive(Default)]
pub struct MockUpscaler {
    calls: Mutex<Vec<(f32, u32, u32)>>,
}

impl MockUpscaler {
    pub fn calls(&self) -> Vec<(f32, u32, u32)> {
        self.calls.lock().expect("upscale lock").clone()
    }
}

#[async_trait]
impl UpscaleService for MockUpscaler {
    async fn upscale(
        &self,
        image: RasterImage,
        scale: f32,
        width: u32,
        height: u32,
    ) -> Result<RasterImage, PipelineError> {
        self.calls
            .lock()
            .expect("upscale lock")
            .push((scale, width, height));
        if scale <= 1.0 {
            return Ok(image);
        }
        Ok(seeded_png(Dimensions::new(width, height), 7))
    }
}

/// 只记录时长、不真正休眠的等待钩子。
#[derive(Default)]
pub struct RecordingDelay {
    waits: Mutex<Vec<Duration>>,
    pub count: AtomicUsize,
}

impl RecordingDelay {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().expect("waits lock").clone()
    }
}

#[async_trait]
impl StepDelay for RecordingDelay {
    async fn wait(&self, duration: Duration) {
        self.waits.lock().expect("waits lock").push(duration);
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn presets() -> PresetRegistry {
    PresetRegistry::new()
        .with("A", Preset::new("1girl, garden, sunlight", "nai-diffusion-4-5-full"))
        .with("B", Preset::new("red hat", "nai-diffusion-4-5-full"))
        .with("legacy", Preset::new("landscape", "stable-diffusion-v1"))
}

pub struct Harness {
    pub engine: PipelineEngine,
    pub generation: Arc<MockGeneration>,
    pub upscaler: Arc<MockUpscaler>,
    pub delay: Arc<RecordingDelay>,
    pub root: PathBuf,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_generation(MockGeneration::new())
    }

    pub fn with_generation(generation: MockGeneration) -> Self {
        init_logger();
        let generation = Arc::new(generation);
        let upscaler = Arc::new(MockUpscaler::default());
        let delay = Arc::new(RecordingDelay::default());
        let root = temp_root();

        let engine = PipelineEngine::new(
            PipelineConfig::default(),
            generation.clone(),
            upscaler.clone(),
            Arc::new(presets()),
            Arc::new(FsArtifactStore::new(&root, 50 * 1024 * 1024)),
        )
        .with_delay(delay.clone());

        Self {
            engine,
            generation,
            upscaler,
            delay,
            root,
        }
    }

    pub fn write_artifact(&self, name: &str, image: &RasterImage) {
        std::fs::write(self.root.join(name), image.as_bytes()).expect("write artifact");
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn temp_root() -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!(
        "gen-pipeline-it-{}-{}-{}",
        std::process::id(),
        nanos,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}
