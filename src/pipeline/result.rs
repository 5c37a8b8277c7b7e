//! 执行产物：交给外层 HTTP 层的最终结果。

use chrono::Local;
use serde::Serialize;

use crate::raster::RasterImage;
use crate::resolution::Dimensions;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    /// 最终图像字节（序列化为 Base64）。
    pub buffer: RasterImage,
    pub filename: Option<String>,
    /// 最后一次生成调用的种子。
    pub seed: u64,
    /// 第一层由生成服务产出时的种子，用于 reroll。
    pub layer1_seed: Option<u64>,
    pub dimensions: Dimensions,
}

impl PipelineResult {
    pub fn buffer_base64(&self) -> String {
        self.buffer.to_base64()
    }
}

/// 服务未给出文件名时的默认命名：`<pipeline>_<时间戳>_<seed>.png`。
pub(crate) fn default_filename(pipeline: &str, seed: u64) -> String {
    let stem: String = pipeline
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let timestamp = Local::now().format("%Y%m%d%H%M%S");
    format!("{}_{}_{}.png", stem, timestamp, seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filename_is_sanitized() {
        let name = default_filename("hat swap/v2", 42);
        assert!(name.starts_with("hat_swap_v2_"));
        assert!(name.ends_with("_42.png"));
    }
}
