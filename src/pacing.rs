//! # 步骤节奏控制
//!
//! ## 设计思路
//!
//! 步骤之间的等待只是对外部服务的礼貌性退避，与正确性无关。
//! 因此把它收敛为单一的异步挂起点 `StepDelay`：生产环境用 `TokioDelay` 真正休眠，
//! 测试注入 `NoDelay`，排序逻辑本身完全不变。
//!
//! ## 实现思路
//!
//! - `Pacing::Randomized`：在 `[min, max]` 内均匀取值（通用流水线）
//! - `Pacing::Fixed`：固定时长（命名流水线）
//! - 随机源为无锁 xorshift，按时间与进程号播种，不追求密码学强度

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 异步挂起钩子。
#[async_trait]
pub trait StepDelay: Send + Sync {
    async fn wait(&self, duration: Duration);
}

/// 使用 `tokio::time::sleep` 的真实等待。
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl StepDelay for TokioDelay {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 立即返回，用于测试与离线工具。
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

#[async_trait]
impl StepDelay for NoDelay {
    async fn wait(&self, _duration: Duration) {}
}

/// 相邻两步之间的等待策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    Randomized { min: Duration, max: Duration },
    Fixed(Duration),
}

impl Pacing {
    /// 本次等待时长。
    pub fn next_delay(&self) -> Duration {
        match *self {
            Self::Fixed(duration) => duration,
            Self::Randomized { min, max } => {
                let min_ms = min.as_millis() as u64;
                let max_ms = (max.as_millis() as u64).max(min_ms);
                let span = max_ms - min_ms;
                let offset = if span == 0 {
                    0
                } else {
                    next_jitter_u64() % (span + 1)
                };
                Duration::from_millis(min_ms + offset)
            }
        }
    }
}

static JITTER_STATE: AtomicU64 = AtomicU64::new(0);

fn seed_jitter_state() -> u64 {
    let time_seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let state = time_seed ^ ((std::process::id() as u64) << 32) ^ 0x9E37_79B9_7F4A_7C15;
    if state == 0 { 0xA5A5_5A5A_0123_4567 } else { state }
}

fn next_jitter_u64() -> u64 {
    let mut current = JITTER_STATE.load(Ordering::Relaxed);

    loop {
        let mut next = if current == 0 {
            seed_jitter_state()
        } else {
            current
        };
        next ^= next << 13;
        next ^= next >> 7;
        next ^= next << 17;

        match JITTER_STATE.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(observed) => current = observed,
        }
    }
}
