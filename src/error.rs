//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 流水线中的所有失败（规格校验、层顺序、解码、预检、外部服务）都收敛到
//! 单一的 `PipelineError` 枚举，调用侧可以按分支匹配，而不是解析字符串。
//!
//! 传播策略：任何错误都会中止整次执行，不返回部分结果，也不做自动重试。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - `code()` / `stage()` 提供稳定的机器可读字段，供外层 HTTP 层组装响应。
//! - 实现 `Serialize`，将错误序列化为人类可读的字符串。

use serde::Serialize;

/// 流水线统一错误类型。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 规格非法（空层列表、分辨率无法解析、遮罩形状非法、参数越界）。
    ///
    /// 在任何外部调用之前检出。
    #[error("规格错误：{0}")]
    Spec(String),

    /// 层的位置前置条件不满足，剩余层全部中止。
    #[error("层顺序错误：{0}")]
    Sequence(String),

    #[error("解码错误：{0}")]
    Decode(String),

    /// 引用的模型没有对应的 inpainting 变体（仅命名执行器预检）。
    #[error("配置错误：{0}")]
    Configuration(String),

    /// 生成服务要求付费额度，原样透传。
    #[error("需要付费额度：{0}")]
    CreditRequired(String),

    /// 其他外部服务失败，保留原始消息。
    #[error("上游服务错误：{0}")]
    Upstream(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("文件错误：{0}")]
    FileSystem(String),

    #[error("已取消：{0}")]
    Cancelled(String),
}

impl PipelineError {
    /// 稳定错误码，外层可据此做分支展示。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Spec(_) => "E_SPEC",
            Self::Sequence(_) => "E_SEQUENCE",
            Self::Decode(_) => "E_DECODE",
            Self::Configuration(_) => "E_CONFIGURATION",
            Self::CreditRequired(_) => "E_CREDIT_REQUIRED",
            Self::Upstream(_) => "E_UPSTREAM",
            Self::ResourceLimit(_) => "E_RESOURCE_LIMIT",
            Self::FileSystem(_) => "E_FILE_SYSTEM",
            Self::Cancelled(_) => "E_CANCELLED",
        }
    }

    /// 出错阶段，用于日志聚合与前端提示。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Spec(_) => "validate",
            Self::Sequence(_) => "sequence",
            Self::Decode(_) | Self::ResourceLimit(_) => "decode",
            Self::Configuration(_) => "preflight",
            Self::CreditRequired(_) | Self::Upstream(_) => "generate",
            Self::FileSystem(_) => "load",
            Self::Cancelled(_) => "cancel",
        }
    }

    /// 是否为执行前即可检出的调用方错误。
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Spec(_) | Self::Sequence(_) | Self::Configuration(_)
        )
    }
}

/// 将错误序列化为人类可读的字符串，满足外层 IPC/HTTP 的要求。
impl Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
