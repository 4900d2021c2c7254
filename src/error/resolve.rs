//! 曲目解析相关错误

/// 解析器错误类型
///
/// 需要 `Clone`：同一次刷新的结果会分发给所有等待者。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// 没有匹配结果，或视频已不存在
    #[error("未找到结果: {0}")]
    NotFound(String),

    /// 受地区或权限限制
    #[error("受限内容: {0}")]
    Restricted(String),

    /// 网络、超时、进程启动失败等暂时性问题
    #[error("解析暂时失败: {0}")]
    Transient(String),

    /// 解析器输出无法识别
    #[error("解析结果格式错误: {0}")]
    Malformed(String),
}

impl ResolveError {
    /// 判断是否值得稍后重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_display() {
        let err = ResolveError::NotFound("never gonna".to_owned());
        assert_eq!(err.to_string(), "未找到结果: never gonna");
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ResolveError::Transient("timeout".to_owned()).is_retryable());
        assert!(!ResolveError::NotFound("x".to_owned()).is_retryable());
        assert!(!ResolveError::Restricted("geo".to_owned()).is_retryable());
        assert!(!ResolveError::Malformed("json".to_owned()).is_retryable());
    }
}
