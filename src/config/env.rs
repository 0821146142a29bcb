use std::env;
use std::str::FromStr;

use anyhow::anyhow;

use crate::error::{AssistFlowError, Result};

/// 环境变量配置管理
pub struct EnvConfig;

impl EnvConfig {
    /// 从环境变量获取值
    pub fn get_env(key: &str) -> Result<String> {
        env::var(key).map_err(|_| {
            AssistFlowError::Other(anyhow!(
                "环境变量 '{}' 未设置。请通过环境变量传递。",
                key
            ))
        })
    }

    /// 获取可选的环境变量，空字符串视为未设置
    pub fn get_env_optional(key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    /// 解析可选的环境变量，格式错误时返回配置错误
    pub fn parse_env<T>(key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match Self::get_env_optional(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
                AssistFlowError::Config(format!("环境变量 '{}' 的值 '{}' 无效: {}", key, raw, e))
            }),
        }
    }

    /// 检查是否启用调试模式
    pub fn is_debug_mode() -> bool {
        env::var("ASSISTFLOW_DEBUG").is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_missing() {
        assert!(EnvConfig::get_env("ASSISTFLOW_TEST_SURELY_MISSING").is_err());
        assert!(EnvConfig::get_env_optional("ASSISTFLOW_TEST_SURELY_MISSING").is_none());
    }

    #[test]
    fn test_parse_env() {
        env::set_var("ASSISTFLOW_TEST_PARSE_OK", "42");
        assert_eq!(
            EnvConfig::parse_env::<u64>("ASSISTFLOW_TEST_PARSE_OK").unwrap(),
            Some(42)
        );
        env::remove_var("ASSISTFLOW_TEST_PARSE_OK");

        env::set_var("ASSISTFLOW_TEST_PARSE_BAD", "soon");
        assert!(matches!(
            EnvConfig::parse_env::<u64>("ASSISTFLOW_TEST_PARSE_BAD"),
            Err(AssistFlowError::Config(_))
        ));
        env::remove_var("ASSISTFLOW_TEST_PARSE_BAD");
    }
}
