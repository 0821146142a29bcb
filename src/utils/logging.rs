use std::env;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEBUG_ENV: &str = "ASSISTFLOW_DEBUG";

/// 日志配置
pub struct LoggingConfig;

impl LoggingConfig {
    /// 初始化日志系统
    ///
    /// 支持通过环境变量配置：
    /// - RUST_LOG: 设置日志级别（error, warn, info, debug, trace）
    /// - ASSISTFLOW_DEBUG: 启用详细调试输出（原始输出行、文件与行号）
    ///
    /// 重复调用不会 panic，已安装的 subscriber 保持不变。
    ///
    /// ```no_run
    /// use assistflow::utils::LoggingConfig;
    ///
    /// LoggingConfig::init();
    /// tracing::info!("ready");
    /// ```
    pub fn init() {
        let is_debug = Self::is_debug();

        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => {
                if is_debug {
                    EnvFilter::new("assistflow=debug,info")
                } else {
                    EnvFilter::new("assistflow=info,warn")
                }
            }
        };

        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(is_debug)
            .with_file(is_debug)
            .with_line_number(is_debug)
            .with_thread_ids(is_debug);

        let installed = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .is_ok();

        if installed && is_debug {
            tracing::debug!("调试模式已启用");
        }
    }

    /// 初始化日志系统（带自定义过滤器）
    pub fn init_with_filter(filter: &str) {
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::new(filter))
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init();
    }

    /// 检查是否启用调试模式
    pub fn is_debug() -> bool {
        env::var(DEBUG_ENV).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_debug() {
        env::remove_var(DEBUG_ENV);
        assert!(!LoggingConfig::is_debug());

        env::set_var(DEBUG_ENV, "1");
        assert!(LoggingConfig::is_debug());

        env::remove_var(DEBUG_ENV);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        LoggingConfig::init_with_filter("assistflow=warn");
        LoggingConfig::init();
    }
}
