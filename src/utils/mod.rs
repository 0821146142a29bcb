/// 工具模块 - 日志初始化与文本处理
pub mod logging;
pub mod text;

pub use logging::LoggingConfig;
pub use text::{detect_question, head_chars, strip_ansi, tail_chars};
