use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 对话窗口中的一轮
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
    /// 开发者自言自语，不期待回复
    #[serde(default)]
    pub solo: bool,
}

impl ConversationTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            solo: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn solo(mut self) -> Self {
        self.solo = true;
        self
    }
}

/// 会话存储端口
///
/// 取消标记按 chat id 存放，编排器在每次尝试开始和取消后各清除一次。
#[async_trait]
pub trait SessionPort: Send + Sync {
    async fn conversation_window(&self, chat_id: i64) -> Result<Vec<ConversationTurn>>;

    fn is_cancelled(&self, chat_id: i64) -> bool;

    fn clear_cancelled(&self, chat_id: i64);

    async fn set_pending_question(&self, session_id: i64, question: &str) -> Result<()>;

    async fn append_turn(&self, chat_id: i64, turn: ConversationTurn) -> Result<()>;
}
