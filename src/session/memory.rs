use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::port::{ConversationTurn, SessionPort};
use crate::error::Result;

#[derive(Default)]
struct SessionState {
    windows: HashMap<i64, Vec<ConversationTurn>>,
    cancelled: HashSet<i64>,
    questions: HashMap<i64, String>,
}

/// 内存会话存储
#[derive(Default)]
pub struct MemorySessionStore {
    inner: RwLock<SessionState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(self, chat_id: i64, turns: Vec<ConversationTurn>) -> Self {
        self.inner.write().windows.insert(chat_id, turns);
        self
    }

    /// 请求取消该会话当前的调用
    pub fn cancel(&self, chat_id: i64) {
        self.inner.write().cancelled.insert(chat_id);
    }

    pub fn pending_question(&self, session_id: i64) -> Option<String> {
        self.inner.read().questions.get(&session_id).cloned()
    }

    pub fn take_pending_question(&self, session_id: i64) -> Option<String> {
        self.inner.write().questions.remove(&session_id)
    }

    pub fn clear_window(&self, chat_id: i64) {
        self.inner.write().windows.remove(&chat_id);
    }
}

#[async_trait]
impl SessionPort for MemorySessionStore {
    async fn conversation_window(&self, chat_id: i64) -> Result<Vec<ConversationTurn>> {
        Ok(self
            .inner
            .read()
            .windows
            .get(&chat_id)
            .cloned()
            .unwrap_or_default())
    }

    fn is_cancelled(&self, chat_id: i64) -> bool {
        self.inner.read().cancelled.contains(&chat_id)
    }

    fn clear_cancelled(&self, chat_id: i64) {
        self.inner.write().cancelled.remove(&chat_id);
    }

    async fn set_pending_question(&self, session_id: i64, question: &str) -> Result<()> {
        self.inner
            .write()
            .questions
            .insert(session_id, question.to_string());
        Ok(())
    }

    async fn append_turn(&self, chat_id: i64, turn: ConversationTurn) -> Result<()> {
        self.inner
            .write()
            .windows
            .entry(chat_id)
            .or_default()
            .push(turn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_window_and_turns() {
        let store = MemorySessionStore::new().with_window(1, vec![ConversationTurn::user("hi")]);
        store
            .append_turn(1, ConversationTurn::assistant("hello"))
            .await
            .unwrap();
        let window = store.conversation_window(1).await.unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[1].role, "assistant");
        assert!(store.conversation_window(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_flag_is_one_shot() {
        let store = MemorySessionStore::new();
        store.cancel(7);
        assert!(store.is_cancelled(7));
        assert!(!store.is_cancelled(8));
        store.clear_cancelled(7);
        assert!(!store.is_cancelled(7));
    }

    #[tokio::test]
    async fn test_pending_question() {
        let store = MemorySessionStore::new();
        store.set_pending_question(3, "Proceed?").await.unwrap();
        assert_eq!(store.pending_question(3).as_deref(), Some("Proceed?"));
        assert_eq!(store.take_pending_question(3).as_deref(), Some("Proceed?"));
        assert!(store.pending_question(3).is_none());
    }
}
