// 会话协作方：对话窗口、取消标记、待回答问题

mod memory;
mod port;

pub use memory::MemorySessionStore;
pub use port::{ConversationTurn, SessionPort};
