pub mod env;
pub mod stream;

pub use env::EnvConfig;
pub use stream::{HeartbeatConfig, StreamConfig};
