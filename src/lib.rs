pub mod chat;
pub mod config;
pub mod emit;
pub mod error;
pub mod gateway;
pub mod image;
pub mod normalize;
pub mod provider;
pub mod session;

pub use chat::{CanonicalDelta, ChatRequest, HistoryMessage, Role};
pub use config::{Config, ModelRegistry, ProviderConfig, ProviderFlags};
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use session::SessionStore;
