pub mod api;
pub mod error;
pub mod models;

pub use error::{CommonError, CommonResult};
pub use models::{estimate_tokens, ChatMessage, ChatSettings, MessageMetadata, Role, Turn};
