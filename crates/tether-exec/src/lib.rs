pub mod bridge;
pub mod codex;
pub mod contracts;
pub mod discovery;
pub mod error;
pub mod rollout;

pub use bridge::*;
pub use codex::*;
pub use contracts::*;
pub use error::BackendError;
