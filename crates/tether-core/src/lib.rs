pub mod actions;
pub mod approval;
pub mod config;
pub mod conversation;
pub mod dedup;
pub mod error;
pub mod event;
pub mod normalize;
pub mod persistence;
pub mod reducer;
pub mod state;
pub mod stream;
pub mod subscription;

pub use actions::*;
pub use reducer::*;
pub use state::*;

pub use error::TetherError;
pub use persistence::*;
