pub mod config;
pub mod error;
pub mod flow;
pub mod id;
pub mod secrets;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{FlowsmithError, Result};
pub use flow::*;
pub use id::EntityId;
pub use types::*;
