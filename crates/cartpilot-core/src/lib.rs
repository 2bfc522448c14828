//! `cartpilot-core` — identifiers, configuration and the top-level error type
//! shared by every crate in the workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::CartpilotConfig;
pub use error::{CartpilotError, Result};
pub use types::{AddressId, ProductId, RuleId, UserId};
