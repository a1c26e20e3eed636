#![forbid(unsafe_code)]

mod config;
mod data_plane;
mod error;
mod orchestrator;
mod state;

pub use config::*;
pub use cutover_store::*;
pub use data_plane::*;
pub use error::*;
pub use orchestrator::*;
pub use state::*;
