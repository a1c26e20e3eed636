#![forbid(unsafe_code)]

mod engine;
mod error;
mod event;
mod record;
mod store;

pub use engine::*;
pub use error::*;
pub use event::*;
pub use record::*;
pub use store::*;
