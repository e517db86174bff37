pub mod config;
pub mod event;
pub mod source;

pub use config::*;
pub use event::*;
pub use source::*;
