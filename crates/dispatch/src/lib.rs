//! Pattern dispatch: bindings, wildcard masks, permission and cooldown
//! gates, and the engine that routes events to handlers.

pub mod binding;
pub mod cooldown;
pub mod engine;
pub mod error;
pub mod handler;
pub mod mask;
pub mod registry;

pub use binding::{Binding, BindingId, BindingInfo, BindingScope, FanPolicy};
pub use cooldown::CooldownMap;
pub use engine::{DispatchEngine, DispatchStats, DispatchStatsSnapshot};
pub use error::DispatchError;
pub use handler::{Handler, HandlerError};
pub use mask::Mask;
pub use registry::BindingRegistry;
