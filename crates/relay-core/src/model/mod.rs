pub mod error;
pub mod event;
pub mod route;

pub use error::GatewayError;
pub use event::{EventType, GatewayEvent};
pub use route::*;
