pub mod debug;
pub mod proxy;
