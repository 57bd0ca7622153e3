pub mod config;
pub mod kafka;
pub mod memory;
pub mod registry;

pub use config::*;
pub use kafka::*;
pub use memory::*;
pub use registry::*;
