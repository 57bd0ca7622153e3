pub mod entities;
pub mod errors;
pub mod filters;
pub mod ports;
pub mod serialization;
pub mod services;
pub mod translator;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use filters::*;
pub use ports::*;
pub use serialization::*;
pub use services::*;
pub use translator::*;
pub use value_objects::*;
