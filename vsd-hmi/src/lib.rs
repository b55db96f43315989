mod shutdown;

pub mod catalog;
pub mod engine;
pub mod gateway;

mod error;
pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;
