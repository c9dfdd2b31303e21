pub mod config;
pub mod error;
pub mod formats;
pub mod handlers;
pub mod locator;
pub mod manager;
pub mod query;
pub mod registry;
pub mod types;

pub use config::{Config, QueryConfig};
pub use error::{Error, Result};
