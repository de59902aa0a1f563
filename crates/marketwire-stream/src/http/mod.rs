/*
[INPUT]:  HTTP client configuration and public REST endpoints
[OUTPUT]: Typed snapshot results and the crate error type
[POS]:    HTTP layer - REST API communication
[UPDATE]: When adding new endpoints or changing client behavior
*/

pub mod client;
pub mod error;
pub mod public;

pub use error::{MarketwireError, Result};

pub use client::{ClientConfig, DEFAULT_REST_URL, MarketClient};
