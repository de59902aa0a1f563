/*
[INPUT]:  Exchange schema definitions and serde requirements
[OUTPUT]: Typed Rust structs/enums shared by the REST and stream layers
[POS]:    Data layer - type definitions
[UPDATE]: When schemas change or new types added
*/

pub mod enums;
pub mod models;
pub mod stream;

pub use enums::*;
pub use models::*;
pub use stream::{StreamKind, StreamName};
