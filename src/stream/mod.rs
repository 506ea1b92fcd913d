pub mod api;
pub mod controller;
pub mod metadata;

pub use api::{HttpStreamApi, StreamEndpoints};
pub use controller::{MetadataOutcome, StreamSession, StreamingController};
pub use metadata::MetadataSnapshot;
