//! Persistence for tracks, duration resolutions, provider sources and the
//! bulk worker progress snapshot.

mod models;
mod schema;
mod store;
mod trait_def;

pub use models::*;
pub use schema::DURATION_VERSIONED_SCHEMAS;
pub use store::SqliteDurationStore;
pub use trait_def::DurationStore;
