pub mod channels;
pub mod database;
pub mod error;
pub mod schema;

pub use channels::{ChannelSessionRepo, ChannelSessionRow};
pub use database::Database;
pub use error::StoreError;
