mod config;
mod connection;
mod error;
mod models;
/// MongoDB-backed [`RoundStore`](crate::dao::round_store::RoundStore).
pub mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoRoundStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::DuplicateRound { id } => StorageError::Duplicate { key: id },
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
