use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;

/// Result of a MongoDB store operation.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

const DUPLICATE_KEY_CODE: i32 = 11000;

/// Failures of the MongoDB round store, tagged with the operation.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// The connection string could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// Connection string as given.
        uri: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Client options were rejected.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The server never answered during startup.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// Pings tried before giving up.
        attempts: u32,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A periodic health ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Index creation failed.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        /// Target collection.
        collection: &'static str,
        /// Index name.
        index: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A round with the same id exists.
    #[error("round `{id}` already exists")]
    DuplicateRound {
        /// Round identifier.
        id: String,
    },
    /// Inserting a round failed.
    #[error("failed to create round `{id}`")]
    CreateRound {
        /// Round identifier.
        id: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Reading a round or its scores failed.
    #[error("failed to load round `{id}`")]
    LoadRound {
        /// Round identifier.
        id: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Listing rounds failed.
    #[error("failed to list rounds")]
    ListRounds {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Updating a round total failed.
    #[error("failed to update round `{id}`")]
    UpdateRound {
        /// Round identifier.
        id: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Upserting a score row failed.
    #[error("failed to save score of `{user_id}` in round `{round_id}`")]
    SaveScore {
        /// Round identifier.
        round_id: String,
        /// Participant identifier.
        user_id: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Removing a round failed.
    #[error("failed to delete round `{id}`")]
    DeleteRound {
        /// Round identifier.
        id: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
}

/// Whether `err` is a unique index violation.
pub fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY_CODE
    )
}
