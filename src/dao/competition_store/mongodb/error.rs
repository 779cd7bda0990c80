use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for MongoDB backend operations.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures of the MongoDB backend.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// A required environment variable is not set.
    #[error("missing environment variable `{var}`")]
    MissingEnvVar {
        /// Variable name.
        var: &'static str,
    },
    /// The connection string could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// Offending URI.
        uri: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The driver refused the client options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The server never answered during connection.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// Attempts made.
        attempts: u32,
        /// Last driver error.
        #[source]
        source: MongoError,
    },
    /// Periodic ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Index creation failed.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        /// Collection name.
        collection: &'static str,
        /// Index keys.
        index: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Upsert failed.
    #[error("failed to save competition `{id}`")]
    SaveCompetition {
        /// Competition id.
        id: Uuid,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Lookup failed.
    #[error("failed to load competition `{id}`")]
    LoadCompetition {
        /// Competition id.
        id: Uuid,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Collection scan failed.
    #[error("failed to list competitions")]
    ListCompetitions {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Appending to the submission log failed.
    #[error("failed to log a submission for competition `{id}`")]
    AppendSubmission {
        /// Competition id.
        id: Uuid,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Reading the submission log failed.
    #[error("failed to list submissions of competition `{id}`")]
    ListSubmissions {
        /// Competition id.
        id: Uuid,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A query value could not be encoded to BSON.
    #[error("failed to encode query: {reason}")]
    Encode {
        /// Encoder message.
        reason: String,
    },
    /// A document does not describe a valid competition.
    #[error("competition document `{id}` is corrupt: {reason}")]
    CorruptDocument {
        /// Document `_id`.
        id: String,
        /// What was wrong with it.
        reason: String,
    },
}
