/// Competition persistence backends.
pub mod competition_store;
/// Persisted entity definitions.
pub mod models;
/// Storage abstraction layer for database operations.
pub mod storage;
