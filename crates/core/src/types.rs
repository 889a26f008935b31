/// Primary key type for all database entities (BIGSERIAL).
pub type DbId = i64;

/// Timestamp type used across all entities (TIMESTAMPTZ).
pub type Timestamp = chrono::DateTime<chrono::Utc>;
