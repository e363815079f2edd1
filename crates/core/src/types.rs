/// Jobs are identified by opaque random UUIDs.
pub type JobId = uuid::Uuid;

/// Owning identity as issued by the external account service.
pub type OwnerId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
