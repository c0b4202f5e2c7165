use uuid::Uuid;

/// Time-ordered identifiers keep inserts append-only in the primary key index.
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}
