// src/store/keys.rs
// Logical key scheme shared by every component. Keep the prefixes stable: they
// are the only contract between collector processes sharing one store.

pub const POOL_PREFIX: &str = "pool:";
pub const META_SUFFIX: &str = ":meta";
pub const SCOPED_PREFIX: &str = "scoped:";
pub const DEDUP_PREFIX: &str = "dedup:";
pub const QUEUE_PREFIX: &str = "queue:";
pub const QUEUE_DATA_PREFIX: &str = "queue_data:";

pub fn pool(source_type: &str) -> String {
    format!("{POOL_PREFIX}{source_type}")
}

pub fn pool_meta(source_type: &str) -> String {
    format!("{POOL_PREFIX}{source_type}{META_SUFFIX}")
}

pub fn scoped(source_type: &str, signature: &str) -> String {
    format!("{SCOPED_PREFIX}{source_type}:{signature}")
}

pub fn dedup(consumer_id: &str, hash: &str) -> String {
    format!("{DEDUP_PREFIX}{consumer_id}:{hash}")
}

pub fn queue(consumer_id: &str) -> String {
    format!("{QUEUE_PREFIX}{consumer_id}")
}

pub fn queue_data(consumer_id: &str, hash: &str) -> String {
    format!("{QUEUE_DATA_PREFIX}{consumer_id}:{hash}")
}
