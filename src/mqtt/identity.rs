use uuid::Uuid;

/// Build a client id from the configured prefix and a 32-digit lowercase hex suffix.
///
/// A fresh suffix is drawn on every call so that reconnects and publish
/// connections never reuse an id the broker may still hold.
pub fn generate_client_id(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4().simple())
}
