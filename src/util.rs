use std::time::{SystemTime, UNIX_EPOCH};

#[inline]
pub(crate) fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
        })
}

/// Random local identifier such as `session-6f1c…`. Used for provisional
/// sessions and attachments before the server assigns anything.
pub(crate) fn generate_local_id(prefix: &str) -> String {
    let uuid = uuid::Uuid::from_u128(fastrand::u128(..));
    let mut out = String::with_capacity(prefix.len() + 33);
    out.push_str(prefix);
    out.push('-');
    out.push_str(&uuid.simple().to_string());
    out
}
