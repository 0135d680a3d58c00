use time::OffsetDateTime;
use uuid::Uuid;

/// Lowercase hex of the Unix timestamp in seconds.
///
/// Two links created within the same second get the same id; callers resolve
/// that with [`salted_id`].
#[must_use]
pub fn new_id(now: OffsetDateTime) -> String {
    format!("{:x}", now.unix_timestamp())
}

/// `base` followed by four random hex digits, for retrying after a collision.
#[must_use]
pub fn salted_id(base: &str) -> String {
    let salt = Uuid::new_v4().as_u128() & 0xffff;
    format!("{base}{salt:04x}")
}
