use std::time::{Duration, SystemTime};

/// A descriptor is settled once it has been untouched for strictly longer
/// than `settle`. A modification time in the future (clock skew between the
/// uploading host and this one) counts as not settled.
pub fn is_settled(modified: SystemTime, now: SystemTime, settle: Duration) -> bool {
    match now.duration_since(modified) {
        Ok(age) => age > settle,
        Err(_) => false,
    }
}
