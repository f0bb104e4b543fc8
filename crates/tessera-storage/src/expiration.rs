//! Overflow-safe expiry arithmetic for expiring cells.

use crate::cell::NO_DELETION_TIME;

/// Largest representable deletion second. `NO_DELETION_TIME` itself is
/// reserved to mean "never deleted".
pub const MAX_DELETION_TIME: i32 = NO_DELETION_TIME - 1;

/// Local expiration second for a cell written at `now_in_sec` with `ttl`
/// seconds to live. Saturates at `MAX_DELETION_TIME` so an oversized ttl can
/// never wrap into the past or collide with the "never deleted" sentinel.
pub fn compute_local_expiration_time(now_in_sec: i32, ttl: i32) -> i32 {
    match now_in_sec.checked_add(ttl) {
        Some(t) if t <= MAX_DELETION_TIME => t,
        _ => MAX_DELETION_TIME,
    }
}
