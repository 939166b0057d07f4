//! Wraparound arithmetic over the 16-bit sequence space.
//!
//! Sequence numbers live in `0..=65535` and wrap silently.  Ordering is not
//! plain integer ordering: two values are compared by the sign of their
//! difference in a wider signed space, and a gap larger than half the space
//! is taken as evidence that one side has wrapped.
//!
//! The comparison is only meaningful while the two values are less than half
//! the space apart.  Window sizes are validated against [`MAX_WINDOW`] so the
//! engines never compare values further apart than that.

/// Half the sequence space.  A signed difference beyond this means wraparound.
const HALF_SPACE: i32 = (u16::MAX / 2) as i32 + 1;

/// Largest window either engine may use while keeping [`greater`] transitive.
pub const MAX_WINDOW: u16 = u16::MAX / 2;

/// `true` iff `a` follows `b` in wraparound order.
///
/// ```
/// use stp::seq::greater;
/// assert!(greater(10, 5));
/// assert!(greater(15, 65_530)); // 15 has wrapped past 65530
/// assert!(!greater(7, 7));
/// ```
#[inline]
pub fn greater(a: u16, b: u16) -> bool {
    let (a, b) = (i32::from(a), i32::from(b));
    if a - b > HALF_SPACE {
        // `b` wrapped; it is the later value.
        false
    } else if b - a > HALF_SPACE {
        true
    } else {
        a > b
    }
}

/// `true` iff `a` precedes or equals `b` in wraparound order.
#[inline]
pub fn less_or_equal(a: u16, b: u16) -> bool {
    !greater(a, b)
}

/// Modular addition: `a + n` in the 16-bit space.
#[inline]
pub fn plus(a: u16, n: u16) -> u16 {
    a.wrapping_add(n)
}

/// Modular subtraction: `a - n` in the 16-bit space.
///
/// Used for distances such as `LBReceived - LBRead`, where the caller knows
/// the first operand does not precede the second.
#[inline]
pub fn minus(a: u16, n: u16) -> u16 {
    a.wrapping_sub(n)
}

/// Sequence number one past the last byte of a segment starting at `seq`.
#[inline]
pub fn segment_end(seq: u16, len: usize) -> u16 {
    plus(seq, len as u16)
}
