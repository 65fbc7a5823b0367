//! TCP sequence number comparisons.

/// `a` comes before `b` in sequence space: the distance from `a` to `b`,
/// read as a signed 32-bit value, is positive. Holds across the wrap.
///
/// ```
/// use tinywire::tcp::is_seq_lt;
/// assert!(is_seq_lt(100, 200));
/// assert!(is_seq_lt(u32::MAX - 5, 10));
/// assert!(!is_seq_lt(200, 100));
/// ```
pub fn is_seq_lt(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) > 0
}

/// `a` is `b` or comes before it.
///
/// ```
/// use tinywire::tcp::is_seq_lte;
/// assert!(is_seq_lte(100, 100));
/// assert!(is_seq_lte(4_294_967_290, 10));
/// assert!(!is_seq_lte(200, 100));
/// ```
pub fn is_seq_lte(a: u32, b: u32) -> bool {
    a == b || is_seq_lt(a, b)
}

/// Move `current` forward to `next`; a value behind `current` is ignored.
pub fn advance(current: &mut u32, next: u32) {
    if is_seq_lte(*current, next) {
        *current = next;
    }
}
