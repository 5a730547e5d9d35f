/// Rounds `$value` up to the next multiple of `$n`.
///
/// # Examples
///
/// ```rust
/// use segalloc::round_up;
///
/// assert_eq!(round_up!(24, 16), 32);
/// assert_eq!(round_up!(32, 16), 32);
/// assert_eq!(round_up!(1, 16), 16);
/// ```
#[macro_export]
macro_rules! round_up {
  ($value:expr, $n:expr) => {
    (($value) + ($n) - 1) / ($n) * ($n)
  };
}

/// Rounds `$value` up to the double-word block grid (16 bytes).
///
/// Every block size the allocator produces goes through this macro, which is
/// what keeps the low 4 bits of each size free for the header status bits.
///
/// # Examples
///
/// ```rust
/// use segalloc::align;
///
/// assert_eq!(align!(8), 16);
/// assert_eq!(align!(17), 32);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::round_up!($value, $crate::header::DSIZE)
  };
}
