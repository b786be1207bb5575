/// Rounds the given size up to the next multiple of the 8-byte block
/// granularity.
///
/// Every block the allocator manages is a multiple of 8 bytes, so this
/// macro is applied to every size on its way into the heap.
///
/// # Examples
///
/// ```rust
/// assert_eq!(rmalloc::align!(1), 8);
/// assert_eq!(rmalloc::align!(8), 8);
/// assert_eq!(rmalloc::align!(13), 16);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::tag::DSIZE - 1) & !($crate::tag::DSIZE - 1)
  };
}

#[cfg(test)]
mod tests {
  use crate::tag::DSIZE;

  #[test]
  fn test_align() {
    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (DSIZE * i + 1)..=(DSIZE * (i + 1));

      let expected_alignment = DSIZE * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size));
      }
    }
  }

  #[test]
  fn zero_stays_zero() {
    assert_eq!(0, align!(0usize));
  }
}
