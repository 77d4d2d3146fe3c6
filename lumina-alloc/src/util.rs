//! Alignment and granularity helpers.

use crate::request::SuballocationType;

/// Round `value` up to a multiple of `alignment`.
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Round `value` down to a multiple of `alignment`.
#[inline]
pub const fn align_down(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value / alignment * alignment
}

/// Whether the last byte of `[a_offset, a_offset + a_size)` and the first
/// byte at `b_offset` fall on the same `page_size` page.
///
/// `a` must end at or before `b_offset`.
#[inline]
pub const fn blocks_on_same_page(a_offset: u64, a_size: u64, b_offset: u64, page_size: u64) -> bool {
    let a_end = a_offset + a_size - 1;
    let a_end_page = a_end & !(page_size - 1);
    let b_start_page = b_offset & !(page_size - 1);
    a_end_page == b_start_page
}

/// Whether two resource kinds may not share a granularity page.
pub fn has_granularity_conflict(a: SuballocationType, b: SuballocationType) -> bool {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    match lo {
        SuballocationType::Free => false,
        SuballocationType::Unknown => true,
        SuballocationType::Buffer => matches!(
            hi,
            SuballocationType::ImageUnknown | SuballocationType::ImageOptimal
        ),
        SuballocationType::ImageUnknown => matches!(
            hi,
            SuballocationType::ImageUnknown
                | SuballocationType::ImageLinear
                | SuballocationType::ImageOptimal
        ),
        SuballocationType::ImageLinear => hi == SuballocationType::ImageOptimal,
        SuballocationType::ImageOptimal => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(300, 0), 300);
        assert_eq!(align_up(100, 96), 192);
        assert_eq!(align_down(511, 256), 256);
        assert_eq!(align_down(7, 1), 7);
    }

    #[test]
    fn test_same_page() {
        assert!(blocks_on_same_page(0, 100, 200, 1024));
        assert!(!blocks_on_same_page(0, 1024, 1024, 1024));
        assert!(blocks_on_same_page(1000, 30, 1029, 1024));
    }

    #[test]
    fn test_granularity_conflicts() {
        use SuballocationType::*;

        assert!(!has_granularity_conflict(Free, Unknown));
        assert!(has_granularity_conflict(Unknown, Buffer));
        assert!(has_granularity_conflict(Buffer, ImageOptimal));
        assert!(has_granularity_conflict(ImageOptimal, Buffer));
        assert!(!has_granularity_conflict(Buffer, Buffer));
        assert!(!has_granularity_conflict(Buffer, ImageLinear));
        assert!(has_granularity_conflict(ImageLinear, ImageOptimal));
        assert!(!has_granularity_conflict(ImageOptimal, ImageOptimal));
    }
}
