//! Capacity growth policies for [`crate::GcVector`].
//!
//! A policy maps a required element count to the capacity to reserve. All
//! policies return at least `required`; a policy that over-allocates
//! geometrically keeps repeated pushes amortized O(1).

/// Computes the capacity reserved when a vector must hold `required`
/// elements and currently has room for `current`.
pub trait GrowthPolicy {
    /// Capacity to allocate. Must be `>= required`.
    fn reserved_capacity(current: usize, required: usize) -> usize;
}

/// Reserve exactly what is asked for.
#[derive(Debug, Clone, Copy, Default)]
pub struct FitExact;

impl GrowthPolicy for FitExact {
    #[inline]
    fn reserved_capacity(_current: usize, required: usize) -> usize {
        required
    }
}

/// Round up to the next power of two.
#[derive(Debug, Clone, Copy, Default)]
pub struct Log2;

impl GrowthPolicy for Log2 {
    #[inline]
    fn reserved_capacity(_current: usize, required: usize) -> usize {
        if required == 0 {
            0
        } else {
            required.next_power_of_two()
        }
    }
}

/// Grow by `P` percent over the required size.
#[derive(Debug, Clone, Copy, Default)]
pub struct Percent<const P: usize>;

impl<const P: usize> GrowthPolicy for Percent<P> {
    #[inline]
    fn reserved_capacity(_current: usize, required: usize) -> usize {
        percent_capacity(required, P)
    }
}

/// Grow by `P` percent, but never more than `GAP` elements past the
/// required size.
#[derive(Debug, Clone, Copy, Default)]
pub struct PercentWithGap<const P: usize, const GAP: usize>;

impl<const P: usize, const GAP: usize> GrowthPolicy for PercentWithGap<P, GAP> {
    #[inline]
    fn reserved_capacity(_current: usize, required: usize) -> usize {
        percent_capacity(required, P).min(required.saturating_add(GAP))
    }
}

/// `required` grown by `percent` percent, rounded down but never below
/// `required`.
#[inline]
pub fn percent_capacity(required: usize, percent: usize) -> usize {
    let grown = required.saturating_mul(100 + percent) / 100;
    grown.max(required)
}
