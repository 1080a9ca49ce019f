//! See [`Seq`].

use std::{
    cmp::Ordering,
    fmt,
    ops::{Add, AddAssign, Sub, SubAssign},
};

/// Sequence number identifying an item sent across the network.
///
/// The same type covers both per-payload packet sequence numbers and
/// per-endpoint payload numbers. The number is stored as a [`u16`], which
/// wraps around quickly at media packet rates, so users must compare
/// values with the custom [`Seq::cmp`] implementation which takes
/// wraparound into consideration.
///
/// The sequence number can be visualized as an infinite number line, where
/// [`u16::MAX`] is right before `0`, `0` is before `1`, etc.:
///
/// ```text
///     65534  65535    0      1      2
/// ... --|------|------|------|------|-- ...
/// ```
///
/// [Addition](std::ops::Add) and [subtraction](std::ops::Sub) always wrap.
///
/// Note that the v1 framing carries payload numbers as 8 bits; the codec
/// masks values accordingly, while this type stays 16-bit everywhere else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Seq(pub u16);

impl Seq {
    /// Sequence number with value [`u16::MAX`].
    pub const MAX: Self = Self(u16::MAX);

    /// Gets a signed number of sequence values "elapsed" between `self` and
    /// `rhs`, taking wraparound into account.
    ///
    /// This is effectively `rhs - self` along the smallest path around the
    /// number circle.
    ///
    /// # Example
    ///
    /// ```
    /// # use framelink_proto::seq::Seq;
    /// assert_eq!(Seq(0).dist_to(Seq(5)), 5);
    /// assert_eq!(Seq(2).dist_to(Seq(0)), -2);
    /// assert_eq!(Seq::MAX.dist_to(Seq(0)), 1);
    /// assert_eq!(Seq(0).dist_to(Seq::MAX), -1);
    /// ```
    #[must_use]
    pub const fn dist_to(self, rhs: Self) -> i16 {
        #[allow(clippy::cast_possible_wrap)] // that's exactly what we want
        (rhs.0.wrapping_sub(self.0) as i16)
    }

    /// The sequence number one after `self`, wrapping within the given
    /// inclusive maximum.
    ///
    /// Payload numbers wrap at the negotiated
    /// [`payload_num_max`](crate::ProtocolVersion::payload_num_max) rather
    /// than at [`u16::MAX`] under v1 framing.
    #[must_use]
    pub const fn next_wrapping(self, max: u16) -> Self {
        if self.0 >= max {
            Self(0)
        } else {
            Self(self.0 + 1)
        }
    }
}

impl Ord for Seq {
    /// Logically compares `self` to `other` in a way that respects
    /// wraparound, treating e.g. `0 cmp 1` as [`Less`] (as expected), but
    /// `0 cmp 65535` as [`Greater`].
    ///
    /// If the two values compared have a real difference equal to or larger
    /// than `u16::MAX / 2`, no guarantees are upheld.
    ///
    /// [`Greater`]: Ordering::Greater
    /// [`Less`]: Ordering::Less
    fn cmp(&self, other: &Self) -> Ordering {
        let s1 = self.0;
        let s2 = other.0;
        #[allow(clippy::cast_possible_wrap)] // that's exactly what we want
        (s1 as i16).wrapping_sub(s2 as i16).cmp(&0)
    }
}

impl PartialOrd for Seq {
    /// See [`Seq::cmp`].
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add<Seq> for Seq {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Seq {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub<Seq> for Seq {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl SubAssign for Seq {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl From<u16> for Seq {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<Seq> for u16 {
    fn from(value: Seq) -> Self {
        value.0
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increasing_wraparound() {
        assert!(Seq(0) < Seq(1));
        assert!(Seq(1) < Seq(2));
        assert!(Seq(u16::MAX - 1) < Seq(u16::MAX));
        assert!(Seq(u16::MAX) < Seq(0));
        assert!(Seq(u16::MAX) < Seq(2));
        assert!(Seq(u16::MAX - 3) < Seq(2));

        // we explicitly don't test what happens when the difference is
        // around u16::MAX / 2, since no behaviour is guaranteed there
    }

    #[test]
    fn dist() {
        assert_eq!(Seq(0).dist_to(Seq(0)), 0);
        assert_eq!(Seq(3).dist_to(Seq(5)), 2);
        assert_eq!(Seq(1).dist_to(Seq(0)), -1);
        assert_eq!((Seq::MAX - Seq(3)).dist_to(Seq(0)), 4);
    }

    #[test]
    fn wrap_at_payload_max() {
        assert_eq!(Seq(254).next_wrapping(255), Seq(255));
        assert_eq!(Seq(255).next_wrapping(255), Seq(0));
        assert_eq!(Seq(0).next_wrapping(255), Seq(1));
        assert_eq!(Seq(u16::MAX).next_wrapping(u16::MAX), Seq(0));
    }
}
