//! See [`ProtocolVersion`].

use std::fmt;

use crate::header::Wire;

/// Protocol version advertised by an endpoint in its probe packets.
///
/// Two connected endpoints may run different library builds, so each side
/// advertises its own version and both settle on the lower of the two via
/// [`ProtocolVersion::negotiate`]. The comparison is lexicographic:
/// `version` dominates `major`, which dominates `probe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    /// Framing protocol version. Selects the wire layout of data packets.
    pub version: u8,
    /// Major revision within a framing version.
    pub major: u8,
    /// Probe protocol revision.
    pub probe: u8,
}

impl ProtocolVersion {
    /// Version 1 framing as originally shipped.
    pub const V1: Self = Self {
        version: 1,
        major: 0,
        probe: 0,
    };

    /// Current version 2 framing: 16-bit payload numbers, per-endpoint
    /// packet ids, and transmit start timestamps.
    pub const V2: Self = Self {
        version: 2,
        major: 0,
        probe: 1,
    };

    /// Settles on the version both endpoints support: the component-wise
    /// minimum of ours and the remote's, with `version` dominating `major`
    /// dominating `probe`.
    #[must_use]
    pub fn negotiate(self, remote: Self) -> Self {
        self.min(remote)
    }

    /// The largest payload number representable under this version's
    /// framing. Payload numbers wrap to 0 past this value.
    #[must_use]
    pub const fn payload_num_max(self) -> u16 {
        if self.version >= 2 {
            u16::MAX
        } else {
            u8::MAX as u16
        }
    }

    /// The framing codec for this version.
    #[must_use]
    pub const fn wire(self) -> Wire {
        if self.version >= 2 {
            Wire::V2
        } else {
            Wire::V1
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.version, self.major, self.probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_picks_lower() {
        assert_eq!(
            ProtocolVersion::V1,
            ProtocolVersion::V1.negotiate(ProtocolVersion::V2)
        );
        assert_eq!(
            ProtocolVersion::V1,
            ProtocolVersion::V2.negotiate(ProtocolVersion::V1)
        );
        assert_eq!(
            ProtocolVersion::V2,
            ProtocolVersion::V2.negotiate(ProtocolVersion::V2)
        );
    }

    #[test]
    fn negotiate_is_lexicographic() {
        let a = ProtocolVersion {
            version: 2,
            major: 1,
            probe: 0,
        };
        let b = ProtocolVersion {
            version: 2,
            major: 0,
            probe: 5,
        };
        // major dominates probe
        assert_eq!(b, a.negotiate(b));
    }

    #[test]
    fn payload_num_max() {
        assert_eq!(255, ProtocolVersion::V1.payload_num_max());
        assert_eq!(65535, ProtocolVersion::V2.payload_num_max());
    }
}
