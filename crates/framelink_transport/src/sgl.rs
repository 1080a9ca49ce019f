//! See [`Sgl`].

use bytes::Bytes;

/// Scatter-gather list: an ordered sequence of byte fragments with a
/// cached total length.
///
/// This is the universal data container of the engine. A transmit payload
/// is an `Sgl` over the application's buffers; a received payload is an
/// `Sgl` over slices of the adapter's receive buffers. Fragments are
/// [`Bytes`] handles, so appending, splicing and slicing never copy
/// payload data, and dropping the list releases the underlying buffers
/// back to wherever they came from.
///
/// Invariant: the cached total always equals the sum of fragment lengths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sgl {
    entries: Vec<Bytes>,
    total_len: usize,
}

/// A [`Sgl::gather`] range fell outside the list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("gather of {count} bytes at offset {offset} out of bounds - list holds {len}")]
pub struct GatherOutOfBounds {
    /// Requested start offset.
    pub offset: usize,
    /// Requested byte count.
    pub count: usize,
    /// Total bytes in the list.
    pub len: usize,
}

impl Sgl {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            total_len: 0,
        }
    }

    /// Creates a list over a single fragment.
    #[must_use]
    pub fn from_fragment(fragment: Bytes) -> Self {
        let mut sgl = Self::new();
        sgl.append(fragment);
        sgl
    }

    /// Total bytes across all fragments.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.total_len
    }

    /// Whether the list holds no bytes.
    ///
    /// A list of empty fragments counts as empty; a zero-length payload is
    /// still a valid payload.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    /// Number of fragments in the list.
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.entries.len()
    }

    /// The fragments in byte order.
    #[must_use]
    pub fn fragments(&self) -> &[Bytes] {
        &self.entries
    }

    /// Appends a fragment at the tail.
    pub fn append(&mut self, fragment: Bytes) {
        self.total_len += fragment.len();
        self.entries.push(fragment);
    }

    /// Inserts a fragment at the head.
    pub fn prepend(&mut self, fragment: Bytes) {
        self.total_len += fragment.len();
        self.entries.insert(0, fragment);
    }

    /// Splices every fragment of `other` onto this list's tail, leaving
    /// `other` empty but with its allocation intact.
    pub fn extend_from(&mut self, other: &mut Self) {
        self.total_len += other.total_len;
        self.entries.append(&mut other.entries);
        other.total_len = 0;
    }

    /// Drops all fragments, keeping the entry allocation for reuse.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_len = 0;
    }

    /// Copies `dest.len()` bytes starting at byte `offset` of the list
    /// into `dest`, returning the number of bytes copied.
    ///
    /// # Errors
    ///
    /// Errors if the requested range extends past the end of the list.
    pub fn gather(&self, offset: usize, dest: &mut [u8]) -> Result<usize, GatherOutOfBounds> {
        let count = dest.len();
        if offset + count > self.total_len {
            return Err(GatherOutOfBounds {
                offset,
                count,
                len: self.total_len,
            });
        }

        let mut skip = offset;
        let mut copied = 0;
        for entry in &self.entries {
            if skip >= entry.len() {
                skip -= entry.len();
                continue;
            }
            let take = (entry.len() - skip).min(count - copied);
            dest[copied..copied + take].copy_from_slice(&entry[skip..skip + take]);
            copied += take;
            skip = 0;
            if copied == count {
                break;
            }
        }
        Ok(copied)
    }

    /// Copies the whole list into one contiguous buffer.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len);
        for entry in &self.entries {
            out.extend_from_slice(entry);
        }
        out
    }
}

impl FromIterator<Bytes> for Sgl {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        let mut sgl = Self::new();
        for fragment in iter {
            sgl.append(fragment);
        }
        sgl
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn abc() -> Sgl {
        [
            Bytes::from_static(b"abc"),
            Bytes::from_static(b"defg"),
            Bytes::from_static(b"hi"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn append_tracks_total() {
        let mut sgl = Sgl::new();
        assert!(sgl.is_empty());

        sgl.append(Bytes::from_static(b"abc"));
        sgl.append(Bytes::from_static(b""));
        sgl.append(Bytes::from_static(b"de"));
        assert_eq!(5, sgl.len());
        assert_eq!(3, sgl.fragment_count());
        assert_eq!(b"abcde".to_vec(), sgl.to_vec());
    }

    #[test]
    fn prepend_and_extend() {
        let mut sgl = Sgl::from_fragment(Bytes::from_static(b"defg"));
        sgl.prepend(Bytes::from_static(b"abc"));

        let mut tail = Sgl::from_fragment(Bytes::from_static(b"hi"));
        sgl.extend_from(&mut tail);
        assert!(tail.is_empty());
        assert_eq!(0, tail.fragment_count());

        assert_eq!(abc(), sgl);
        assert_eq!(9, sgl.len());
    }

    #[test]
    fn gather_within_one_fragment() {
        let mut dest = [0u8; 2];
        assert_eq!(2, abc().gather(4, &mut dest).unwrap());
        assert_eq!(b"ef", &dest);
    }

    #[test]
    fn gather_across_fragments() {
        let mut dest = [0u8; 7];
        assert_eq!(7, abc().gather(1, &mut dest).unwrap());
        assert_eq!(b"bcdefgh", &dest);
    }

    #[test]
    fn gather_whole() {
        let mut dest = [0u8; 9];
        assert_eq!(9, abc().gather(0, &mut dest).unwrap());
        assert_eq!(b"abcdefghi", &dest);
    }

    #[test]
    fn gather_out_of_bounds() {
        let mut dest = [0u8; 4];
        assert_matches!(
            abc().gather(7, &mut dest),
            Err(GatherOutOfBounds {
                offset: 7,
                count: 4,
                len: 9
            })
        );
    }

    #[test]
    fn zero_length_fragments_are_empty() {
        let sgl = Sgl::from_fragment(Bytes::new());
        assert!(sgl.is_empty());
        assert_eq!(1, sgl.fragment_count());
    }
}
