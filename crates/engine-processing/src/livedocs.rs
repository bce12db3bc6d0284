use roaring::RoaringBitmap;

/// Immutable live-document bitset for one segment. All combinators return a
/// new value; base-generation state is never mutated during delta
/// reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveDocs {
    bits: RoaringBitmap,
    doc_count: u32,
}

impl LiveDocs {
    /// Every slot up to `doc_count` is live (a segment with no deletions).
    pub fn all_live(doc_count: u32) -> Self {
        let mut bits = RoaringBitmap::new();
        if doc_count > 0 {
            bits.insert_range(0..doc_count);
        }
        Self { bits, doc_count }
    }

    pub fn from_bitmap(bits: RoaringBitmap, doc_count: u32) -> Self {
        Self { bits, doc_count }
    }

    pub fn from_iter(live: impl IntoIterator<Item = u32>, doc_count: u32) -> Self {
        let bits = live.into_iter().filter(|&d| d < doc_count).collect();
        Self { bits, doc_count }
    }

    pub fn deserialize(bytes: &[u8], doc_count: u32) -> Result<Self, std::io::Error> {
        let bits = RoaringBitmap::deserialize_from(bytes)?;
        Ok(Self { bits, doc_count })
    }

    pub fn serialize(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut out = Vec::with_capacity(self.bits.serialized_size());
        self.bits.serialize_into(&mut out)?;
        Ok(out)
    }

    pub fn contains(&self, doc: u32) -> bool {
        self.bits.contains(doc)
    }

    pub fn cardinality(&self) -> u64 {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Documents live here but not in `other`.
    pub fn and_not(&self, other: &LiveDocs) -> LiveDocs {
        LiveDocs {
            bits: &self.bits - &other.bits,
            doc_count: self.doc_count,
        }
    }

    /// Flips every slot within the segment's document count: the documents
    /// this bitset does not cover.
    pub fn complement(&self) -> LiveDocs {
        let mut full = RoaringBitmap::new();
        if self.doc_count > 0 {
            full.insert_range(0..self.doc_count);
        }
        LiveDocs {
            bits: full - &self.bits,
            doc_count: self.doc_count,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.bits.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_live_covers_every_slot() {
        let live = LiveDocs::all_live(5);
        assert_eq!(live.cardinality(), 5);
        assert!(live.contains(0));
        assert!(live.contains(4));
        assert!(!live.contains(5));
    }

    #[test]
    fn and_not_is_set_difference() {
        let current = LiveDocs::from_iter([0, 1, 2, 3, 4], 6);
        let base = LiveDocs::from_iter([0, 2, 4], 6);

        let delta = current.and_not(&base);
        assert_eq!(delta.iter().collect::<Vec<_>>(), vec![1, 3]);

        // Inputs are untouched.
        assert_eq!(current.cardinality(), 5);
        assert_eq!(base.cardinality(), 3);
    }

    #[test]
    fn complement_is_bounded_by_doc_count() {
        let base = LiveDocs::from_iter([1, 3], 5);
        let flipped = base.complement();
        assert_eq!(flipped.iter().collect::<Vec<_>>(), vec![0, 2, 4]);
    }

    #[test]
    fn serialization_round_trips() {
        let live = LiveDocs::from_iter([2, 7, 1000], 2048);
        let bytes = live.serialize().unwrap();
        let restored = LiveDocs::deserialize(&bytes, 2048).unwrap();
        assert_eq!(restored, live);
    }
}
