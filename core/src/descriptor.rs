//! Fixed-length binary descriptors, consumed opaquely by the descriptor-gated
//! correspondence search. Construction happens in an external extractor; the
//! core only needs a distance comparison.

/// A fixed-length binary descriptor compared by Hamming distance.
#[derive(Debug, Clone)]
pub struct BinaryDescriptor {
    pub data: Vec<u8>,
}

impl BinaryDescriptor {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn hamming_distance(&self, other: &BinaryDescriptor) -> u32 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Descriptors paired with the indices of the cloud points (keypoints) they
/// were extracted at.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    pub indices: Vec<usize>,
    pub descriptors: Vec<BinaryDescriptor>,
}

impl DescriptorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            indices: Vec::with_capacity(capacity),
            descriptors: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, point_index: usize, descriptor: BinaryDescriptor) {
        self.indices.push(point_index);
        self.descriptors.push(descriptor);
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_distance() {
        let a = BinaryDescriptor::new(vec![0b1010_1010, 0xff]);
        let b = BinaryDescriptor::new(vec![0b0101_0101, 0xff]);
        assert_eq!(a.hamming_distance(&b), 8);
        assert_eq!(a.hamming_distance(&a), 0);
    }

    #[test]
    fn test_descriptor_set_push() {
        let mut set = DescriptorSet::new();
        assert!(set.is_empty());
        set.push(7, BinaryDescriptor::new(vec![1, 2, 3]));
        assert_eq!(set.len(), 1);
        assert_eq!(set.indices[0], 7);
    }
}
