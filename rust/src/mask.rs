//! Growable bit set over fabric positions.

/// Set of indices backed by 64-bit words.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortMask {
    words: Vec<u64>,
}

impl PortMask {
    /// Create an empty mask sized for `n` indices. It grows on demand.
    pub fn new(n: usize) -> Self {
        Self {
            words: vec![0; n.div_ceil(64)],
        }
    }

    pub fn set(&mut self, index: usize, value: bool) {
        let word = index / 64;
        if word >= self.words.len() {
            if !value {
                return;
            }
            self.words.resize(word + 1, 0);
        }
        let bit = 1u64 << (index % 64);
        if value {
            self.words[word] |= bit;
        } else {
            self.words[word] &= !bit;
        }
    }

    #[inline]
    pub fn is_set(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|w| w & (1u64 << (index % 64)) != 0)
    }

    pub fn count_non_zero(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// First set index at or after `from`.
    pub fn find_first_set(&self, from: usize) -> Option<usize> {
        let mut word = from / 64;
        if word >= self.words.len() {
            return None;
        }
        let mut bits = self.words[word] & (!0u64 << (from % 64));
        loop {
            if bits != 0 {
                return Some(word * 64 + bits.trailing_zeros() as usize);
            }
            word += 1;
            if word >= self.words.len() {
                return None;
            }
            bits = self.words[word];
        }
    }

    /// Set indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = self.find_first_set(0);
        std::iter::from_fn(move || {
            let current = next?;
            next = self.find_first_set(current + 1);
            Some(current)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_count() {
        let mut mask = PortMask::new(48);
        assert!(mask.is_empty());
        mask.set(3, true);
        mask.set(47, true);
        mask.set(70, true); // grows
        assert_eq!(mask.count_non_zero(), 3);
        assert!(mask.is_set(70));
        mask.set(3, false);
        mask.set(500, false); // no-op beyond capacity
        assert!(!mask.is_set(3));
        assert_eq!(mask.count_non_zero(), 2);
    }

    #[test]
    fn test_find_first_set() {
        let mut mask = PortMask::new(128);
        mask.set(5, true);
        mask.set(64, true);
        mask.set(100, true);
        assert_eq!(mask.find_first_set(0), Some(5));
        assert_eq!(mask.find_first_set(6), Some(64));
        assert_eq!(mask.find_first_set(65), Some(100));
        assert_eq!(mask.find_first_set(101), None);
        assert_eq!(mask.find_first_set(1000), None);
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![5, 64, 100]);
    }
}
