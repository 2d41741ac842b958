use crate::component::ComponentId;

/// Fixed-width component bitset, used for query include/exclude masks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    words: Vec<u64>,
}

impl Signature {
    pub fn empty(words: usize) -> Self {
        Self {
            words: vec![0; words],
        }
    }

    pub fn from_components(words: usize, components: &[ComponentId]) -> Self {
        let mut sig = Self::empty(words);
        for &c in components {
            sig.set(c);
        }
        sig
    }

    pub fn set(&mut self, c: ComponentId) {
        let (w, b) = split(c);
        if let Some(word) = self.words.get_mut(w) {
            *word |= 1 << b;
        }
    }

    pub fn has(&self, c: ComponentId) -> bool {
        let (w, b) = split(c);
        self.words.get(w).is_some_and(|word| word & (1 << b) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }
}

fn split(c: ComponentId) -> (usize, u32) {
    (c.index() / 64, c.0 % 64)
}

/// Per-entity signatures stored flat: `slot * words .. (slot + 1) * words`.
#[derive(Debug, Clone)]
pub struct SignatureTable {
    words: usize,
    bits: Vec<u64>,
}

impl SignatureTable {
    pub fn new(max_components: usize) -> Self {
        Self {
            words: max_components.div_ceil(64).max(1),
            bits: Vec::new(),
        }
    }

    pub fn words_per_entity(&self) -> usize {
        self.words
    }

    fn row(&self, slot: usize) -> Option<&[u64]> {
        self.bits.get(slot * self.words..(slot + 1) * self.words)
    }

    fn row_mut(&mut self, slot: usize) -> &mut [u64] {
        let end = (slot + 1) * self.words;
        if self.bits.len() < end {
            self.bits.resize(end, 0);
        }
        &mut self.bits[slot * self.words..end]
    }

    pub fn set(&mut self, slot: usize, c: ComponentId) {
        let (w, b) = split(c);
        self.row_mut(slot)[w] |= 1 << b;
    }

    pub fn clear(&mut self, slot: usize, c: ComponentId) {
        let (w, b) = split(c);
        self.row_mut(slot)[w] &= !(1 << b);
    }

    pub fn clear_all(&mut self, slot: usize) {
        if self.row(slot).is_some() {
            self.row_mut(slot).iter_mut().for_each(|w| *w = 0);
        }
    }

    pub fn has(&self, slot: usize, c: ComponentId) -> bool {
        let (w, b) = split(c);
        self.row(slot).is_some_and(|r| r[w] & (1 << b) != 0)
    }

    /// `(S & include) == include && (S & exclude) == 0`.
    pub fn matches(&self, slot: usize, include: &Signature, exclude: &Signature) -> bool {
        let Some(row) = self.row(slot) else {
            return include.is_empty();
        };
        row.iter()
            .zip(include.words())
            .zip(exclude.words())
            .all(|((&s, &inc), &exc)| s & inc == inc && s & exc == 0)
    }

    pub fn count(&self, slot: usize) -> u32 {
        self.row(slot)
            .map(|r| r.iter().map(|w| w.count_ones()).sum())
            .unwrap_or(0)
    }
}
