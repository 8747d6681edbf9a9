use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::SeedableRng;

/// Clonable handle to one random source, shared by every component that samples
/// templates or suggestions. Seed it to make replies reproducible.
#[derive(Clone)]
pub struct SharedRng {
    inner: Arc<Mutex<StdRng>>,
}

impl SharedRng {
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    pub fn from_os() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    pub fn from_seed_option(seed: Option<u64>) -> Self {
        seed.map(Self::seeded).unwrap_or_else(Self::from_os)
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn choose<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut *self.inner.lock())
    }

    /// Up to `amount` distinct items, in random order.
    pub fn sample<T: Clone>(&self, items: &[T], amount: usize) -> Vec<T> {
        items
            .choose_multiple(&mut *self.inner.lock(), amount)
            .cloned()
            .collect()
    }

    pub fn shuffle<T>(&self, items: &mut [T]) {
        items.shuffle(&mut *self.inner.lock());
    }
}

impl std::fmt::Debug for SharedRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedRng")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_gives_same_sequence() {
        let items: Vec<u32> = (0..20).collect();
        let a = SharedRng::seeded(7);
        let b = SharedRng::seeded(7);
        assert_eq!(a.sample(&items, 5), b.sample(&items, 5));
        assert_eq!(a.choose(&items), b.choose(&items));
    }

    #[test]
    fn sample_never_exceeds_pool() {
        let rng = SharedRng::seeded(1);
        let picked = rng.sample(&["a", "b"], 3);
        assert_eq!(picked.len(), 2);
        assert!(rng.choose::<u8>(&[]).is_none());
    }
}
