//! Deterministic seed branching.
//!
//! A [`SeedSequence`] turns a master seed into any number of child seeds whose
//! generated streams are statistically independent. Children are identified
//! only by their spawn key (their position), so the seed a task receives
//! depends on its index in the input list and never on which worker runs it
//! or when.
//!
//! The mixing scheme hashes the entropy words and the spawn key into a pool of
//! four 32-bit words, then expands the pool into as many output words as
//! requested. It is the same construction used by NumPy's `SeedSequence`, so
//! a seed's entropy and spawn key fully describe it.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

const POOL_SIZE: usize = 4;

const INIT_A: u32 = 0x43b0_d7e5;
const MULT_A: u32 = 0x931e_8875;
const INIT_B: u32 = 0x8b51_f9dd;
const MULT_B: u32 = 0x58f3_8ded;
const MIX_MULT_L: u32 = 0xca01_f9dd;
const MIX_MULT_R: u32 = 0x4973_f715;
const XSHIFT: u32 = 16;

fn hashmix(value: u32, hash_const: &mut u32) -> u32 {
    let mut value = value ^ *hash_const;
    *hash_const = hash_const.wrapping_mul(MULT_A);
    value = value.wrapping_mul(*hash_const);
    value ^ (value >> XSHIFT)
}

fn mix(x: u32, y: u32) -> u32 {
    let result = MIX_MULT_L
        .wrapping_mul(x)
        .wrapping_sub(MIX_MULT_R.wrapping_mul(y));
    result ^ (result >> XSHIFT)
}

/// Split an integer into little-endian 32-bit words. Zero becomes `[0]`.
fn to_words(mut n: u128) -> Vec<u32> {
    if n == 0 {
        return vec![0];
    }
    let mut words = Vec::new();
    while n > 0 {
        words.push(n as u32);
        n >>= 32;
    }
    words
}

/// A reproducible seed: root entropy plus the path of spawn indices that led
/// to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSequence {
    entropy: Vec<u32>,
    #[serde(default)]
    spawn_key: Vec<u32>,
    #[serde(skip)]
    n_children_spawned: u32,
}

impl SeedSequence {
    /// Seed sequence rooted at a fixed integer seed.
    pub fn new(seed: u64) -> Self {
        Self {
            entropy: to_words(seed as u128),
            spawn_key: Vec::new(),
            n_children_spawned: 0,
        }
    }

    /// Seed sequence rooted at 128 bits of fresh OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            entropy: to_words(rand::random::<u128>()),
            spawn_key: Vec::new(),
            n_children_spawned: 0,
        }
    }

    pub fn entropy(&self) -> &[u32] {
        &self.entropy
    }

    pub fn spawn_key(&self) -> &[u32] {
        &self.spawn_key
    }

    /// Derive `n` children. Repeated calls continue numbering where the
    /// previous call stopped, so no two children of one parent collide.
    pub fn spawn(&mut self, n: usize) -> Vec<SeedSequence> {
        let start = self.n_children_spawned;
        let children = (0..n as u32)
            .map(|offset| {
                let mut spawn_key = self.spawn_key.clone();
                spawn_key.push(start + offset);
                SeedSequence {
                    entropy: self.entropy.clone(),
                    spawn_key,
                    n_children_spawned: 0,
                }
            })
            .collect();
        self.n_children_spawned = start + n as u32;
        children
    }

    fn assembled_entropy(&self) -> Vec<u32> {
        let mut words = self.entropy.clone();
        if !self.spawn_key.is_empty() && words.len() < POOL_SIZE {
            words.resize(POOL_SIZE, 0);
        }
        words.extend_from_slice(&self.spawn_key);
        words
    }

    fn pool(&self) -> [u32; POOL_SIZE] {
        let entropy = self.assembled_entropy();
        let mut mixer = [0u32; POOL_SIZE];
        let mut hash_const = INIT_A;

        for (i, slot) in mixer.iter_mut().enumerate() {
            *slot = hashmix(entropy.get(i).copied().unwrap_or(0), &mut hash_const);
        }
        for src in 0..POOL_SIZE {
            for dst in 0..POOL_SIZE {
                if src != dst {
                    let hashed = hashmix(mixer[src], &mut hash_const);
                    mixer[dst] = mix(mixer[dst], hashed);
                }
            }
        }
        for &word in entropy.iter().skip(POOL_SIZE) {
            for dst in mixer.iter_mut() {
                *dst = mix(*dst, hashmix(word, &mut hash_const));
            }
        }
        mixer
    }

    /// Expand this seed into `n_words` 32-bit words of generator state.
    pub fn generate_state(&self, n_words: usize) -> Vec<u32> {
        let pool = self.pool();
        let mut hash_const = INIT_B;
        pool.iter()
            .cycle()
            .take(n_words)
            .map(|&word| {
                let mut value = word ^ hash_const;
                hash_const = hash_const.wrapping_mul(MULT_B);
                value = value.wrapping_mul(hash_const);
                value ^ (value >> XSHIFT)
            })
            .collect()
    }

    /// Same stream as [`generate_state`](Self::generate_state), read as
    /// little-endian pairs of words.
    pub fn generate_state_u64(&self, n_words: usize) -> Vec<u64> {
        self.generate_state(n_words * 2)
            .chunks_exact(2)
            .map(|pair| (pair[0] as u64) | ((pair[1] as u64) << 32))
            .collect()
    }

    /// A generator seeded from 256 bits of this sequence's state.
    pub fn rng(&self) -> StdRng {
        let mut bytes = [0u8; 32];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(self.generate_state(8)) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        StdRng::from_seed(bytes)
    }
}

/// Derive one independent seed per task from an optional master seed.
///
/// With a master seed the result is fully reproducible and the i-th seed does
/// not depend on `count`. Without one, fresh entropy is drawn for the root.
pub fn branch(master_seed: Option<u64>, count: usize) -> Vec<SeedSequence> {
    let mut root = match master_seed {
        Some(seed) => SeedSequence::new(seed),
        None => SeedSequence::from_entropy(),
    };
    root.spawn(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashSet;

    #[test]
    fn branch_is_deterministic_for_fixed_seed() {
        let a = branch(Some(42), 8);
        let b = branch(Some(42), 8);
        assert_eq!(a, b);
        let states_a: Vec<_> = a.iter().map(|s| s.generate_state(4)).collect();
        let states_b: Vec<_> = b.iter().map(|s| s.generate_state(4)).collect();
        assert_eq!(states_a, states_b);
    }

    #[test]
    fn branch_prefix_is_stable_across_counts() {
        let short = branch(Some(7), 3);
        let long = branch(Some(7), 10);
        assert_eq!(short[..], long[..3]);
    }

    #[test]
    fn children_carry_their_index_as_spawn_key() {
        let seeds = branch(Some(1), 3);
        for (i, seed) in seeds.iter().enumerate() {
            assert_eq!(seed.spawn_key(), &[i as u32]);
            assert_eq!(seed.entropy(), &[1]);
        }
    }

    #[test]
    fn children_produce_distinct_streams() {
        let seeds = branch(Some(0), 1000);
        let firsts: HashSet<u64> = seeds.iter().map(|s| s.generate_state_u64(1)[0]).collect();
        assert_eq!(firsts.len(), 1000);
    }

    #[test]
    fn child_differs_from_parent() {
        let mut parent = SeedSequence::new(5);
        let child = parent.spawn(1).remove(0);
        assert_ne!(parent.generate_state(4), child.generate_state(4));
    }

    #[test]
    fn different_master_seeds_diverge() {
        let a = branch(Some(1), 4);
        let b = branch(Some(2), 4);
        for (x, y) in a.iter().zip(&b) {
            assert_ne!(x.generate_state(2), y.generate_state(2));
        }
    }

    #[test]
    fn unseeded_branches_differ_between_calls() {
        let a = branch(None, 2);
        let b = branch(None, 2);
        assert_ne!(a[0].generate_state(4), b[0].generate_state(4));
    }

    #[test]
    fn spawn_continues_numbering() {
        let mut root = SeedSequence::new(9);
        let first = root.spawn(2);
        let second = root.spawn(2);
        assert_eq!(first[1].spawn_key(), &[1]);
        assert_eq!(second[0].spawn_key(), &[2]);
        assert_eq!(second[1].spawn_key(), &[3]);
    }

    #[test]
    fn nested_spawn_extends_key() {
        let mut child = branch(Some(3), 2).remove(1);
        let grandchild = child.spawn(1).remove(0);
        assert_eq!(grandchild.spawn_key(), &[1, 0]);
    }

    #[test]
    fn u64_state_packs_word_pairs() {
        let seed = SeedSequence::new(11);
        let words = seed.generate_state(4);
        let wide = seed.generate_state_u64(2);
        assert_eq!(wide[0], words[0] as u64 | (words[1] as u64) << 32);
        assert_eq!(wide[1], words[2] as u64 | (words[3] as u64) << 32);
    }

    #[test]
    fn rng_is_reproducible() {
        let seed = branch(Some(123), 1).remove(0);
        let a: Vec<u64> = (0..5).map(|_| seed.rng().gen()).collect();
        let mut r1 = seed.rng();
        let mut r2 = seed.rng();
        let b: Vec<u64> = (0..5).map(|_| r1.gen()).collect();
        let c: Vec<u64> = (0..5).map(|_| r2.gen()).collect();
        assert_eq!(b, c);
        assert!(a.iter().all(|&v| v == a[0]));
    }

    #[test]
    fn large_seed_uses_two_words() {
        let seed = SeedSequence::new(u64::MAX);
        assert_eq!(seed.entropy(), &[u32::MAX, u32::MAX]);
        assert_eq!(SeedSequence::new(0).entropy(), &[0]);
    }

    #[test]
    fn serialized_seed_drops_spawn_counter() {
        let mut root = SeedSequence::new(4);
        root.spawn(3);
        let json = serde_json::to_value(&root).unwrap();
        assert_eq!(json, serde_json::json!({"entropy": [4], "spawn_key": []}));
        let back: SeedSequence = serde_json::from_value(json).unwrap();
        assert_eq!(back.generate_state(4), root.generate_state(4));
    }
}
