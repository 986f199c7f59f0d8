//! Multi-hash membership filter consumed by cross-tag verification.
//!
//! The filter is dimensioned at build time by a bit capacity and an address
//! width and is immutable during queries. Each candidate point is hashed once
//! per hash index through the keyed digest flavour; a probe index is the top
//! `address_bits` bits of the digest read big-endian, which need not be
//! byte-aligned.

use crate::branch_opt_util;
use crate::error::OxtSseError;
use crate::params::{BLOOM_MESSAGE_BYTE_LEN, POINT_BYTE_LEN};
use crate::pool::{WorkCommand, WorkerPool};
use std::fs;
use std::path::Path;

pub struct BloomFilter {
    bits: Vec<u8>,
    capacity_bits: usize,
    address_bits: usize,
    hash_count: usize,
}

impl BloomFilter {
    /// Allocates a zeroed filter of `capacity_bits` bits addressed by
    /// `address_bits`-bit probe indices with `hash_count` probes per item.
    pub fn build(capacity_bits: usize, address_bits: usize, hash_count: usize) -> Result<BloomFilter, OxtSseError> {
        if branch_opt_util::likely(address_bits > 0 && address_bits <= 32 && capacity_bits >= (1usize << address_bits)) {
            Ok(BloomFilter {
                bits: vec![0u8; capacity_bits.div_ceil(8)],
                capacity_bits,
                address_bits,
                hash_count,
            })
        } else {
            Err(OxtSseError::InvalidBloomGeometry { capacity_bits, address_bits })
        }
    }

    #[inline(always)]
    pub fn capacity_bits(&self) -> usize {
        self.capacity_bits
    }

    #[inline(always)]
    pub fn address_bits(&self) -> usize {
        self.address_bits
    }

    #[inline(always)]
    pub fn hash_count(&self) -> usize {
        self.hash_count
    }

    #[inline(always)]
    fn test_bit(&self, index: u32) -> bool {
        let index = index as usize;
        debug_assert!(index < self.capacity_bits);

        (self.bits[index / 8] >> (index % 8)) & 1 == 1
    }

    /// Sets the bits for one inserted item, given its probe indices.
    pub fn insert_indices(&mut self, indices: &[u32]) {
        debug_assert_eq!(indices.len(), self.hash_count);

        for &index in indices {
            let index = index as usize;
            debug_assert!(index < self.capacity_bits);

            self.bits[index / 8] |= 1 << (index % 8);
        }
    }

    /// Conjunctive membership test: one channel of probe indices per
    /// secondary term, all `hash_count` indices of every channel must be set.
    /// A single clear bit anywhere disqualifies the candidate.
    pub fn query_all(&self, channels: &[Vec<u32>]) -> bool {
        for channel in channels {
            debug_assert_eq!(channel.len(), self.hash_count);

            for &index in channel {
                if branch_opt_util::unlikely(!self.test_bit(index)) {
                    return false;
                }
            }
        }
        true
    }

    /// Serializes the raw bit array. No header: the dimensions travel
    /// out-of-band (configuration) and are supplied again on load.
    pub fn to_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Rebuilds a filter from a raw bit array and externally supplied
    /// dimensions. The byte length must match the capacity exactly.
    pub fn from_bytes(bytes: Vec<u8>, capacity_bits: usize, address_bits: usize, hash_count: usize) -> Result<BloomFilter, OxtSseError> {
        let expected = capacity_bits.div_ceil(8);
        if branch_opt_util::unlikely(bytes.len() != expected) {
            return Err(OxtSseError::BloomFilterFileSizeMismatch { expected, actual: bytes.len() });
        }

        let mut filter = BloomFilter::build(capacity_bits, address_bits, hash_count)?;
        filter.bits = bytes;
        Ok(filter)
    }

    pub fn save(&self, path: &Path) -> Result<(), OxtSseError> {
        fs::write(path, &self.bits).map_err(|e| OxtSseError::Transport(e.to_string()))
    }

    pub fn load(path: &Path, capacity_bits: usize, address_bits: usize, hash_count: usize) -> Result<BloomFilter, OxtSseError> {
        let bytes = fs::read(path).map_err(|e| OxtSseError::Transport(e.to_string()))?;
        BloomFilter::from_bytes(bytes, capacity_bits, address_bits, hash_count)
    }
}

/// The salted message hashed for one membership probe of `point`.
#[inline(always)]
pub fn probe_message(point: &[u8; POINT_BYTE_LEN], hash_index: u8) -> [u8; BLOOM_MESSAGE_BYTE_LEN] {
    let mut message = [0u8; BLOOM_MESSAGE_BYTE_LEN];
    message[..POINT_BYTE_LEN].copy_from_slice(point);
    message[BLOOM_MESSAGE_BYTE_LEN - 1] = hash_index;
    message
}

/// The top `address_bits` bits of a digest read big-endian; the unaligned
/// tail, if any, comes from the high bits of the following byte.
pub fn digest_to_index(digest: &[u8], address_bits: usize) -> u32 {
    let full_bytes = address_bits / 8;
    let tail_bits = address_bits % 8;

    let mut index = 0u32;
    for &byte in digest.iter().take(full_bytes) {
        index = (index << 8) | byte as u32;
    }

    if tail_bits != 0 {
        index = (index << tail_bits) | (digest[full_bytes] >> (8 - tail_bits)) as u32;
    }

    index
}

/// Derives the `hash_count` probe indices of `point` through one keyed-digest
/// round of the worker pool, one salt per lane.
pub fn probe_indices(pool: &mut WorkerPool, point: &[u8; POINT_BYTE_LEN], hash_count: usize, address_bits: usize) -> Result<Vec<u32>, OxtSseError> {
    let commands = (0..hash_count)
        .map(|hash_index| WorkCommand::KeyedDigest {
            message: probe_message(point, hash_index as u8),
        })
        .collect();

    let outputs = pool.dispatch(commands)?;
    outputs.iter().map(|output| Ok(digest_to_index(&output.digest()?, address_bits))).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::primitives;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    fn direct_indices(filter: &BloomFilter, point: &[u8; 32]) -> Vec<u32> {
        (0..filter.hash_count())
            .map(|j| digest_to_index(&primitives::keyed_digest(&probe_message(point, j as u8)), filter.address_bits()))
            .collect()
    }

    #[test]
    fn digest_to_index_takes_top_bits_big_endian() {
        let digest = [0b1010_1100u8, 0b1101_0001, 0xff, 0, 0, 0, 0, 0];

        assert_eq!(digest_to_index(&digest, 8), 0b1010_1100);
        assert_eq!(digest_to_index(&digest, 16), 0b1010_1100_1101_0001);
        // Unaligned width: three tail bits come from the next byte's high end.
        assert_eq!(digest_to_index(&digest, 11), 0b1010_1100_110);
    }

    #[test]
    fn geometry_must_be_addressable() {
        assert!(BloomFilter::build(1 << 16, 16, 4).is_ok());
        assert_eq!(
            BloomFilter::build(1 << 10, 16, 4),
            Err(OxtSseError::InvalidBloomGeometry {
                capacity_bits: 1 << 10,
                address_bits: 16
            })
        );
    }

    impl PartialEq for BloomFilter {
        fn eq(&self, other: &Self) -> bool {
            self.bits == other.bits && self.capacity_bits == other.capacity_bits && self.address_bits == other.address_bits && self.hash_count == other.hash_count
        }
    }

    impl std::fmt::Debug for BloomFilter {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "BloomFilter({} bits)", self.capacity_bits)
        }
    }

    #[test]
    fn inserted_items_never_go_missing() {
        let mut rng = ChaCha8Rng::seed_from_u64(31);
        let mut filter = BloomFilter::build(1 << 16, 16, 4).unwrap();

        let mut points = Vec::new();
        for _ in 0..1_000 {
            let mut point = [0u8; 32];
            rng.fill_bytes(&mut point);
            let indices = direct_indices(&filter, &point);
            filter.insert_indices(&indices);
            points.push(point);
        }

        for point in points.iter() {
            assert!(filter.query_all(&[direct_indices(&filter, point)]));
        }
    }

    #[test]
    fn false_positive_rate_stays_near_theory() {
        const CAPACITY_BITS: usize = 1 << 16;
        const HASH_COUNT: usize = 4;
        const INSERTIONS: usize = 4_000;
        const TRIALS: usize = 10_000;

        let mut rng = ChaCha8Rng::seed_from_u64(32);
        let mut filter = BloomFilter::build(CAPACITY_BITS, 16, HASH_COUNT).unwrap();

        for _ in 0..INSERTIONS {
            let mut point = [0u8; 32];
            rng.fill_bytes(&mut point);
            let indices = direct_indices(&filter, &point);
            filter.insert_indices(&indices);
        }

        let mut false_positives = 0usize;
        for _ in 0..TRIALS {
            let mut point = [0u8; 32];
            rng.fill_bytes(&mut point);
            if filter.query_all(&[direct_indices(&filter, &point)]) {
                false_positives += 1;
            }
        }

        let k = HASH_COUNT as f64;
        let load = -(k * INSERTIONS as f64) / CAPACITY_BITS as f64;
        let theoretical = (1.0 - load.exp()).powf(k);
        let empirical = false_positives as f64 / TRIALS as f64;

        assert!(empirical <= 2.0 * theoretical, "empirical {} vs theoretical {}", empirical, theoretical);
    }

    #[test]
    fn conjunction_fails_on_any_clear_channel() {
        let mut filter = BloomFilter::build(1 << 16, 16, 2).unwrap();

        let member = [1u8; 32];
        let stranger = [2u8; 32];
        let member_indices = direct_indices(&filter, &member);
        filter.insert_indices(&member_indices);

        assert!(filter.query_all(&[member_indices.clone()]));
        assert!(!filter.query_all(&[member_indices, direct_indices(&filter, &stranger)]));
    }

    #[test]
    fn persisted_filter_round_trips_bit_for_bit() {
        let mut rng = ChaCha8Rng::seed_from_u64(33);
        let mut filter = BloomFilter::build(1 << 14, 14, 3).unwrap();

        let mut probes = Vec::new();
        for _ in 0..64 {
            let mut point = [0u8; 32];
            rng.fill_bytes(&mut point);
            let indices = direct_indices(&filter, &point);
            filter.insert_indices(&indices);
            probes.push(point);
        }

        let path = std::env::temp_dir().join("oxtsse_bloom_roundtrip.dat");
        filter.save(&path).unwrap();
        let reloaded = BloomFilter::load(&path, 1 << 14, 14, 3).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(filter, reloaded);
        for point in probes.iter() {
            assert_eq!(filter.query_all(&[direct_indices(&filter, point)]), reloaded.query_all(&[direct_indices(&reloaded, point)]));
        }

        // Mismatched dimensions are rejected outright.
        assert_eq!(
            BloomFilter::from_bytes(filter.to_bytes().to_vec(), 1 << 15, 15, 3),
            Err(OxtSseError::BloomFilterFileSizeMismatch {
                expected: (1usize << 15) / 8,
                actual: (1usize << 14) / 8
            })
        );
    }
}
