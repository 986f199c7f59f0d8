//! Encrypted tuple-set with probe-chain storage in the external key-value
//! store.
//!
//! Rows for one search tag are discovered iteratively: probe `c` is the
//! digest of the tag-encrypted counter block, split into a bucket index, a
//! label, a termination mask byte and a content mask. The free-bucket table
//! issues each probe the next slot of its bucket, strictly increasing and
//! never reused within one chain generation; build and retrieval walk the
//! same sequence, so retrieval reproduces build-time slots exactly. Chains
//! sharing a (bucket, slot) pair stay apart through the digest-derived label
//! in the store key.
//!
//! The termination byte rides on the final real row of a chain: retrieval
//! records a row and advances the count before checking the byte, so the
//! row count handed back equals exactly the build-time row count. A store
//! miss ends the chain without recording anything, which also covers search
//! tags that were never indexed.

use crate::bloom::{self, BloomFilter};
use crate::branch_opt_util;
use crate::error::OxtSseError;
use crate::keys::KeySet;
use crate::kv::{KvKey, KvStore};
use crate::params::{
    BLOCK_BYTE_LEN, BUCKET_COUNT, CONTENT_MASK_OFFSET, DIGEST_BYTE_LEN, LABEL_BYTE_LEN, POINT_BYTE_LEN, TERMINATION_MASK_OFFSET, TSET_ROW_BYTE_LEN,
    TSET_VALUE_BYTE_LEN,
};
use crate::pool::{WorkCommand, WorkerPool};
use crate::primitives;

/// One decrypted tuple-set row: group material Y and the encrypted document
/// identifier E.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TsetRow {
    pub y: [u8; POINT_BYTE_LEN],
    pub e: [u8; BLOCK_BYTE_LEN],
}

impl TsetRow {
    pub fn from_bytes(bytes: &[u8; TSET_ROW_BYTE_LEN]) -> TsetRow {
        let mut y = [0u8; POINT_BYTE_LEN];
        let mut e = [0u8; BLOCK_BYTE_LEN];
        y.copy_from_slice(&bytes[..POINT_BYTE_LEN]);
        e.copy_from_slice(&bytes[POINT_BYTE_LEN..]);
        TsetRow { y, e }
    }

    pub fn to_bytes(&self) -> [u8; TSET_ROW_BYTE_LEN] {
        let mut out = [0u8; TSET_ROW_BYTE_LEN];
        out[..POINT_BYTE_LEN].copy_from_slice(&self.y);
        out[POINT_BYTE_LEN..].copy_from_slice(&self.e);
        out
    }
}

/// Per-bucket slot allocator for one probe-chain generation.
pub struct FreeBucketTable {
    next_slot: Vec<u16>,
}

impl FreeBucketTable {
    pub fn new() -> FreeBucketTable {
        FreeBucketTable {
            next_slot: vec![0u16; BUCKET_COUNT],
        }
    }

    /// Issues the next slot of `bucket`. Strictly increasing per bucket; a
    /// slot is never handed out twice within this table's lifetime.
    pub fn next(&mut self, bucket: u16) -> u16 {
        let slot = self.next_slot[bucket as usize];
        self.next_slot[bucket as usize] = slot.wrapping_add(1);
        slot
    }
}

impl Default for FreeBucketTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The digest-derived coordinates and masks of one probe.
struct ProbeParts {
    bucket: u16,
    label: [u8; LABEL_BYTE_LEN],
    termination_mask: u8,
    content_mask: [u8; TSET_ROW_BYTE_LEN],
}

fn split_probe_digest(digest: &[u8; DIGEST_BYTE_LEN]) -> ProbeParts {
    let bucket = u16::from_le_bytes([digest[0], digest[1]]);

    let mut label = [0u8; LABEL_BYTE_LEN];
    label.copy_from_slice(&digest[2..2 + LABEL_BYTE_LEN]);

    let mut content_mask = [0u8; TSET_ROW_BYTE_LEN];
    content_mask.copy_from_slice(&digest[CONTENT_MASK_OFFSET..]);

    ProbeParts {
        bucket,
        label,
        termination_mask: digest[TERMINATION_MASK_OFFSET],
        content_mask,
    }
}

/// The block encrypted under the search tag to seed probe `counter`.
#[inline(always)]
fn probe_counter_block(counter: u32) -> [u8; BLOCK_BYTE_LEN] {
    let mut block = [0u8; BLOCK_BYTE_LEN];
    block[..4].copy_from_slice(&counter.to_le_bytes());
    block
}

/// The first-keyword block carrying row counter `counter`, the input of the
/// per-row counter PRF shared by the build and the client's token derivation.
#[inline(always)]
pub fn token_counter_block(keyword_block: &[u8; BLOCK_BYTE_LEN], counter: u16) -> [u8; BLOCK_BYTE_LEN] {
    let mut block = *keyword_block;
    block[BLOCK_BYTE_LEN - 2] = (counter >> 8) as u8;
    block[BLOCK_BYTE_LEN - 1] = counter as u8;
    block
}

/// Computes probe digests for `count` chain positions, padded to whole
/// rounds, through encrypt-then-digest rounds of the pool.
fn probe_digests(pool: &mut WorkerPool, stag: &[u8; BLOCK_BYTE_LEN], count: usize) -> Result<Vec<[u8; DIGEST_BYTE_LEN]>, OxtSseError> {
    let lanes = pool.thread_count();
    let padded = crate::params::padded_rows(count, lanes);

    let mut digests = Vec::with_capacity(padded);
    for wave_start in (0..padded).step_by(lanes) {
        let encrypted = pool.dispatch(
            (0..lanes)
                .map(|lane| WorkCommand::BlockEncrypt {
                    key: *stag,
                    block: probe_counter_block((wave_start + lane) as u32),
                })
                .collect(),
        )?;

        let outputs = pool.dispatch(
            encrypted
                .iter()
                .map(|output| Ok(WorkCommand::Digest { block: output.block()? }))
                .collect::<Result<Vec<_>, OxtSseError>>()?,
        )?;

        for output in outputs.iter() {
            digests.push(output.digest()?);
        }
    }

    Ok(digests)
}

/// Retrieves every tuple-set row filed under `stag`, probing in waves of one
/// store lookup per lane until each active chain has signalled termination.
/// `probe_capacity` bounds the chain length (the configured per-keyword
/// identifier limit).
pub fn retrieve(pool: &mut WorkerPool, stag: &[u8; BLOCK_BYTE_LEN], probe_capacity: usize) -> Result<Vec<TsetRow>, OxtSseError> {
    let digests = probe_digests(pool, stag, probe_capacity)?;
    let lanes = pool.thread_count();

    let mut table = FreeBucketTable::new();
    let mut rows = Vec::new();
    let mut probe = 0usize;
    let mut done = false;

    while !done {
        if branch_opt_util::unlikely(probe >= digests.len()) {
            // No terminal marker within capacity; the store is inconsistent
            // with the configured geometry. Hand back what was recovered.
            log::warn!("probe chain exceeded capacity of {} without terminating", digests.len());
            break;
        }

        let wave = &digests[probe..(probe + lanes).min(digests.len())];
        let parts: Vec<ProbeParts> = wave.iter().map(split_probe_digest).collect();

        let outputs = pool.dispatch(
            parts
                .iter()
                .map(|p| WorkCommand::KvLookup {
                    key: KvKey {
                        bucket: p.bucket,
                        slot: table.next(p.bucket),
                        label: p.label,
                    },
                })
                .collect(),
        )?;

        for (part, output) in parts.iter().zip(outputs.iter()) {
            let value = match output.kv_value()? {
                Some(value) => value,
                None => {
                    // Store miss: nothing was ever filed here, the chain is
                    // over and no row is recorded.
                    done = true;
                    break;
                }
            };

            let termination = value[0] ^ part.termination_mask;

            let mut row_bytes = [0u8; TSET_ROW_BYTE_LEN];
            for (i, byte) in row_bytes.iter_mut().enumerate() {
                *byte = value[1 + i] ^ part.content_mask[i];
            }

            // The row is recorded and the count advanced before the
            // termination byte is inspected; the byte rides on the final
            // real row.
            rows.push(TsetRow::from_bytes(&row_bytes));
            if termination == 0x01 {
                done = true;
                break;
            }
        }

        probe += wave.len();
    }

    log::debug!("retrieved {} tuple-set rows", rows.len());

    Ok(rows)
}

/// Files one keyword's chain into the store and inserts its cross-tags into
/// the membership filter. All primitive evaluations run through the pool.
pub fn index_keyword(
    pool: &mut WorkerPool,
    store: &dyn KvStore,
    filter: &mut BloomFilter,
    keys: &KeySet,
    keyword_block: &[u8; BLOCK_BYTE_LEN],
    ids: &[[u8; BLOCK_BYTE_LEN]],
) -> Result<(), OxtSseError> {
    if ids.is_empty() {
        return Ok(());
    }

    let lanes = pool.thread_count();

    // Per-keyword derivations: the search tag, the cross-keyword field
    // element and the identifier-encryption key.
    let derived = pool.dispatch(vec![
        WorkCommand::PrfEval { key: keys.tag_key, block: *keyword_block },
        WorkCommand::PrfEval { key: keys.cross_key, block: *keyword_block },
    ])?;
    let stag = derived[0].block()?;
    let cross_element = primitives::widen_to_scalar(&derived[1].block()?);

    let identifier_key = pool
        .dispatch(vec![WorkCommand::BlockEncrypt {
            key: keys.identifier_key,
            block: *keyword_block,
        }])?
        .remove(0)
        .block()?;

    let digests = probe_digests(pool, &stag, ids.len())?;
    let mut table = FreeBucketTable::new();

    for wave_start in (0..ids.len()).step_by(lanes) {
        let wave_len = lanes.min(ids.len() - wave_start);
        let wave_ids = &ids[wave_start..wave_start + wave_len];

        // z_c = PRF(Kz, W ‖ c), inverted for the row's Y component.
        let z_outputs = pool.dispatch(
            (0..wave_len)
                .map(|i| WorkCommand::PrfEval {
                    key: keys.counter_key,
                    block: token_counter_block(keyword_block, (wave_start + i) as u16),
                })
                .collect(),
        )?;
        let z_inverses = pool.dispatch(
            z_outputs
                .iter()
                .map(|output| Ok(WorkCommand::FieldInverse { operand: primitives::widen_to_scalar(&output.block()?) }))
                .collect::<Result<Vec<_>, OxtSseError>>()?,
        )?;

        // xind_c = PRF(Ki, id_c).
        let xind_outputs = pool.dispatch(wave_ids.iter().map(|id| WorkCommand::PrfEval { key: keys.index_key, block: *id }).collect())?;
        let mut xinds = Vec::with_capacity(wave_len);
        for output in xind_outputs.iter() {
            xinds.push(primitives::widen_to_scalar(&output.block()?));
        }

        // y_c = xind_c · z_c⁻¹.
        let y_outputs = pool.dispatch(
            xinds
                .iter()
                .zip(z_inverses.iter())
                .map(|(xind, z_inv)| Ok(WorkCommand::FieldMul { lhs: *xind, rhs: z_inv.scalar()? }))
                .collect::<Result<Vec<_>, OxtSseError>>()?,
        )?;

        // e_c = AES_ke(id_c).
        let e_outputs = pool.dispatch(wave_ids.iter().map(|id| WorkCommand::BlockEncrypt { key: identifier_key, block: *id }).collect())?;

        // xtag_c = g^(fx · xind_c).
        let blinded = pool.dispatch(
            xinds
                .iter()
                .map(|xind| WorkCommand::FieldMul { lhs: cross_element, rhs: *xind })
                .collect(),
        )?;
        let xtag_outputs = pool.dispatch(
            blinded
                .iter()
                .map(|output| Ok(WorkCommand::ScalarMulFixedBase { scalar: output.scalar()? }))
                .collect::<Result<Vec<_>, OxtSseError>>()?,
        )?;

        for i in 0..wave_len {
            let counter = wave_start + i;
            let part = split_probe_digest(&digests[counter]);
            let slot = table.next(part.bucket);

            let row = TsetRow {
                y: y_outputs[i].scalar()?,
                e: e_outputs[i].block()?,
            };
            let row_bytes = row.to_bytes();

            let terminal = counter == ids.len() - 1;
            let mut value = [0u8; TSET_VALUE_BYTE_LEN];
            value[0] = (terminal as u8) ^ part.termination_mask;
            for (j, byte) in row_bytes.iter().enumerate() {
                value[1 + j] = byte ^ part.content_mask[j];
            }

            let key = KvKey {
                bucket: part.bucket,
                slot,
                label: part.label,
            };
            store.set(&key.to_bytes(), &value);

            let xtag = xtag_outputs[i].scalar()?;
            let indices = bloom::probe_indices(pool, &xtag, filter.hash_count(), filter.address_bits())?;
            filter.insert_indices(&indices);
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::kv::MemKvStore;
    use crate::pool::WorkerPool;
    use std::sync::Arc;
    use test_case::test_case;

    const THREADS: usize = 4;

    fn fixture() -> (WorkerPool, Arc<MemKvStore>, BloomFilter, KeySet) {
        let store = Arc::new(MemKvStore::new());
        let pool = WorkerPool::start(THREADS, store.clone()).unwrap();
        let filter = BloomFilter::build(1 << 16, 16, THREADS).unwrap();
        (pool, store, filter, KeySet::fixed_for_testing())
    }

    fn identifiers(count: usize) -> Vec<[u8; 16]> {
        (0..count)
            .map(|i| {
                let mut id = [0u8; 16];
                id[..8].copy_from_slice(&(i as u64).to_le_bytes());
                id
            })
            .collect()
    }

    fn stag_of(pool: &mut WorkerPool, keys: &KeySet, keyword: &[u8]) -> [u8; 16] {
        let block = primitives::keyword_block(keyword);
        pool.dispatch(vec![WorkCommand::PrfEval { key: keys.tag_key, block }])
            .unwrap()
            .remove(0)
            .block()
            .unwrap()
    }

    #[test]
    fn search_tag_derivation_is_deterministic() {
        let (mut pool, _store, _filter, keys) = fixture();

        let first = stag_of(&mut pool, &keys, b"alpha");
        let second = stag_of(&mut pool, &keys, b"alpha");
        assert_eq!(first, second);
        assert_eq!(first, primitives::prf(&keys.tag_key, &primitives::keyword_block(b"alpha")));
    }

    #[test]
    fn unindexed_tag_yields_no_rows() {
        let (mut pool, _store, _filter, keys) = fixture();

        let stag = stag_of(&mut pool, &keys, b"never-indexed");
        let rows = retrieve(&mut pool, &stag, 8).unwrap();
        assert!(rows.is_empty());
    }

    // Sparse, at-capacity, and over-capacity chains; the longest one drives
    // hundreds of probes into 65536 buckets, so several land in the same
    // bucket and exercise slot counters past zero.
    #[test_case(3, 8; "sparse")]
    #[test_case(8, 8; "at capacity")]
    #[test_case(700, 1024; "long chain with repeated buckets")]
    fn retrieval_recovers_exactly_the_indexed_rows(count: usize, capacity: usize) {
        let (mut pool, store, mut filter, keys) = fixture();

        let keyword_block = primitives::keyword_block(b"keyword-under-test");
        let ids = identifiers(count);
        index_keyword(&mut pool, store.as_ref(), &mut filter, &keys, &keyword_block, &ids).unwrap();

        let stag = stag_of(&mut pool, &keys, b"keyword-under-test");
        let rows = retrieve(&mut pool, &stag, capacity).unwrap();
        assert_eq!(rows.len(), count);

        // Every recovered E decrypts back to the identifier it was built
        // from, in chain order.
        let identifier_key = primitives::block_encrypt(&keys.identifier_key, &keyword_block);
        for (row, id) in rows.iter().zip(ids.iter()) {
            assert_eq!(primitives::block_decrypt(&identifier_key, &row.e), *id);
        }
    }

    #[test]
    fn chains_of_distinct_keywords_do_not_interfere() {
        let (mut pool, store, mut filter, keys) = fixture();

        for (keyword, count) in [(b"first".as_slice(), 5usize), (b"second".as_slice(), 9), (b"third".as_slice(), 1)] {
            let block = primitives::keyword_block(keyword);
            index_keyword(&mut pool, store.as_ref(), &mut filter, &keys, &block, &identifiers(count)).unwrap();
        }

        for (keyword, count) in [(b"first".as_slice(), 5usize), (b"second".as_slice(), 9), (b"third".as_slice(), 1)] {
            let stag = stag_of(&mut pool, &keys, keyword);
            assert_eq!(retrieve(&mut pool, &stag, 64).unwrap().len(), count);
        }
    }

    #[test]
    fn free_bucket_slots_increase_and_never_repeat() {
        let mut table = FreeBucketTable::new();

        assert_eq!(table.next(42), 0);
        assert_eq!(table.next(42), 1);
        assert_eq!(table.next(42), 2);
        assert_eq!(table.next(43), 0);
    }

    #[test]
    fn row_serialization_round_trips() {
        let row = TsetRow { y: [3u8; 32], e: [9u8; 16] };
        assert_eq!(TsetRow::from_bytes(&row.to_bytes()), row);
    }
}
