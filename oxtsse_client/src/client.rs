use oxtsse_common::channel::Channel;
use oxtsse_common::config::Config;
use oxtsse_common::error::OxtSseError;
use oxtsse_common::keys::KeySet;
use oxtsse_common::kv::MemKvStore;
use oxtsse_common::params::{BLOCK_BYTE_LEN, POINT_BYTE_LEN, padded_rows};
use oxtsse_common::pool::{WorkCommand, WorkerPool};
use oxtsse_common::primitives::{self, widen_to_scalar};
use oxtsse_common::tset::token_counter_block;
use std::collections::BTreeSet;
use std::io::{Read, Write};

/// The querying party. Owns its worker pool for the lifetime of the client;
/// one search runs at a time against one connection.
pub struct Client {
    config: Config,
    keys: KeySet,
    pool: WorkerPool,
}

impl Client {
    /// Starts the client's worker pool and readies it for queries. The
    /// client's pool serves purely computational rounds; its store handle
    /// stays empty.
    pub fn new(config: Config, keys: KeySet) -> Result<Client, OxtSseError> {
        let pool = WorkerPool::start(config.thread_count, std::sync::Arc::new(MemKvStore::new()))?;
        Ok(Client { config, keys, pool })
    }

    /// Runs one conjunctive query over an established connection: documents
    /// matching `first` AND every keyword in `secondary`.
    ///
    /// Returns the decrypted document identifiers as an ordered set:
    /// duplicates collapse and the ordering is the set's natural byte order,
    /// independent of arrival order.
    pub fn search<S: Read + Write>(&mut self, channel: &mut Channel<S>, first: &[u8], secondary: &[&[u8]]) -> Result<BTreeSet<[u8; BLOCK_BYTE_LEN]>, OxtSseError> {
        let lanes = self.pool.thread_count();
        if secondary.len() > lanes {
            return Err(OxtSseError::TooManySearchTerms {
                terms: secondary.len(),
                lanes,
            });
        }

        // The server derives the search tag itself; only the raw keyword
        // block crosses the wire.
        let first_block = primitives::keyword_block(first);
        channel.write_all_bytes(&first_block)?;
        channel.write_u32(secondary.len() as u32)?;
        channel.flush()?;

        let row_count = channel.read_u32()? as usize;
        log::debug!("server reports {} tuple-set rows", row_count);
        if row_count > self.config.max_ids_per_keyword {
            return Err(OxtSseError::RowCountExceedsCapacity {
                rows: row_count,
                capacity: self.config.max_ids_per_keyword,
            });
        }

        let padded = padded_rows(row_count, lanes);
        let token_count = padded * secondary.len();

        let batch = self.derive_tokens(&first_block, secondary, row_count, token_count)?;
        channel.write_u32(token_count as u32)?;
        channel.write_all_bytes(&batch)?;
        channel.flush()?;

        let match_count = channel.read_u32()? as usize;
        let results = channel.read_vec(padded * BLOCK_BYTE_LEN)?;
        if match_count > row_count {
            return Err(OxtSseError::MatchCountExceedsRowCount {
                matches: match_count,
                rows: row_count,
            });
        }

        self.decrypt_matches(&first_block, &results, match_count)
    }

    /// Derives the flat cross-token batch, counter-major: the token for
    /// (counter c, secondary term i) lands at entry c · terms + i. Rows past
    /// `row_count` in the padded batch stay zero; the server never reads
    /// them.
    fn derive_tokens(&mut self, first_block: &[u8; BLOCK_BYTE_LEN], secondary: &[&[u8]], row_count: usize, token_count: usize) -> Result<Vec<u8>, OxtSseError> {
        let lanes = self.pool.thread_count();
        let mut batch = vec![0u8; token_count * POINT_BYTE_LEN];

        if secondary.is_empty() || row_count == 0 {
            return Ok(batch);
        }

        // z_c = PRF(Kz, W1 ‖ c) for every row counter, in waves.
        let mut counter_elements = Vec::with_capacity(row_count);
        for wave_start in (0..row_count).step_by(lanes) {
            let wave_len = lanes.min(row_count - wave_start);
            let outputs = self.pool.dispatch(
                (0..wave_len)
                    .map(|i| WorkCommand::PrfEval {
                        key: self.keys.counter_key,
                        block: token_counter_block(first_block, (wave_start + i) as u16),
                    })
                    .collect(),
            )?;
            for output in outputs.iter() {
                counter_elements.push(widen_to_scalar(&output.block()?));
            }
        }

        // fx_i = PRF(Kx, W_i) for every secondary term, one round.
        let cross_outputs = self.pool.dispatch(
            secondary
                .iter()
                .map(|keyword| WorkCommand::PrfEval {
                    key: self.keys.cross_key,
                    block: primitives::keyword_block(keyword),
                })
                .collect(),
        )?;
        let mut cross_elements = Vec::with_capacity(secondary.len());
        for output in cross_outputs.iter() {
            cross_elements.push(widen_to_scalar(&output.block()?));
        }

        // Per row: blind every secondary element by z_c and raise it into
        // the group against the fixed base point.
        for (counter, z) in counter_elements.iter().enumerate() {
            let products = self.pool.dispatch(
                cross_elements
                    .iter()
                    .map(|fx| WorkCommand::FieldMul { lhs: *fx, rhs: *z })
                    .collect(),
            )?;
            let tokens = self.pool.dispatch(
                products
                    .iter()
                    .map(|product| Ok(WorkCommand::ScalarMulFixedBase { scalar: product.scalar()? }))
                    .collect::<Result<Vec<_>, OxtSseError>>()?,
            )?;

            for (term, token) in tokens.iter().enumerate() {
                let offset = (counter * secondary.len() + term) * POINT_BYTE_LEN;
                batch[offset..offset + POINT_BYTE_LEN].copy_from_slice(&token.scalar()?);
            }
        }

        Ok(batch)
    }

    /// Opens the first `match_count` encrypted identifiers under the
    /// per-keyword derived key and collapses them into the result set.
    fn decrypt_matches(&mut self, first_block: &[u8; BLOCK_BYTE_LEN], results: &[u8], match_count: usize) -> Result<BTreeSet<[u8; BLOCK_BYTE_LEN]>, OxtSseError> {
        let mut identifiers = BTreeSet::new();
        if match_count == 0 {
            return Ok(identifiers);
        }

        let derived = self.pool.dispatch(vec![WorkCommand::BlockEncrypt {
            key: self.keys.identifier_key,
            block: *first_block,
        }])?;
        let identifier_key = derived[0].block()?;

        for entry in results.chunks_exact(BLOCK_BYTE_LEN).take(match_count) {
            let mut ciphertext = [0u8; BLOCK_BYTE_LEN];
            ciphertext.copy_from_slice(entry);
            identifiers.insert(primitives::block_decrypt(&identifier_key, &ciphertext));
        }

        Ok(identifiers)
    }
}
