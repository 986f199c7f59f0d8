use oxtsse_common::bloom::{self, BloomFilter};
use oxtsse_common::channel::Channel;
use oxtsse_common::config::Config;
use oxtsse_common::error::OxtSseError;
use oxtsse_common::keys::KeySet;
use oxtsse_common::kv::{self, KvStore};
use oxtsse_common::params::{BLOCK_BYTE_LEN, POINT_BYTE_LEN, padded_rows};
use oxtsse_common::pool::{WorkCommand, WorkerPool};
use oxtsse_common::{primitives, tset};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;

/// The answering party: owns the worker pool, the membership filter and the
/// handle to the row store, and serves one query per connection.
pub struct Server {
    config: Config,
    keys: KeySet,
    store: Arc<dyn KvStore>,
    filter: BloomFilter,
    pool: WorkerPool,
}

impl Server {
    /// Starts the server's worker pool over the given row store and
    /// membership filter. The filter may be freshly built (for a local index
    /// build) or loaded from a shipped file.
    pub fn new(config: Config, keys: KeySet, store: Arc<dyn KvStore>, filter: BloomFilter) -> Result<Server, OxtSseError> {
        let pool = WorkerPool::start(config.thread_count, store.clone())?;
        Ok(Server {
            config,
            keys,
            store,
            filter,
            pool,
        })
    }

    pub fn filter(&self) -> &BloomFilter {
        &self.filter
    }

    /// Builds the encrypted index in place from a plaintext keyword map:
    /// one probe chain in the row store per keyword, one membership filter
    /// entry per (keyword, identifier) pair. Rejects keywords holding more
    /// identifiers than the configured limit.
    pub fn build_index(&mut self, database: &HashMap<Vec<u8>, Vec<[u8; BLOCK_BYTE_LEN]>>) -> Result<(), OxtSseError> {
        for (keyword, ids) in database {
            if ids.len() > self.config.max_ids_per_keyword {
                return Err(OxtSseError::KeywordOverCapacity {
                    ids: ids.len(),
                    capacity: self.config.max_ids_per_keyword,
                });
            }

            let keyword_block = primitives::keyword_block(keyword);
            tset::index_keyword(&mut self.pool, self.store.as_ref(), &mut self.filter, &self.keys, &keyword_block, ids)?;
        }

        log::info!("indexed {} keywords", database.len());

        Ok(())
    }

    /// Receives index rows built elsewhere into the row store, the
    /// counterpart of `oxtsse_common::kv::send_entries`.
    pub fn receive_index<S: Read + Write>(&mut self, channel: &mut Channel<S>) -> Result<usize, OxtSseError> {
        let stored = kv::recv_entries(channel, self.store.as_ref())?;
        log::info!("stored {} uploaded index rows", stored);
        Ok(stored)
    }

    /// Serves one full query on an established connection and returns the
    /// match count. Any error aborts the connection; the caller decides
    /// whether to keep accepting.
    pub fn serve_connection<S: Read + Write>(&mut self, channel: &mut Channel<S>) -> Result<usize, OxtSseError> {
        let lanes = self.pool.thread_count();

        let mut first_block = [0u8; BLOCK_BYTE_LEN];
        channel.read_exact_into(&mut first_block)?;
        let term_count = channel.read_u32()? as usize;
        if term_count > lanes {
            return Err(OxtSseError::TooManySearchTerms { terms: term_count, lanes });
        }

        // Keys are server-resident: derive the search tag from the raw
        // keyword block and walk the tuple-set.
        let derived = self.pool.dispatch(vec![WorkCommand::PrfEval {
            key: self.keys.tag_key,
            block: first_block,
        }])?;
        let stag = derived[0].block()?;

        let rows = tset::retrieve(&mut self.pool, &stag, self.config.max_ids_per_keyword)?;
        let row_count = rows.len();
        channel.write_u32(row_count as u32)?;
        channel.flush()?;

        let padded = padded_rows(row_count, lanes);
        let expected_tokens = padded * term_count;
        let token_count = channel.read_u32()? as usize;
        if token_count != expected_tokens {
            return Err(OxtSseError::TokenBatchSizeMismatch {
                expected: expected_tokens,
                received: token_count,
            });
        }
        let batch = channel.read_vec(token_count * POINT_BYTE_LEN)?;

        let mut results = vec![0u8; padded * BLOCK_BYTE_LEN];
        let mut match_count = 0usize;

        for (counter, row) in rows.iter().enumerate() {
            if self.row_matches(row, &batch, counter, term_count)? {
                let offset = match_count * BLOCK_BYTE_LEN;
                results[offset..offset + BLOCK_BYTE_LEN].copy_from_slice(&row.e);
                match_count += 1;
            }
        }

        channel.write_u32(match_count as u32)?;
        channel.write_all_bytes(&results)?;
        channel.flush()?;

        log::info!("query answered: {} rows retrieved, {} matched", row_count, match_count);

        Ok(match_count)
    }

    /// Recombines one row's group material with its cross-tokens and tests
    /// the resulting cross-tags against the membership filter. A query with
    /// no secondary terms accepts every retrieved row.
    fn row_matches(&mut self, row: &tset::TsetRow, batch: &[u8], counter: usize, term_count: usize) -> Result<bool, OxtSseError> {
        if term_count == 0 {
            return Ok(true);
        }

        let commands = (0..term_count)
            .map(|term| {
                let offset = (counter * term_count + term) * POINT_BYTE_LEN;
                let mut base = [0u8; POINT_BYTE_LEN];
                base.copy_from_slice(&batch[offset..offset + POINT_BYTE_LEN]);
                WorkCommand::ScalarMulArbitraryBase { scalar: row.y, base }
            })
            .collect();
        let cross_tags = self.pool.dispatch(commands)?;

        let mut channels = Vec::with_capacity(term_count);
        for tag in cross_tags.iter() {
            let point = tag.scalar()?;
            channels.push(bloom::probe_indices(&mut self.pool, &point, self.filter.hash_count(), self.filter.address_bits())?);
        }

        Ok(self.filter.query_all(&channels))
    }

    /// Accept loop: serves connections strictly one at a time, each query to
    /// completion before the next accept. This bounds resource use to a
    /// single live query but caps throughput at one connection; a known
    /// scalability ceiling of the design.
    pub fn serve(&mut self, listener: &TcpListener) -> Result<(), OxtSseError> {
        loop {
            let (stream, peer) = listener.accept().map_err(|e| OxtSseError::Transport(e.to_string()))?;
            log::info!("connection from {}", peer);

            let mut channel = Channel::new(stream);
            if let Err(e) = self.serve_connection(&mut channel) {
                log::warn!("connection from {} aborted: {}", peer, e);
            }
        }
    }
}
