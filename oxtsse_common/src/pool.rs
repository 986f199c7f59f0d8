//! Round-synchronized worker pool.
//!
//! One round runs one opcode across all threads. The dispatcher hands every
//! worker an owned command over its private channel, opens one generation of
//! the round barrier, blocks until all workers arrive, then collects owned
//! outputs in lane order. Dispatching takes `&mut self`, so a second round
//! can not start while one is in flight, and the per-round buffers are never
//! aliased between dispatcher and workers.
//!
//! Blocking the protocol thread for the round's duration is deliberate: it
//! keeps exactly one set of lane buffers live at any time.

use crate::barrier::RoundBarrier;
use crate::error::OxtSseError;
use crate::kv::{KvKey, KvStore};
use crate::params::{BLOCK_BYTE_LEN, BLOOM_MESSAGE_BYTE_LEN, DIGEST_BYTE_LEN, KEY_BYTE_LEN, POINT_BYTE_LEN, TSET_VALUE_BYTE_LEN};
use crate::{affinity, primitives};
use crossbeam::channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// The closed set of operations a round can execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    Idle,
    BlockEncrypt,
    Digest,
    KeyedDigest,
    FieldMul,
    FieldInverse,
    ScalarMulFixedBase,
    ScalarMulArbitraryBase,
    KvLookup,
    PrfEval,
}

/// One lane's work for a round, carrying its own input buffers.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkCommand {
    Idle,
    BlockEncrypt { key: [u8; KEY_BYTE_LEN], block: [u8; BLOCK_BYTE_LEN] },
    Digest { block: [u8; BLOCK_BYTE_LEN] },
    KeyedDigest { message: [u8; BLOOM_MESSAGE_BYTE_LEN] },
    FieldMul { lhs: [u8; POINT_BYTE_LEN], rhs: [u8; POINT_BYTE_LEN] },
    FieldInverse { operand: [u8; POINT_BYTE_LEN] },
    ScalarMulFixedBase { scalar: [u8; POINT_BYTE_LEN] },
    ScalarMulArbitraryBase { scalar: [u8; POINT_BYTE_LEN], base: [u8; POINT_BYTE_LEN] },
    KvLookup { key: KvKey },
    PrfEval { key: [u8; KEY_BYTE_LEN], block: [u8; BLOCK_BYTE_LEN] },
}

impl WorkCommand {
    pub fn opcode(&self) -> OpCode {
        match self {
            WorkCommand::Idle => OpCode::Idle,
            WorkCommand::BlockEncrypt { .. } => OpCode::BlockEncrypt,
            WorkCommand::Digest { .. } => OpCode::Digest,
            WorkCommand::KeyedDigest { .. } => OpCode::KeyedDigest,
            WorkCommand::FieldMul { .. } => OpCode::FieldMul,
            WorkCommand::FieldInverse { .. } => OpCode::FieldInverse,
            WorkCommand::ScalarMulFixedBase { .. } => OpCode::ScalarMulFixedBase,
            WorkCommand::ScalarMulArbitraryBase { .. } => OpCode::ScalarMulArbitraryBase,
            WorkCommand::KvLookup { .. } => OpCode::KvLookup,
            WorkCommand::PrfEval { .. } => OpCode::PrfEval,
        }
    }

    /// The command unused lanes run so every worker computes the round's
    /// opcode over zeroed inputs, exactly like a full round.
    fn zero_fill(opcode: OpCode) -> WorkCommand {
        match opcode {
            OpCode::Idle => WorkCommand::Idle,
            OpCode::BlockEncrypt => WorkCommand::BlockEncrypt { key: [0; 16], block: [0; 16] },
            OpCode::Digest => WorkCommand::Digest { block: [0; 16] },
            OpCode::KeyedDigest => WorkCommand::KeyedDigest { message: [0; 40] },
            OpCode::FieldMul => WorkCommand::FieldMul { lhs: [0; 32], rhs: [0; 32] },
            OpCode::FieldInverse => WorkCommand::FieldInverse { operand: [0; 32] },
            OpCode::ScalarMulFixedBase => WorkCommand::ScalarMulFixedBase { scalar: [0; 32] },
            OpCode::ScalarMulArbitraryBase => WorkCommand::ScalarMulArbitraryBase { scalar: [0; 32], base: [0; 32] },
            OpCode::KvLookup => WorkCommand::KvLookup {
                key: KvKey { bucket: 0, slot: 0, label: [0; 12] },
            },
            OpCode::PrfEval => WorkCommand::PrfEval { key: [0; 16], block: [0; 16] },
        }
    }
}

/// One lane's owned output.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkOutput {
    Empty,
    Block([u8; BLOCK_BYTE_LEN]),
    Digest([u8; DIGEST_BYTE_LEN]),
    Scalar([u8; POINT_BYTE_LEN]),
    KvValue(Option<[u8; TSET_VALUE_BYTE_LEN]>),
}

impl WorkOutput {
    pub fn block(&self) -> Result<[u8; BLOCK_BYTE_LEN], OxtSseError> {
        match self {
            WorkOutput::Block(b) => Ok(*b),
            _ => Err(OxtSseError::UnexpectedWorkerOutput),
        }
    }

    pub fn digest(&self) -> Result<[u8; DIGEST_BYTE_LEN], OxtSseError> {
        match self {
            WorkOutput::Digest(d) => Ok(*d),
            _ => Err(OxtSseError::UnexpectedWorkerOutput),
        }
    }

    pub fn scalar(&self) -> Result<[u8; POINT_BYTE_LEN], OxtSseError> {
        match self {
            WorkOutput::Scalar(s) => Ok(*s),
            _ => Err(OxtSseError::UnexpectedWorkerOutput),
        }
    }

    pub fn kv_value(&self) -> Result<Option<[u8; TSET_VALUE_BYTE_LEN]>, OxtSseError> {
        match self {
            WorkOutput::KvValue(v) => Ok(*v),
            _ => Err(OxtSseError::UnexpectedWorkerOutput),
        }
    }
}

enum WorkerMessage {
    Round(WorkCommand),
    Shutdown,
}

struct WorkerHandle {
    orders: Sender<WorkerMessage>,
    replies: Receiver<WorkOutput>,
    thread: Option<JoinHandle<()>>,
}

pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    barrier: Arc<RoundBarrier>,
}

impl WorkerPool {
    /// Spawns `thread_count` workers, each holding its own clone of the
    /// key-value store handle and best-effort pinned to the core matching its
    /// lane index.
    pub fn start(thread_count: usize, store: Arc<dyn KvStore>) -> Result<WorkerPool, OxtSseError> {
        if thread_count == 0 {
            return Err(OxtSseError::InvalidThreadCount(thread_count));
        }

        let barrier = Arc::new(RoundBarrier::new());
        let mut workers = Vec::with_capacity(thread_count);

        for lane in 0..thread_count {
            let (order_tx, order_rx) = bounded::<WorkerMessage>(1);
            let (reply_tx, reply_rx) = bounded::<WorkOutput>(1);
            let barrier = barrier.clone();
            let store = store.clone();

            let thread = thread::Builder::new()
                .name(format!("oxtsse-worker-{}", lane))
                .spawn(move || worker_loop(lane, order_rx, reply_tx, barrier, store))
                .map_err(|e| OxtSseError::Transport(e.to_string()))?;

            workers.push(WorkerHandle {
                orders: order_tx,
                replies: reply_rx,
                thread: Some(thread),
            });
        }

        log::debug!("worker pool started with {} threads", thread_count);

        Ok(WorkerPool { workers, barrier })
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Runs one round: publishes one command per lane, releases the barrier
    /// generation and blocks until every worker has reported completion.
    /// Returns the outputs of the first `commands.len()` lanes in order;
    /// unused lanes compute the same opcode over zeroed inputs.
    pub fn dispatch(&mut self, commands: Vec<WorkCommand>) -> Result<Vec<WorkOutput>, OxtSseError> {
        let lanes = commands.len();
        let threads = self.thread_count();

        if lanes == 0 {
            return Ok(Vec::new());
        }
        if lanes > threads {
            return Err(OxtSseError::RoundWiderThanPool { lanes, threads });
        }

        let opcode = commands[0].opcode();
        debug_assert!(commands.iter().all(|c| c.opcode() == opcode), "a round must run a single opcode");

        let generation = self.barrier.open(threads);

        let mut commands = commands.into_iter();
        for worker in self.workers.iter() {
            let command = commands.next().unwrap_or_else(|| WorkCommand::zero_fill(opcode));
            if worker.orders.send(WorkerMessage::Round(command)).is_err() {
                // A dead worker can never arrive; fail instead of waiting on
                // a generation that would not drain.
                return Err(OxtSseError::WorkerLost);
            }
        }

        self.barrier.wait(generation);

        let mut outputs = Vec::with_capacity(lanes);
        for (lane, worker) in self.workers.iter().enumerate() {
            let output = worker.replies.recv().map_err(|_| OxtSseError::WorkerLost)?;
            if lane < lanes {
                outputs.push(output);
            }
        }

        Ok(outputs)
    }

    /// Signals every worker to exit its loop and joins the threads.
    /// Idempotent; also run on drop.
    pub fn stop(&mut self) {
        for worker in self.workers.iter() {
            let _ = worker.orders.send(WorkerMessage::Shutdown);
        }
        for worker in self.workers.iter_mut() {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
        if !self.workers.is_empty() {
            log::debug!("worker pool stopped");
            self.workers.clear();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(lane: usize, orders: Receiver<WorkerMessage>, replies: Sender<WorkOutput>, barrier: Arc<RoundBarrier>, store: Arc<dyn KvStore>) {
    if !affinity::try_set_affinity(lane) {
        log::debug!("worker {} could not be pinned to core {}", lane, lane);
    }

    while let Ok(message) = orders.recv() {
        match message {
            WorkerMessage::Round(command) => {
                let output = execute(command, store.as_ref());
                if replies.send(output).is_err() {
                    break;
                }
                barrier.arrive();
            }
            WorkerMessage::Shutdown => break,
        }
    }
}

fn execute(command: WorkCommand, store: &dyn KvStore) -> WorkOutput {
    match command {
        WorkCommand::Idle => {
            // Safety fallback; no real round dispatches this.
            thread::sleep(Duration::from_millis(1));
            WorkOutput::Empty
        }
        WorkCommand::BlockEncrypt { key, block } => WorkOutput::Block(primitives::block_encrypt(&key, &block)),
        WorkCommand::Digest { block } => WorkOutput::Digest(primitives::digest(&block)),
        WorkCommand::KeyedDigest { message } => WorkOutput::Digest(primitives::keyed_digest(&message)),
        WorkCommand::FieldMul { lhs, rhs } => WorkOutput::Scalar(primitives::field_mul(&lhs, &rhs)),
        WorkCommand::FieldInverse { operand } => WorkOutput::Scalar(primitives::field_inverse(&operand)),
        WorkCommand::ScalarMulFixedBase { scalar } => WorkOutput::Scalar(primitives::scalar_mul_fixed_base(&scalar)),
        WorkCommand::ScalarMulArbitraryBase { scalar, base } => WorkOutput::Scalar(primitives::scalar_mul(&scalar, &base)),
        WorkCommand::KvLookup { key } => WorkOutput::KvValue(lookup_value(store, &key)),
        WorkCommand::PrfEval { key, block } => WorkOutput::Block(primitives::prf(&key, &block)),
    }
}

fn lookup_value(store: &dyn KvStore, key: &KvKey) -> Option<[u8; TSET_VALUE_BYTE_LEN]> {
    let bytes = store.get(&key.to_bytes())?;
    match <[u8; TSET_VALUE_BYTE_LEN]>::try_from(bytes.as_slice()) {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("stored value under bucket {} has length {}, expected {}", key.bucket, bytes.len(), TSET_VALUE_BYTE_LEN);
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::kv::MemKvStore;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    fn pool_of(threads: usize) -> WorkerPool {
        WorkerPool::start(threads, Arc::new(MemKvStore::new())).unwrap()
    }

    #[test]
    fn pooled_block_encryption_matches_the_bare_primitive() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let mut pool = pool_of(4);

        let mut key = [0u8; 16];
        rng.fill_bytes(&mut key);

        let mut blocks = [[0u8; 16]; 4];
        for block in blocks.iter_mut() {
            rng.fill_bytes(block);
        }

        let outputs = pool
            .dispatch(blocks.iter().map(|block| WorkCommand::BlockEncrypt { key, block: *block }).collect())
            .unwrap();

        for (block, output) in blocks.iter().zip(outputs.iter()) {
            assert_eq!(output.block().unwrap(), primitives::block_encrypt(&key, block));
        }
    }

    #[test]
    fn partial_rounds_return_only_requested_lanes() {
        let mut pool = pool_of(4);

        let outputs = pool.dispatch(vec![WorkCommand::Digest { block: [1u8; 16] }]).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].digest().unwrap(), primitives::digest(&[1u8; 16]));
    }

    #[test]
    fn rounds_wider_than_the_pool_are_rejected() {
        let mut pool = pool_of(2);
        let commands = vec![WorkCommand::Digest { block: [0u8; 16] }; 3];

        assert_eq!(
            pool.dispatch(commands),
            Err(OxtSseError::RoundWiderThanPool { lanes: 3, threads: 2 })
        );
    }

    #[test]
    fn kv_lookup_lanes_see_the_shared_store() {
        let store = Arc::new(MemKvStore::new());
        let key = KvKey { bucket: 3, slot: 0, label: [7u8; 12] };
        store.set(&key.to_bytes(), &[0xab; 49]);

        let mut pool = WorkerPool::start(2, store).unwrap();
        let outputs = pool
            .dispatch(vec![
                WorkCommand::KvLookup { key },
                WorkCommand::KvLookup {
                    key: KvKey { bucket: 4, slot: 0, label: [7u8; 12] },
                },
            ])
            .unwrap();

        assert_eq!(outputs[0].kv_value().unwrap(), Some([0xab; 49]));
        assert_eq!(outputs[1].kv_value().unwrap(), None);
    }

    #[test]
    fn many_rounds_reuse_the_same_generation_barrier() {
        let mut pool = pool_of(3);
        for i in 0..50u8 {
            let outputs = pool.dispatch(vec![WorkCommand::Digest { block: [i; 16] }; 3]).unwrap();
            assert_eq!(outputs.len(), 3);
            assert!(outputs.iter().all(|o| *o == outputs[0]));
        }
        pool.stop();
    }
}
