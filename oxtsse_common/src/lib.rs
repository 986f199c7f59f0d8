//! OxtSSE: a two-party conjunctive searchable symmetric encryption engine in
//! the OXT family.
//!
//! A client holding keyword trapdoors and a server holding an encrypted
//! tuple-set index jointly answer conjunctive keyword queries: the server
//! learns neither the plaintext keywords nor which documents matched beyond
//! the leakage inherent to the scheme, and the client never sees the index.
//!
//! This crate carries everything both roles share:
//!
//! * `pool`: the round-synchronized worker pool executing one opcode across
//!   all threads per round, with a generation-counted barrier.
//! * `bloom`: the multi-hash membership filter answering conjunctive
//!   cross-tag checks.
//! * `tset`: the encrypted tuple-set, built and retrieved as probe chains
//!   over the external key-value store.
//! * `channel`: fixed-length message exchange and the out-of-band file
//!   helper.
//! * `kv`: the get/set boundary to the external row store, with an
//!   in-process implementation.
//! * `primitives`, `keys`, `config`, `params`, `error`: the supporting
//!   cast.
//!
//! The companion crates `oxtsse_client` and `oxtsse_server` implement the
//! two protocol roles on top of this one.

pub mod affinity;
pub mod barrier;
pub mod bloom;
pub mod channel;
pub mod config;
pub mod error;
pub mod keys;
pub mod kv;
pub mod params;
pub mod pool;
pub mod primitives;
pub mod tset;

mod branch_opt_util;

pub use config::Config;
pub use error::OxtSseError;
pub use keys::KeySet;
