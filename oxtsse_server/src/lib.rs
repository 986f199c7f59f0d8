//! OxtSSE server: holds the encrypted tuple-set index, the membership
//! filter and the worker pool, and answers conjunctive queries without ever
//! seeing a plaintext keyword.
//!
//! The server can build its index locally from a plaintext keyword map, or
//! receive rows built elsewhere over the index-upload stream together with
//! the membership filter file.
//!
//! ```no_run
//! use oxtsse_server::Server;
//! use oxtsse_common::{Config, KeySet, bloom::BloomFilter, kv::MemKvStore};
//! use std::collections::HashMap;
//! use std::net::TcpListener;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::parse("demo.csv\n4\n16\n64\n65536\n16\n")?;
//!     let filter = BloomFilter::build(config.bloom_capacity_bits, config.bloom_address_bits, config.hash_count())?;
//!     let mut server = Server::new(config, KeySet::fixed_for_testing(), Arc::new(MemKvStore::new()), filter)?;
//!
//!     let mut database: HashMap<Vec<u8>, Vec<[u8; 16]>> = HashMap::new();
//!     database.insert(b"alpha".to_vec(), vec![[1u8; 16]]);
//!     server.build_index(&database)?;
//!
//!     let listener = TcpListener::bind("127.0.0.1:8080")?;
//!     server.serve(&listener)?;
//!     Ok(())
//! }
//! ```

mod server;

pub use oxtsse_common::{Config, KeySet, OxtSseError};
pub use server::Server;
