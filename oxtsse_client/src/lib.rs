//! OxtSSE client: holds the symmetric keys of the scheme, derives blinded
//! cross-tokens for conjunctive queries, and decrypts the matching document
//! identifiers the server sends back.
//!
//! The client never ships a key across the wire: the server receives only
//! the fixed-width block of the first keyword plus one blinded group element
//! per (secondary keyword, row counter) pair, and answers with encrypted
//! identifiers only the client can open.
//!
//! ```no_run
//! use oxtsse_client::Client;
//! use oxtsse_common::{Config, KeySet, channel::Channel};
//! use std::net::TcpStream;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::parse("demo.csv\n4\n16\n64\n65536\n16\n")?;
//!     let mut client = Client::new(config, KeySet::fixed_for_testing())?;
//!
//!     let stream = TcpStream::connect("127.0.0.1:8080")?;
//!     let mut channel = Channel::new(stream);
//!
//!     let matches = client.search(&mut channel, b"alpha", &[b"beta"])?;
//!     println!("{} documents match", matches.len());
//!     Ok(())
//! }
//! ```

mod client;

pub use client::Client;
pub use oxtsse_common::{Config, KeySet, OxtSseError};
