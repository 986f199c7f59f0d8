use std::collections::HashMap;
use std::error::Error;
use std::net::TcpListener;
use std::sync::Arc;

use oxtsse_common::bloom::BloomFilter;
use oxtsse_common::kv::MemKvStore;
use oxtsse_common::primitives;
use oxtsse_common::{Config, KeySet};
use oxtsse_server::Server;

const HOST_IP: &str = "127.0.0.1";
const HOST_PORT: u16 = 8080;

// database path, threads, keywords, max ids per keyword, filter bits, address bits
const DEMO_CONFIG: &str = "demo-fruit-db\n4\n8\n64\n65536\n16\n";

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();

    let config = Config::parse(DEMO_CONFIG)?;
    let filter = BloomFilter::build(config.bloom_capacity_bits, config.bloom_address_bits, config.hash_count())?;
    let mut server = Server::new(config, KeySet::fixed_for_testing(), Arc::new(MemKvStore::new()), filter)?;

    // Toy corpus: each document is a (color, fruit...) record; a keyword
    // maps to the identifiers of every document containing it.
    let documents: [(&str, &[&str]); 6] = [
        ("doc-apple", &["fruit", "red", "crisp"]),
        ("doc-cherry", &["fruit", "red", "small"]),
        ("doc-banana", &["fruit", "yellow"]),
        ("doc-lemon", &["fruit", "yellow", "sour"]),
        ("doc-grape", &["fruit", "purple", "small"]),
        ("doc-fire-truck", &["red"]),
    ];

    let mut database: HashMap<Vec<u8>, Vec<[u8; 16]>> = HashMap::new();
    for (id, keywords) in documents {
        for keyword in keywords {
            database
                .entry(keyword.as_bytes().to_vec())
                .or_default()
                .push(primitives::identifier_block(id.as_bytes()));
        }
    }

    server.build_index(&database)?;
    println!("Indexed {} documents under {} keywords", documents.len(), database.len());

    let address = format!("{}:{}", HOST_IP, HOST_PORT);
    let listener = TcpListener::bind(&address)?;
    println!("OxtSSE server listening @ {}", address);

    server.serve(&listener)?;

    Ok(())
}
