#![cfg(test)]

use oxtsse_client::Client;
use oxtsse_common::bloom::BloomFilter;
use oxtsse_common::channel::Channel;
use oxtsse_common::kv::{self, MemKvStore};
use oxtsse_common::{Config, KeySet, OxtSseError, primitives};
use oxtsse_server::Server;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeSet, HashMap};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const THREADS: usize = 4;

fn test_config() -> Config {
    Config::parse("test-db\n4\n64\n64\n65536\n16\n").expect("test configuration must parse")
}

fn id_block(name: &str) -> [u8; 16] {
    primitives::identifier_block(name.as_bytes())
}

fn build_database(entries: &[(&str, &[&str])]) -> HashMap<Vec<u8>, Vec<[u8; 16]>> {
    let mut database: HashMap<Vec<u8>, Vec<[u8; 16]>> = HashMap::new();
    for (doc, keywords) in entries {
        for keyword in keywords.iter() {
            database.entry(keyword.as_bytes().to_vec()).or_default().push(id_block(doc));
        }
    }
    database
}

/// Spins up a server over the given database and serves `connections`
/// queries sequentially on a loopback listener.
fn spawn_server(database: HashMap<Vec<u8>, Vec<[u8; 16]>>, connections: usize) -> (SocketAddr, JoinHandle<Vec<Result<usize, OxtSseError>>>) {
    let config = test_config();
    let filter = BloomFilter::build(config.bloom_capacity_bits, config.bloom_address_bits, config.hash_count()).unwrap();
    let mut server = Server::new(config, KeySet::fixed_for_testing(), Arc::new(MemKvStore::new()), filter).unwrap();
    server.build_index(&database).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        (0..connections)
            .map(|_| {
                let (stream, _) = listener.accept().unwrap();
                let mut channel = Channel::new(stream);
                server.serve_connection(&mut channel)
            })
            .collect()
    });

    (address, handle)
}

fn run_query(client: &mut Client, address: SocketAddr, first: &str, secondary: &[&str]) -> BTreeSet<[u8; 16]> {
    let stream = TcpStream::connect(address).unwrap();
    let mut channel = Channel::new(stream);

    let secondary_bytes: Vec<&[u8]> = secondary.iter().map(|s| s.as_bytes()).collect();
    client.search(&mut channel, first.as_bytes(), &secondary_bytes).unwrap()
}

#[test]
fn conjunction_present_in_one_document_matches_it() {
    let database = build_database(&[("doc-1", &["alpha", "beta"]), ("doc-2", &["beta"])]);
    let (address, handle) = spawn_server(database, 1);

    let mut client = Client::new(test_config(), KeySet::fixed_for_testing()).unwrap();
    let matches = run_query(&mut client, address, "alpha", &["beta"]);

    assert_eq!(matches, BTreeSet::from([id_block("doc-1")]));
    assert_eq!(handle.join().unwrap(), vec![Ok(1)]);
}

#[test]
fn conjunction_with_an_absent_keyword_matches_nothing() {
    let database = build_database(&[("doc-1", &["alpha", "beta"]), ("doc-2", &["gamma"])]);
    let (address, handle) = spawn_server(database, 1);

    let mut client = Client::new(test_config(), KeySet::fixed_for_testing()).unwrap();
    let matches = run_query(&mut client, address, "alpha", &["gamma"]);

    assert!(matches.is_empty());
    assert_eq!(handle.join().unwrap(), vec![Ok(0)]);
}

#[test]
fn single_keyword_query_accepts_every_retrieved_row() {
    let docs: [(&str, &[&str]); 5] = [
        ("doc-1", &["alpha"]),
        ("doc-2", &["alpha"]),
        ("doc-3", &["alpha", "beta"]),
        ("doc-4", &["alpha"]),
        ("doc-5", &["beta"]),
    ];
    let database = build_database(&docs);
    let (address, handle) = spawn_server(database, 1);

    let mut client = Client::new(test_config(), KeySet::fixed_for_testing()).unwrap();
    let matches = run_query(&mut client, address, "alpha", &[]);

    // With no secondary terms the match count equals the tuple-set row
    // count: the row/counter bookkeeping advances on accepted rows exactly
    // as on verified ones.
    assert_eq!(handle.join().unwrap(), vec![Ok(4)]);
    assert_eq!(
        matches,
        BTreeSet::from([id_block("doc-1"), id_block("doc-2"), id_block("doc-3"), id_block("doc-4")])
    );
}

#[test]
fn queries_over_an_unindexed_keyword_complete_empty() {
    let database = build_database(&[("doc-1", &["alpha"])]);
    let (address, handle) = spawn_server(database, 1);

    let mut client = Client::new(test_config(), KeySet::fixed_for_testing()).unwrap();
    let matches = run_query(&mut client, address, "omega", &["alpha"]);

    assert!(matches.is_empty());
    assert_eq!(handle.join().unwrap(), vec![Ok(0)]);
}

#[test]
fn duplicate_identifiers_collapse_in_the_result_set() {
    let mut database: HashMap<Vec<u8>, Vec<[u8; 16]>> = HashMap::new();
    database.insert(b"alpha".to_vec(), vec![id_block("doc-1"), id_block("doc-1"), id_block("doc-2")]);

    let (address, handle) = spawn_server(database, 1);

    let mut client = Client::new(test_config(), KeySet::fixed_for_testing()).unwrap();
    let matches = run_query(&mut client, address, "alpha", &[]);

    assert_eq!(handle.join().unwrap(), vec![Ok(3)]);
    assert_eq!(matches, BTreeSet::from([id_block("doc-1"), id_block("doc-2")]));
}

#[test]
fn three_way_conjunctions_intersect_correctly() {
    let docs: [(&str, &[&str]); 4] = [
        ("doc-1", &["alpha", "beta", "gamma"]),
        ("doc-2", &["alpha", "beta"]),
        ("doc-3", &["alpha", "gamma"]),
        ("doc-4", &["alpha", "beta", "gamma"]),
    ];
    let database = build_database(&docs);
    let (address, handle) = spawn_server(database, 2);

    let mut client = Client::new(test_config(), KeySet::fixed_for_testing()).unwrap();

    let matches = run_query(&mut client, address, "alpha", &["beta", "gamma"]);
    assert_eq!(matches, BTreeSet::from([id_block("doc-1"), id_block("doc-4")]));

    let matches = run_query(&mut client, address, "beta", &["gamma"]);
    assert_eq!(matches, BTreeSet::from([id_block("doc-1"), id_block("doc-4")]));

    handle.join().unwrap();
}

#[test]
fn randomized_conjunctions_agree_with_plaintext_search() {
    const DOCS: usize = 40;
    const KEYWORDS: [&str; 6] = ["k0", "k1", "k2", "k3", "k4", "k5"];
    const QUERIES: usize = 8;

    let mut rng = ChaCha8Rng::seed_from_u64(1337);

    // Random sparse incidence of keywords over documents.
    let mut incidence: HashMap<&str, BTreeSet<usize>> = HashMap::new();
    let mut entries: Vec<(String, Vec<&str>)> = Vec::new();
    for doc in 0..DOCS {
        let mut kws = Vec::new();
        for keyword in KEYWORDS {
            if rng.random_bool(0.4) {
                kws.push(keyword);
                incidence.entry(keyword).or_default().insert(doc);
            }
        }
        entries.push((format!("doc-{:04}", doc), kws));
    }

    let mut database: HashMap<Vec<u8>, Vec<[u8; 16]>> = HashMap::new();
    for (doc, kws) in entries.iter() {
        for keyword in kws {
            database.entry(keyword.as_bytes().to_vec()).or_default().push(id_block(doc));
        }
    }

    let (address, handle) = spawn_server(database, QUERIES);
    let mut client = Client::new(test_config(), KeySet::fixed_for_testing()).unwrap();

    for q in 0..QUERIES {
        let first = KEYWORDS[q % KEYWORDS.len()];
        let second = KEYWORDS[(q + 1) % KEYWORDS.len()];

        let expected: BTreeSet<[u8; 16]> = incidence
            .get(first)
            .cloned()
            .unwrap_or_default()
            .intersection(&incidence.get(second).cloned().unwrap_or_default())
            .map(|doc| id_block(&format!("doc-{:04}", doc)))
            .collect();

        let matches = run_query(&mut client, address, first, &[second]);
        assert_eq!(matches, expected, "query ({}, {})", first, second);
    }

    handle.join().unwrap();
}

#[test]
fn mismatched_token_batches_abort_the_connection() {
    let database = build_database(&[("doc-1", &["alpha", "beta"])]);
    let (address, handle) = spawn_server(database, 1);

    // A misbehaving client announcing one token too many.
    let stream = TcpStream::connect(address).unwrap();
    let mut channel = Channel::new(stream);

    channel.write_all_bytes(&primitives::keyword_block(b"alpha")).unwrap();
    channel.write_u32(1).unwrap();
    channel.flush().unwrap();

    let row_count = channel.read_u32().unwrap() as usize;
    assert_eq!(row_count, 1);

    let expected = row_count.div_ceil(THREADS) * THREADS;
    channel.write_u32((expected + 1) as u32).unwrap();
    channel.flush().unwrap();

    let results = handle.join().unwrap();
    assert_eq!(
        results,
        vec![Err(OxtSseError::TokenBatchSizeMismatch {
            expected,
            received: expected + 1
        })]
    );

    // The connection is gone; the peer sees a transport error, not data.
    let mut probe = [0u8; 4];
    assert!(channel.read_exact_into(&mut probe).is_err());
}

#[test]
fn shipped_index_and_filter_answer_queries_remotely() {
    // Build the index locally against an in-process store.
    let config = test_config();
    let builder_store = Arc::new(MemKvStore::new());
    let filter = BloomFilter::build(config.bloom_capacity_bits, config.bloom_address_bits, config.hash_count()).unwrap();
    let mut builder = Server::new(config.clone(), KeySet::fixed_for_testing(), builder_store.clone(), filter).unwrap();

    let database = build_database(&[("doc-1", &["alpha", "beta"]), ("doc-2", &["alpha"])]);
    builder.build_index(&database).unwrap();

    let filter_path = std::env::temp_dir().join("oxtsse_shipped_filter.dat");
    builder.filter().save(&filter_path).unwrap();
    drop(builder);

    // Ship rows and filter file to a fresh server over a loopback stream.
    let serving_store = Arc::new(MemKvStore::new());
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();

    let receiver = {
        let serving_store = serving_store.clone();
        let shipped_path = std::env::temp_dir().join("oxtsse_received_filter.dat");
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut channel = Channel::new(stream);

            let stored = kv::recv_entries(&mut channel, serving_store.as_ref()).unwrap();
            channel.recv_file(&shipped_path).unwrap();
            (stored, shipped_path)
        })
    };

    let stream = TcpStream::connect(address).unwrap();
    let mut channel = Channel::new(stream);
    let entries = builder_store.snapshot();
    kv::send_entries(&mut channel, &entries).unwrap();
    channel.send_file(&filter_path).unwrap();

    let (stored, shipped_path) = receiver.join().unwrap();
    assert_eq!(stored, entries.len());

    // The remote server runs on the shipped artifacts alone.
    let shipped_filter = BloomFilter::load(&shipped_path, config.bloom_capacity_bits, config.bloom_address_bits, config.hash_count()).unwrap();
    let mut server = Server::new(config.clone(), KeySet::fixed_for_testing(), serving_store, shipped_filter).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut channel = Channel::new(stream);
        server.serve_connection(&mut channel)
    });

    let mut client = Client::new(config, KeySet::fixed_for_testing()).unwrap();
    let stream = TcpStream::connect(address).unwrap();
    let mut query_channel = Channel::new(stream);
    let matches = client.search(&mut query_channel, b"alpha", &[b"beta"]).unwrap();

    assert_eq!(matches, BTreeSet::from([id_block("doc-1")]));
    assert_eq!(handle.join().unwrap(), Ok(1));

    std::fs::remove_file(&filter_path).unwrap();
    std::fs::remove_file(&shipped_path).unwrap();
}
