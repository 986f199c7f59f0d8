use std::{error::Error, fmt::Display};

#[derive(Debug, PartialEq)]
pub enum OxtSseError {
    // Configuration
    ConfigUnreadable(String),
    MissingConfigEntry(&'static str),
    MalformedConfigEntry { field: &'static str, value: String },
    InvalidThreadCount(usize),
    MaxIdsOutOfRange(usize),
    InvalidBloomGeometry { capacity_bits: usize, address_bits: usize },

    // Transport
    Transport(String),

    // Protocol
    TooManySearchTerms { terms: usize, lanes: usize },
    TokenBatchSizeMismatch { expected: usize, received: usize },
    MatchCountExceedsRowCount { matches: usize, rows: usize },
    RowCountExceedsCapacity { rows: usize, capacity: usize },

    // Worker pool
    RoundWiderThanPool { lanes: usize, threads: usize },
    WorkerLost,
    UnexpectedWorkerOutput,

    // Encrypted index
    KeywordOverCapacity { ids: usize, capacity: usize },

    // Bloom filter persistence
    BloomFilterFileSizeMismatch { expected: usize, actual: usize },
}

impl Display for OxtSseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigUnreadable(e) => write!(f, "Configuration file can not be read: {}", e),
            Self::MissingConfigEntry(field) => write!(f, "Configuration is missing the '{}' line.", field),
            Self::MalformedConfigEntry { field, value } => write!(f, "Configuration line '{}' holds unparsable value '{}'.", field, value),
            Self::InvalidThreadCount(count) => write!(f, "Worker thread count must be at least 1, got {}.", count),
            Self::MaxIdsOutOfRange(count) => write!(f, "Per-keyword identifier limit must be within 1..=65536, got {}.", count),
            Self::InvalidBloomGeometry { capacity_bits, address_bits } => {
                write!(f, "A {}-bit filter can not be addressed with {} bits.", capacity_bits, address_bits)
            }

            Self::Transport(e) => write!(f, "Connection failed: {}", e),

            Self::TooManySearchTerms { terms, lanes } => {
                write!(f, "Query carries {} secondary terms but a round has only {} lanes.", terms, lanes)
            }
            Self::TokenBatchSizeMismatch { expected, received } => {
                write!(f, "Announced token batch of {} entries does not match the expected {}.", received, expected)
            }
            Self::MatchCountExceedsRowCount { matches, rows } => {
                write!(f, "Server reported {} matches for only {} retrieved rows.", matches, rows)
            }
            Self::RowCountExceedsCapacity { rows, capacity } => {
                write!(f, "Server announced {} rows but the configured per-keyword limit is {}.", rows, capacity)
            }

            Self::RoundWiderThanPool { lanes, threads } => {
                write!(f, "A round of {} commands can not run on {} worker threads.", lanes, threads)
            }
            Self::WorkerLost => write!(f, "A worker thread exited while a round was in flight."),
            Self::UnexpectedWorkerOutput => write!(f, "Worker produced an output of the wrong kind for the dispatched opcode."),

            Self::KeywordOverCapacity { ids, capacity } => {
                write!(f, "Keyword indexes {} identifiers but the configured limit is {}.", ids, capacity)
            }

            Self::BloomFilterFileSizeMismatch { expected, actual } => {
                write!(f, "Bloom filter file holds {} bytes, configured dimensions require {}.", actual, expected)
            }
        }
    }
}

impl Error for OxtSseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}
