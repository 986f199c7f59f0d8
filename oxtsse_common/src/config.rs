//! Line-oriented startup configuration, one value per line in a fixed
//! order. Parsing is strictly positional; a missing or unparsable line
//! aborts startup.

use crate::branch_opt_util;
use crate::error::OxtSseError;
use crate::params::MAX_IDS_LIMIT;
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Path of the plaintext database the index was built from. Ingestion
    /// itself lives outside this crate; the path is carried for operators.
    pub database_path: String,
    /// Worker threads per pool; also the number of membership hash
    /// functions, one keyed digest per lane per round.
    pub thread_count: usize,
    /// Number of keywords in the indexed database.
    pub keyword_count: usize,
    /// Upper bound on identifiers per keyword; bounds probe chains and wire
    /// buffer capacities.
    pub max_ids_per_keyword: usize,
    /// Membership filter size in bits.
    pub bloom_capacity_bits: usize,
    /// Bits of a probe digest used to address the filter.
    pub bloom_address_bits: usize,
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Config, OxtSseError> {
        let text = fs::read_to_string(path).map_err(|e| OxtSseError::ConfigUnreadable(e.to_string()))?;
        Config::parse(&text)
    }

    /// Parses the six fixed lines:
    /// database path, thread count, keyword count, max identifiers per
    /// keyword, filter capacity in bits, filter address bits.
    pub fn parse(text: &str) -> Result<Config, OxtSseError> {
        let mut lines = text.lines();

        let database_path = next_line(&mut lines, "database path")?.to_string();
        let thread_count = parse_count(next_line(&mut lines, "thread count")?, "thread count")?;
        let keyword_count = parse_count(next_line(&mut lines, "keyword count")?, "keyword count")?;
        let max_ids_per_keyword = parse_count(next_line(&mut lines, "max identifiers per keyword")?, "max identifiers per keyword")?;
        let bloom_capacity_bits = parse_count(next_line(&mut lines, "bloom filter capacity")?, "bloom filter capacity")?;
        let bloom_address_bits = parse_count(next_line(&mut lines, "bloom filter address bits")?, "bloom filter address bits")?;

        let config = Config {
            database_path,
            thread_count,
            keyword_count,
            max_ids_per_keyword,
            bloom_capacity_bits,
            bloom_address_bits,
        };
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), OxtSseError> {
        if branch_opt_util::unlikely(self.thread_count == 0) {
            return Err(OxtSseError::InvalidThreadCount(self.thread_count));
        }
        if branch_opt_util::unlikely(self.max_ids_per_keyword == 0 || self.max_ids_per_keyword > MAX_IDS_LIMIT) {
            return Err(OxtSseError::MaxIdsOutOfRange(self.max_ids_per_keyword));
        }
        if branch_opt_util::unlikely(self.bloom_address_bits == 0 || self.bloom_address_bits > 32 || self.bloom_capacity_bits < (1usize << self.bloom_address_bits))
        {
            return Err(OxtSseError::InvalidBloomGeometry {
                capacity_bits: self.bloom_capacity_bits,
                address_bits: self.bloom_address_bits,
            });
        }

        Ok(())
    }

    /// Number of membership hash functions: one keyed digest per worker lane
    /// per round.
    #[inline(always)]
    pub fn hash_count(&self) -> usize {
        self.thread_count
    }
}

fn next_line<'a>(lines: &mut std::str::Lines<'a>, field: &'static str) -> Result<&'a str, OxtSseError> {
    match lines.next() {
        Some(line) => Ok(line.trim()),
        None => Err(OxtSseError::MissingConfigEntry(field)),
    }
}

fn parse_count(line: &str, field: &'static str) -> Result<usize, OxtSseError> {
    line.parse::<usize>().map_err(|_| OxtSseError::MalformedConfigEntry {
        field,
        value: line.to_string(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    const GOOD: &str = "databases/db6k.csv\n4\n6000\n128\n65536\n16\n";

    #[test]
    fn well_formed_configuration_parses() {
        let config = Config::parse(GOOD).unwrap();

        assert_eq!(config.database_path, "databases/db6k.csv");
        assert_eq!(config.thread_count, 4);
        assert_eq!(config.keyword_count, 6000);
        assert_eq!(config.max_ids_per_keyword, 128);
        assert_eq!(config.bloom_capacity_bits, 65536);
        assert_eq!(config.bloom_address_bits, 16);
        assert_eq!(config.hash_count(), 4);
    }

    #[test]
    fn missing_lines_abort() {
        assert_eq!(
            Config::parse("databases/db6k.csv\n4\n"),
            Err(OxtSseError::MissingConfigEntry("keyword count"))
        );
    }

    #[test]
    fn malformed_counts_abort() {
        assert_eq!(
            Config::parse("databases/db6k.csv\nfour\n6000\n128\n65536\n16\n"),
            Err(OxtSseError::MalformedConfigEntry {
                field: "thread count",
                value: "four".to_string()
            })
        );
    }

    #[test]
    fn unaddressable_filter_geometry_aborts() {
        assert_eq!(
            Config::parse("db.csv\n4\n6000\n128\n1024\n16\n"),
            Err(OxtSseError::InvalidBloomGeometry {
                capacity_bits: 1024,
                address_bits: 16
            })
        );
    }

    #[test]
    fn oversized_identifier_limit_aborts() {
        assert_eq!(Config::parse("db.csv\n4\n6000\n100000\n65536\n16\n"), Err(OxtSseError::MaxIdsOutOfRange(100000)));
    }
}
