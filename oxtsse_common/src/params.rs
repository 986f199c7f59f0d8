//! Fixed widths and shared geometry of the scheme.
//!
//! All field and group material lives on curve25519: scalars are reduced mod
//! the group order ℓ = 2^252 + 27742317777372353535851937790883648493 and
//! points are Montgomery u-coordinates (fixed base u = 9).

/// Width of a cipher block, a keyword block, a derived key and an encrypted
/// document identifier.
pub const BLOCK_BYTE_LEN: usize = 16;

/// Width of a symmetric key.
pub const KEY_BYTE_LEN: usize = 16;

/// Width of a serialized group scalar or Montgomery point.
pub const POINT_BYTE_LEN: usize = 32;

/// Width of one digest squeezed for probe-chain and membership hashing.
pub const DIGEST_BYTE_LEN: usize = 64;

/// Width of one tuple-set row: 32-byte group material Y followed by the
/// 16-byte encrypted identifier E.
pub const TSET_ROW_BYTE_LEN: usize = POINT_BYTE_LEN + BLOCK_BYTE_LEN;

/// Width of one stored tuple-set value: masked termination byte followed by
/// the masked row.
pub const TSET_VALUE_BYTE_LEN: usize = 1 + TSET_ROW_BYTE_LEN;

/// Width of a key in the external key-value store:
/// bucket (2) ‖ slot (2) ‖ label (12).
pub const KV_KEY_BYTE_LEN: usize = 16;

/// Width of the label part of a key-value store key.
pub const LABEL_BYTE_LEN: usize = 12;

/// Number of buckets addressable by the two-byte bucket index.
pub const BUCKET_COUNT: usize = 1 << 16;

/// Width of the salted message hashed for one membership probe:
/// point (32) ‖ zero padding (7) ‖ hash index (1).
pub const BLOOM_MESSAGE_BYTE_LEN: usize = 40;

/// Domain separator for the keyed/membership flavour of the digest. The
/// plain flavour uses the TurboSHAKE128 default separator.
pub const BLOOM_DOMAIN_SEPARATOR: u8 = 0x0b;

/// Offset of the termination mask byte inside a probe digest.
pub const TERMINATION_MASK_OFFSET: usize = 15;

/// Offset of the 48-byte content mask inside a probe digest.
pub const CONTENT_MASK_OFFSET: usize = 16;

/// Largest per-keyword identifier list the row counters can address.
pub const MAX_IDS_LIMIT: usize = 1 << 16;

/// Rounds a row count up to a whole number of worker lanes. Zero rows stay
/// zero so an empty retrieval exchanges empty buffers.
#[inline(always)]
pub const fn padded_rows(rows: usize, lanes: usize) -> usize {
    rows.div_ceil(lanes) * lanes
}

#[cfg(test)]
mod test {
    use super::padded_rows;

    #[test]
    fn padded_rows_rounds_up_to_lane_multiples() {
        assert_eq!(padded_rows(0, 4), 0);
        assert_eq!(padded_rows(1, 4), 4);
        assert_eq!(padded_rows(4, 4), 4);
        assert_eq!(padded_rows(5, 4), 8);
        assert_eq!(padded_rows(7, 1), 7);
    }
}
