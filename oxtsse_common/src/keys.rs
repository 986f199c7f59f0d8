use crate::params::KEY_BYTE_LEN;

/// The five symmetric keys of the scheme. Both roles are constructed from the
/// same set: the server derives search tags and the client derives tokens and
/// decrypts identifiers, but neither key ever crosses the wire.
#[derive(Clone, Copy)]
pub struct KeySet {
    /// Encrypts document identifiers (through a per-keyword derived key).
    pub identifier_key: [u8; KEY_BYTE_LEN],
    /// Maps a document identifier to a field element.
    pub index_key: [u8; KEY_BYTE_LEN],
    /// Maps a (keyword, row counter) pair to a field element.
    pub counter_key: [u8; KEY_BYTE_LEN],
    /// Maps a secondary keyword to a field element.
    pub cross_key: [u8; KEY_BYTE_LEN],
    /// Derives search tags from first-position keywords.
    pub tag_key: [u8; KEY_BYTE_LEN],
}

impl KeySet {
    pub const fn from_parts(
        identifier_key: [u8; KEY_BYTE_LEN],
        index_key: [u8; KEY_BYTE_LEN],
        counter_key: [u8; KEY_BYTE_LEN],
        cross_key: [u8; KEY_BYTE_LEN],
        tag_key: [u8; KEY_BYTE_LEN],
    ) -> KeySet {
        KeySet {
            identifier_key,
            index_key,
            counter_key,
            cross_key,
            tag_key,
        }
    }

    /// The AES-128 test-vector key in every slot. For experiments and demos
    /// only; a deployment provisions five independent keys.
    pub const fn fixed_for_testing() -> KeySet {
        const K: [u8; KEY_BYTE_LEN] = [
            0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f, 0x3c,
        ];
        KeySet::from_parts(K, K, K, K, K)
    }
}
