//! Salsa20/20 core with the HSalsa20 subkey derivation used by XSalsa20
//!
//! State layout (16 little-endian words):
//! ```text
//! c0 k0 k1 k2
//! k3 c1 i0 i1
//! i2 i3 c2 k4
//! k5 k6 k7 c3
//! ```
//! where `c` are the "expand 32-byte k" constants, `k` the key words and `i`
//! the 16-byte input block (nonce/position).

use super::key::KEY_LENGTH;

/// Keystream block size in bytes
pub const BLOCK_LENGTH: usize = 64;

/// XSalsa20 nonce size in bytes
pub const NONCE_LENGTH: usize = 24;

const SIGMA: &[u8; 16] = b"expand 32-byte k";

const DOUBLE_ROUNDS: usize = 10;

fn load_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn initial_state(key: &[u8; KEY_LENGTH], input: &[u8; 16]) -> [u32; 16] {
    [
        load_u32(SIGMA, 0),
        load_u32(key, 0),
        load_u32(key, 4),
        load_u32(key, 8),
        load_u32(key, 12),
        load_u32(SIGMA, 4),
        load_u32(input, 0),
        load_u32(input, 4),
        load_u32(input, 8),
        load_u32(input, 12),
        load_u32(SIGMA, 8),
        load_u32(key, 16),
        load_u32(key, 20),
        load_u32(key, 24),
        load_u32(key, 28),
        load_u32(SIGMA, 12),
    ]
}

#[inline(always)]
fn quarter_round(x: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    x[b] ^= x[a].wrapping_add(x[d]).rotate_left(7);
    x[c] ^= x[b].wrapping_add(x[a]).rotate_left(9);
    x[d] ^= x[c].wrapping_add(x[b]).rotate_left(13);
    x[a] ^= x[d].wrapping_add(x[c]).rotate_left(18);
}

fn permute(x: &mut [u32; 16]) {
    for _ in 0..DOUBLE_ROUNDS {
        // Columns
        quarter_round(x, 0, 4, 8, 12);
        quarter_round(x, 5, 9, 13, 1);
        quarter_round(x, 10, 14, 2, 6);
        quarter_round(x, 15, 3, 7, 11);

        // Diagonals (rows of the transposed state)
        quarter_round(x, 0, 1, 2, 3);
        quarter_round(x, 5, 6, 7, 4);
        quarter_round(x, 10, 11, 8, 9);
        quarter_round(x, 15, 12, 13, 14);
    }
}

/// HSalsa20: derive a 32-byte subkey from a key and a 16-byte input
///
/// Returns the raw permuted words 0, 5, 10, 15, 6, 7, 8, 9 without adding
/// the initial state back in.
pub fn hsalsa20(key: &[u8; KEY_LENGTH], input: &[u8; 16]) -> [u8; 32] {
    let mut x = initial_state(key, input);
    permute(&mut x);

    let mut out = [0u8; 32];
    for (chunk, index) in out.chunks_exact_mut(4).zip([0, 5, 10, 15, 6, 7, 8, 9]) {
        chunk.copy_from_slice(&x[index].to_le_bytes());
    }
    out
}

/// Salsa20/20 keystream block for the given key and position block
pub fn salsa20_block(key: &[u8; KEY_LENGTH], input: &[u8; 16]) -> [u8; BLOCK_LENGTH] {
    let initial = initial_state(key, input);
    let mut x = initial;
    permute(&mut x);

    let mut out = [0u8; BLOCK_LENGTH];
    for ((chunk, word), start) in out.chunks_exact_mut(4).zip(x).zip(initial) {
        chunk.copy_from_slice(&word.wrapping_add(start).to_le_bytes());
    }
    out
}

/// XOR `data` in place with the XSalsa20 keystream for `key` and `nonce`
///
/// The subkey is derived from the first 16 nonce bytes. The position block
/// carries the last 8 nonce bytes followed by a 64-bit little-endian block
/// counter starting at zero.
pub fn xsalsa20_apply_keystream(
    key: &[u8; KEY_LENGTH],
    nonce: &[u8; NONCE_LENGTH],
    data: &mut [u8],
) {
    let mut subkey_input = [0u8; 16];
    subkey_input.copy_from_slice(&nonce[..16]);
    let subkey = hsalsa20(key, &subkey_input);

    let mut position = [0u8; 16];
    position[..8].copy_from_slice(&nonce[16..]);

    for (block_index, chunk) in data.chunks_mut(BLOCK_LENGTH).enumerate() {
        position[8..].copy_from_slice(&(block_index as u64).to_le_bytes());
        let keystream = salsa20_block(&subkey, &position);

        // A short final chunk only consumes as many keystream bytes as it needs
        for (byte, ks) in chunk.iter_mut().zip(keystream.iter()) {
            *byte ^= ks;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // crypto_core_hsalsa20 check from the NaCl test suite (core1)
    #[test]
    fn test_hsalsa20_known_vector() {
        let shared = [
            0x4a, 0x5d, 0x9d, 0x5b, 0xa4, 0xce, 0x2d, 0xe1, 0x72, 0x8e, 0x3b, 0xf4, 0x80, 0x35,
            0x0f, 0x25, 0xe0, 0x7e, 0x21, 0xc9, 0x47, 0xd1, 0x9e, 0x33, 0x76, 0xf0, 0x9b, 0x3c,
            0x1e, 0x16, 0x17, 0x42,
        ];
        let expected = [
            0x1b, 0x27, 0x55, 0x64, 0x73, 0xe9, 0x85, 0xd4, 0x62, 0xcd, 0x51, 0x19, 0x7a, 0x9a,
            0x46, 0xc7, 0x60, 0x09, 0x54, 0x9e, 0xac, 0x64, 0x74, 0xf2, 0x06, 0xc4, 0xee, 0x08,
            0x44, 0xf6, 0x83, 0x89,
        ];

        assert_eq!(hsalsa20(&shared, &[0u8; 16]), expected);
    }

    #[test]
    fn test_keystream_is_involution() {
        let key = [0x11u8; KEY_LENGTH];
        let nonce = [0x22u8; NONCE_LENGTH];
        let original: Vec<u8> = (0..200u8).collect();

        let mut data = original.clone();
        xsalsa20_apply_keystream(&key, &nonce, &mut data);
        assert_ne!(data, original);

        xsalsa20_apply_keystream(&key, &nonce, &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_partial_block_matches_prefix_of_full_stream() {
        let key = [0x5au8; KEY_LENGTH];
        let nonce = [0xa5u8; NONCE_LENGTH];

        let mut long = [0u8; 150];
        xsalsa20_apply_keystream(&key, &nonce, &mut long);

        let mut short = [0u8; 70];
        xsalsa20_apply_keystream(&key, &nonce, &mut short);

        assert_eq!(&long[..70], &short[..]);
    }

    #[test]
    fn test_counter_advances_per_block() {
        let key = [1u8; KEY_LENGTH];
        let nonce = [0u8; NONCE_LENGTH];

        let mut stream = [0u8; 2 * BLOCK_LENGTH];
        xsalsa20_apply_keystream(&key, &nonce, &mut stream);

        assert_ne!(&stream[..BLOCK_LENGTH], &stream[BLOCK_LENGTH..]);
    }
}
