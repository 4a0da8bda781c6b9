//! Poly1305 one-time authenticator
//!
//! Arithmetic modulo 2^130 - 5 on ten 13-bit limbs held in `u32`, so every
//! partial product sum stays below 2^32.

/// One-time key size in bytes (`r` followed by `s`)
pub const POLY1305_KEY_LENGTH: usize = 32;

/// Authentication tag size in bytes
pub const TAG_LENGTH: usize = 16;

const LIMBS: usize = 10;
const LIMB_MASK: u32 = 0x1fff;

/// Clamp applied to `r`, expressed per limb
const R_CLAMP: [u32; LIMBS] = [
    0x1fff, 0x1fff, 0x1f03, 0x1fff, 0x00ff, 0x1ffe, 0x1fff, 0x1f81, 0x1fff, 0x007f,
];

/// 2^128 marker for a full block, placed in the top limb
const FULL_BLOCK_BIT: u32 = 1 << 11;

/// Split 16 little-endian bytes into 13-bit limbs
fn to_limbs(bytes: &[u8]) -> [u32; LIMBS] {
    let mut t = [0u32; 8];
    for (word, pair) in t.iter_mut().zip(bytes.chunks_exact(2)) {
        *word = u32::from(pair[0]) | (u32::from(pair[1]) << 8);
    }

    [
        t[0] & LIMB_MASK,
        ((t[0] >> 13) | (t[1] << 3)) & LIMB_MASK,
        ((t[1] >> 10) | (t[2] << 6)) & LIMB_MASK,
        ((t[2] >> 7) | (t[3] << 9)) & LIMB_MASK,
        ((t[3] >> 4) | (t[4] << 12)) & LIMB_MASK,
        (t[4] >> 1) & LIMB_MASK,
        ((t[4] >> 14) | (t[5] << 2)) & LIMB_MASK,
        ((t[5] >> 11) | (t[6] << 5)) & LIMB_MASK,
        ((t[6] >> 8) | (t[7] << 8)) & LIMB_MASK,
        t[7] >> 5,
    ]
}

/// Incremental Poly1305 state for a single message
pub struct Poly1305 {
    r: [u32; LIMBS],
    h: [u32; LIMBS],
    pad: [u32; 8],
}

impl Poly1305 {
    /// Create a new authenticator from a 32-byte one-time key
    pub fn new(key: &[u8; POLY1305_KEY_LENGTH]) -> Self {
        let mut r = to_limbs(&key[..16]);
        for (limb, clamp) in r.iter_mut().zip(R_CLAMP) {
            *limb &= clamp;
        }

        let mut pad = [0u32; 8];
        for (word, pair) in pad.iter_mut().zip(key[16..].chunks_exact(2)) {
            *word = u32::from(pair[0]) | (u32::from(pair[1]) << 8);
        }

        Self {
            r,
            h: [0; LIMBS],
            pad,
        }
    }

    /// Absorb a whole message and return its tag
    pub fn compute(mut self, message: &[u8]) -> [u8; TAG_LENGTH] {
        let mut blocks = message.chunks_exact(16);
        for block in &mut blocks {
            self.block(block, FULL_BLOCK_BIT);
        }

        let remainder = blocks.remainder();
        if !remainder.is_empty() {
            // Trailing partial block: append a single 1 byte, zero-fill, no 2^128 bit
            let mut last = [0u8; 16];
            last[..remainder.len()].copy_from_slice(remainder);
            last[remainder.len()] = 1;
            self.block(&last, 0);
        }

        self.finish()
    }

    fn block(&mut self, block: &[u8], high_bit: u32) {
        let m = to_limbs(block);
        let h = &mut self.h;
        let r = &self.r;

        for (limb, add) in h.iter_mut().zip(m) {
            *limb += add;
        }
        h[9] += high_bit;

        // h *= r, with limbs above 2^130 folded back in times 5
        let mut d = [0u32; LIMBS];
        let mut carry = 0u32;
        for (i, out) in d.iter_mut().enumerate() {
            let mut acc = carry;
            for (j, &hj) in h.iter().enumerate() {
                let rr = if j <= i { r[i - j] } else { 5 * r[i + LIMBS - j] };
                acc += hj * rr;

                if j == 4 {
                    carry = acc >> 13;
                    acc &= LIMB_MASK;
                }
            }
            carry += acc >> 13;
            *out = acc & LIMB_MASK;
        }

        carry = (carry << 2) + carry;
        carry += d[0];
        d[0] = carry & LIMB_MASK;
        carry >>= 13;
        d[1] += carry;

        *h = d;
    }

    fn finish(self) -> [u8; TAG_LENGTH] {
        let mut h = self.h;

        // Full carry so every limb is 13 bits and h < 2^130
        let mut carry = 0u32;
        for limb in h.iter_mut().skip(1) {
            *limb += carry;
            carry = *limb >> 13;
            *limb &= LIMB_MASK;
        }
        h[0] += carry * 5;
        carry = 0;
        for limb in h.iter_mut() {
            *limb += carry;
            carry = *limb >> 13;
            *limb &= LIMB_MASK;
        }
        h[0] += carry * 5;
        carry = h[0] >> 13;
        h[0] &= LIMB_MASK;
        h[1] += carry;

        // g = h + 5; a carry out of the top limb means h >= 2^130 - 5
        let mut g = [0u32; LIMBS];
        carry = 5;
        for (gi, &hi) in g.iter_mut().zip(h.iter()) {
            *gi = hi + carry;
            carry = *gi >> 13;
            *gi &= LIMB_MASK;
        }

        // Constant-time select of the reduced value
        let mask = 0u32.wrapping_sub(carry);
        for (hi, gi) in h.iter_mut().zip(g) {
            *hi = (*hi & !mask) | (gi & mask);
        }

        let words = [
            h[0] | (h[1] << 13),
            (h[1] >> 3) | (h[2] << 10),
            (h[2] >> 6) | (h[3] << 7),
            (h[3] >> 9) | (h[4] << 4),
            (h[4] >> 12) | (h[5] << 1) | (h[6] << 14),
            (h[6] >> 2) | (h[7] << 11),
            (h[7] >> 5) | (h[8] << 8),
            (h[8] >> 8) | (h[9] << 5),
        ];

        // tag = (h + s) mod 2^128
        let mut tag = [0u8; TAG_LENGTH];
        let mut f = 0u32;
        for ((out, word), pad) in tag.chunks_exact_mut(2).zip(words).zip(self.pad) {
            f = (word & 0xffff) + pad + (f >> 16);
            out.copy_from_slice(&(f as u16).to_le_bytes());
        }
        tag
    }
}

/// Compute the Poly1305 tag of `message` under a one-time `key`
pub fn authenticate(key: &[u8; POLY1305_KEY_LENGTH], message: &[u8]) -> [u8; TAG_LENGTH] {
    Poly1305::new(key).compute(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 8439 section 2.5.2
    const RFC_KEY: [u8; 32] = [
        0x85, 0xd6, 0xbe, 0x78, 0x57, 0x55, 0x6d, 0x33, 0x7f, 0x44, 0x52, 0xfe, 0x42, 0xd5, 0x06,
        0xa8, 0x01, 0x03, 0x80, 0x8a, 0xfb, 0x0d, 0xb2, 0xfd, 0x4a, 0xbf, 0xf6, 0xaf, 0x41, 0x49,
        0xf5, 0x1b,
    ];

    #[test]
    fn test_rfc8439_vector() {
        let tag = authenticate(&RFC_KEY, b"Cryptographic Forum Research Group");
        let expected = [
            0xa8, 0x06, 0x1d, 0xc1, 0x30, 0x51, 0x36, 0xc6, 0xc2, 0x2b, 0x8b, 0xaf, 0x0c, 0x01,
            0x27, 0xa9,
        ];
        assert_eq!(tag, expected);
    }

    #[test]
    fn test_zero_r_yields_pad() {
        // With r = 0 the accumulator stays zero and the tag equals s
        let mut key = [0u8; 32];
        key[16..].copy_from_slice(&[0xAB; 16]);
        assert_eq!(authenticate(&key, b"anything at all"), [0xAB; 16]);
    }

    #[test]
    fn test_empty_message_is_pad() {
        assert_eq!(&authenticate(&RFC_KEY, &[])[..], &RFC_KEY[16..]);
    }

    #[test]
    fn test_single_byte_change_changes_tag() {
        let message = [0x33u8; 40];
        let mut tampered = message;
        tampered[39] ^= 0x01;

        assert_ne!(
            authenticate(&RFC_KEY, &message),
            authenticate(&RFC_KEY, &tampered)
        );
    }
}
