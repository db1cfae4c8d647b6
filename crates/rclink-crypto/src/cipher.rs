//! RC6-32/20/b block cipher
//!
//! 128-bit blocks as four little-endian 32-bit words `A, B, C, D`, 20 rounds,
//! variable-length key. Multi-block helpers pad with [`crate::padding`] and
//! process each block independently (ECB); each call to [`BlockCipher::encrypt`]
//! produces a self-contained ciphertext.

use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::keys::SymmetricKey;
use crate::padding::{pad, unpad};
use crate::{BLOCK_SIZE, ROUNDS, WORD_BITS};

/// Number of round-key words: two whitening pairs plus two per round
pub const ROUND_KEY_WORDS: usize = 2 * ROUNDS + 4;

/// Magic constants P32 = Odd((e-2)·2^32), Q32 = Odd((φ-1)·2^32)
const P32: u32 = 0xB7E1_5163;
const Q32: u32 = 0x9E37_79B9;

const WORD_BYTES: usize = (WORD_BITS / 8) as usize;

/// Expanded key table `S[0..44]`. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct RoundKeys {
    words: [u32; ROUND_KEY_WORDS],
}

impl RoundKeys {
    /// Run the key schedule over `key` (any length, including empty).
    pub fn expand(key: &[u8]) -> Self {
        // Trailing partial word only uses the bytes present
        let mut l: Vec<u32> = key
            .chunks(WORD_BYTES)
            .map(|bytes| {
                bytes
                    .iter()
                    .enumerate()
                    .fold(0u32, |w, (k, &b)| w | (u32::from(b) << (8 * k)))
            })
            .collect();
        if l.is_empty() {
            l.push(0);
        }
        let c = l.len();

        let mut s = [0u32; ROUND_KEY_WORDS];
        s[0] = P32;
        for i in 1..ROUND_KEY_WORDS {
            s[i] = s[i - 1].wrapping_add(Q32);
        }

        let (mut a, mut b) = (0u32, 0u32);
        let (mut i, mut j) = (0usize, 0usize);
        for _ in 0..3 * c.max(ROUND_KEY_WORDS) {
            s[i] = s[i].wrapping_add(a).wrapping_add(b).rotate_left(3);
            a = s[i];
            let ab = a.wrapping_add(b);
            l[j] = l[j].wrapping_add(ab).rotate_left(ab % WORD_BITS);
            b = l[j];
            i = (i + 1) % ROUND_KEY_WORDS;
            j = (j + 1) % c;
        }
        l.zeroize();

        Self { words: s }
    }

    pub fn as_words(&self) -> &[u32; ROUND_KEY_WORDS] {
        &self.words
    }
}

impl Drop for RoundKeys {
    fn drop(&mut self) {
        self.words.zeroize();
    }
}

impl std::fmt::Debug for RoundKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundKeys")
            .field("words", &"[REDACTED]")
            .finish()
    }
}

/// RC6 engine bound to one key schedule.
#[derive(Debug, Clone)]
pub struct BlockCipher {
    keys: RoundKeys,
}

impl BlockCipher {
    pub fn new(key: &[u8]) -> Self {
        Self {
            keys: RoundKeys::expand(key),
        }
    }

    pub fn from_key(key: &SymmetricKey) -> Self {
        Self::new(key.as_bytes())
    }

    pub fn round_keys(&self) -> &RoundKeys {
        &self.keys
    }

    /// Encrypt exactly one 16-byte block.
    pub fn encrypt_block(&self, block: &[u8]) -> Result<[u8; BLOCK_SIZE], CryptoError> {
        let words = load_block(block)?;
        Ok(store_block(self.encrypt_words(words)))
    }

    /// Decrypt exactly one 16-byte block.
    pub fn decrypt_block(&self, block: &[u8]) -> Result<[u8; BLOCK_SIZE], CryptoError> {
        let words = load_block(block)?;
        Ok(store_block(self.decrypt_words(words)))
    }

    /// Pad `plaintext` and encrypt every block. Output is never empty.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut buf = pad(plaintext);
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            let words = words_of(block);
            block.copy_from_slice(&store_block(self.encrypt_words(words)));
        }
        buf
    }

    /// Decrypt every block and strip the padding.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::InvalidCiphertextLength {
                len: ciphertext.len(),
            });
        }

        let mut buf = ciphertext.to_vec();
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            let words = words_of(block);
            block.copy_from_slice(&store_block(self.decrypt_words(words)));
        }

        let body_len = unpad(&buf)?.len();
        buf.truncate(body_len);
        Ok(buf)
    }

    fn encrypt_words(&self, [mut a, mut b, mut c, mut d]: [u32; 4]) -> [u32; 4] {
        let s = &self.keys.words;

        b = b.wrapping_add(s[0]);
        d = d.wrapping_add(s[1]);
        for i in 1..=ROUNDS {
            let t = mix(b);
            let u = mix(d);
            a = (a ^ t).rotate_left(u % WORD_BITS).wrapping_add(s[2 * i]);
            c = (c ^ u).rotate_left(t % WORD_BITS).wrapping_add(s[2 * i + 1]);
            (a, b, c, d) = (b, c, d, a);
        }
        a = a.wrapping_add(s[2 * ROUNDS + 2]);
        c = c.wrapping_add(s[2 * ROUNDS + 3]);

        [a, b, c, d]
    }

    fn decrypt_words(&self, [mut a, mut b, mut c, mut d]: [u32; 4]) -> [u32; 4] {
        let s = &self.keys.words;

        c = c.wrapping_sub(s[2 * ROUNDS + 3]);
        a = a.wrapping_sub(s[2 * ROUNDS + 2]);
        for i in (1..=ROUNDS).rev() {
            (a, b, c, d) = (d, a, b, c);
            let u = mix(d);
            let t = mix(b);
            c = c.wrapping_sub(s[2 * i + 1]).rotate_right(t % WORD_BITS) ^ u;
            a = a.wrapping_sub(s[2 * i]).rotate_right(u % WORD_BITS) ^ t;
        }
        d = d.wrapping_sub(s[1]);
        b = b.wrapping_sub(s[0]);

        [a, b, c, d]
    }
}

/// `rotl(x·(2x+1) mod 2^32, lg w)`
#[inline]
fn mix(x: u32) -> u32 {
    x.wrapping_mul(x.wrapping_mul(2).wrapping_add(1)).rotate_left(5)
}

fn load_block(block: &[u8]) -> Result<[u32; 4], CryptoError> {
    if block.len() != BLOCK_SIZE {
        return Err(CryptoError::InvalidBlockLength { len: block.len() });
    }
    Ok(words_of(block))
}

/// Caller guarantees `block.len() == BLOCK_SIZE`.
fn words_of(block: &[u8]) -> [u32; 4] {
    let mut words = [0u32; 4];
    for (word, bytes) in words.iter_mut().zip(block.chunks_exact(WORD_BYTES)) {
        *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }
    words
}

fn store_block(words: [u32; 4]) -> [u8; BLOCK_SIZE] {
    let mut out = [0u8; BLOCK_SIZE];
    for (bytes, word) in out.chunks_exact_mut(WORD_BYTES).zip(words) {
        bytes.copy_from_slice(&word.to_le_bytes());
    }
    out
}
