use crate::encoding::DecodeError;

const NO_VALUE: u8 = 255;

/// A power-of-two alphabet used to render fixed-width byte strings as text.
///
/// Every alphabet here is ASCII and URL-safe.
#[derive(Debug)]
pub struct Alphabet {
    name: &'static str,
    symbols: &'static [u8],
    bits_per_char: usize,
    lookup: [u8; 256],
}

impl Alphabet {
    const fn new(
        name: &'static str,
        symbols: &'static [u8],
        bits_per_char: usize,
        case_insensitive: bool,
    ) -> Self {
        let mut lookup = [NO_VALUE; 256];
        let mut i = 0;
        while i < symbols.len() {
            let c = symbols[i];
            lookup[c as usize] = i as u8;
            if case_insensitive && c.is_ascii_uppercase() {
                lookup[(c + 32) as usize] = i as u8;
            }
            if case_insensitive && c.is_ascii_lowercase() {
                lookup[(c - 32) as usize] = i as u8;
            }
            i += 1;
        }
        Self {
            name,
            symbols,
            bits_per_char,
            lookup,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of characters needed for `bytes` input bytes.
    pub const fn encoded_len(&self, bytes: usize) -> usize {
        (bytes * 8).div_ceil(self.bits_per_char)
    }

    /// Encodes `input` into `out`, which must be exactly
    /// [`Alphabet::encoded_len`] bytes. Padding bits sit at the front so the
    /// first character only carries the leftover high bits.
    pub fn encode_into(&self, input: &[u8], out: &mut [u8]) {
        debug_assert_eq!(out.len(), self.encoded_len(input.len()));
        let mask = (1_u16 << self.bits_per_char) - 1;
        let mut bits = out.len() * self.bits_per_char - input.len() * 8;
        let mut acc = 0_u16;
        let mut pos = 0;
        for &b in input {
            acc = (acc << 8) | u16::from(b);
            bits += 8;
            while bits >= self.bits_per_char {
                bits -= self.bits_per_char;
                out[pos] = self.symbols[usize::from((acc >> bits) & mask)];
                pos += 1;
            }
        }
    }

    pub fn encode(&self, input: &[u8]) -> String {
        let mut out = vec![0_u8; self.encoded_len(input.len())];
        self.encode_into(input, &mut out);
        out.into_iter().map(char::from).collect()
    }

    /// Decodes exactly `N` bytes from `encoded`.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::InvalidLength`] if `encoded` is not
    ///   `encoded_len(N)` characters.
    /// - [`DecodeError::InvalidChar`] for characters outside the alphabet.
    /// - [`DecodeError::Overflow`] if the padding bits are not zero.
    pub fn decode<const N: usize>(&self, encoded: &str) -> Result<[u8; N], DecodeError> {
        let expected = self.encoded_len(N);
        if encoded.len() != expected {
            return Err(DecodeError::InvalidLength {
                alphabet: self.name,
                expected,
                actual: encoded.len(),
            });
        }
        let mut pad = expected * self.bits_per_char - N * 8;
        let mut out = [0_u8; N];
        let mut acc = 0_u16;
        let mut bits = 0;
        let mut pos = 0;
        for (index, byte) in encoded.bytes().enumerate() {
            let val = self.lookup[usize::from(byte)];
            if val == NO_VALUE {
                return Err(DecodeError::InvalidChar {
                    alphabet: self.name,
                    byte,
                    index,
                });
            }
            let mut width = self.bits_per_char;
            if pad > 0 {
                // The leading character's high bits are padding.
                let used = width.saturating_sub(pad);
                if u16::from(val) >> used != 0 {
                    return Err(DecodeError::Overflow {
                        alphabet: self.name,
                    });
                }
                pad -= width - used;
                width = used;
            }
            acc = (acc << width) | (u16::from(val) & ((1 << width) - 1));
            bits += width;
            if bits >= 8 {
                bits -= 8;
                out[pos] = (acc >> bits) as u8;
                pos += 1;
            }
        }
        Ok(out)
    }
}

/// Crockford base32: `0-9A-Z` minus `I L O U`. Decoding is case-insensitive.
pub static CROCKFORD32: Alphabet =
    Alphabet::new("crockford32", b"0123456789ABCDEFGHJKMNPQRSTVWXYZ", 5, true);

/// Lowercase hexadecimal. Decoding is case-insensitive.
pub static HEX16: Alphabet = Alphabet::new("hex16", b"0123456789abcdef", 4, true);

/// URL-safe base64 (RFC 4648 §5) without padding characters.
pub static URL64: Alphabet = Alphabet::new(
    "url64",
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_",
    6,
    false,
);
