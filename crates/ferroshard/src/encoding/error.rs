/// Failure to reverse a code token back into its number.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{alphabet}: expected {expected} characters, got {actual}")]
    InvalidLength {
        alphabet: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{alphabet}: invalid byte {byte:#04x} at index {index}")]
    InvalidChar {
        alphabet: &'static str,
        byte: u8,
        index: usize,
    },
    #[error("{alphabet}: token does not fit in 64 bits")]
    Overflow { alphabet: &'static str },
}
