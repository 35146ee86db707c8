use thiserror::Error;

use crate::error::BatchError;

/// Counts longer than this cannot describe a `u64`.
const MAX_DIGITS: usize = 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisError {
    #[error("Unexpected end of input")]
    UnexpectedEof,

    #[error("Unexpected byte {0:#04x}")]
    BadByte(u8),

    #[error("Negative value where unsigned expected")]
    Negative,

    #[error("Value does not fit in 64 bits")]
    Overflow,

    #[error("String is not valid UTF-8")]
    Utf8,

    #[error("Unknown reply choice {0}")]
    UnknownChoice(u64),
}

impl From<DisError> for BatchError {
    fn from(e: DisError) -> Self {
        BatchError::InvalidRequest(format!("malformed DIS data: {}", e))
    }
}

/// Appends DIS-encoded values to a byte buffer.
#[derive(Debug, Default, Clone)]
pub struct DisWriter {
    buf: Vec<u8>,
}

impl DisWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unsigned integer: `+digits`, preceded by the digit count while that
    /// count itself has more than one digit.
    pub fn write_uint(&mut self, value: u64) {
        let digits = value.to_string();
        let mut prefixes = Vec::new();
        let mut count = digits.len();
        while count > 1 {
            let c = count.to_string();
            count = c.len();
            prefixes.push(c);
        }
        for p in prefixes.iter().rev() {
            self.buf.extend_from_slice(p.as_bytes());
        }
        self.buf.push(b'+');
        self.buf.extend_from_slice(digits.as_bytes());
    }

    /// Counted string: byte length as an unsigned integer, then the bytes.
    pub fn write_str(&mut self, s: &str) {
        self.write_uint(s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads DIS-encoded values from a byte slice.
#[derive(Debug, Clone)]
pub struct DisReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> DisReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn next_byte(&mut self) -> Result<u8, DisError> {
        let b = *self.buf.get(self.pos).ok_or(DisError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DisError> {
        let end = self.pos.checked_add(n).ok_or(DisError::Overflow)?;
        let slice = self.buf.get(self.pos..end).ok_or(DisError::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    fn digits(bytes: &[u8]) -> Result<u64, DisError> {
        bytes.iter().try_fold(0u64, |acc, &b| {
            if !b.is_ascii_digit() {
                return Err(DisError::BadByte(b));
            }
            acc.checked_mul(10)
                .and_then(|v| v.checked_add(u64::from(b - b'0')))
                .ok_or(DisError::Overflow)
        })
    }

    pub fn read_uint(&mut self) -> Result<u64, DisError> {
        let mut count: usize = 1;
        loop {
            let lead = self.next_byte()?;
            match lead {
                b'+' => return Self::digits(self.take(count)?),
                b'-' => return Err(DisError::Negative),
                b'0'..=b'9' => {
                    let rest = self.take(count - 1)?;
                    let next = Self::digits(&[&[lead][..], rest].concat())?;
                    count = usize::try_from(next).map_err(|_| DisError::Overflow)?;
                    if count == 0 || count > MAX_DIGITS {
                        return Err(DisError::Overflow);
                    }
                }
                other => return Err(DisError::BadByte(other)),
            }
        }
    }

    pub fn read_str(&mut self) -> Result<String, DisError> {
        let len = usize::try_from(self.read_uint()?).map_err(|_| DisError::Overflow)?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DisError::Utf8)
    }
}
