use super::BencodeValue;
use crate::error::{BittorrentError, Result};
use std::collections::BTreeMap;

/// Deepest list/dict nesting accepted from untrusted input.
const MAX_DEPTH: usize = 256;

/// Decode a complete bencoded document. Trailing bytes are rejected.
pub fn decode(data: &[u8]) -> Result<BencodeValue> {
    let (value, consumed) = decode_prefix(data)?;
    if consumed != data.len() {
        return Err(BittorrentError::BencodeError(format!(
            "{} trailing bytes after value",
            data.len() - consumed
        )));
    }
    Ok(value)
}

/// Decode the first value in `data`, returning it with the number of
/// bytes it occupied.
pub fn decode_prefix(data: &[u8]) -> Result<(BencodeValue, usize)> {
    let mut decoder = Decoder {
        data,
        pos: 0,
        depth: 0,
    };
    let value = decoder.value()?;
    Ok((value, decoder.pos))
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| BittorrentError::BencodeError("Unexpected end of input".to_string()))
    }

    /// Consume bytes up to `delim`, returning them without the delimiter.
    fn take_until(&mut self, delim: u8) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let len = rest.iter().position(|&b| b == delim).ok_or_else(|| {
            BittorrentError::BencodeError(format!("Missing '{}' delimiter", delim as char))
        })?;
        self.pos += len + 1;
        Ok(&rest[..len])
    }

    fn value(&mut self) -> Result<BencodeValue> {
        match self.peek()? {
            b'i' => {
                self.pos += 1;
                self.integer()
            }
            b'l' => {
                self.enter()?;
                let mut list = Vec::new();
                while self.peek()? != b'e' {
                    list.push(self.value()?);
                }
                self.leave();
                Ok(BencodeValue::List(list))
            }
            b'd' => {
                self.enter()?;
                let mut dict = BTreeMap::new();
                while self.peek()? != b'e' {
                    if !self.peek()?.is_ascii_digit() {
                        return Err(BittorrentError::BencodeError(
                            "Dictionary key must be a string".to_string(),
                        ));
                    }
                    let key = self.string()?;
                    let value = self.value()?;
                    dict.insert(key, value);
                }
                self.leave();
                Ok(BencodeValue::Dict(dict))
            }
            b'0'..=b'9' => self.string().map(BencodeValue::String),
            c => Err(BittorrentError::BencodeError(format!(
                "Invalid bencode token: {}",
                c as char
            ))),
        }
    }

    /// Step past a container's opening byte.
    fn enter(&mut self) -> Result<()> {
        if self.depth == MAX_DEPTH {
            return Err(BittorrentError::BencodeError(format!(
                "Nesting deeper than {} levels",
                MAX_DEPTH
            )));
        }
        self.depth += 1;
        self.pos += 1;
        Ok(())
    }

    /// Step past a container's closing `e`.
    fn leave(&mut self) {
        self.depth -= 1;
        self.pos += 1;
    }

    fn integer(&mut self) -> Result<BencodeValue> {
        let digits = self.take_until(b'e')?;
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .map(BencodeValue::Integer)
            .ok_or_else(|| BittorrentError::BencodeError("Invalid integer".to_string()))
    }

    fn string(&mut self) -> Result<Vec<u8>> {
        let len = std::str::from_utf8(self.take_until(b':')?)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| BittorrentError::BencodeError("Invalid string length".to_string()))?;

        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                BittorrentError::BencodeError("String length exceeds data".to_string())
            })?;

        let bytes = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(bytes)
    }
}
