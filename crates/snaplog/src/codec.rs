// Copyright 2024 tison <wander4096@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use byteorder::ByteOrder;
use byteorder::LittleEndian;

use crate::SnaplogError;

/// A forward-only cursor over the raw log bytes that remembers its
/// position, so header errors can point at the offending byte.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn err(&self, reason: impl Into<String>) -> SnaplogError {
        SnaplogError::Header {
            pos: self.pos,
            reason: reason.into(),
        }
    }

    /// Consume bytes up to and including the next `\n` and return the line
    /// without its terminator.
    pub(crate) fn read_line(&mut self) -> Result<&'a str, SnaplogError> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| self.err("unterminated line"))?;
        let line = std::str::from_utf8(&rest[..end]).map_err(|_| self.err("non-ASCII line"))?;
        self.pos += end + 1;
        Ok(line)
    }

    /// Whether the unconsumed bytes start with `prefix`, without consuming.
    pub(crate) fn peek(&self, prefix: &[u8]) -> bool {
        self.buf[self.pos..].starts_with(prefix)
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<(), SnaplogError> {
        if self.buf.len() - self.pos < n {
            return Err(self.err(format!("expected {n} more bytes")));
        }
        self.pos += n;
        Ok(())
    }

    pub(crate) fn read_exact(&mut self, n: usize) -> Result<&'a [u8], SnaplogError> {
        if self.buf.len() - self.pos < n {
            return Err(self.err(format!("expected {n} more bytes")));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub(crate) fn read_u16_le(&mut self) -> Result<u16, SnaplogError> {
        Ok(LittleEndian::read_u16(self.read_exact(2)?))
    }

    pub(crate) fn read_u32_le(&mut self) -> Result<u32, SnaplogError> {
        Ok(LittleEndian::read_u32(self.read_exact(4)?))
    }
}

/// Bytes of a NUL-padded fixed buffer up to the first NUL.
pub(crate) fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| *b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_line_tracks_position() {
        let mut r = Reader::new(b"one\ntwo\n");
        assert_eq!(r.read_line().unwrap(), "one");
        assert_eq!(r.pos(), 4);
        assert_eq!(r.read_line().unwrap(), "two");
        assert_eq!(r.pos(), 8);
    }

    #[test]
    fn test_read_line_rejects_unterminated() {
        let mut r = Reader::new(b"dangling");
        let err = r.read_line().unwrap_err();
        assert_eq!(
            err,
            SnaplogError::Header {
                pos: 0,
                reason: "unterminated line".to_string(),
            }
        );
    }

    #[test]
    fn test_read_exact_bounds() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert_eq!(r.read_exact(2).unwrap(), &[1, 2]);
        assert!(r.read_exact(2).is_err());
    }

    #[test]
    fn test_until_nul() {
        assert_eq!(until_nul(b"read\0\0\0"), b"read");
        assert_eq!(until_nul(b"read"), b"read");
        assert_eq!(until_nul(b"\0read"), b"");
    }
}
