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

use crate::codec::until_nul;
use crate::codec::Reader;
use crate::Field;
use crate::FieldType;
use crate::SnaplogError;

/// Marker at the head of every snapshot record.
pub const BEGIN_SNAP_DATA: &[u8] = b"----Begin-Snap-Data----\n";

/// Sentinel line closing the ASCII part of the header.
pub const END_OF_HEADER: &[u8] = b"\x00----End-Of-Header---- -1 -1\n";

const GROUP_NAME_LEN: usize = 32;
const EXPECTED_GROUP: &[u8] = b"read";

/// An ordered, named sequence of field descriptors. Offsets are dense:
/// each field starts where the previous one ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet {
    pub name: String,
    pub fields: Vec<Field>,
}

impl FieldSet {
    /// Total bytes the fields of this set occupy in a record.
    pub fn wire_size(&self) -> usize {
        self.fields.iter().map(|f| f.ftype.wire_size()).sum()
    }

    pub fn find(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// The legacy IPv4 connection 4-tuple trailing the header, laid out with
/// 32-bit alignment: each port is a u16 followed by two pad bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub dst_port: u16,
    pub dst_addr: [u8; 4],
    pub src_port: u16,
    pub src_addr: [u8; 4],
}

/// Everything the ASCII header declares about the log that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: String,
    pub spec: FieldSet,
    pub read: FieldSet,
    pub tune: FieldSet,
    /// Seconds since the epoch at which the log was opened.
    pub log_time: u32,
    pub group_name: String,
    pub connection: ConnectionSpec,
}

impl Header {
    /// The fixed length of one snapshot record, marker included.
    pub fn record_len(&self) -> usize {
        BEGIN_SNAP_DATA.len() + self.read.wire_size()
    }

    // The header is a strict sequence: version line, blank, /spec fields,
    // blank, /read fields, blank, /tune fields, sentinel, then the three
    // binary trailers. Any deviation fails with the current byte position.
    pub(crate) fn parse(r: &mut Reader<'_>) -> Result<Header, SnaplogError> {
        let pos = r.pos();
        let version = r.read_line()?.trim().to_string();
        if version.is_empty() {
            return Err(SnaplogError::Header {
                pos,
                reason: "empty version line".to_string(),
            });
        }
        expect_blank(r)?;

        let spec = parse_field_set(r, "spec")?;
        let read = parse_field_set(r, "read")?;
        let tune = parse_tune(r)?;

        let log_time = r.read_u32_le()?;

        let pos = r.pos();
        let group_bytes = r.read_exact(GROUP_NAME_LEN)?;
        let group = until_nul(group_bytes);
        if group != EXPECTED_GROUP {
            return Err(SnaplogError::Header {
                pos,
                reason: format!("group name {:?} is not \"read\"", String::from_utf8_lossy(group)),
            });
        }
        let group_name = String::from_utf8_lossy(group).into_owned();

        let connection = parse_connection_spec(r)?;

        Ok(Header {
            version,
            spec,
            read,
            tune,
            log_time,
            group_name,
            connection,
        })
    }
}

fn expect_blank(r: &mut Reader<'_>) -> Result<(), SnaplogError> {
    let pos = r.pos();
    let line = r.read_line()?;
    if !line.is_empty() {
        return Err(SnaplogError::Header {
            pos,
            reason: format!("expected blank line, found {line:?}"),
        });
    }
    Ok(())
}

fn expect_section(r: &mut Reader<'_>, name: &str) -> Result<(), SnaplogError> {
    let pos = r.pos();
    let line = r.read_line()?;
    if line != format!("/{name}") {
        return Err(SnaplogError::Header {
            pos,
            reason: format!("expected /{name}, found {line:?}"),
        });
    }
    Ok(())
}

/// `/name` then one descriptor per line until a blank line.
fn parse_field_set(r: &mut Reader<'_>, name: &str) -> Result<FieldSet, SnaplogError> {
    expect_section(r, name)?;
    let mut fields = Vec::new();
    let mut next_offset = 0;
    loop {
        let pos = r.pos();
        let line = r.read_line()?;
        if line.is_empty() {
            break;
        }
        let field = parse_field_line(line, pos, next_offset)?;
        next_offset = field.offset + field.ftype.wire_size();
        fields.push(field);
    }
    Ok(FieldSet {
        name: name.to_string(),
        fields,
    })
}

/// `/tune` runs until the end-of-header sentinel instead of a blank line.
fn parse_tune(r: &mut Reader<'_>) -> Result<FieldSet, SnaplogError> {
    expect_section(r, "tune")?;
    let mut fields = Vec::new();
    let mut next_offset = 0;
    loop {
        if r.peek(END_OF_HEADER) {
            r.skip(END_OF_HEADER.len())?;
            break;
        }
        let pos = r.pos();
        let line = r.read_line()?;
        let field = parse_field_line(line, pos, next_offset)?;
        next_offset = field.offset + field.ftype.wire_size();
        fields.push(field);
    }
    Ok(FieldSet {
        name: "tune".to_string(),
        fields,
    })
}

/// One descriptor line: `<name> <offset> <type> <size>`.
fn parse_field_line(line: &str, pos: usize, expected_offset: usize) -> Result<Field, SnaplogError> {
    let malformed = |reason: String| SnaplogError::Header { pos, reason };

    let mut parts = line.split_whitespace();
    let name = parts
        .next()
        .ok_or_else(|| malformed("empty field line".to_string()))?;
    let offset = parse_number(parts.next(), "offset", line, pos)?;
    let tag = parse_number(parts.next(), "type", line, pos)?;
    let size = parse_number(parts.next(), "size", line, pos)?;
    if parts.next().is_some() {
        return Err(malformed(format!("trailing tokens in field line {line:?}")));
    }

    let ftype = FieldType::from_tag(tag).ok_or_else(|| SnaplogError::InvalidType {
        name: name.to_string(),
        tag,
    })?;
    if size as usize != ftype.wire_size() {
        return Err(SnaplogError::InvalidLength {
            name: name.to_string(),
            declared: size as usize,
            expected: ftype.wire_size(),
        });
    }
    if offset as usize != expected_offset {
        return Err(SnaplogError::BadOffset {
            name: name.to_string(),
            declared: offset as usize,
            expected: expected_offset,
        });
    }

    Ok(Field {
        name: name.to_string(),
        offset: offset as usize,
        ftype,
    })
}

fn parse_number(
    token: Option<&str>,
    what: &str,
    line: &str,
    pos: usize,
) -> Result<u32, SnaplogError> {
    let token = token.ok_or_else(|| SnaplogError::Header {
        pos,
        reason: format!("field line {line:?} is missing its {what}"),
    })?;
    token.parse::<u32>().map_err(|_| SnaplogError::Header {
        pos,
        reason: format!("field line {line:?} carries a non-numeric {what}"),
    })
}

fn parse_connection_spec(r: &mut Reader<'_>) -> Result<ConnectionSpec, SnaplogError> {
    let dst_port = r.read_u16_le()?;
    r.skip(2)?;
    let mut dst_addr = [0u8; 4];
    dst_addr.copy_from_slice(r.read_exact(4)?);
    let src_port = r.read_u16_le()?;
    r.skip(2)?;
    let mut src_addr = [0u8; 4];
    src_addr.copy_from_slice(r.read_exact(4)?);
    Ok(ConnectionSpec {
        dst_port,
        dst_addr,
        src_port,
        src_addr,
    })
}
