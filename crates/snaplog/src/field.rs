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

use std::net::Ipv4Addr;
use std::net::Ipv6Addr;

use byteorder::ByteOrder;
use byteorder::LittleEndian;

use crate::SnaplogError;

// Address-type tags carried in byte 16 of the 17-byte address layout.
const ADDR_TYPE_IPV4: u8 = 1;
const ADDR_TYPE_IPV6: u8 = 2;

/// The closed set of on-wire Web100 variable types. Any tag outside this
/// table rejects the whole header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// 0: signed 32
    Integer,
    /// 1: signed 32
    Integer32,
    /// 2: IPv4 dotted quad
    Ipv4Addr,
    /// 3: unsigned 32
    Counter32,
    /// 4: unsigned 32
    Unsigned32,
    /// 5: unsigned 32
    Gauge32,
    /// 6: unsigned 32, hundredths of a second
    TimeTicks,
    /// 7: unsigned 64, reinterpreted as signed
    Counter64,
    /// 8: unsigned 16
    PortNum,
    /// 9: tagged IPv4-or-IPv6
    InetAddress,
    /// 10: tagged IPv4-or-IPv6
    InetAddressIpv6,
    /// 11: NUL-terminated bytes in a 32-byte box
    Str32,
    /// 12: single byte
    Octet,
}

impl FieldType {
    pub fn from_tag(tag: u32) -> Option<FieldType> {
        match tag {
            0 => Some(FieldType::Integer),
            1 => Some(FieldType::Integer32),
            2 => Some(FieldType::Ipv4Addr),
            3 => Some(FieldType::Counter32),
            4 => Some(FieldType::Unsigned32),
            5 => Some(FieldType::Gauge32),
            6 => Some(FieldType::TimeTicks),
            7 => Some(FieldType::Counter64),
            8 => Some(FieldType::PortNum),
            9 => Some(FieldType::InetAddress),
            10 => Some(FieldType::InetAddressIpv6),
            11 => Some(FieldType::Str32),
            12 => Some(FieldType::Octet),
            _ => None,
        }
    }

    pub fn tag(self) -> u32 {
        match self {
            FieldType::Integer => 0,
            FieldType::Integer32 => 1,
            FieldType::Ipv4Addr => 2,
            FieldType::Counter32 => 3,
            FieldType::Unsigned32 => 4,
            FieldType::Gauge32 => 5,
            FieldType::TimeTicks => 6,
            FieldType::Counter64 => 7,
            FieldType::PortNum => 8,
            FieldType::InetAddress => 9,
            FieldType::InetAddressIpv6 => 10,
            FieldType::Str32 => 11,
            FieldType::Octet => 12,
        }
    }

    /// The exact number of bytes a field of this type occupies in a record.
    pub const fn wire_size(self) -> usize {
        match self {
            FieldType::Integer
            | FieldType::Integer32
            | FieldType::Ipv4Addr
            | FieldType::Counter32
            | FieldType::Unsigned32
            | FieldType::Gauge32
            | FieldType::TimeTicks => 4,
            FieldType::Counter64 => 8,
            FieldType::PortNum => 2,
            FieldType::InetAddress | FieldType::InetAddressIpv6 => 17,
            FieldType::Str32 => 32,
            FieldType::Octet => 1,
        }
    }
}

/// One typed value recovered from a snapshot, ready for a [`Saver`].
///
/// [`Saver`]: crate::Saver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Int(i64),
    Str(String),
}

/// A field descriptor from the in-band layout declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub offset: usize,
    pub ftype: FieldType,
}

impl Field {
    /// Whether value emission skips this field. Deprecated variables keep
    /// their bytes in the layout but are spelled with a leading underscore.
    pub fn deprecated(&self) -> bool {
        self.name.starts_with('_')
    }

    /// The raw bytes of this field within one record body.
    pub(crate) fn slice<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        &record[self.offset..self.offset + self.ftype.wire_size()]
    }

    /// Interpret the raw bytes of this field per its declared type.
    pub fn interpret(&self, raw: &[u8]) -> Result<FieldValue, SnaplogError> {
        debug_assert_eq!(raw.len(), self.ftype.wire_size());
        let value = match self.ftype {
            FieldType::Integer | FieldType::Integer32 => {
                FieldValue::Int(LittleEndian::read_i32(raw) as i64)
            }
            FieldType::Counter32
            | FieldType::Unsigned32
            | FieldType::Gauge32
            | FieldType::TimeTicks => FieldValue::Int(LittleEndian::read_u32(raw) as i64),
            FieldType::Counter64 => FieldValue::Int(LittleEndian::read_u64(raw) as i64),
            FieldType::PortNum => FieldValue::Int(LittleEndian::read_u16(raw) as i64),
            FieldType::Octet => FieldValue::Int(raw[0] as i64),
            FieldType::Ipv4Addr => FieldValue::Str(format_ipv4(&raw[..4])),
            FieldType::InetAddress | FieldType::InetAddressIpv6 => match raw[16] {
                ADDR_TYPE_IPV4 => FieldValue::Str(format_ipv4(&raw[..4])),
                ADDR_TYPE_IPV6 => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(&raw[..16]);
                    FieldValue::Str(Ipv6Addr::from(octets).to_string())
                }
                tag => {
                    return Err(SnaplogError::InvalidAddressTag {
                        name: self.name.clone(),
                        tag,
                    })
                }
            },
            FieldType::Str32 => {
                let bytes = crate::codec::until_nul(raw);
                FieldValue::Str(String::from_utf8_lossy(bytes).into_owned())
            }
        };
        Ok(value)
    }

    /// Interpret the raw bytes as an integer, for fields whose type has a
    /// numeric reading.
    pub fn int_value(&self, raw: &[u8]) -> Result<i64, SnaplogError> {
        match self.interpret(raw)? {
            FieldValue::Int(v) => Ok(v),
            FieldValue::Str(_) => Err(SnaplogError::InvalidType {
                name: self.name.clone(),
                tag: self.ftype.tag(),
            }),
        }
    }
}

fn format_ipv4(raw: &[u8]) -> String {
    Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]).to_string()
}
