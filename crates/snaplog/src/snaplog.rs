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
use std::sync::Arc;

use crate::codec::Reader;
use crate::header::BEGIN_SNAP_DATA;
use crate::CanonicalNames;
use crate::Header;
use crate::Saver;
use crate::Snapshot;
use crate::SnaplogError;

/// A decoded snaplog: the parsed header plus the raw snapshot stream.
///
/// A value is single-threaded; concurrent readers of distinct values are
/// independent. The canonical-name table is injected at open and shared.
#[derive(Debug)]
pub struct Snaplog {
    header: Header,
    names: Arc<CanonicalNames>,
    data: Vec<u8>,
    body_offset: usize,
}

impl Snaplog {
    /// Parse the header out of `data` and index the snapshot stream that
    /// follows it. The body is not validated here; see [`Snaplog::validate`].
    pub fn open(data: Vec<u8>, names: Arc<CanonicalNames>) -> Result<Snaplog, SnaplogError> {
        let mut r = Reader::new(&data);
        let header = Header::parse(&mut r)?;
        let body_offset = r.pos();
        Ok(Snaplog {
            header,
            names,
            data,
            body_offset,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    fn body(&self) -> &[u8] {
        &self.data[self.body_offset..]
    }

    /// Number of whole records in the body. A trailing fragment is not
    /// counted; [`Snaplog::validate`] reports it.
    pub fn snapshot_count(&self) -> usize {
        self.body().len() / self.header.record_len()
    }

    /// Check the body against the declared layout: its length must be an
    /// exact multiple of the record length, and the first and last records
    /// must begin with the snap-data marker.
    pub fn validate(&self) -> Result<(), SnaplogError> {
        let body_len = self.body().len();
        let record_len = self.header.record_len();
        if body_len % record_len != 0 {
            return Err(SnaplogError::TruncatedTail {
                body_len,
                record_len,
            });
        }
        let count = body_len / record_len;
        if count == 0 {
            return Err(SnaplogError::EmptySnaplog);
        }
        self.check_marker(0)?;
        self.check_marker(count - 1)?;
        Ok(())
    }

    /// The `i`-th snapshot. Fails on out-of-bounds indices and on records
    /// that do not begin with the snap-data marker.
    pub fn snapshot(&self, index: usize) -> Result<Snapshot<'_>, SnaplogError> {
        let count = self.snapshot_count();
        if index >= count {
            return Err(SnaplogError::Index { index, count });
        }
        self.check_marker(index)?;
        Ok(Snapshot {
            header: &self.header,
            names: &self.names,
            data: self.record_body(index),
        })
    }

    /// Write the legacy IPv4 connection 4-tuple into `saver`.
    pub fn connection_tuple(&self, saver: &mut dyn Saver) {
        let conn = &self.header.connection;
        saver.set_string(
            "connection_spec.remote_ip",
            &Ipv4Addr::from(conn.dst_addr).to_string(),
        );
        saver.set_int64("connection_spec.remote_port", conn.dst_port as i64);
        saver.set_string(
            "connection_spec.local_ip",
            &Ipv4Addr::from(conn.src_addr).to_string(),
        );
        saver.set_int64("connection_spec.local_port", conn.src_port as i64);
    }

    /// The ordered indices of snapshots at which the raw bytes of the
    /// named field differ from the previous snapshot. Snapshot 0 compares
    /// against an all-zero baseline, so a field that starts non-zero is
    /// reported at index 0.
    pub fn change_indices(&self, field_name: &str) -> Result<Vec<usize>, SnaplogError> {
        let field = self.find_read_field(field_name)?;
        let count = self.snapshot_count();
        if count == 0 {
            return Err(SnaplogError::EmptySnaplog);
        }

        let zeros = vec![0u8; field.ftype.wire_size()];
        let mut prev: &[u8] = &zeros;
        let mut indices = Vec::new();
        for i in 0..count {
            let raw = field.slice(self.record_body(i));
            if raw != prev {
                indices.push(i);
            }
            prev = raw;
        }
        Ok(indices)
    }

    /// The integer readings of the named field at each of `indices`.
    pub fn slice_int_field(
        &self,
        field_name: &str,
        indices: &[usize],
    ) -> Result<Vec<i64>, SnaplogError> {
        let field = self.find_read_field(field_name)?;
        let count = self.snapshot_count();
        let mut values = Vec::with_capacity(indices.len());
        for &index in indices {
            if index >= count {
                return Err(SnaplogError::Index { index, count });
            }
            values.push(field.int_value(field.slice(self.record_body(index)))?);
        }
        Ok(values)
    }

    fn find_read_field(&self, name: &str) -> Result<&crate::Field, SnaplogError> {
        self.header
            .read
            .find(name)
            .ok_or_else(|| SnaplogError::FieldNotFound {
                name: name.to_string(),
            })
    }

    fn record_body(&self, index: usize) -> &[u8] {
        let record_len = self.header.record_len();
        let start = self.body_offset + index * record_len + BEGIN_SNAP_DATA.len();
        &self.data[start..start + self.header.read.wire_size()]
    }

    fn check_marker(&self, index: usize) -> Result<(), SnaplogError> {
        let record_len = self.header.record_len();
        let start = self.body_offset + index * record_len;
        if !self.data[start..].starts_with(BEGIN_SNAP_DATA) {
            return Err(SnaplogError::MissingBeginMarker { snapshot: index });
        }
        Ok(())
    }
}
