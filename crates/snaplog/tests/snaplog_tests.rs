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

use std::sync::Arc;

use gleaner_snaplog::CanonicalNames;
use gleaner_snaplog::Field;
use gleaner_snaplog::FieldSet;
use gleaner_snaplog::FieldType;
use gleaner_snaplog::MemorySaver;
use gleaner_snaplog::SavedValue;
use gleaner_snaplog::Snaplog;
use gleaner_snaplog::SnaplogError;
use gleaner_snaplog::BEGIN_SNAP_DATA;
use gleaner_snaplog::END_OF_HEADER;

/// Assembles snaplog byte streams the way the Web100 library wrote them.
struct LogBuilder {
    read_fields: Vec<(String, FieldType)>,
    records: Vec<Vec<u8>>,
}

impl LogBuilder {
    fn new(read_fields: &[(&str, FieldType)]) -> LogBuilder {
        LogBuilder {
            read_fields: read_fields
                .iter()
                .map(|(name, ftype)| (name.to_string(), *ftype))
                .collect(),
            records: Vec::new(),
        }
    }

    fn record(&mut self, body: &[u8]) -> &mut Self {
        let expected: usize = self.read_fields.iter().map(|(_, t)| t.wire_size()).sum();
        assert_eq!(body.len(), expected, "record body must match the layout");
        self.records.push(body.to_vec());
        self
    }

    fn build(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"2.5.27 201001301335 net100\n\n");

        bytes.extend_from_slice(b"/spec\n");
        bytes.extend_from_slice(b"LocalPort 0 8 2\n\n");

        bytes.extend_from_slice(b"/read\n");
        let mut offset = 0;
        for (name, ftype) in &self.read_fields {
            let size = ftype.wire_size();
            bytes.extend_from_slice(
                format!("{name} {offset} {tag} {size}\n", tag = ftype.tag()).as_bytes(),
            );
            offset += size;
        }
        bytes.extend_from_slice(b"\n");

        bytes.extend_from_slice(b"/tune\n");
        bytes.extend_from_slice(b"LimCwnd 0 4 4\n");
        bytes.extend_from_slice(END_OF_HEADER);

        bytes.extend_from_slice(&1474926600u32.to_le_bytes());

        let mut group = [0u8; 32];
        group[..4].copy_from_slice(b"read");
        bytes.extend_from_slice(&group);

        // dst port + pad + dst addr, src port + pad + src addr
        bytes.extend_from_slice(&3010u16.to_le_bytes());
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&[203, 0, 113, 7]);
        bytes.extend_from_slice(&443u16.to_le_bytes());
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&[198, 51, 100, 9]);

        for record in &self.records {
            bytes.extend_from_slice(BEGIN_SNAP_DATA);
            bytes.extend_from_slice(record);
        }
        bytes
    }
}

fn open(bytes: Vec<u8>) -> Snaplog {
    Snaplog::open(bytes, Arc::new(CanonicalNames::empty())).unwrap()
}

fn le(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

#[test]
fn test_snapshot_count_and_validate() {
    let mut builder = LogBuilder::new(&[("PktsOut", FieldType::Counter32)]);
    builder.record(&le(1)).record(&le(2)).record(&le(3));
    let log = open(builder.build());

    assert_eq!(log.snapshot_count(), 3);
    log.validate().unwrap();
}

#[test]
fn test_trailing_byte_is_a_truncated_tail() {
    let mut builder = LogBuilder::new(&[("PktsOut", FieldType::Counter32)]);
    builder.record(&le(1)).record(&le(2)).record(&le(3));
    let mut bytes = builder.build();
    bytes.push(0xAA);

    let log = open(bytes);
    assert_eq!(
        log.validate().unwrap_err(),
        SnaplogError::TruncatedTail {
            body_len: 3 * 28 + 1,
            record_len: 28,
        }
    );
    // whole records remain addressable
    assert_eq!(log.snapshot_count(), 3);
}

#[test]
fn test_corrupt_marker_detected() {
    let mut builder = LogBuilder::new(&[("PktsOut", FieldType::Counter32)]);
    builder.record(&le(1)).record(&le(2));
    let mut bytes = builder.build();
    let last_record_start = bytes.len() - 28;
    bytes[last_record_start] = b'X';

    let log = open(bytes);
    assert_eq!(
        log.validate().unwrap_err(),
        SnaplogError::MissingBeginMarker { snapshot: 1 }
    );
    assert!(log.snapshot(0).is_ok());
    assert_eq!(
        log.snapshot(1).unwrap_err(),
        SnaplogError::MissingBeginMarker { snapshot: 1 }
    );
}

#[test]
fn test_empty_body_rejected_by_validate() {
    let builder = LogBuilder::new(&[("PktsOut", FieldType::Counter32)]);
    let log = open(builder.build());
    assert_eq!(log.snapshot_count(), 0);
    assert_eq!(log.validate().unwrap_err(), SnaplogError::EmptySnaplog);
}

#[test]
fn test_snapshot_index_bounds() {
    let mut builder = LogBuilder::new(&[("PktsOut", FieldType::Counter32)]);
    builder.record(&le(1));
    let log = open(builder.build());

    assert!(log.snapshot(0).is_ok());
    assert_eq!(
        log.snapshot(1).unwrap_err(),
        SnaplogError::Index { index: 1, count: 1 }
    );
}

#[test]
fn test_values_in_declaration_order_with_types() {
    let mut builder = LogBuilder::new(&[
        ("CurMSS", FieldType::Unsigned32),
        ("SmoothedRTT", FieldType::Integer),
        ("LocalAddress", FieldType::InetAddress),
    ]);
    let mut body = Vec::new();
    body.extend_from_slice(&le(1460));
    body.extend_from_slice(&(-25i32).to_le_bytes());
    let mut addr = [0u8; 17];
    addr[..4].copy_from_slice(&[10, 0, 0, 1]);
    addr[16] = 1;
    body.extend_from_slice(&addr);
    builder.record(&body);

    let log = open(builder.build());
    let mut saver = MemorySaver::default();
    log.snapshot(0).unwrap().values(&mut saver).unwrap();

    assert_eq!(saver.get("CurMSS"), Some(&SavedValue::Int(1460)));
    assert_eq!(saver.get("SmoothedRTT"), Some(&SavedValue::Int(-25)));
    assert_eq!(
        saver.get("LocalAddress"),
        Some(&SavedValue::Str("10.0.0.1".to_string()))
    );
}

#[test]
fn test_canonical_rename_applies_to_emission() {
    let names = CanonicalNames::parse(
        "VariableName:\tStartTimeStamp\nRenameFrom:\tStartTimeSec StartTime\n",
    );
    let mut builder = LogBuilder::new(&[("StartTimeSec", FieldType::Unsigned32)]);
    builder.record(&le(1474926600));
    let log = Snaplog::open(builder.build(), Arc::new(names)).unwrap();

    let mut saver = MemorySaver::default();
    log.snapshot(0).unwrap().values(&mut saver).unwrap();

    assert_eq!(saver.get("StartTimeSec"), None);
    assert_eq!(
        saver.get("StartTimeStamp"),
        Some(&SavedValue::Int(1474926600))
    );
}

#[test]
fn test_deprecated_fields_stay_silent() {
    let mut builder = LogBuilder::new(&[
        ("_OldCwnd", FieldType::Unsigned32),
        ("CurCwnd", FieldType::Unsigned32),
    ]);
    let mut body = Vec::new();
    body.extend_from_slice(&le(77));
    body.extend_from_slice(&le(88));
    builder.record(&body);

    let log = open(builder.build());
    let mut saver = MemorySaver::default();
    log.snapshot(0).unwrap().values(&mut saver).unwrap();

    assert_eq!(saver.get("_OldCwnd"), None);
    assert_eq!(saver.get("CurCwnd"), Some(&SavedValue::Int(88)));
    assert_eq!(saver.values().len(), 1);
}

#[test]
fn test_deltas_emit_only_changes() {
    let mut builder = LogBuilder::new(&[
        ("PktsOut", FieldType::Counter32),
        ("CurMSS", FieldType::Unsigned32),
    ]);
    let mut first = Vec::new();
    first.extend_from_slice(&le(10));
    first.extend_from_slice(&le(1460));
    let mut second = Vec::new();
    second.extend_from_slice(&le(20));
    second.extend_from_slice(&le(1460));
    builder.record(&first).record(&second);

    let log = open(builder.build());
    let prev = log.snapshot(0).unwrap();
    let next = log.snapshot(1).unwrap();

    let mut saver = MemorySaver::default();
    next.deltas(Some(&prev), &mut saver).unwrap();
    assert_eq!(saver.get("PktsOut"), Some(&SavedValue::Int(20)));
    assert_eq!(saver.get("CurMSS"), None);

    // an absent previous snapshot behaves like values()
    let mut saver = MemorySaver::default();
    next.deltas(None, &mut saver).unwrap();
    assert_eq!(saver.values().len(), 2);
}

#[test]
fn test_change_indices_zero_baseline_and_monotonic() {
    let mut builder = LogBuilder::new(&[("CurCwnd", FieldType::Unsigned32)]);
    for v in [0u32, 0, 5, 5, 9, 9, 9, 2] {
        builder.record(&le(v));
    }
    let log = open(builder.build());

    // index 0 is quiet: the field starts equal to the zero baseline
    let indices = log.change_indices("CurCwnd").unwrap();
    assert_eq!(indices, vec![2, 4, 7]);
    assert!(indices.windows(2).all(|w| w[0] < w[1]));

    let values = log.slice_int_field("CurCwnd", &indices).unwrap();
    assert_eq!(values, vec![5, 9, 2]);
}

#[test]
fn test_change_indices_report_nonzero_start() {
    let mut builder = LogBuilder::new(&[("CurCwnd", FieldType::Unsigned32)]);
    for v in [3u32, 3, 4] {
        builder.record(&le(v));
    }
    let log = open(builder.build());
    assert_eq!(log.change_indices("CurCwnd").unwrap(), vec![0, 2]);
}

#[test]
fn test_unknown_field_lookups_fail() {
    let mut builder = LogBuilder::new(&[("CurCwnd", FieldType::Unsigned32)]);
    builder.record(&le(1));
    let log = open(builder.build());

    assert_eq!(
        log.change_indices("NoSuchField").unwrap_err(),
        SnaplogError::FieldNotFound {
            name: "NoSuchField".to_string(),
        }
    );
    assert_eq!(
        log.slice_int_field("NoSuchField", &[0]).unwrap_err(),
        SnaplogError::FieldNotFound {
            name: "NoSuchField".to_string(),
        }
    );
}

#[test]
fn test_connection_tuple_emission() {
    let mut builder = LogBuilder::new(&[("CurCwnd", FieldType::Unsigned32)]);
    builder.record(&le(1));
    let log = open(builder.build());

    let mut saver = MemorySaver::default();
    log.connection_tuple(&mut saver);

    assert_eq!(
        saver.get("connection_spec.remote_ip"),
        Some(&SavedValue::Str("203.0.113.7".to_string()))
    );
    assert_eq!(
        saver.get("connection_spec.remote_port"),
        Some(&SavedValue::Int(3010))
    );
    assert_eq!(
        saver.get("connection_spec.local_ip"),
        Some(&SavedValue::Str("198.51.100.9".to_string()))
    );
    assert_eq!(
        saver.get("connection_spec.local_port"),
        Some(&SavedValue::Int(443))
    );
}

#[test]
fn test_header_round_trip() {
    let mut builder = LogBuilder::new(&[
        ("CurMSS", FieldType::Unsigned32),
        ("PktsOut", FieldType::Counter32),
        ("LocalAddress", FieldType::InetAddress),
        ("Sndbuf", FieldType::Integer),
    ]);
    let mut body = vec![0u8; 4 + 4 + 17 + 4];
    body[4 + 4 + 16] = 1;
    builder.record(&body);
    let log = open(builder.build());
    let header = log.header().clone();

    // re-emit the parsed layout and parse it again
    let mut rebuilt = LogBuilder::new(
        &header
            .read
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.ftype))
            .collect::<Vec<_>>(),
    );
    rebuilt.record(&body);
    let reparsed = open(rebuilt.build());

    assert_eq!(*reparsed.header(), header);
    assert_eq!(
        header.record_len(),
        BEGIN_SNAP_DATA.len() + header.read.wire_size()
    );
}

#[test]
fn test_field_set_lookup() {
    let mut builder = LogBuilder::new(&[
        ("CurMSS", FieldType::Unsigned32),
        ("PktsOut", FieldType::Counter32),
    ]);
    builder.record(&[0u8; 8]);
    let log = open(builder.build());

    let read: &FieldSet = &log.header().read;
    let field: &Field = read.find("PktsOut").unwrap();
    assert_eq!(field.offset, 4);
    assert!(read.find("Missing").is_none());
}
