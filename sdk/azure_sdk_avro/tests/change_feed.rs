//! Reads a change-feed style container file end to end through the public API.

use std::collections::BTreeMap;
use std::io::Cursor;

use azure_sdk_avro::datafile::{AVRO_MAGIC, CODEC_KEY, SCHEMA_KEY};
use azure_sdk_avro::{
    AvroError, BinaryDecoder, BinaryEncoder, DataFileReader, DatumReader, DatumWriter, Schema,
    Value,
};

const EVENT_SCHEMA: &str = r#"{
    "type": "record",
    "name": "BlobChangeEvent",
    "namespace": "com.microsoft.azure.storage.blob",
    "fields": [
        {"name": "schemaVersion", "type": "int"},
        {"name": "topic", "type": "string"},
        {"name": "subject", "type": "string"},
        {"name": "eventType", "type": {"type": "enum", "name": "BlobChangeEventType", "symbols": ["UnspecifiedEventType", "BlobCreated", "BlobDeleted"]}},
        {"name": "eventTime", "type": "string"},
        {"name": "id", "type": "string"},
        {"name": "data", "type": {
            "type": "record",
            "name": "BlobChangeEventData",
            "fields": [
                {"name": "contentLength", "type": "long"},
                {"name": "etag", "type": ["null", "string"]},
                {"name": "contentOffset", "type": ["null", "long"]},
                {"name": "storageDiagnostics", "type": {"type": "map", "values": "string"}}
            ]
        }}
    ]
}"#;

const SYNC: [u8; 16] = [
    0x8d, 0x1c, 0x55, 0x03, 0x6b, 0x2a, 0x90, 0xee, 0x11, 0x40, 0xa7, 0x3f, 0x09, 0xc2, 0x7d, 0x64,
];

fn event(n: i64, kind: &str) -> Value {
    let mut diagnostics = BTreeMap::new();
    diagnostics.insert("batchId".to_string(), Value::String(format!("batch-{n}")));
    Value::Record(vec![
        ("schemaVersion".into(), Value::Int(3)),
        ("topic".into(), "/subscriptions/sub/storageAccounts/acct".into()),
        ("subject".into(), Value::String(format!("/blobServices/default/containers/c/blobs/{n}"))),
        ("eventType".into(), Value::Enum(kind.to_string())),
        ("eventTime".into(), "2024-05-01T00:00:00Z".into()),
        ("id".into(), Value::String(format!("event-{n}"))),
        (
            "data".into(),
            Value::Record(vec![
                ("contentLength".into(), Value::Long(n * 1024)),
                ("etag".into(), Value::union(1, Value::String(format!("0x{n:X}")))),
                ("contentOffset".into(), Value::union(0, Value::Null)),
                ("storageDiagnostics".into(), Value::Map(diagnostics)),
            ]),
        ),
    ])
}

fn container(blocks: &[&[Value]]) -> Vec<u8> {
    let schema = Schema::parse_str(EVENT_SCHEMA).unwrap();
    let writer = DatumWriter::new(schema);

    let mut file = BinaryEncoder::new(Vec::new());
    file.write_raw(&AVRO_MAGIC).unwrap();
    file.write_long(2).unwrap();
    file.write_utf8(SCHEMA_KEY).unwrap();
    file.write_bytes(EVENT_SCHEMA.as_bytes()).unwrap();
    file.write_utf8(CODEC_KEY).unwrap();
    file.write_bytes(b"null").unwrap();
    file.write_long(0).unwrap();
    file.write_raw(&SYNC).unwrap();

    for block in blocks {
        let mut payload = BinaryEncoder::new(Vec::new());
        for value in *block {
            writer.write(value, &mut payload).unwrap();
        }
        let payload = payload.into_inner();
        file.write_long(block.len() as i64).unwrap();
        file.write_long(payload.len() as i64).unwrap();
        file.write_raw(&payload).unwrap();
        file.write_raw(&SYNC).unwrap();
    }
    file.into_inner()
}

#[test]
fn reads_every_event_in_order() {
    let first = [event(1, "BlobCreated"), event(2, "BlobCreated")];
    let second = [event(3, "BlobDeleted")];
    let bytes = container(&[&first[..], &second[..]]);

    let reader = DataFileReader::new(Cursor::new(bytes)).unwrap();
    let events: Vec<Value> = reader.collect::<Result<_, AvroError>>().unwrap();

    assert_eq!(events.len(), 3);
    assert_eq!(events[2], second[0]);
    let subjects: Vec<_> = events
        .iter()
        .map(|e| e.field("subject").and_then(Value::as_str).unwrap())
        .collect();
    assert!(subjects[0].ends_with("/1"));
    assert!(subjects[2].ends_with("/3"));
    assert_eq!(
        events[1]
            .field("data")
            .and_then(|d| d.field("etag"))
            .and_then(Value::as_str),
        Some("0x2")
    );
}

#[test]
fn skipping_events_lands_on_the_next_one() {
    let schema = Schema::parse_str(EVENT_SCHEMA).unwrap();
    let writer = DatumWriter::new(schema.clone());
    let mut encoder = BinaryEncoder::new(Vec::new());
    for n in 1..=3 {
        writer.write(&event(n, "BlobCreated"), &mut encoder).unwrap();
    }

    let reader = DatumReader::new(schema);
    let mut decoder = BinaryDecoder::new(Cursor::new(encoder.into_inner()));
    reader.skip(&mut decoder).unwrap();
    reader.skip(&mut decoder).unwrap();
    let third = reader.read(&mut decoder).unwrap();

    assert_eq!(third, event(3, "BlobCreated"));
    assert!(matches!(reader.read(&mut decoder), Err(AvroError::UnexpectedEof)));
}

#[test]
fn out_of_range_enum_reports_writer_schema() {
    let schema = Schema::parse_str(EVENT_SCHEMA).unwrap();
    let writer = DatumWriter::new(schema.clone());
    let mut encoder = BinaryEncoder::new(Vec::new());
    writer.write(&event(1, "BlobDeleted"), &mut encoder).unwrap();
    let mut bytes = encoder.into_inner();

    // schemaVersion (1 byte), then topic and subject strings, then the enum index.
    let topic_len = "/subscriptions/sub/storageAccounts/acct".len();
    let subject_len = "/blobServices/default/containers/c/blobs/1".len();
    let enum_at = 1 + (1 + topic_len) + (1 + subject_len);
    assert_eq!(bytes[enum_at], 0x04);
    bytes[enum_at] = 0x0a;

    let err = DatumReader::new(schema)
        .read(&mut BinaryDecoder::new(Cursor::new(bytes)))
        .unwrap_err();
    let text = err.to_string();
    assert!(text.starts_with("Can't access enum index 5 for enum with 3 symbols"));
    assert!(text.contains("BlobChangeEventType"));
}
