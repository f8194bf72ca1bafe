//! Transport codec
//!
//! Stamps every outgoing record with upload metadata, then serializes the
//! batch to compact JSON, gzip-compresses it, and base64-encodes the result
//! into a form-encoded request body (`compression=gzip&payload=...`).

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::Serialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::types::{QueuedRecord, StatusSnapshot, STATUS_GENERATOR_ID};

/// Metadata key stamped onto every uploaded record
pub const METADATA_KEY: &str = "passive-data-metadata";

/// User-agent string embedded in the metadata `generator` field
pub const USER_AGENT: &str = concat!("drover/", env!("CARGO_PKG_VERSION"));

/// Form-encoded upload body.
///
/// Serializes to `compression=gzip&payload=<base64>` under
/// `application/x-www-form-urlencoded`.
#[derive(Debug, Clone, Serialize)]
pub struct TransportPayload {
    pub compression: &'static str,
    pub payload: String,
}

/// Stamp batch records (and the trailing status snapshot) with upload
/// metadata.
///
/// `built_at` is the batch's intended-send time; the stamped `timestamp`
/// reflects it in Unix seconds regardless of when the upload actually
/// commits.
pub fn stamp(
    records: &[QueuedRecord],
    status: Option<&StatusSnapshot>,
    source: &str,
    built_at: i64,
) -> Result<Vec<serde_json::Value>> {
    let timezone = iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string());
    let timestamp = built_at / 1000;

    let mut out = Vec::with_capacity(records.len() + 1);
    for record in records {
        out.push(stamp_one(
            record.data_point.clone(),
            &record.generator_id,
            source,
            timestamp,
            &timezone,
        )?);
    }

    if let Some(snapshot) = status {
        out.push(stamp_one(
            serde_json::to_value(snapshot)?,
            STATUS_GENERATOR_ID,
            source,
            timestamp,
            &timezone,
        )?);
    }

    Ok(out)
}

fn stamp_one(
    mut payload: serde_json::Value,
    generator_id: &str,
    source: &str,
    timestamp: i64,
    timezone: &str,
) -> Result<serde_json::Value> {
    let metadata = json!({
        "source": source,
        "generator": format!("{}: {}", generator_id, USER_AGENT),
        "generator-id": generator_id,
        "timestamp": timestamp,
        "timezone": timezone,
    });

    match payload.as_object_mut() {
        Some(fields) => {
            fields.insert(METADATA_KEY.to_string(), metadata);
            Ok(payload)
        }
        // Scalar payloads still travel, wrapped so the metadata has a home
        None => Ok(json!({ "value": payload, METADATA_KEY: metadata })),
    }
}

/// Encode stamped records into the upload body: compact JSON, gzip, base64.
pub fn encode(records: &[serde_json::Value]) -> Result<TransportPayload> {
    let serialized = serde_json::to_vec(records)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&serialized)?;
    let compressed = encoder.finish()?;

    Ok(TransportPayload {
        compression: "gzip",
        payload: BASE64.encode(compressed),
    })
}

/// Decode an upload payload back into its records.
///
/// The server owns the real decode side; this is the inverse used by tests
/// and diagnostics.
pub fn decode(payload: &str) -> Result<Vec<serde_json::Value>> {
    let compressed = BASE64
        .decode(payload)
        .map_err(|e| Error::Transport(format!("invalid payload encoding: {}", e)))?;

    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut serialized = Vec::new();
    decoder.read_to_end(&mut serialized)?;

    Ok(serde_json::from_slice(&serialized)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(n: i64) -> QueuedRecord {
        QueuedRecord {
            record_id: n,
            generator_id: "test-generator".to_string(),
            data_point: json!({"n": n}),
            date: 1700000000000,
            transmitted: 0,
        }
    }

    #[test]
    fn test_stamp_adds_metadata_to_each_record() {
        let records = vec![record(1), record(2)];
        let stamped = stamp(&records, None, "device-1", 1700000123456).unwrap();

        assert_eq!(stamped.len(), 2);
        for item in &stamped {
            let meta = &item[METADATA_KEY];
            assert_eq!(meta["source"], "device-1");
            assert_eq!(meta["generator-id"], "test-generator");
            assert_eq!(meta["timestamp"], 1700000123);
            assert!(meta["generator"]
                .as_str()
                .unwrap()
                .starts_with("test-generator: drover/"));
            assert!(meta["timezone"].as_str().is_some());
        }
    }

    #[test]
    fn test_status_snapshot_is_final_element() {
        let snapshot = StatusSnapshot {
            generator_id: STATUS_GENERATOR_ID.to_string(),
            pending_points: 9,
            cpu_info: json!({}),
            display_info: json!({}),
            memory_info: json!({}),
            storage_info: json!({}),
        };

        let stamped = stamp(&[record(1)], Some(&snapshot), "device-1", 0).unwrap();
        assert_eq!(stamped.len(), 2);
        let last = stamped.last().unwrap();
        assert_eq!(last["generatorId"], STATUS_GENERATOR_ID);
        assert_eq!(last["pending_points"], 9);
        assert_eq!(last[METADATA_KEY]["generator-id"], STATUS_GENERATOR_ID);
    }

    #[test]
    fn test_encode_decode_inverse() {
        let stamped = stamp(&[record(1), record(2)], None, "device-1", 0).unwrap();
        let body = encode(&stamped).unwrap();

        assert_eq!(body.compression, "gzip");
        let decoded = decode(&body.payload).unwrap();
        assert_eq!(decoded, stamped);
    }

    #[test]
    fn test_payload_serializes_as_form_fields() {
        let body = TransportPayload {
            compression: "gzip",
            payload: "AAAA".to_string(),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["compression"], "gzip");
        assert_eq!(value["payload"], "AAAA");
    }
}
