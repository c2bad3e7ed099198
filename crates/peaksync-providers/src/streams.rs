// ABOUTME: Fetches and decodes raw activity streams from a remote source
// ABOUTME: Converts provider stream rows into a typed StreamSet, nulls becoming NaN gaps
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use peaksync_core::errors::provider::{ProviderError, ProviderResult};
use peaksync_core::errors::AppResult;
use peaksync_core::models::{StreamSet, StreamType};

use crate::retry::RetryPolicy;
use crate::source::{fetch_page, FetchRequest, RemoteSource, RequestGate};

#[derive(Debug, Deserialize)]
struct StreamRow {
    #[serde(rename = "type")]
    stream_type: String,
    #[serde(default)]
    data: Vec<Value>,
}

fn sample(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(f64::NAN),
        _ => None,
    }
}

/// Decode provider stream rows (`{"type": "watts", "data": [...]}`).
///
/// Unknown stream types are skipped. Nulls become `NaN`, which rolling
/// windows treat as missing samples.
///
/// # Errors
///
/// Returns `ProviderError::ParseError` when a row is malformed or a known
/// stream holds non-numeric samples.
pub fn decode_streams(provider: &str, rows: Vec<Value>) -> ProviderResult<StreamSet> {
    let mut streams = StreamSet::new();
    for row in rows {
        let row: StreamRow = serde_json::from_value(row).map_err(|e| ProviderError::ParseError {
            provider: provider.to_owned(),
            message: format!("invalid stream row: {e}"),
        })?;
        let Ok(stream) = row.stream_type.parse::<StreamType>() else {
            debug!(provider, stream = %row.stream_type, "skipping unsupported stream");
            continue;
        };
        let data = row
            .data
            .iter()
            .map(sample)
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| ProviderError::ParseError {
                provider: provider.to_owned(),
                message: format!("non-numeric samples in {stream} stream"),
            })?;
        streams.insert(stream, data);
    }
    Ok(streams)
}

/// Fetch and decode the raw streams of one activity
///
/// # Errors
///
/// Returns gate, provider or decoding errors.
pub async fn fetch_streams(
    source: &dyn RemoteSource,
    gate: &dyn RequestGate,
    activity_id: i64,
    policy: &RetryPolicy,
) -> AppResult<StreamSet> {
    let request = FetchRequest::streams(activity_id, &StreamType::REMOTE);
    let page = fetch_page(source, gate, &request, policy).await?;
    Ok(decode_streams(source.name(), page.rows)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_skips_unknown_and_maps_nulls() {
        let rows = vec![
            json!({"type": "watts", "data": [100, null, 120]}),
            json!({"type": "latlng", "data": [[1.0, 2.0]]}),
            json!({"type": "time", "data": [0, 1, 2]}),
        ];
        let streams = decode_streams("test", rows).unwrap();
        let watts = streams.get(StreamType::Watts).unwrap();
        assert_eq!(watts.len(), 3);
        assert!(watts[1].is_nan());
        assert_eq!(streams.get(StreamType::Time), Some(&[0.0, 1.0, 2.0][..]));
    }

    #[test]
    fn test_decode_rejects_garbage_in_known_stream() {
        let rows = vec![json!({"type": "heartrate", "data": ["fast"]})];
        assert!(decode_streams("test", rows).is_err());
    }
}
