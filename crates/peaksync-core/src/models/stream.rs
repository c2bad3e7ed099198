// ABOUTME: Activity stream records and stream type enumeration
// ABOUTME: StreamType, StreamRecord, and the StreamSet lookup used by processors
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::streams;

/// Kinds of time series an activity can carry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    /// Seconds since start
    Time,
    /// Watts
    Watts,
    /// Beats per minute
    Heartrate,
    /// Cumulative metres
    Distance,
    /// Metres per second
    VelocitySmooth,
    /// rpm / spm
    Cadence,
    /// Metres above sea level
    Altitude,
    /// Derived moving mask
    Active,
}

impl StreamType {
    /// Streams fetched from the remote provider
    pub const REMOTE: [Self; 7] = [
        Self::Time,
        Self::Watts,
        Self::Heartrate,
        Self::Distance,
        Self::VelocitySmooth,
        Self::Cadence,
        Self::Altitude,
    ];

    /// Provider name of the stream
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Time => streams::TIME,
            Self::Watts => streams::WATTS,
            Self::Heartrate => streams::HEARTRATE,
            Self::Distance => streams::DISTANCE,
            Self::VelocitySmooth => streams::VELOCITY_SMOOTH,
            Self::Cadence => streams::CADENCE,
            Self::Altitude => streams::ALTITUDE,
            Self::Active => streams::ACTIVE,
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            streams::TIME => Ok(Self::Time),
            streams::WATTS => Ok(Self::Watts),
            streams::HEARTRATE => Ok(Self::Heartrate),
            streams::DISTANCE => Ok(Self::Distance),
            streams::VELOCITY_SMOOTH => Ok(Self::VelocitySmooth),
            streams::CADENCE => Ok(Self::Cadence),
            streams::ALTITUDE => Ok(Self::Altitude),
            streams::ACTIVE => Ok(Self::Active),
            other => Err(format!("unknown stream type: {other}")),
        }
    }
}

/// One stored time series; replaced wholesale on refresh
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamRecord {
    /// Owning activity
    pub activity_id: i64,
    /// Which series this is
    pub stream: StreamType,
    /// Samples aligned with the `time` stream; `NaN` gaps are stored as `null`
    #[serde(with = "nan_as_null")]
    pub data: Vec<f64>,
}

mod nan_as_null {
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(data.len()))?;
        for value in data {
            seq.serialize_element(&Some(*value).filter(|v| v.is_finite()))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let samples = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(samples
            .into_iter()
            .map(|sample| sample.unwrap_or(f64::NAN))
            .collect())
    }
}

/// All streams of one activity keyed by type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSet {
    streams: HashMap<StreamType, Vec<f64>>,
}

impl StreamSet {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace one stream
    pub fn insert(&mut self, stream: StreamType, data: Vec<f64>) {
        self.streams.insert(stream, data);
    }

    /// Borrow a stream if present and non-empty
    #[must_use]
    pub fn get(&self, stream: StreamType) -> Option<&[f64]> {
        self.streams
            .get(&stream)
            .map(Vec::as_slice)
            .filter(|data| !data.is_empty())
    }

    /// Whether the stream is present and non-empty
    #[must_use]
    pub fn contains(&self, stream: StreamType) -> bool {
        self.get(stream).is_some()
    }

    /// Convert into storable records for `activity_id`
    #[must_use]
    pub fn into_records(self, activity_id: i64) -> Vec<StreamRecord> {
        let mut records: Vec<StreamRecord> = self
            .streams
            .into_iter()
            .map(|(stream, data)| StreamRecord {
                activity_id,
                stream,
                data,
            })
            .collect();
        records.sort_by_key(|record| record.stream);
        records
    }
}

impl FromIterator<StreamRecord> for StreamSet {
    fn from_iter<I: IntoIterator<Item = StreamRecord>>(iter: I) -> Self {
        let mut set = Self::new();
        for record in iter {
            set.insert(record.stream, record.data);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_type_round_trips_provider_names() {
        for stream in StreamType::REMOTE {
            assert_eq!(stream.as_str().parse::<StreamType>(), Ok(stream));
        }
        assert!("temp".parse::<StreamType>().is_err());
    }

    #[test]
    fn test_empty_stream_is_absent() {
        let mut set = StreamSet::new();
        set.insert(StreamType::Watts, Vec::new());
        assert!(!set.contains(StreamType::Watts));
    }

    #[test]
    fn test_record_with_gaps_survives_storage() {
        let record = StreamRecord {
            activity_id: 1,
            stream: StreamType::Watts,
            data: vec![100.0, f64::NAN, 120.0],
        };
        let stored = serde_json::to_value(&record).unwrap();
        assert_eq!(stored["data"], serde_json::json!([100.0, null, 120.0]));

        let restored: StreamRecord = serde_json::from_value(stored).unwrap();
        assert_eq!(restored.data.len(), 3);
        assert!(restored.data[1].is_nan());
        assert!((restored.data[2] - 120.0).abs() < f64::EPSILON);
    }
}
