// ABOUTME: Derives secondary activity streams from the raw provider streams
// ABOUTME: Fills velocity_smooth from distance/time and computes the active mask
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use peaksync_core::constants::metrics::MOVING_SPEED_THRESHOLD;
use peaksync_core::models::{StreamSet, StreamType};

/// Speed from consecutive distance/time deltas; the first sample copies the
/// second
#[must_use]
pub fn velocity_from_distance(times: &[f64], distance: &[f64]) -> Vec<f64> {
    let len = times.len().min(distance.len());
    let mut velocity: Vec<f64> = (1..len)
        .map(|i| {
            let dt = times[i] - times[i - 1];
            if dt > 0.0 {
                ((distance[i] - distance[i - 1]) / dt).max(0.0)
            } else {
                0.0
            }
        })
        .collect();
    if let Some(&first) = velocity.first() {
        velocity.insert(0, first);
    } else if len == 1 {
        velocity.push(0.0);
    }
    velocity
}

/// Moving mask: `1.0` when speed, power or cadence show movement
#[must_use]
pub fn active_mask(streams: &StreamSet) -> Vec<f64> {
    let Some(times) = streams.get(StreamType::Time) else {
        return Vec::new();
    };
    let speed = streams.get(StreamType::VelocitySmooth);
    let watts = streams.get(StreamType::Watts);
    let cadence = streams.get(StreamType::Cadence);
    if speed.is_none() && watts.is_none() && cadence.is_none() {
        return vec![1.0; times.len()];
    }
    let above = |stream: Option<&[f64]>, i: usize, threshold: f64| {
        stream
            .and_then(|data| data.get(i))
            .is_some_and(|&v| v > threshold)
    };
    (0..times.len())
        .map(|i| {
            let moving = above(speed, i, MOVING_SPEED_THRESHOLD)
                || above(watts, i, 0.0)
                || above(cadence, i, 0.0);
            if moving {
                1.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Add the derived streams to `streams`, returning which were written
pub fn derive_extra_streams(streams: &mut StreamSet) -> Vec<StreamType> {
    let mut derived = Vec::new();
    if !streams.contains(StreamType::VelocitySmooth) {
        if let (Some(times), Some(distance)) = (
            streams.get(StreamType::Time),
            streams.get(StreamType::Distance),
        ) {
            let velocity = velocity_from_distance(times, distance);
            streams.insert(StreamType::VelocitySmooth, velocity);
            derived.push(StreamType::VelocitySmooth);
        }
    }
    let active = active_mask(streams);
    if !active.is_empty() {
        streams.insert(StreamType::Active, active);
        derived.push(StreamType::Active);
    }
    derived
}
