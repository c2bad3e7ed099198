// ABOUTME: Integration tests for per-activity peak extraction
// ABOUTME: Validates power, powered-average, heart rate and pace peaks plus exclusion handling
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use common::seconds;
use peaksync::intelligence::{PeakConfig, PeakExtractor, WindowLeader};
use peaksync::models::{Activity, ActivityBasetype, PeakType, StreamSet, StreamType};

const START_MS: i64 = 1_714_550_400_000;

fn ride() -> Activity {
    Activity::new(1, 7, START_MS, ActivityBasetype::Ride, "Morning Ride")
}

fn steady_power(samples: usize, watts: f64) -> StreamSet {
    let mut streams = StreamSet::new();
    streams.insert(StreamType::Time, seconds(samples));
    streams.insert(StreamType::Watts, vec![watts; samples]);
    streams
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn test_short_ride_yields_single_power_peak() {
    let extractor = PeakExtractor::default();
    let peaks = extractor.extract(&ride(), &steady_power(10, 100.0));

    assert_eq!(peaks.len(), 1);
    let peak = &peaks[0];
    assert_eq!(peak.peak_type, PeakType::Power);
    assert_close(peak.period, 5.0);
    assert_close(peak.value, 100.0);
    assert_eq!(peak.rank, None);
    assert_eq!(peak.activity_id, 1);
    assert_eq!(peak.athlete_id, 7);
    assert_eq!(peak.timestamp, START_MS);
    assert_eq!(peak.basetype, ActivityBasetype::Ride);
    assert_close(peak.extra.end, 9.0);
}

#[test]
fn test_excluded_activity_yields_nothing() {
    let mut activity = ride();
    activity.peaks_exclude = true;
    let peaks = PeakExtractor::default().extract(&activity, &steady_power(600, 250.0));
    assert!(peaks.is_empty());
}

#[test]
fn test_missing_time_stream_yields_nothing() {
    let mut streams = StreamSet::new();
    streams.insert(StreamType::Watts, vec![200.0; 60]);
    assert!(PeakExtractor::default().extract(&ride(), &streams).is_empty());
}

#[test]
fn test_powered_averages_only_for_long_periods() {
    let extractor = PeakExtractor::new(PeakConfig {
        power_periods: vec![5.0, 300.0, 600.0],
        ..PeakConfig::default()
    });
    let streams = steady_power(700, 200.0);
    let times = streams.get(StreamType::Time).unwrap();
    let watts = streams.get(StreamType::Watts).unwrap();
    let leaders = extractor.power_leaders(times, watts);

    let periods = |leaders: &[WindowLeader]| {
        leaders.iter().map(|leader| leader.period).collect::<Vec<f64>>()
    };
    assert_eq!(periods(&leaders.power), vec![5.0, 300.0, 600.0]);
    assert_eq!(periods(&leaders.normalized), vec![300.0, 600.0]);
    assert_eq!(periods(&leaders.effective), vec![300.0, 600.0]);
    for leader in leaders.normalized.iter().chain(&leaders.effective) {
        assert_close(leader.value, 200.0);
    }
    assert_eq!(leaders.power[0].np, None);
    assert_close(leaders.power[1].np.unwrap(), 200.0);
}

#[test]
fn test_extract_emits_every_power_family() {
    let extractor = PeakExtractor::new(PeakConfig {
        power_periods: vec![5.0, 300.0],
        ..PeakConfig::default()
    });
    let peaks = extractor.extract(&ride(), &steady_power(400, 180.0));
    let mut kinds: Vec<(PeakType, u64)> = peaks
        .iter()
        .map(|peak| (peak.peak_type, peak.period.to_bits()))
        .collect();
    kinds.sort_unstable();
    assert_eq!(
        kinds,
        vec![
            (PeakType::Power, 5.0_f64.to_bits()),
            (PeakType::Power, 300.0_f64.to_bits()),
            (PeakType::NormalizedPower, 300.0_f64.to_bits()),
            (PeakType::EffectivePower, 300.0_f64.to_bits()),
        ]
    );
}

#[test]
fn test_heart_rate_peaks() {
    let mut streams = StreamSet::new();
    streams.insert(StreamType::Time, seconds(20));
    let mut heartrate = vec![120.0; 20];
    for bpm in &mut heartrate[12..17] {
        *bpm = 170.0;
    }
    streams.insert(StreamType::Heartrate, heartrate);

    let peaks = PeakExtractor::default().extract(&ride(), &streams);
    assert_eq!(peaks.len(), 2);
    let five = peaks
        .iter()
        .find(|peak| peak.peak_type == PeakType::HeartRate && peak.period < 6.0)
        .unwrap();
    assert_close(five.value, 170.0);
}

fn steady_run_streams() -> StreamSet {
    let mut streams = StreamSet::new();
    let times = seconds(101);
    let distance: Vec<f64> = times.iter().map(|t| t * 3.0).collect();
    streams.insert(StreamType::Time, times);
    streams.insert(StreamType::Distance, distance);
    streams
}

#[test]
fn test_runs_get_pace_peaks() {
    let extractor = PeakExtractor::new(PeakConfig {
        pace_distances: vec![100.0, 1000.0],
        ..PeakConfig::default()
    });
    let run = Activity::new(2, 7, START_MS, ActivityBasetype::Run, "Tempo");
    let peaks = extractor.extract(&run, &steady_run_streams());

    assert_eq!(peaks.len(), 1);
    assert_eq!(peaks[0].peak_type, PeakType::Pace);
    assert_close(peaks[0].period, 100.0);
    assert_close(peaks[0].value, 3.0);
}

#[test]
fn test_rides_get_no_pace_peaks() {
    let extractor = PeakExtractor::new(PeakConfig {
        pace_distances: vec![100.0],
        ..PeakConfig::default()
    });
    let peaks = extractor.extract(&ride(), &steady_run_streams());
    assert!(peaks.iter().all(|peak| peak.peak_type != PeakType::Pace));
}
