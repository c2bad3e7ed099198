// ABOUTME: Integration tests for the rolling window and leader search
// ABOUTME: Covers gap padding policies, the full boundary, and tie-breaking between equal windows
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use peaksync::intelligence::{find_leaders, GapPolicy, RollingWindow, WindowAxis, WindowOptions};

const EPSILON: f64 = 1e-9;

fn window(period: f64, policy: GapPolicy) -> RollingWindow {
    RollingWindow::with_options(period, WindowAxis::Time, WindowOptions::with_policy(policy))
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < EPSILON,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn test_regular_samples_average() {
    let mut window = window(5.0, GapPolicy::Zero);
    for t in 0..10_i32 {
        window.add(f64::from(t), 100.0);
    }
    assert!(window.full());
    assert_close(window.avg(), 100.0);
    assert_close(window.first_time().unwrap(), 4.0);
    assert_close(window.last_time().unwrap(), 9.0);
}

#[test]
fn test_full_boundary() {
    let mut window = window(5.0, GapPolicy::Zero);
    for t in 0..5_i32 {
        window.add(f64::from(t), 100.0);
        assert!(!window.full(), "window should not be full at t={t}");
    }
    window.add(5.0, 100.0);
    assert!(window.full());
    assert_close(window.span(), 5.0);
    assert_close(window.avg(), 100.0);
}

#[test]
fn test_single_sample_is_never_full() {
    let mut window = window(0.5, GapPolicy::Zero);
    window.add(0.0, 300.0);
    assert!(!window.full());
    assert_close(window.avg(), 300.0);
}

#[test]
fn test_ideal_gap_adds_no_padding() {
    let mut window = window(10.0, GapPolicy::Zero);
    window.add(0.0, 100.0);
    window.add(1.0, 200.0);
    assert_eq!(window.len(), 2);
    assert_close(window.avg(), 200.0);
}

#[test]
fn test_short_gap_pads_with_midpoint() {
    for policy in [GapPolicy::Zero, GapPolicy::Interpolate] {
        let mut window = window(10.0, policy);
        window.add(0.0, 100.0);
        window.add(3.0, 200.0);
        assert_eq!(window.len(), 4);
        let padded: Vec<(f64, f64)> = window.samples().collect();
        assert_eq!(padded[1], (1.0, 150.0));
        assert_eq!(padded[2], (2.0, 150.0));
        assert_close(window.avg(), 500.0 / 3.0);
    }
}

#[test]
fn test_long_gap_zero_policy() {
    let mut window = window(10.0, GapPolicy::Zero);
    window.add(0.0, 100.0);
    window.add(5.0, 200.0);
    assert_eq!(window.len(), 6);
    assert_close(window.avg(), 40.0);
}

#[test]
fn test_long_gap_interpolate_policy() {
    let mut window = window(10.0, GapPolicy::Interpolate);
    window.add(0.0, 100.0);
    window.add(5.0, 200.0);
    assert_eq!(window.len(), 6);
    assert_close(window.avg(), 160.0);
}

#[test]
fn test_non_finite_samples_are_ignored() {
    let mut window = window(5.0, GapPolicy::Zero);
    window.add(0.0, 100.0);
    window.add(1.0, f64::NAN);
    window.add(f64::INFINITY, 100.0);
    assert_eq!(window.len(), 1);
}

#[test]
fn test_copy_is_independent() {
    let mut original = window(5.0, GapPolicy::Zero);
    original.add(0.0, 100.0);
    let mut copy = original.copy();
    copy.add(1.0, 300.0);
    assert_eq!(original.len(), 1);
    assert_eq!(copy.len(), 2);
}

#[test]
fn test_later_window_wins_ties() {
    let times: Vec<f64> = (0..10_i32).map(f64::from).collect();
    let values = vec![100.0; 10];
    let leaders = find_leaders(
        &times,
        &values,
        &[5.0],
        WindowAxis::Time,
        WindowOptions::default(),
    );
    assert_eq!(leaders.len(), 1);
    let leader = &leaders[0];
    assert_close(leader.value, 100.0);
    assert_close(leader.start, 4.0);
    assert_close(leader.end, 9.0);
}

#[test]
fn test_periods_longer_than_stream_are_skipped() {
    let times: Vec<f64> = (0..10_i32).map(f64::from).collect();
    let values = vec![150.0; 10];
    let leaders = find_leaders(
        &times,
        &values,
        &[5.0, 15.0, 60.0],
        WindowAxis::Time,
        WindowOptions::default(),
    );
    let periods: Vec<f64> = leaders.iter().map(|leader| leader.period).collect();
    assert_eq!(periods, vec![5.0]);
}

#[test]
fn test_best_window_is_found() {
    let times: Vec<f64> = (0..20_i32).map(f64::from).collect();
    let mut values = vec![100.0; 20];
    for value in &mut values[10..15] {
        *value = 400.0;
    }
    let leaders = find_leaders(
        &times,
        &values,
        &[5.0],
        WindowAxis::Time,
        WindowOptions::default(),
    );
    assert_close(leaders[0].value, 400.0);
    assert_close(leaders[0].end, 14.0);
}
