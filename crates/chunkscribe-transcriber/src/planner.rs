//! Segmentation planning and single/chunked routing

use crate::error::{TranscriptionError, TranscriptionResult};
use crate::types::{JobKind, TimeWindow};
use chunkscribe_core::ChunkingConfig;
use std::path::Path;

/// Split `[0, duration)` into consecutive windows of `chunk_length` seconds
///
/// The last window ends at `duration` and may be shorter than the others.
/// Window indices are in temporal order. Non-positive or non-finite inputs
/// produce an empty plan.
pub fn plan(duration_seconds: f64, chunk_length_seconds: f64) -> Vec<TimeWindow> {
    if !(duration_seconds.is_finite() && chunk_length_seconds.is_finite())
        || duration_seconds <= 0.0
        || chunk_length_seconds <= 0.0
    {
        return Vec::new();
    }

    // ceil(d / L), corrected for rounding in the division
    let mut count = (duration_seconds / chunk_length_seconds).ceil() as usize;
    while (count as f64) * chunk_length_seconds < duration_seconds {
        count += 1;
    }
    while count > 1 && ((count - 1) as f64) * chunk_length_seconds >= duration_seconds {
        count -= 1;
    }

    (0..count)
        .map(|index| {
            let start = index as f64 * chunk_length_seconds;
            let end = if index + 1 == count {
                duration_seconds
            } else {
                (index + 1) as f64 * chunk_length_seconds
            };
            TimeWindow { index, start, end }
        })
        .collect()
}

/// Choose the processing path for a probed duration
///
/// `0` means the duration could not be determined and is rejected, as is
/// anything above the absolute ceiling. Durations strictly above the
/// long-form threshold are chunked.
pub fn route(
    path: &Path,
    duration_seconds: f64,
    chunking: &ChunkingConfig,
) -> TranscriptionResult<JobKind> {
    if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
        return Err(TranscriptionError::unusable_input(
            path,
            "Could not determine audio duration or audio file is invalid",
        ));
    }

    if duration_seconds > chunking.max_duration_seconds {
        return Err(TranscriptionError::unusable_input(
            path,
            format!(
                "Audio file too long ({duration_seconds:.2} seconds). Maximum supported duration is {:.0} seconds",
                chunking.max_duration_seconds
            ),
        ));
    }

    if duration_seconds > chunking.long_form_threshold_seconds {
        Ok(JobKind::Chunked)
    } else {
        Ok(JobKind::Single)
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_forty_minutes_in_fifteen_minute_chunks() {
        let windows = plan(2_400.0, 900.0);
        let bounds: Vec<(f64, f64)> = windows.iter().map(|w| (w.start, w.end)).collect();
        assert_eq!(bounds, vec![(0.0, 900.0), (900.0, 1_800.0), (1_800.0, 2_400.0)]);
        assert_eq!(
            windows.iter().map(|w| w.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let windows = plan(1_800.0, 900.0);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].length(), 900.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(plan(0.0, 900.0).is_empty());
        assert!(plan(-5.0, 900.0).is_empty());
        assert!(plan(100.0, 0.0).is_empty());
        assert!(plan(f64::NAN, 900.0).is_empty());
        assert!(plan(f64::INFINITY, 900.0).is_empty());
    }

    #[test]
    fn test_short_asset_single_window() {
        let windows = plan(12.5, 900.0);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start, 0.0);
        assert_eq!(windows[0].end, 12.5);
    }

    #[rstest]
    #[case(0.0, None)]
    #[case(300.0, Some(JobKind::Single))]
    #[case(1_800.0, Some(JobKind::Single))]
    #[case(1_801.0, Some(JobKind::Chunked))]
    #[case(28_800.0, Some(JobKind::Chunked))]
    #[case(28_801.0, None)]
    fn test_routing_boundaries(#[case] duration: f64, #[case] expected: Option<JobKind>) {
        let chunking = ChunkingConfig::default();
        let routed = route(Path::new("/tmp/upload.mp3"), duration, &chunking).ok();
        assert_eq!(routed, expected);
    }

    #[test]
    fn test_rejection_is_unusable_input() {
        let chunking = ChunkingConfig::default();
        let err = route(Path::new("/tmp/long.wav"), 40_000.0, &chunking).unwrap_err();
        assert!(matches!(err, TranscriptionError::UnusableInput { .. }));
        assert!(err.to_string().contains("too long"));
    }

    proptest! {
        #[test]
        fn prop_plan_covers_duration(duration in 0.001f64..100_000.0, length in 1.0f64..5_000.0) {
            let windows = plan(duration, length);

            let n = windows.len();
            prop_assert!(n >= 1);
            prop_assert!(((n - 1) as f64) * length < duration);
            prop_assert!((n as f64) * length >= duration);
            prop_assert_eq!(windows[0].start, 0.0);
            prop_assert_eq!(windows[n - 1].end, duration);

            for (i, w) in windows.iter().enumerate() {
                prop_assert_eq!(w.index, i);
                prop_assert!(w.start < w.end);
                prop_assert!(w.length() <= length + 1e-9);
            }
            for pair in windows.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
                prop_assert!(pair[0].start < pair[1].start);
            }
        }
    }
}
