//! Windowed analysis of a capture.
//!
//! Samples are selected by host timestamp (inclusive on both ends) and integrated with the
//! trapezoidal rule. The integrator works on a borrowed slice; the [`DataAnalysis`] facade owns
//! the loaded samples and the active window.
//!
//! ```
//! use lpm01a_daq::core::Sample;
//! use lpm01a_daq::data::analysis::DataAnalysis;
//!
//! let samples = vec![
//!     Sample::new(0, 0, 100),
//!     Sample::new(1_000_000, 1_000, 100),
//!     Sample::new(2_000_000, 2_000, 300),
//!     Sample::new(3_000_000, 3_000, 300),
//! ];
//! let analysis = DataAnalysis::from_samples(samples).unwrap();
//! assert_eq!(analysis.time_slice().unwrap(), 3.0);
//! assert!((analysis.average_current().unwrap() - 200e-6).abs() < 1e-12);
//! ```

use crate::core::{Sample, TimeWindow};
use crate::data::cache::{self, CacheBlock};
use crate::data::storage;
use crate::error::{AppResult, DaqError};
use crate::units;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fewest samples that define an elapsed time.
pub const MIN_SAMPLES: usize = 2;

/// Progress reports per integration, when the selection is large enough.
const PROGRESS_STEPS: usize = 200;

/// Integration progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Share of sample pairs processed, 0..=100.
    pub percent: f64,
    /// Estimated time remaining.
    pub eta: Duration,
}

/// Result of integrating one selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Integration {
    /// Area under the current curve, in ampere-hours.
    pub charge_ah: f64,
    /// Time-weighted mean current, in amps.
    pub mean_current_a: f64,
    /// Elapsed time between the first and last sample, in seconds.
    pub elapsed_s: f64,
    /// Number of samples integrated.
    pub num_values: usize,
}

/// Samples whose host timestamp lies inside `window`.
///
/// `samples` must be in non-decreasing host timestamp order (see [`check_order`]).
pub fn select(samples: &[Sample], window: TimeWindow) -> &[Sample] {
    let start = samples.partition_point(|s| s.host_timestamp_us < window.start_us());
    let end = samples.partition_point(|s| s.host_timestamp_us <= window.end_us());
    samples.get(start..end).unwrap_or(&[])
}

fn require_samples(selection: &[Sample]) -> AppResult<(&Sample, &Sample)> {
    match selection {
        [first, .., last] => Ok((first, last)),
        _ => Err(DaqError::InsufficientData {
            required: MIN_SAMPLES,
            available: selection.len(),
        }),
    }
}

/// Host time from `previous` to `current`, which sits at `index` in its sequence.
fn step_us(previous: &Sample, current: &Sample, index: usize) -> AppResult<u64> {
    current
        .host_timestamp_us
        .checked_sub(previous.host_timestamp_us)
        .ok_or(DaqError::OutOfOrder {
            index,
            previous_us: previous.host_timestamp_us,
            current_us: current.host_timestamp_us,
        })
}

/// Reject a sequence whose host timestamps step backwards. Samples are never re-sorted.
pub fn check_order(samples: &[Sample]) -> AppResult<()> {
    for (i, pair) in samples.windows(2).enumerate() {
        step_us(&pair[0], &pair[1], i + 1)?;
    }
    Ok(())
}

/// Elapsed seconds between the first and last sample of `selection`.
pub fn time_slice(selection: &[Sample]) -> AppResult<f64> {
    let (first, last) = require_samples(selection)?;
    check_order(selection)?;
    let elapsed_us = step_us(first, last, selection.len() - 1)?;
    Ok(units::us_to_s(elapsed_us as f64))
}

/// Trapezoidal integration of `selection`.
///
/// With more than 200 samples, `progress` is called every `len / 200` pairs.
pub fn integrate(
    selection: &[Sample],
    mut progress: Option<&mut dyn FnMut(Progress)>,
) -> AppResult<Integration> {
    let (first, last) = require_samples(selection)?;
    check_order(selection)?;
    let elapsed_us = step_us(first, last, selection.len() - 1)?;
    if elapsed_us == 0 {
        return Err(DaqError::ZeroDuration {
            samples: selection.len(),
        });
    }

    let pairs = selection.len() - 1;
    let stride = if selection.len() > PROGRESS_STEPS {
        selection.len() / PROGRESS_STEPS
    } else {
        0
    };
    let started = Instant::now();

    let mut charge_ah = 0.0;
    for (i, pair) in selection.windows(2).enumerate() {
        let gap_us = step_us(&pair[0], &pair[1], i + 1)?;
        let mean_ua = (pair[0].current_ua as f64 + pair[1].current_ua as f64) / 2.0;
        charge_ah += units::ua_to_a(mean_ua) * units::us_to_h(gap_us as f64);

        let done = i + 1;
        if stride > 0 && done % stride == 0 {
            if let Some(report) = progress.as_deref_mut() {
                report(progress_at(done, pairs, started.elapsed()));
            }
        }
    }

    let elapsed_h = units::us_to_h(elapsed_us as f64);
    Ok(Integration {
        charge_ah,
        mean_current_a: charge_ah / elapsed_h,
        elapsed_s: units::us_to_s(elapsed_us as f64),
        num_values: selection.len(),
    })
}

fn progress_at(done: usize, total: usize, spent: Duration) -> Progress {
    let percent = 100.0 * done as f64 / total as f64;
    let remaining = spent.as_secs_f64() / percent * (100.0 - percent);
    let eta = if remaining.is_finite() && remaining > 0.0 {
        Duration::from_secs_f64(remaining)
    } else {
        Duration::ZERO
    };
    Progress { percent, eta }
}

/// Time-weighted mean current of `selection`, in amps.
pub fn average_current(selection: &[Sample]) -> AppResult<f64> {
    Ok(integrate(selection, None)?.mean_current_a)
}

/// Where a report's numbers came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReportSource {
    /// Integrated from the samples in this run.
    Computed,
    /// Read back from the file's cache block.
    Cache {
        /// `YYYY-MM-DD_HH:MM:SS` of the original calculation.
        generated: String,
    },
}

/// Summary of an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    /// Elapsed time of the selection, in seconds.
    pub window_s: f64,
    /// Number of samples in the selection.
    pub num_values: u64,
    /// Integrated charge, in ampere-hours.
    pub charge_ah: f64,
    /// Time-weighted mean current, in amps.
    pub mean_current_a: f64,
    /// Computed or cached.
    pub source: ReportSource,
}

impl AnalysisReport {
    /// Report for a fresh integration.
    pub fn from_integration(integration: &Integration) -> Self {
        Self {
            window_s: integration.elapsed_s,
            num_values: integration.num_values as u64,
            charge_ah: integration.charge_ah,
            mean_current_a: integration.mean_current_a,
            source: ReportSource::Computed,
        }
    }

    /// Report rebuilt from a cache block.
    pub fn from_cache_block(block: &CacheBlock) -> Self {
        let elapsed_h = units::s_to_h(block.window_s);
        let mean_current_a = if elapsed_h > 0.0 {
            block.avg_current_ah / elapsed_h
        } else {
            0.0
        };
        Self {
            window_s: block.window_s,
            num_values: block.num_values,
            charge_ah: block.avg_current_ah,
            mean_current_a,
            source: ReportSource::Cache {
                generated: format!("{}_{}", block.generated_date, block.generated_time),
            },
        }
    }

    /// Cache block carrying this report, stamped with `generated`.
    pub fn to_cache_block(&self, generated: DateTime<Local>) -> CacheBlock {
        CacheBlock::new(generated, self.window_s, self.num_values, self.charge_ah)
    }

    /// Window in milliseconds.
    pub fn window_ms(&self) -> f64 {
        units::s_to_ms(self.window_s)
    }

    /// Charge in milliampere-hours.
    pub fn charge_mah(&self) -> f64 {
        units::a_to_ma(self.charge_ah)
    }

    /// Mean current in microamps.
    pub fn mean_current_ua(&self) -> f64 {
        units::a_to_ua(self.mean_current_a)
    }
}

/// A loaded capture plus the window being analysed.
#[derive(Debug, Clone)]
pub struct DataAnalysis {
    source: Option<PathBuf>,
    samples: Vec<Sample>,
    window: TimeWindow,
}

impl DataAnalysis {
    /// Analyse samples already in memory, kept in arrival order.
    ///
    /// Fails with [`DaqError::OutOfOrder`] if a host timestamp steps backwards.
    pub fn from_samples(samples: Vec<Sample>) -> AppResult<Self> {
        check_order(&samples)?;
        Ok(Self {
            source: None,
            samples,
            window: TimeWindow::full(),
        })
    }

    /// Load a capture file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let mut analysis = Self::from_samples(storage::read_samples(path)?)?;
        analysis.source = Some(path.to_path_buf());
        Ok(analysis)
    }

    /// Restrict the analysis to `window`.
    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    /// Active window.
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// File the samples were loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Every loaded sample.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Samples inside the active window.
    pub fn selection(&self) -> &[Sample] {
        select(&self.samples, self.window)
    }

    /// Number of samples inside the active window.
    pub fn number_of_used_values(&self) -> usize {
        self.selection().len()
    }

    /// Elapsed seconds covered by the active window's samples.
    pub fn time_slice(&self) -> AppResult<f64> {
        time_slice(self.selection())
    }

    /// Time-weighted mean current over the active window, in amps.
    pub fn average_current(&self) -> AppResult<f64> {
        average_current(self.selection())
    }

    /// Integrate the active window.
    pub fn report(&self, progress: Option<&mut dyn FnMut(Progress)>) -> AppResult<AnalysisReport> {
        let selection = self.selection();
        debug!(
            "Integrating {} of {} samples in {}..={} us",
            selection.len(),
            self.samples.len(),
            self.window.start_us(),
            self.window.end_us()
        );
        let integration = integrate(selection, progress)?;
        Ok(AnalysisReport::from_integration(&integration))
    }
}

/// Analyse the capture at `path`.
///
/// For the full window with `use_cache` set, a parsable cache block is returned as-is; on a
/// miss the result is computed and written back as the new cache block. A failed cache write is
/// logged and does not fail the analysis. Sub-windows never read or write the cache.
pub fn analyze_file(
    path: impl AsRef<Path>,
    window: TimeWindow,
    use_cache: bool,
    progress: Option<&mut dyn FnMut(Progress)>,
) -> AppResult<AnalysisReport> {
    let path = path.as_ref();
    let cacheable = use_cache && window.is_full();

    if cacheable {
        if let Some(block) = cache::read_cache(path) {
            info!("Using cached result from '{}'", path.display());
            return Ok(AnalysisReport::from_cache_block(&block));
        }
    }

    let report = DataAnalysis::load(path)?.with_window(window).report(progress)?;

    if cacheable {
        if let Err(e) = cache::write_cache(path, &report.to_cache_block(Local::now())) {
            warn!("Failed to cache result in '{}': {}", path.display(), e);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Vec<Sample> {
        vec![
            Sample::new(0, 0, 100),
            Sample::new(1_000_000, 1_000, 100),
            Sample::new(2_000_000, 2_000, 300),
            Sample::new(3_000_000, 3_000, 300),
        ]
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * a.abs().max(b.abs()).max(1e-12)
    }

    #[test]
    fn test_four_sample_scenario() {
        let samples = scenario();

        assert_eq!(time_slice(&samples).unwrap(), 3.0);
        let result = integrate(&samples, None).unwrap();
        assert!(close(result.charge_ah, 600e-6 / 3600.0), "{}", result.charge_ah);
        assert!(close(result.mean_current_a, 200e-6), "{}", result.mean_current_a);
        assert_eq!(result.num_values, 4);
        assert_eq!(result.elapsed_s, 3.0);
    }

    #[test]
    fn test_constant_current_is_density_independent() {
        let timestamps = [0u64, 1, 5, 6, 1_000, 1_001, 250_000, 250_010, 9_999_999];
        let samples: Vec<Sample> = timestamps.iter().map(|&t| Sample::new(t, 0, 4_200)).collect();

        let mean = average_current(&samples).unwrap();
        assert!(close(mean, 4_200e-6), "{mean}");
    }

    #[test]
    fn test_piecewise_constant_is_exact() {
        // 0 uA for 1 s then a step to 1000 uA held for 3 s
        let samples = vec![
            Sample::new(0, 0, 0),
            Sample::new(1_000_000, 0, 0),
            Sample::new(1_000_001, 0, 1_000),
            Sample::new(4_000_001, 0, 1_000),
        ];
        let result = integrate(&samples, None).unwrap();
        let expected_ah = (500e-6 * 1e-6 + 1_000e-6 * 3.0) / 3600.0;
        assert!(close(result.charge_ah, expected_ah));
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let samples = scenario();

        let window = TimeWindow::new(1_000_000, 2_000_000).unwrap();
        assert_eq!(select(&samples, window), &samples[1..3]);

        let window = TimeWindow::new(1_000_001, 1_999_999).unwrap();
        assert!(select(&samples, window).is_empty());

        let window = TimeWindow::new(999_999, 2_000_001).unwrap();
        assert_eq!(select(&samples, window).len(), 2);

        assert_eq!(select(&samples, TimeWindow::full()).len(), 4);
    }

    #[test]
    fn test_too_few_samples_is_an_error() {
        let one = [Sample::new(0, 0, 1)];
        assert!(matches!(
            time_slice(&one),
            Err(DaqError::InsufficientData {
                required: 2,
                available: 1
            })
        ));
        assert!(matches!(
            average_current(&[]),
            Err(DaqError::InsufficientData { available: 0, .. })
        ));
    }

    #[test]
    fn test_zero_duration_is_an_error() {
        let samples = [Sample::new(7, 0, 1), Sample::new(7, 0, 2)];
        assert_eq!(time_slice(&samples).unwrap(), 0.0);
        assert!(matches!(
            average_current(&samples),
            Err(DaqError::ZeroDuration { samples: 2 })
        ));
    }

    #[test]
    fn test_progress_is_observational() {
        let samples: Vec<Sample> = (0..1_001u64)
            .map(|i| Sample::new(i * 1_000, 0, (i % 7) as i64 * 10))
            .collect();

        let mut reports = Vec::new();
        let mut observe = |p: Progress| reports.push(p);
        let with_progress = integrate(&samples, Some(&mut observe)).unwrap();
        let without = integrate(&samples, None).unwrap();

        assert_eq!(with_progress, without);
        // 1000 pairs, stride 1001 / 200 = 5
        assert_eq!(reports.len(), 200);
        assert!(reports.windows(2).all(|w| w[0].percent < w[1].percent));
        assert_eq!(reports.last().map(|p| p.percent), Some(100.0));
    }

    #[test]
    fn test_small_selection_reports_no_progress() {
        let mut calls = 0;
        let mut observe = |_: Progress| calls += 1;
        integrate(&scenario(), Some(&mut observe)).unwrap();
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_facade_applies_window() {
        let analysis = DataAnalysis::from_samples(scenario())
            .unwrap()
            .with_window(TimeWindow::new(1_000_000, 3_000_000).unwrap());

        assert_eq!(analysis.number_of_used_values(), 3);
        assert_eq!(analysis.time_slice().unwrap(), 2.0);
        // (100+300)/2 for 1 s, 300 for 1 s
        assert!(close(analysis.average_current().unwrap(), 250e-6));
        assert_eq!(analysis.samples().len(), 4);
    }

    #[test]
    fn test_facade_rejects_backward_timestamps() {
        let mut samples = scenario();
        samples.swap(1, 2);
        assert!(matches!(
            DataAnalysis::from_samples(samples),
            Err(DaqError::OutOfOrder {
                index: 2,
                previous_us: 2_000_000,
                current_us: 1_000_000
            })
        ));
    }

    #[test]
    fn test_backward_step_is_not_clamped() {
        let samples = [
            Sample::new(0, 0, 100),
            Sample::new(5_000, 0, 100),
            Sample::new(1_000, 0, 100),
            Sample::new(9_000, 0, 100),
        ];
        assert!(matches!(
            integrate(&samples, None),
            Err(DaqError::OutOfOrder { index: 2, .. })
        ));
        assert!(matches!(
            time_slice(&samples),
            Err(DaqError::OutOfOrder { index: 2, .. })
        ));

        let reversed = [Sample::new(10, 0, 1), Sample::new(5, 0, 1)];
        assert!(matches!(
            average_current(&reversed),
            Err(DaqError::OutOfOrder { index: 1, .. })
        ));
    }

    #[test]
    fn test_equal_timestamps_are_in_order() {
        let samples = vec![
            Sample::new(0, 0, 100),
            Sample::new(0, 0, 200),
            Sample::new(1_000, 0, 200),
        ];
        let analysis = DataAnalysis::from_samples(samples.clone()).unwrap();
        assert_eq!(analysis.samples(), samples.as_slice());
    }

    #[test]
    fn test_report_units() {
        let report = DataAnalysis::from_samples(scenario())
            .unwrap().report(None).unwrap();
        assert_eq!(report.source, ReportSource::Computed);
        assert_eq!(report.num_values, 4);
        assert_eq!(report.window_ms(), 3000.0);
        assert!(close(report.mean_current_ua(), 200.0));
        assert!(close(report.charge_mah(), 600e-3 / 3600.0));
    }

    #[test]
    fn test_report_survives_cache_block() {
        use chrono::TimeZone;

        let report = DataAnalysis::from_samples(scenario())
            .unwrap().report(None).unwrap();
        let generated = Local.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let restored = AnalysisReport::from_cache_block(&report.to_cache_block(generated));

        assert_eq!(restored.window_s, report.window_s);
        assert_eq!(restored.num_values, report.num_values);
        assert_eq!(restored.charge_ah, report.charge_ah);
        assert!(close(restored.mean_current_a, report.mean_current_a));
        assert_eq!(
            restored.source,
            ReportSource::Cache {
                generated: "2024-05-01_09:00:00".to_string()
            }
        );
    }
}
