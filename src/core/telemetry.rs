// src/core/telemetry.rs — Per-session GPU telemetry series

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Each series keeps at most this many of the most recent readings.
pub const MAX_METRIC_SAMPLES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Utilization in percent.
    pub gpu_utilization: f64,
    /// Degrees Celsius.
    pub temperature: f64,
    /// Megabytes.
    pub memory_used: f64,
}

impl MetricSample {
    pub fn zeroed() -> Self {
        Self {
            gpu_utilization: 0.0,
            temperature: 0.0,
            memory_used: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMetrics {
    pub gpu_utilization: VecDeque<f64>,
    pub temperature: VecDeque<f64>,
    pub memory_used: VecDeque<f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub samples: usize,
    pub avg_utilization: i64,
    pub avg_temperature: i64,
    pub avg_memory_used: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl SessionMetrics {
    /// The state a session starts with on activation: one zeroed reading.
    pub fn initial(at: DateTime<Utc>) -> Self {
        let mut metrics = Self::default();
        metrics.push(MetricSample::zeroed(), at);
        metrics
    }

    pub fn push(&mut self, sample: MetricSample, at: DateTime<Utc>) {
        push_bounded(&mut self.gpu_utilization, sample.gpu_utilization);
        push_bounded(&mut self.temperature, sample.temperature);
        push_bounded(&mut self.memory_used, sample.memory_used);
        self.last_updated = Some(at);
    }

    pub fn len(&self) -> usize {
        self.gpu_utilization.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gpu_utilization.is_empty()
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            samples: self.len(),
            avg_utilization: rounded_mean(&self.gpu_utilization),
            avg_temperature: rounded_mean(&self.temperature),
            avg_memory_used: rounded_mean(&self.memory_used),
            last_updated: self.last_updated,
        }
    }
}

fn push_bounded(series: &mut VecDeque<f64>, value: f64) {
    series.push_back(value);
    while series.len() > MAX_METRIC_SAMPLES {
        series.pop_front();
    }
}

fn rounded_mean(series: &VecDeque<f64>) -> i64 {
    if series.is_empty() {
        return 0;
    }
    (series.iter().sum::<f64>() / series.len() as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(u: f64, t: f64, m: f64) -> MetricSample {
        MetricSample {
            gpu_utilization: u,
            temperature: t,
            memory_used: m,
        }
    }

    #[test]
    fn test_initial_has_one_zero_sample() {
        let m = SessionMetrics::initial(Utc::now());
        assert_eq!(m.len(), 1);
        let s = m.summary();
        assert_eq!(s.avg_utilization, 0);
        assert!(s.last_updated.is_some());
    }

    #[test]
    fn test_series_capped_at_max() {
        let mut m = SessionMetrics::default();
        for i in 0..(MAX_METRIC_SAMPLES + 25) {
            m.push(sample(i as f64, 50.0, 1000.0), Utc::now());
        }
        assert_eq!(m.len(), MAX_METRIC_SAMPLES);
        assert_eq!(m.temperature.len(), MAX_METRIC_SAMPLES);
        // oldest readings were evicted
        assert_eq!(m.gpu_utilization.front().copied(), Some(25.0));
    }

    #[test]
    fn test_summary_rounds_averages() {
        let mut m = SessionMetrics::default();
        m.push(sample(10.0, 40.0, 100.0), Utc::now());
        m.push(sample(21.0, 45.0, 301.0), Utc::now());
        let s = m.summary();
        assert_eq!(s.samples, 2);
        assert_eq!(s.avg_utilization, 16); // 15.5 rounds away from zero
        assert_eq!(s.avg_temperature, 43); // 42.5
        assert_eq!(s.avg_memory_used, 201); // 200.5
    }

    #[test]
    fn test_empty_summary_is_zero() {
        let s = SessionMetrics::default().summary();
        assert_eq!(s.samples, 0);
        assert_eq!(s.avg_temperature, 0);
        assert!(s.last_updated.is_none());
    }
}
