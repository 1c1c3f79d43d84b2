use crate::error::Result;
use std::fmt;
use std::time::{Duration, Instant};

/// `q`-th percentile (0..=100) of ascending `sorted`, interpolating linearly between ranks.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let position = (n - 1) as f64 * q.clamp(0.0, 100.0) / 100.0;
            let lower = position.floor() as usize;
            let upper = position.ceil() as usize;
            let weight = position - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Single-sample inference latency.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyStats {
    pub cold_ms: f64,
    pub mean_ms: f64,
    pub p95_ms: f64,
    pub runs: usize,
}

/// Times one cold call of `f`, then `runs` warm calls.
pub fn measure_latency(runs: usize, mut f: impl FnMut() -> Result<()>) -> Result<LatencyStats> {
    let start = Instant::now();
    f()?;
    let cold_ms = millis(start.elapsed());

    let mut samples = Vec::with_capacity(runs);
    for _ in 0..runs {
        let start = Instant::now();
        f()?;
        samples.push(millis(start.elapsed()));
    }
    samples.sort_by(|a, b| a.total_cmp(b));

    let mean_ms = if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    };

    Ok(LatencyStats {
        cold_ms,
        mean_ms,
        p95_ms: percentile(&samples, 95.0),
        runs,
    })
}

/// Wall-clock breakdown of an evaluation run, as an app would experience it.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingReport {
    pub dataset_prep: Duration,
    pub tokenizer_load: Duration,
    pub model_load: Duration,
    pub tokenization: Duration,
    pub forward_pass: Duration,
    pub samples: usize,
    pub latency: LatencyStats,
}

impl TimingReport {
    /// Tokenizer load, model load and one cold inference.
    pub fn startup_estimate_ms(&self) -> f64 {
        millis(self.tokenizer_load) + millis(self.model_load) + self.latency.cold_ms
    }
}

impl fmt::Display for TimingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let per_sample = if self.samples == 0 {
            0.0
        } else {
            millis(self.forward_pass) / self.samples as f64
        };

        writeln!(f, "Dataset prep:      {:.1} ms", millis(self.dataset_prep))?;
        writeln!(f, "Tokenizer load:    {:.1} ms", millis(self.tokenizer_load))?;
        writeln!(f, "Model load:        {:.1} ms", millis(self.model_load))?;
        writeln!(f, "Tokenization:      {:.1} ms", millis(self.tokenization))?;
        writeln!(
            f,
            "Forward pass:      {:.1} ms ({per_sample:.2} ms/sample)",
            millis(self.forward_pass)
        )?;
        writeln!(f, "Cold inference:    {:.1} ms", self.latency.cold_ms)?;
        writeln!(
            f,
            "Single inference:  mean {:.1} ms, p95 {:.1} ms over {} runs",
            self.latency.mean_ms, self.latency.p95_ms, self.latency.runs
        )?;
        write!(f, "App start-up est.: {:.1} ms", self.startup_estimate_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();

        assert!((percentile(&values, 95.0) - 9.55).abs() < 1e-9);
        assert!((percentile(&values, 50.0) - 5.5).abs() < 1e-9);
        assert_eq!(percentile(&values, 100.0), 10.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn latency_counts_cold_and_warm_runs() {
        let mut calls = 0;
        let stats = measure_latency(5, || {
            calls += 1;
            Ok(())
        })
        .unwrap();

        assert_eq!(calls, 6);
        assert_eq!(stats.runs, 5);
        assert!(stats.p95_ms >= 0.0);
    }
}
