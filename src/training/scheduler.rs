use burn::lr_scheduler::LrScheduler;
use burn::tensor::backend::Backend;
use burn::optim::LearningRate;

/// Linear warmup from 0 to the peak rate, then linear decay to 0 at `total_steps`.
///
/// The learner steps the scheduler once per batch, so steps count batches rather than
/// optimizer updates.
#[derive(Clone, Debug)]
pub struct WarmupLinearScheduler {
    peak: LearningRate,
    warmup_steps: usize,
    total_steps: usize,
    step: usize,
}

impl WarmupLinearScheduler {
    pub fn new(peak: LearningRate, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            peak,
            warmup_steps: warmup_steps.min(total_steps),
            total_steps: total_steps.max(1),
            step: 0,
        }
    }

    /// Warmup covering `ceil(warmup_ratio * total_steps)` steps.
    pub fn with_warmup_ratio(peak: LearningRate, warmup_ratio: f64, total_steps: usize) -> Self {
        let warmup_steps = (warmup_ratio * total_steps as f64).ceil() as usize;
        Self::new(peak, warmup_steps, total_steps)
    }

    /// Learning rate at step `step` (0-based).
    pub fn rate_at(&self, step: usize) -> LearningRate {
        if step < self.warmup_steps {
            return self.peak * step as f64 / self.warmup_steps.max(1) as f64;
        }

        let remaining = self.total_steps.saturating_sub(step) as f64;
        let decay_steps = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        self.peak * (remaining / decay_steps).max(0.0)
    }
}

impl LrScheduler for WarmupLinearScheduler {
    type Record<B: Backend> = usize;

    fn step(&mut self) -> LearningRate {
        let rate = self.rate_at(self.step);
        self.step += 1;
        rate
    }

    fn to_record<B: Backend>(&self) -> Self::Record<B> {
        self.step
    }

    fn load_record<B: Backend>(mut self, record: Self::Record<B>) -> Self {
        self.step = record;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warms_up_then_decays() {
        let scheduler = WarmupLinearScheduler::new(1e-3, 2, 6);

        let rates: Vec<f64> = (0..7).map(|step| scheduler.rate_at(step)).collect();
        let expected = [0.0, 5e-4, 1e-3, 7.5e-4, 5e-4, 2.5e-4, 0.0];
        for (rate, expected) in rates.iter().zip(expected) {
            assert!((rate - expected).abs() < 1e-12, "{rate} != {expected}");
        }
    }

    #[test]
    fn warmup_ratio_rounds_up() {
        let scheduler = WarmupLinearScheduler::with_warmup_ratio(3e-5, 0.1, 25);

        assert_eq!(scheduler.warmup_steps, 3);
    }

    #[test]
    fn step_advances_the_schedule() {
        let mut scheduler = WarmupLinearScheduler::new(1.0, 1, 2);

        assert_eq!(scheduler.step(), 0.0);
        assert_eq!(scheduler.step(), 1.0);
        assert_eq!(scheduler.step(), 0.0);
    }

    #[test]
    fn rate_stays_positive_through_the_last_batch() {
        let (batches_per_epoch, num_epochs) = (7, 3);
        let mut scheduler =
            WarmupLinearScheduler::with_warmup_ratio(3e-5, 0.1, batches_per_epoch * num_epochs);

        let rates: Vec<f64> = (0..batches_per_epoch * num_epochs)
            .map(|_| scheduler.step())
            .collect();

        assert_eq!(rates[0], 0.0);
        assert!(rates[1..].iter().all(|rate| *rate > 0.0), "{rates:?}");
        assert!(rates[rates.len() - 1] < rates[rates.len() - 2]);
    }
}
