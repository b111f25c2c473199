use std::convert::TryInto;
use std::time::{Duration, Instant};

/// Accumulates CPU time over a batch of work items.
#[derive(Clone, Copy, Debug)]
pub struct WorkTimer {
    total_cpu_time: Duration,
    items_completed: u32,
}

impl WorkTimer {
    pub fn start() -> Self {
        Self {
            total_cpu_time: Duration::new(0, 0),
            items_completed: 0,
        }
    }

    pub fn total_cpu_time(&self) -> Duration {
        self.total_cpu_time
    }

    pub fn items_completed(&self) -> u32 {
        self.items_completed
    }

    pub fn complete_item(&mut self, d: Duration) {
        self.total_cpu_time += d;
        self.items_completed += 1;
    }

    /// Runs `f` and counts it as one completed item.
    pub fn time_item<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let r = f();
        self.complete_item(start.elapsed());
        r
    }

    pub fn average_cpu_time_us(&self) -> u32 {
        let frame_cpu_time_us: u32 = self
            .total_cpu_time
            .as_micros()
            .try_into()
            .unwrap_or(u32::MAX);

        frame_cpu_time_us / self.items_completed.max(1)
    }
}

/// Exponential moving average of a duration in milliseconds.
#[derive(Clone, Copy, Debug)]
pub struct MovingAverageMs {
    value_ms: f32,
    weight: f32,
}

impl MovingAverageMs {
    /// `weight` is the contribution of each new sample.
    pub fn new(weight: f32) -> Self {
        Self {
            value_ms: 0.0,
            weight: weight.clamp(0.0, 1.0),
        }
    }

    pub fn add_sample(&mut self, d: Duration) {
        let sample_ms = d.as_secs_f32() * 1000.0;
        self.value_ms = self.value_ms * (1.0 - self.weight) + sample_ms * self.weight;
    }

    pub fn get_ms(&self) -> f32 {
        self.value_ms
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    use approx::assert_relative_eq;

    #[test]
    fn average_of_completed_items() {
        let mut timer = WorkTimer::start();
        timer.complete_item(Duration::from_micros(100));
        timer.complete_item(Duration::from_micros(300));
        assert_eq!(timer.items_completed(), 2);
        assert_eq!(timer.average_cpu_time_us(), 200);

        let x = timer.time_item(|| 7);
        assert_eq!(x, 7);
        assert_eq!(timer.items_completed(), 3);
    }

    #[test]
    fn moving_average_converges_slowly() {
        let mut avg = MovingAverageMs::new(0.01);
        avg.add_sample(Duration::from_millis(100));
        assert_relative_eq!(avg.get_ms(), 1.0, epsilon = 1e-4);
        avg.add_sample(Duration::from_millis(100));
        assert_relative_eq!(avg.get_ms(), 1.99, epsilon = 1e-4);
    }
}
