//! Progress reporting for long passes over a record stream

use std::time::Instant;

use super::logger::Logger;

/// Logs `{NAME}_PROGRESS` every `every` items
///
/// The total is advisory (a count hint) and only used for display.
pub struct Progress<'a> {
    name: &'a str,
    every: usize,
    count: usize,
    total: Option<usize>,
    started: Instant,
}

impl<'a> Progress<'a> {
    /// Default reporting cadence
    pub const DEFAULT_EVERY: usize = 100_000;

    /// Create a reporter with an optional advisory total
    pub fn new(name: &'a str, total: Option<usize>) -> Self {
        Self::with_cadence(name, total, Self::DEFAULT_EVERY)
    }

    /// Create a reporter logging every `every` items
    pub fn with_cadence(name: &'a str, total: Option<usize>, every: usize) -> Self {
        Self {
            name,
            every: every.max(1),
            count: 0,
            total,
            started: Instant::now(),
        }
    }

    /// Records one item
    pub fn tick(&mut self) {
        self.count += 1;
        if self.count % self.every == 0 {
            self.report();
        }
    }

    /// Items seen so far
    pub fn count(&self) -> usize {
        self.count
    }

    fn rate(&self) -> String {
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            format!("{:.1}", self.count as f64 / secs)
        } else {
            "0".to_string()
        }
    }

    fn report(&self) {
        let count = self.count.to_string();
        let rate = self.rate();
        let total = self.total.map(|t| t.to_string());
        let mut fields = vec![("count", count.as_str()), ("per_sec", rate.as_str())];
        if let Some(total) = total.as_deref() {
            fields.push(("total_hint", total));
        }
        Logger::info(&format!("{}_PROGRESS", self.name), &fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counts() {
        let mut progress = Progress::with_cadence("TEST_PASS", Some(10), 3);
        for _ in 0..7 {
            progress.tick();
        }
        assert_eq!(progress.count(), 7);
    }

    #[test]
    fn test_zero_cadence_clamped() {
        let mut progress = Progress::with_cadence("TEST_PASS", None, 0);
        progress.tick();
        assert_eq!(progress.count(), 1);
    }
}
