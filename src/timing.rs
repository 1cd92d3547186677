//! Step timing utilities.

use std::time::{Duration, Instant};

/// A simple timer for measuring how long a step or run took.
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    /// Start a new timer with the given label.
    pub fn start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    /// Print the elapsed time next to `status` and return it.
    pub fn finish(self, status: &str) -> Duration {
        let elapsed = self.start.elapsed();
        println!("  [{}] {} ({})", status, self.name, format_duration(elapsed));
        elapsed
    }
}

/// Human-readable duration: seconds below a minute, minutes above.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs >= 60.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}s", secs)
    }
}
