//! Nested wall-clock timers for the setup and solve stages.

use std::collections::HashMap;
use std::time::Instant;

use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

struct Timer {
    parent: Option<String>,
    count: usize,
    total: f64,
    running: Option<Instant>,
}

/// A named tree of accumulating wall-clock timers.
///
/// Timers are created once with an optional parent, then started and stopped
/// around the instrumented stages; the report aggregates the maximum over all
/// ranks and prints from rank 0.
pub struct Profiler {
    name: String,
    timers: HashMap<String, Timer>,
    order: Vec<String>,
}

impl Profiler {
    /// Create an empty profiler.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            timers: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a timer under an optional parent; re-creating is a no-op.
    pub fn create(&mut self, name: &str, parent: Option<&str>) {
        if self.timers.contains_key(name) {
            return;
        }
        self.timers.insert(
            name.to_string(),
            Timer {
                parent: parent.map(|p| p.to_string()),
                count: 0,
                total: 0.0,
                running: None,
            },
        );
        self.order.push(name.to_string());
    }

    /// Start a timer (created on the fly when unknown).
    pub fn start(&mut self, name: &str) {
        if !self.timers.contains_key(name) {
            self.create(name, None);
        }
        let t = self.timers.get_mut(name).expect("timer exists");
        t.running = Some(Instant::now());
    }

    /// Stop a timer and accumulate the elapsed time.
    pub fn stop(&mut self, name: &str) {
        if let Some(t) = self.timers.get_mut(name) {
            if let Some(start) = t.running.take() {
                t.total += start.elapsed().as_secs_f64();
                t.count += 1;
            }
        }
    }

    /// Total accumulated seconds of a timer.
    pub fn total(&self, name: &str) -> f64 {
        self.timers.get(name).map(|t| t.total).unwrap_or(0.0)
    }

    /// Reduce every timer to its maximum over the communicator and print the
    /// tree from rank 0.
    pub fn report(&self, comm: &SimpleCommunicator) {
        let mut lines = Vec::new();
        for name in &self.order {
            let t = &self.timers[name];
            let mut max = 0.0f64;
            comm.all_reduce_into(&t.total, &mut max, mpi::collective::SystemOperation::max());
            lines.push((name.clone(), t.parent.clone(), t.count, max));
        }
        if comm.rank() == 0 {
            println!("profiler {}:", self.name);
            for (name, parent, count, max) in lines {
                let indent = match parent {
                    Some(_) => "    ",
                    None => "  ",
                };
                println!("{}{:<24} {:>6} calls {:>12.6} s", indent, name, count, max);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_profiler_accumulates() {
        let mut prof = Profiler::new("test");
        prof.create("outer", None);
        prof.create("inner", Some("outer"));
        prof.start("outer");
        prof.start("inner");
        std::thread::sleep(std::time::Duration::from_millis(2));
        prof.stop("inner");
        prof.stop("outer");
        assert!(prof.total("inner") > 0.0);
        assert!(prof.total("outer") >= prof.total("inner"));
        // stopping a never-started timer is harmless
        prof.stop("unknown");
    }
}
