//! Stress tests for live query fan-out.
//!
//! Concurrent writers create fighters while readers on other connections
//! hold live count queries. Every reader must end at the final count.

use crate::fixtures::{TestClient, TestServer};
use livedoc_core::{QueryMode, QueryResult, QueryShape};
use livedoc_server::{Identity, QueryHandle};
use serde_json::json;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Successful writes.
    pub writes: usize,
    /// Failed writes.
    pub failed_writes: usize,
    /// Pushes received across all readers.
    pub pushes: usize,
    /// Readers whose last result was not the final count.
    pub stale_readers: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Writes: {} ({} failed)", self.writes, self.failed_writes);
        println!("Pushes: {}", self.pushes);
        println!("Stale readers: {}", self.stale_readers);
        println!("Duration: {:?}", self.duration);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Concurrent writer threads.
    pub writers: usize,
    /// Documents created per writer.
    pub writes_per_writer: usize,
    /// Connections holding a live count query.
    pub readers: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            writers: 4,
            writes_per_writer: 250,
            readers: 8,
        }
    }
}

/// Runs concurrent writers against live count readers.
pub fn run_fanout_stress(config: &StressConfig) -> StressTestResult {
    let server = TestServer::new();
    let mut readers: Vec<(TestClient, QueryHandle)> = (0..config.readers)
        .map(|i| {
            let client = server.client(Identity::new(format!("reader-{i}"), 0));
            let handle = client
                .open("fighter", QueryShape::new(), QueryMode::Count)
                .expect("Failed to open live query");
            (client, handle)
        })
        .collect();

    let start = Instant::now();
    let outcomes: Vec<(usize, usize)> = thread::scope(|scope| {
        let workers: Vec<_> = (0..config.writers)
            .map(|w| {
                let writer = server.client(Identity::new(format!("writer-{w}"), 0));
                scope.spawn(move || {
                    let mut ok = 0;
                    let mut failed = 0;
                    for i in 0..config.writes_per_writer {
                        match writer.create("fighter", json!({"name": format!("w{w}-{i}"), "health": i})) {
                            Ok(_) => ok += 1,
                            Err(_) => failed += 1,
                        }
                    }
                    writer.disconnect();
                    (ok, failed)
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().unwrap_or((0, config.writes_per_writer)))
            .collect()
    });
    let duration = start.elapsed();

    let writes: usize = outcomes.iter().map(|(ok, _)| ok).sum();
    let failed_writes = outcomes.iter().map(|(_, failed)| failed).sum();
    let mut pushes = 0;
    let mut stale_readers = 0;
    for (reader, handle) in &mut readers {
        let results = reader.results(*handle);
        pushes += results.len();
        if results.last() != Some(&QueryResult::Count(writes as u64)) {
            stale_readers += 1;
        }
    }

    StressTestResult {
        writes,
        failed_writes,
        pushes,
        stale_readers,
        duration,
    }
}
