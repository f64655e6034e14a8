//! Runs rounds of correlated queries against a worker and prints metrics.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use indicatif::{ProgressBar, ProgressStyle};
use querybench_protocol::{
    CorrelationId, Dispatcher, Observer, Payload, RunReport, client_identity,
};
use sketches_ddsketch::DDSketch;
use yansi::Paint;

use crate::config::Config;
use crate::remote;
use crate::workload::QueryWorkload;

/// Aggregated measurements of one or more rounds.
#[derive(Default)]
pub struct BenchmarkMetrics {
    /// Round-trip latency of every collected reply, in seconds.
    pub latency: DDSketch,
    /// Number of queries sent.
    pub dispatched: usize,
    /// Number of results collected.
    pub collected: usize,
    /// Replies that did not answer an outstanding query.
    pub strays: usize,
    /// Inbound frames that could not be decoded.
    pub malformed: usize,
    /// Total size of all outbound frames.
    pub bytes_sent: u64,
    /// Total size of all inbound frames.
    pub bytes_received: u64,
    /// Wall time spent dispatching and collecting.
    pub elapsed: Duration,
}

impl BenchmarkMetrics {
    fn record(&mut self, report: &RunReport) {
        for latency in &report.latencies {
            self.latency.add(latency.as_secs_f64());
        }
        self.dispatched += report.dispatched;
        self.collected += report.collected();
        self.strays += report.stats.strays();
        self.malformed += report.stats.malformed;
        self.bytes_sent += report.bytes_sent;
        self.bytes_received += report.stats.bytes_received;
        self.elapsed += report.elapsed;
    }
}

impl fmt::Debug for BenchmarkMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BenchmarkMetrics")
            .field("latency_samples", &self.latency.count())
            .field("dispatched", &self.dispatched)
            .field("collected", &self.collected)
            .field("strays", &self.strays)
            .field("malformed", &self.malformed)
            .field("bytes_sent", &self.bytes_sent)
            .field("bytes_received", &self.bytes_received)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

/// Drives the progress bar and the verbose per-query output.
struct ProgressObserver {
    bar: ProgressBar,
    verbose: bool,
}

impl Observer for ProgressObserver {
    fn on_sent(&mut self, id: &CorrelationId, query: &Payload) {
        if self.verbose {
            self.bar.suspend(|| println!("Sent query ({id}): {query}"));
        }
    }

    fn on_reply(&mut self, id: &CorrelationId, data: &Payload, latency: Duration) {
        self.bar.inc(1);
        if self.verbose {
            self.bar
                .suspend(|| println!("Received ({id}) after {latency:.2?}: {data}"));
        }
    }

    fn on_stray(&mut self, id: &CorrelationId) {
        self.bar
            .suspend(|| println!("Received response with unknown query ID: {id}"));
    }
}

/// Connects to the configured worker and runs all configured rounds.
///
/// Prints a report per round to stdout, followed by totals if there is more than one round.
/// Fails on the first round that does not complete.
pub async fn run(config: &Config, verbose: bool) -> Result<BenchmarkMetrics> {
    let identity = config.identity.clone().unwrap_or_else(client_identity);
    println!("Client ID: {identity}");

    let transport = remote::connect(&config.remote, &identity).await?;
    let mut workload = QueryWorkload::from_config(&config.batch);

    let bar = ProgressBar::new(expected_replies(config))
        .with_style(ProgressStyle::with_template(
            "{msg} {wide_bar} {pos}/{len} {elapsed}",
        )?)
        .with_message("Collecting replies:");
    bar.enable_steady_tick(Duration::from_millis(100));

    let observer = ProgressObserver {
        bar: bar.clone(),
        verbose,
    };
    let mut dispatcher =
        Dispatcher::new(transport, config.dispatch_options()).with_observer(observer);

    let mut totals = BenchmarkMetrics::default();
    for round in 1..=config.rounds {
        let report = dispatcher
            .run(config.batch.count, || workload.next_query())
            .await
            .with_context(|| format!("round {round} of {} failed", config.rounds))?;

        tracing::info!(
            round,
            collected = report.collected(),
            elapsed = ?report.elapsed,
            "round complete"
        );

        let mut metrics = BenchmarkMetrics::default();
        metrics.record(&report);
        totals.record(&report);

        bar.suspend(|| {
            println!();
            println!(
                "{} {}/{}",
                "## Round".bold(),
                round.bold().blue(),
                config.rounds
            );
            print_metrics(&metrics);
        });
    }
    bar.finish_and_clear();

    if config.rounds > 1 {
        println!();
        println!("{}", "## TOTALS".bold());
        print_metrics(&totals);
    }

    Ok(totals)
}

/// Number of replies all rounds together wait for.
fn expected_replies(config: &Config) -> u64 {
    config.batch.count.saturating_mul(config.rounds) as u64
}

fn print_metrics(metrics: &BenchmarkMetrics) {
    println!("Ran: {} SQL queries", metrics.dispatched);
    println!(
        "Script executed in {} milliseconds.",
        metrics.elapsed.as_millis().bold()
    );

    if metrics.strays > 0 || metrics.malformed > 0 {
        println!(
            "  {}",
            format!(
                "{} STRAY, {} MALFORMED REPLIES",
                metrics.strays, metrics.malformed
            )
            .bold()
            .red()
        );
    }

    print_ops(metrics.collected, metrics.elapsed);
    print_throughput(metrics.bytes_sent + metrics.bytes_received, metrics.elapsed);
    print_percentiles(&metrics.latency);
}

fn print_percentiles(sketch: &DDSketch) {
    let Some(sum) = sketch.sum() else {
        return;
    };
    let quantile = |q| {
        sketch
            .quantile(q)
            .ok()
            .flatten()
            .map(Duration::from_secs_f64)
            .unwrap_or_default()
    };

    let avg = Duration::from_secs_f64(sum / sketch.count() as f64);
    let p50 = quantile(0.5);
    let p90 = quantile(0.9);
    let p99 = quantile(0.99);
    println!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}

fn print_ops(ops: usize, duration: Duration) {
    let ops_ps = ops as f64 / duration.as_secs_f64().max(f64::EPSILON);
    print!("  {:.2} queries/s", ops_ps.bold());
}

fn print_throughput(total: u64, duration: Duration) {
    let throughput = (total as f64 / duration.as_secs_f64().max(f64::EPSILON)) as u64;
    println!(", {:.2}/s", ByteSize::b(throughput).bold());
}
