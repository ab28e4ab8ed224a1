//! Connects a feed controller to a live detection feed and prints, at a fixed
//! interval, how many detections were released in the last minute (overall and
//! per vehicle type) and how many reconnects were scheduled.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use feed_core::{ConnectionState, ControllerConfig, FeedController};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// WebSocket URL of the detection feed
    #[clap(short, long, default_value = "ws://localhost:8000/ws")]
    url: String,

    /// Report interval in seconds
    #[clap(short, long, default_value_t = 60)]
    report_interval_seconds: u64,

    /// Quiescence window in milliseconds
    #[clap(short, long, default_value_t = 500)]
    window_ms: u64,
}

#[derive(Default)]
struct Stats {
    released: VecDeque<DateTime<Utc>>,
    by_type: HashMap<String, VecDeque<DateTime<Utc>>>,
    reconnects: usize,
}

impl Stats {
    fn record(&mut self, vehicle_type: String, at: DateTime<Utc>) {
        self.released.push_back(at);
        self.by_type.entry(vehicle_type).or_default().push_back(at);
    }

    fn report(&mut self, now: DateTime<Utc>) {
        let one_minute_ago = now - Duration::minutes(1);
        while self.released.front().is_some_and(|&t| t < one_minute_ago) {
            self.released.pop_front();
        }
        let mut rates: Vec<(String, usize)> = Vec::new();
        for (kind, dq) in self.by_type.iter_mut() {
            while dq.front().is_some_and(|&t| t < one_minute_ago) {
                dq.pop_front();
            }
            if !dq.is_empty() {
                rates.push((kind.clone(), dq.len()));
            }
        }
        rates.sort_by(|a, b| b.1.cmp(&a.1));

        let report = rates
            .iter()
            .map(|(k, r)| format!("{}: {}/min", if k.is_empty() { "unknown" } else { k.as_str() }, r))
            .collect::<Vec<_>>()
            .join(", ");

        println!("\n----- 1-Minute Summary -----");
        println!("Released: {}/min", self.released.len());
        println!("By type: {}", if report.is_empty() { "No data" } else { &report });
        println!("Reconnects scheduled so far: {}", self.reconnects);
        println!("----------------------------\n");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let args = Args::parse();

    let controller = FeedController::with_websocket(ControllerConfig {
        feed_url: args.url.clone(),
        coalesce_window_ms: args.window_ms,
        ..Default::default()
    })?;
    println!("Connecting to {}... Press Ctrl+C to stop.", args.url);
    controller.start().await;

    let mut feed = controller.feed();
    let mut connection = controller.connection();
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(args.report_interval_seconds.max(1)));
    ticker.tick().await;
    let mut stats = Stats::default();
    let mut last_id: Option<String> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => stats.report(Utc::now()),
            changed = feed.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = feed.borrow_and_update().most_recent.clone();
                if let Some(detection) = latest {
                    if last_id.as_deref() != Some(detection.id.as_str()) {
                        stats.record(detection.vehicle_type.to_string(), Utc::now());
                        last_id = Some(detection.id);
                    }
                }
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                if matches!(*connection.borrow_and_update(), ConnectionState::Reconnecting { .. }) {
                    stats.reconnects += 1;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    controller.shutdown().await;
    Ok(())
}
