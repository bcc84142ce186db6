//! Diagnostics - one-shot reads against the log and the snapshot files
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin diagnostics -- counts
//! cargo run --bin diagnostics -- get <drone_position|target_acquisition> <index>
//! cargo run --bin diagnostics -- rescan
//! cargo run --bin diagnostics -- anomalies [drone_position|target_acquisition]
//! cargo run --bin diagnostics -- stats
//! cargo run --bin diagnostics -- publish-demo <n>
//! ```
//!
//! `counts`, `get` and `rescan` open their own scan of the log, which ends
//! after the log has been idle for `ANALYZER_IDLE_TIMEOUT_MS`. `anomalies` and
//! `stats` only read their snapshot files and work with the broker down.
//! Results are printed as JSON on stdout; errors print the status a gateway
//! would return.

use dotenv::dotenv;
use dronetrack::analyzer::ReplayReader;
use dronetrack::anomaly::{read_anomalies, AnomalyQuery, AnomalyScanner};
use dronetrack::broker::open_log;
use dronetrack::processing::read_stats;
use dronetrack::producer::{DronePositionReport, EventProducer, TargetAcquisitionReport};
use dronetrack::{AppConfig, EventKind, PipelineError};
use log::{error, info};
use rand::Rng;
use serde::Serialize;
use serde_json::json;

const USAGE: &str = "usage: diagnostics <counts | get <kind> <index> | rescan | anomalies [kind] | stats | publish-demo <n>>";

fn usage() -> ! {
    eprintln!("{}", USAGE);
    std::process::exit(2);
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => error!("❌ Failed to render output: {}", e),
    }
}

fn print_error(err: &PipelineError) {
    eprintln!("{} {}", err.http_status(), json!({ "message": err.message() }));
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match args.first() {
        Some(command) => command.as_str(),
        None => usage(),
    };

    let config = AppConfig::from_env()?;

    if let Err(e) = run(command, &args[1..], &config).await {
        print_error(&e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: &str, args: &[String], config: &AppConfig) -> Result<(), PipelineError> {
    match command {
        "stats" => print_json(&read_stats(&config.processing.stats_path)?),
        "counts" => {
            let log = open_log(&config.broker).await?;
            let reader = ReplayReader::new(log, config.analyzer.idle_timeout);
            print_json(&reader.get_counts().await?);
        }
        "get" => {
            let (kind, index) = match (args.first(), args.get(1)) {
                (Some(kind), Some(index)) => (kind, index),
                _ => usage(),
            };
            let kind = kind.parse::<EventKind>()?;
            let index = index
                .parse::<usize>()
                .map_err(|e| PipelineError::Validation(format!("invalid index '{}': {}", index, e)))?;

            let log = open_log(&config.broker).await?;
            let reader = ReplayReader::new(log, config.analyzer.idle_timeout);
            print_json(&reader.get_by_index(kind, index).await?);
        }
        "rescan" => {
            let log = open_log(&config.broker).await?;
            let scanner = AnomalyScanner::new(
                log,
                config.analyzer.idle_timeout,
                config.anomaly.thresholds,
                &config.anomaly.datastore_path,
            );
            let found = scanner.rescan().await?;
            print_json(&json!({ "num_anomalies": found }));
        }
        "anomalies" => {
            let kind_filter = args.first().map(String::as_str);
            match read_anomalies(&config.anomaly.datastore_path, kind_filter)? {
                AnomalyQuery::Records(records) => print_json(&records),
                AnomalyQuery::NoContent => eprintln!("204 No Content"),
            }
        }
        "publish-demo" => {
            let count = match args.first() {
                Some(raw) => raw
                    .parse::<usize>()
                    .map_err(|e| PipelineError::Validation(format!("invalid count '{}': {}", raw, e)))?,
                None => 10,
            };
            let log = open_log(&config.broker).await?;
            publish_demo(&EventProducer::new(log), count).await?;
            print_json(&json!({ "published": count }));
        }
        _ => usage(),
    }
    Ok(())
}

/// Publish `count` synthetic reports, alternating kinds
async fn publish_demo(producer: &EventProducer, count: usize) -> Result<(), PipelineError> {
    for i in 0..count {
        let (drone, lat, lon, alt, value) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(1..=5),
                rng.gen_range(-90.0..90.0),
                rng.gen_range(-180.0..180.0),
                rng.gen_range(10.0..500.0),
                rng.gen_range(0..=100),
            )
        };
        let drone_id = format!("drone-{}", drone);

        let receipt = if i % 2 == 0 {
            producer
                .publish_drone_position(DronePositionReport {
                    drone_id,
                    latitude: lat,
                    longitude: lon,
                    altitude: alt,
                    signal_strength: value,
                    trace_id: None,
                })
                .await?
        } else {
            producer
                .publish_target_acquisition(TargetAcquisitionReport {
                    drone_id,
                    target_id: format!("target-{}", i),
                    acquisition_type: "visual".to_string(),
                    target_type: "vehicle".to_string(),
                    latitude: lat,
                    longitude: lon,
                    altitude: alt,
                    certainty: value,
                    trace_id: None,
                })
                .await?
        };
        info!("📤 {} {} at offset {}", receipt.kind, receipt.trace_id, receipt.offset);
    }

    Ok(())
}
