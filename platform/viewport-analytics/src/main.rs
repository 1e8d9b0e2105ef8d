//! Headless driver: replays newline-delimited JSON commands from stdin into the
//! analytics service.
//!
//! ```text
//! {"op":"activate"}
//! {"op":"track","element":{"id":1,"data_id":"7"},"product":{"id":"7","name":"Kettle"}}
//! {"op":"intersections","entries":[{"target":{"id":1,"data_id":"7"},"is_intersecting":true}]}
//! {"op":"route","url":"/cart"}
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use viewport_analytics::{AnalyticsConfig, AnalyticsService, Element, IntersectionEntry, OrderLine};

/// Window for detached sends to finish after the last command
const FLUSH_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Command {
    Activate,
    Route { url: String },
    Cart { product: Value },
    Order { products: Vec<OrderLine> },
    Track { element: Option<Element>, product: Value },
    Reset,
    Intersections { entries: Vec<IntersectionEntry> },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AnalyticsConfig::from_env()?;
    let analytics = AnalyticsService::from_config(&config)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut batches = JoinSet::new();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let command: Command = match serde_json::from_str(&line) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping malformed command");
                continue;
            }
        };

        match command {
            Command::Activate => analytics.activate(),
            Command::Route { url } => analytics.route(&url),
            Command::Cart { product } => analytics.cart(product),
            Command::Order { products } => analytics.order(&products),
            Command::Track { element, product } => analytics.add_tracking(element.as_ref(), product),
            Command::Reset => analytics.add_observer(),
            Command::Intersections { entries } => {
                // Batches run alongside later commands, like the host callback.
                let analytics = analytics.clone();
                batches.spawn(async move { analytics.handle_intersections(entries).await });
            }
        }
    }

    while let Some(joined) = batches.join_next().await {
        match joined {
            Ok(report) => tracing::debug!(?report, "Batch finished"),
            Err(e) => tracing::error!(error = %e, "Batch task failed"),
        }
    }

    tokio::time::sleep(FLUSH_GRACE).await;
    tracing::info!(commands = line_no, "Replay finished");

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,viewport_analytics=debug".into());

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
