use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::json;
use tracing::info;
use ulid::Ulid;

use esp_reservation::calendar::{self, CalendarEntry};
use esp_reservation::compactor;
use esp_reservation::config::Config;
use esp_reservation::engine::{now_ms, Engine};
use esp_reservation::mail::LogMailer;
use esp_reservation::notify::{NotifyHub, Outbox};
use esp_reservation::stats;

const USAGE: &str = "usage:
  esp-reservation summary
  esp-reservation month <location-id> <YYYY-MM>
  esp-reservation compact
  esp-reservation serve";

async fn summary(engine: &Engine, config: &Config) -> serde_json::Value {
    let reservations = engine.all_reservations().await;
    let now = now_ms();
    json!({
        "commissions": engine.list_commissions().len(),
        "locations": engine.list_locations().await.len(),
        "reservations": stats::status_counts(&reservations),
        "acceptance_rate": stats::status_counts(&reservations).acceptance_rate(),
        "monthly": stats::monthly_breakdown(&reservations, now, 6, &config.utc_offset),
        "top_locations": stats::top_locations(&reservations, 5),
        "upcoming": stats::upcoming(&reservations, now, 5),
    })
}

async fn month(
    engine: &Engine,
    config: &Config,
    location_id: Ulid,
    month: NaiveDate,
) -> serde_json::Value {
    let entries: Vec<CalendarEntry> = engine
        .calendar_reservations(Some(location_id))
        .await
        .iter()
        .map(|r| CalendarEntry::from_reservation(r, &config.utc_offset))
        .collect();
    let week_count = calendar::calendar_cells(month, month).len() / 7;
    let positions = calendar::month_event_positions(&entries, month);
    let placed: Vec<_> = positions
        .iter()
        .map(|p| {
            json!({
                "id": p.event.id,
                "title": p.event.title,
                "week": p.week_index,
                "column": p.start_col,
                "span": p.span,
                "row": p.row,
            })
        })
        .collect();
    json!({
        "location_id": location_id,
        "month": month.format("%Y-%m").to_string(),
        "events": placed,
        "week_heights": calendar::week_heights(&positions, week_count),
    })
}

async fn serve(engine: Arc<Engine>, config: &Config) {
    tokio::spawn(compactor::run_compactor(
        engine,
        config.compact_threshold,
        Duration::from_secs(60),
    ));
    info!("running, compact threshold {}", config.compact_threshold);

    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("no SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received");
}

fn parse_month(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").ok()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    esp_reservation::observability::init(config.metrics_port)?;
    std::fs::create_dir_all(&config.data_dir)?;

    let mailer = Arc::new(LogMailer::new(config.mail_from.clone()));
    let outbox = Outbox::spawn(mailer, config.utc_offset, config.outbox_capacity);
    let engine = Arc::new(Engine::new(config.wal_path(), Arc::new(NotifyHub::new()), outbox)?);
    info!("data_dir: {}", config.data_dir.display());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["summary"] => println!("{:#}", summary(&engine, &config).await),
        ["month", location, ym] => {
            let (Ok(location_id), Some(first)) = (location.parse::<Ulid>(), parse_month(ym)) else {
                eprintln!("{USAGE}");
                std::process::exit(2);
            };
            println!("{:#}", month(&engine, &config, location_id, first).await);
        }
        ["compact"] => {
            compactor::compact_if_due(&engine, 0).await?;
            println!("WAL compacted");
        }
        ["serve"] => serve(engine, &config).await,
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
    Ok(())
}
