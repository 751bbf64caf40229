//! Process entry point: loads configuration, authenticates to the exchange,
//! loads the match roster, and runs the quoting engine, stream reader,
//! fill-journaling sink, and operator dashboard concurrently until a
//! shutdown signal triggers emergency mass-cancel.

use kalshi_mm::config::Settings;
use kalshi_mm::dashboard::{self, DashboardState, RuntimeTunables};
use kalshi_mm::gateway::kalshi::KalshiGateway;
use kalshi_mm::gateway::stream;
use kalshi_mm::gateway::ExchangeGateway;
use kalshi_mm::pnl::{self, PnlJournal};
use kalshi_mm::quoting::World;
use kalshi_mm::reconciler::OrderReconciler;
use kalshi_mm::types::{CostBasis, Market, Match};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Static roster entry: real deployments would discover matches from an
/// events feed, but that discovery contract is out of scope here. One row
/// per match, read from a JSON file at `MATCHES_CONFIG_PATH`.
#[derive(Debug, Deserialize)]
struct MatchConfig {
    id: String,
    display_name: String,
    category: String,
    ticker_a: String,
    label_a: String,
    ticker_b: String,
    label_b: String,
    odds_a: f64,
    odds_b: f64,
    odds_draw: Option<f64>,
    edge_min: u8,
    order_size: u32,
    inventory_cap: i64,
    event_time: chrono::DateTime<chrono::Utc>,
    market_url: Option<String>,
}

fn load_matches(path: &str) -> anyhow::Result<Vec<Match>> {
    let raw = std::fs::read_to_string(path)?;
    let configs: Vec<MatchConfig> = serde_json::from_str(&raw)?;
    let matches = configs
        .into_iter()
        .map(|c| {
            let theo = if let Some(draw) = c.odds_draw {
                kalshi_mm::theo::TheoEngine::three_way(c.odds_a, c.odds_b, Some(draw))
            } else {
                kalshi_mm::theo::TheoEngine::two_way(c.odds_a, c.odds_b)
            };
            Match {
                id: c.id,
                display_name: c.display_name,
                category: c.category,
                market_a: Market::new(c.ticker_a, c.label_a, theo.theo_a),
                market_b: Market::new(c.ticker_b, c.label_b, theo.theo_b),
                odds_a: c.odds_a,
                odds_b: c.odds_b,
                edge_min: c.edge_min,
                order_size: c.order_size,
                inventory_cap: c.inventory_cap,
                event_time: c.event_time,
                active: true,
                inventory: 0,
                long_a: CostBasis::default(),
                long_b: CostBasis::default(),
                market_url: c.market_url,
            }
        })
        .collect();
    Ok(matches)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;
    info!(bind = %settings.dashboard_bind_addr, "starting market maker");

    let private_key_pem = std::fs::read_to_string(&settings.exchange_private_key_path)?;
    let gateway: Arc<dyn ExchangeGateway> = Arc::new(KalshiGateway::new(
        settings.exchange_rest_url.clone(),
        settings.exchange_key_id.clone(),
        &private_key_pem,
    )?);

    // Authentication check: an unreadable balance means the signing key or
    // key id is wrong, and starting up in that state would silently quote
    // against a rejecting gateway (§7 fatal-startup-check rule).
    let balance = gateway
        .get_balance()
        .await
        .map_err(|e| anyhow::anyhow!("failed to authenticate with exchange (balance check): {e}"))?;
    info!(balance_cents = balance, "authenticated with exchange");

    let journal = Arc::new(PnlJournal::connect(&settings.database_url).await?);
    journal.run_migrations().await?;

    let matches_path = std::env::var("MATCHES_CONFIG_PATH").unwrap_or_else(|_| "matches.json".to_string());
    let matches = load_matches(&matches_path).unwrap_or_else(|e| {
        warn!(error = %e, path = %matches_path, "no match roster loaded, starting with an empty book");
        Vec::new()
    });

    let reconciler = Arc::new(OrderReconciler::new(
        gateway.clone(),
        settings.reconciler_workers,
        settings.overbid_cancel_delay,
    ));

    let (fill_tx, mut fill_rx) = mpsc::unbounded_channel();
    let world = Arc::new(
        World::new(
            reconciler.clone(),
            settings.fee_buffer_cents,
            Duration::from_secs(settings.sticky_reset_secs),
        )
        .with_fill_sink(fill_tx),
    );

    let mut tickers = Vec::new();
    for m in matches {
        tickers.push(m.market_a.ticker.clone());
        tickers.push(m.market_b.ticker.clone());
        if let Err(e) = pnl::register_match(&journal, &m).await {
            error!(match_id = %m.id, error = %e, "failed to register match in journal");
        }
        world.upsert_match(m).await;
    }

    // Fill journaling sink: every observed fill is durably persisted
    // independent of quoting health.
    let journal_for_fills = journal.clone();
    tokio::spawn(async move {
        while let Some(fill) = fill_rx.recv().await {
            if let Err(e) = journal_for_fills.insert_fill(&fill).await {
                error!(fill_id = %fill.fill_id, error = %e, "failed to persist fill");
            }
        }
    });

    // Streaming subscription reader: forwards every observed event into the
    // world's event dispatch.
    let (event_tx, mut event_rx) = mpsc::channel(1024);
    let stream_cfg = stream::StreamConfig {
        ws_url: settings.exchange_ws_url.clone(),
        key_id: settings.exchange_key_id.clone(),
        tickers,
    };
    tokio::spawn(stream::run(stream_cfg, event_tx));

    let world_for_events = world.clone();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            world_for_events.handle_event(event).await;
        }
    });

    // Periodic per-match re-evaluation tick: drives quoting even without a
    // fresh stream event. The interval is re-read every iteration so the
    // operator API's `/api/settings` can adjust it without a restart.
    let tunables = RuntimeTunables::new(settings.check_interval);
    let world_for_ticks = world.clone();
    let tunables_for_ticks = tunables.clone();
    let tick_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(tunables_for_ticks.check_interval()).await;
            let now = chrono::Utc::now();
            for match_id in world_for_ticks.match_ids().await {
                world_for_ticks.evaluate_match(&match_id, now).await;
            }
        }
    });

    let dashboard_state = DashboardState::new(world.clone(), journal.clone(), gateway.clone(), tunables);
    let dashboard_addr: std::net::SocketAddr = settings.dashboard_bind_addr.parse()?;
    let dashboard_task = tokio::spawn(dashboard::serve(dashboard_addr, dashboard_state));

    // The kill switch already stops the tick loop from placing further
    // orders the instant it's engaged; this branch only brings the process
    // down the same way a ctrl-c signal would.
    let mut kill_signal = world.kill_signal();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received, cancelling all resting orders");
        }
        _ = kill_signal.changed() => {
            warn!("kill switch engaged via operator API, shutting down");
        }
        res = dashboard_task => {
            match res {
                Ok(Err(e)) => error!(error = %e, "dashboard server exited with an error"),
                Err(e) => error!(error = %e, "dashboard task panicked"),
                Ok(Ok(())) => {}
            }
        }
    }

    tick_task.abort();
    world.cancel_all().await;
    reconciler.cancel_all().await;
    info!("shutdown complete");
    Ok(())
}
