//! Operator HTTP API: match inspection, manual hedge entry, kill switch, and
//! a push channel for live state. Routed with `axum`, the same `Router` +
//! `State` + `Json` shape the rest of the pack's admin surfaces use.

use crate::gateway::ExchangeGateway;
use crate::pnl::calc::Period;
use crate::pnl::{self, PnlJournal};
use crate::quoting::World;
use crate::types::{CostBasis, Hedge, HedgeOutcome, Market, Match, Outcome};
use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// Global tunables the operator API may adjust at runtime (§6). These live
/// outside `World`/`OrderReconciler` proper because the tick loop in `main`
/// reads `check_interval` on every iteration rather than at a fixed startup
/// value.
#[derive(Clone)]
pub struct RuntimeTunables {
    pub check_interval: Arc<RwLock<Duration>>,
}

impl RuntimeTunables {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            check_interval: Arc::new(RwLock::new(check_interval)),
        }
    }

    pub fn check_interval(&self) -> Duration {
        *self.check_interval.read().unwrap()
    }
}

#[derive(Clone)]
pub struct DashboardState {
    pub world: Arc<World>,
    pub journal: Arc<PnlJournal>,
    pub gateway: Arc<dyn ExchangeGateway>,
    pub tunables: RuntimeTunables,
    pub push: broadcast::Sender<String>,
}

impl DashboardState {
    pub fn new(
        world: Arc<World>,
        journal: Arc<PnlJournal>,
        gateway: Arc<dyn ExchangeGateway>,
        tunables: RuntimeTunables,
    ) -> Self {
        let (push, _) = broadcast::channel(256);
        Self {
            world,
            journal,
            gateway,
            tunables,
            push,
        }
    }

    /// Delegates to `World`'s kill switch, the single source of truth the
    /// quoting tick loop also consults. Used here to refuse to resume or add
    /// matches once an operator has engaged the emergency stop.
    pub fn is_killed(&self) -> bool {
        self.world.is_killed()
    }
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/matches", get(list_matches).post(add_match))
        .route("/api/matches/batch", post(add_matches_batch))
        .route("/api/matches/start-all", post(start_all_matches))
        .route("/api/matches/all", delete(remove_all_matches))
        .route("/api/matches/:id", delete(remove_match))
        .route("/api/matches/:id/reactivate", post(reactivate_match))
        .route("/api/matches/:id/start", post(start_match))
        .route("/api/matches/:id/stop", post(stop_match))
        .route("/api/matches/:id/odds", post(update_match_odds))
        .route("/api/matches/:id/settings", post(update_match_settings))
        .route("/api/matches/:id/refresh-odds", post(refresh_match_odds))
        .route("/api/matches/:id/pnl", get(match_pnl))
        .route("/api/pnl/match/:id", get(match_pnl))
        .route("/api/pnl/summary", get(pnl_summary))
        .route("/api/pnl/open", get(open_positions))
        .route("/api/pnl/total", get(total_pnl))
        .route("/api/hedges", get(list_hedges).post(create_hedge))
        .route("/api/hedges/:id/outcome", post(set_hedge_outcome))
        .route("/api/hedges/:id", delete(delete_hedge))
        .route("/api/settings", post(update_settings))
        .route("/api/sync-inventory", post(sync_inventory))
        .route("/api/kill", post(kill))
        .route("/api/stream", get(stream))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct MatchSummary {
    id: String,
    display_name: String,
    category: String,
    active: bool,
    theo_a: u8,
    theo_b: u8,
    inventory: i64,
}

async fn list_matches(State(state): State<DashboardState>) -> Json<Vec<MatchSummary>> {
    let mut out = Vec::new();
    for id in state.world.match_ids().await {
        if let Some(m) = state.world.get_match(&id).await {
            let inv = state.world.inventory_snapshot(&id).await;
            out.push(MatchSummary {
                id: m.id,
                display_name: m.display_name,
                category: m.category,
                active: m.active,
                theo_a: m.market_a.theo,
                theo_b: m.market_b.theo,
                inventory: inv.inventory,
            });
        }
    }
    Json(out)
}

#[derive(Deserialize)]
struct AddMatchBody {
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
    event_time: chrono::DateTime<Utc>,
    market_url: Option<String>,
}

fn build_match(body: AddMatchBody) -> Match {
    let theo = match body.odds_draw {
        Some(draw) => crate::theo::TheoEngine::three_way(body.odds_a, body.odds_b, Some(draw)),
        None => crate::theo::TheoEngine::two_way(body.odds_a, body.odds_b),
    };
    Match {
        id: body.id,
        display_name: body.display_name,
        category: body.category,
        market_a: Market::new(body.ticker_a, body.label_a, theo.theo_a),
        market_b: Market::new(body.ticker_b, body.label_b, theo.theo_b),
        odds_a: body.odds_a,
        odds_b: body.odds_b,
        edge_min: body.edge_min,
        order_size: body.order_size,
        inventory_cap: body.inventory_cap,
        event_time: body.event_time,
        active: true,
        inventory: 0,
        long_a: CostBasis::default(),
        long_b: CostBasis::default(),
        market_url: body.market_url,
    }
}

async fn add_match(
    State(state): State<DashboardState>,
    Json(body): Json<AddMatchBody>,
) -> Result<Json<bool>, axum::http::StatusCode> {
    if state.is_killed() {
        return Err(axum::http::StatusCode::CONFLICT);
    }
    let m = build_match(body);
    pnl::register_match(&state.journal, &m)
        .await
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)?;
    state.world.upsert_match(m).await;
    Ok(Json(true))
}

async fn add_matches_batch(
    State(state): State<DashboardState>,
    Json(bodies): Json<Vec<AddMatchBody>>,
) -> Result<Json<usize>, axum::http::StatusCode> {
    if state.is_killed() {
        return Err(axum::http::StatusCode::CONFLICT);
    }
    let mut added = 0;
    for body in bodies {
        let m = build_match(body);
        pnl::register_match(&state.journal, &m)
            .await
            .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)?;
        state.world.upsert_match(m).await;
        added += 1;
    }
    Ok(Json(added))
}

async fn remove_match(State(state): State<DashboardState>, Path(id): Path<String>) -> Json<bool> {
    Json(state.world.remove_match(&id, Utc::now()).await)
}

async fn remove_all_matches(State(state): State<DashboardState>) -> Json<bool> {
    state.world.remove_all(Utc::now()).await;
    Json(true)
}

async fn reactivate_match(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
) -> Result<Json<bool>, axum::http::StatusCode> {
    if state.is_killed() {
        return Err(axum::http::StatusCode::CONFLICT);
    }
    Ok(Json(state.world.reactivate(&id, Utc::now()).await))
}

async fn start_match(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
) -> Result<Json<bool>, axum::http::StatusCode> {
    if state.is_killed() {
        return Err(axum::http::StatusCode::CONFLICT);
    }
    Ok(Json(state.world.reactivate(&id, Utc::now()).await))
}

async fn stop_match(State(state): State<DashboardState>, Path(id): Path<String>) -> Json<bool> {
    Json(state.world.stop(&id, Utc::now()).await)
}

async fn start_all_matches(State(state): State<DashboardState>) -> Result<Json<usize>, axum::http::StatusCode> {
    if state.is_killed() {
        return Err(axum::http::StatusCode::CONFLICT);
    }
    Ok(Json(state.world.start_all(Utc::now()).await))
}

#[derive(Deserialize)]
struct UpdateOddsBody {
    odds_a: f64,
    odds_b: f64,
    odds_draw: Option<f64>,
}

async fn update_match_odds(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateOddsBody>,
) -> Json<bool> {
    Json(state.world.update_odds(&id, body.odds_a, body.odds_b, body.odds_draw).await)
}

/// Out of scope as a live integration: recomputing theo from a third-party
/// odds feed requires a provider + event-key mapping this operator surface
/// does not own (§9 open-question decisions). `POST .../odds` above is the
/// supported path for pushing freshly fetched odds in.
async fn refresh_match_odds() -> axum::http::StatusCode {
    axum::http::StatusCode::NOT_IMPLEMENTED
}

#[derive(Deserialize)]
struct UpdateMatchSettingsBody {
    edge_min: Option<u8>,
    order_size: Option<u32>,
    inventory_cap: Option<i64>,
}

async fn update_match_settings(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateMatchSettingsBody>,
) -> Json<bool> {
    Json(
        state
            .world
            .update_settings(&id, body.edge_min, body.order_size, body.inventory_cap)
            .await,
    )
}

#[derive(Deserialize)]
struct UpdateSettingsBody {
    check_interval: Option<f64>,
    sticky_reset_secs: Option<f64>,
    overbid_cancel_delay: Option<f64>,
}

async fn update_settings(State(state): State<DashboardState>, Json(body): Json<UpdateSettingsBody>) -> Json<bool> {
    if let Some(secs) = body.check_interval {
        *state.tunables.check_interval.write().unwrap() = Duration::from_secs_f64(secs.max(0.5));
    }
    if let Some(secs) = body.sticky_reset_secs {
        state.world.set_sticky_reset(Duration::from_secs_f64(secs.max(1.0)));
    }
    if let Some(secs) = body.overbid_cancel_delay {
        state.world.reconciler().set_overbid_cancel_delay(Duration::from_secs_f64(secs.max(1.0)));
    }
    Json(true)
}

async fn sync_inventory(State(state): State<DashboardState>) -> Result<Json<usize>, axum::http::StatusCode> {
    state
        .world
        .sync_inventory(state.gateway.as_ref())
        .await
        .map(Json)
        .map_err(|_| axum::http::StatusCode::BAD_GATEWAY)
}

async fn match_pnl(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, axum::http::StatusCode> {
    state
        .journal
        .calculate_match_pnl(&id, None)
        .await
        .map(|pnl| {
            Json(serde_json::json!({
                "pairs": pnl.pairs,
                "arb_cents": pnl.arb_cents,
                "ev_cents": pnl.ev_cents,
                "av_cents": pnl.av_cents,
                "hedge_usd": pnl.hedge_usd,
                "fees_cents": pnl.fees_cents,
                "net_pnl_usd": pnl.net_pnl_usd,
            }))
        })
        .map_err(|_| axum::http::StatusCode::NOT_FOUND)
}

#[derive(Deserialize)]
struct SummaryQuery {
    period: Option<String>,
}

async fn pnl_summary(
    State(state): State<DashboardState>,
    axum::extract::Query(q): axum::extract::Query<SummaryQuery>,
) -> Json<serde_json::Value> {
    let period = match q.period.as_deref() {
        Some("weekly") => Period::Weekly,
        Some("monthly") => Period::Monthly,
        _ => Period::Daily,
    };
    match state.journal.get_pnl_summary(period).await {
        Ok(buckets) => Json(serde_json::to_value(buckets).unwrap_or_default()),
        Err(_) => Json(serde_json::json!({})),
    }
}

async fn open_positions(State(state): State<DashboardState>) -> Json<serde_json::Value> {
    match state.journal.get_open_positions().await {
        Ok(positions) => {
            let out: Vec<_> = positions
                .into_iter()
                .map(|(m, pnl)| {
                    serde_json::json!({
                        "match_id": m.id,
                        "ticker_a": m.ticker_a,
                        "ticker_b": m.ticker_b,
                        "arb_cents": pnl.arb_cents,
                        "ev_cents": pnl.ev_cents,
                        "leftover_a": pnl.leftover_a_count,
                        "leftover_b": pnl.leftover_b_count,
                    })
                })
                .collect();
            Json(serde_json::Value::Array(out))
        }
        Err(_) => Json(serde_json::Value::Array(vec![])),
    }
}

async fn total_pnl(State(state): State<DashboardState>) -> Json<serde_json::Value> {
    match state.journal.get_total_pnl().await {
        Ok(total) => Json(serde_json::json!({
            "arb_cents": total.arb_cents,
            "ev_cents": total.ev_cents,
            "av_cents": total.av_cents,
            "hedge_usd": total.hedge_usd,
            "fees_cents": total.fees_cents,
            "net_pnl_usd": total.net_pnl_usd,
        })),
        Err(_) => Json(serde_json::json!({})),
    }
}

#[derive(Deserialize)]
struct HedgesQuery {
    match_id: String,
}

async fn list_hedges(
    State(state): State<DashboardState>,
    axum::extract::Query(q): axum::extract::Query<HedgesQuery>,
) -> Result<Json<Vec<Hedge>>, axum::http::StatusCode> {
    state
        .journal
        .get_hedges_for_match(&q.match_id)
        .await
        .map(Json)
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)
}

async fn delete_hedge(State(state): State<DashboardState>, Path(id): Path<String>) -> Result<Json<bool>, axum::http::StatusCode> {
    state
        .journal
        .delete_hedge(&id)
        .await
        .map(|_| Json(true))
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Deserialize)]
struct CreateHedgeBody {
    match_id: String,
    platform: String,
    outcome_side: String,
    stake_usd: f64,
    decimal_odds: f64,
}

#[derive(Serialize)]
struct CreateHedgeResponse {
    id: String,
}

async fn create_hedge(
    State(state): State<DashboardState>,
    Json(body): Json<CreateHedgeBody>,
) -> Result<Json<CreateHedgeResponse>, axum::http::StatusCode> {
    let outcome_side = match body.outcome_side.as_str() {
        "a" | "A" => Outcome::A,
        "b" | "B" => Outcome::B,
        _ => return Err(axum::http::StatusCode::BAD_REQUEST),
    };
    let id = uuid::Uuid::new_v4().to_string();
    let hedge = Hedge {
        id: id.clone(),
        match_id: body.match_id,
        platform: body.platform,
        outcome_side,
        stake_usd: body.stake_usd,
        decimal_odds: body.decimal_odds,
        outcome: None,
        created_at: Utc::now(),
    };
    state
        .journal
        .insert_hedge(&hedge)
        .await
        .map(|_| Json(CreateHedgeResponse { id }))
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Deserialize)]
struct HedgeOutcomeBody {
    outcome: String,
}

async fn set_hedge_outcome(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
    Json(body): Json<HedgeOutcomeBody>,
) -> Result<Json<bool>, axum::http::StatusCode> {
    let outcome = match body.outcome.as_str() {
        "win" => HedgeOutcome::Win,
        "loss" => HedgeOutcome::Loss,
        "push" => HedgeOutcome::Push,
        _ => return Err(axum::http::StatusCode::BAD_REQUEST),
    };
    state
        .journal
        .update_hedge_outcome(&id, outcome)
        .await
        .map(|_| Json(true))
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)
}

/// Emergency stop: engages `World`'s kill switch, which both the tick loop
/// (no further `evaluate_match` calls place orders) and `main`'s shutdown
/// select consult, then cancels every resting order across every match
/// immediately (§7 shutdown rules). Equivalent to a ctrl-c shutdown signal.
async fn kill(State(state): State<DashboardState>) -> Json<bool> {
    state.world.kill();
    info!("kill switch engaged via operator API");
    state.world.cancel_all().await;
    let _ = state.push.send("killed".to_string());
    Json(true)
}

async fn stream(State(state): State<DashboardState>) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.push.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(msg) => Some((Ok(SseEvent::default().data(msg)), rx)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(_)) => Some((Ok(SseEvent::default().data("lagged")), rx)),
        }
    });
    Sse::new(stream)
}

pub async fn serve(addr: SocketAddr, state: DashboardState) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
