//! HTTP and WebSocket query surface
//!
//! Read-only views into core state: health, portfolio snapshot,
//! positions, orders, and fills, plus a WebSocket channel pushing a
//! portfolio snapshot once per second. The API never mutates core
//! state.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{PortfolioSnapshot, Position};
use crate::orders::OrderManager;
use crate::positions::PositionTracker;
use crate::storage::Storage;

pub struct ApiState {
    pub tracker: Arc<PositionTracker>,
    pub orders: Arc<OrderManager>,
    pub storage: Arc<Storage>,
    pub started_at: Instant,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/portfolio", get(portfolio))
        .route("/positions", get(positions))
        .route("/positions/:symbol", get(position))
        .route("/orders", get(orders))
        .route("/orders/:order_id", get(order))
        .route("/orders/:order_id/fills", get(order_fills))
        .route("/metrics", get(metrics))
        .route("/ws/portfolio", get(ws_portfolio))
        .with_state(state)
}

pub async fn serve(state: Arc<ApiState>, host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!(addr = %addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn snapshot_json(snapshot: &PortfolioSnapshot) -> serde_json::Value {
    serde_json::json!({
        "cash": snapshot.cash.to_string(),
        "total_unrealized_pnl": snapshot.total_unrealized_pnl.to_string(),
        "total_realized_pnl": snapshot.total_realized_pnl.to_string(),
        "total_equity": snapshot.total_equity.to_string(),
        "drawdown_pct": snapshot.drawdown_pct.to_string(),
        "snapshot_at": snapshot.snapshot_at.to_rfc3339(),
    })
}

fn position_json(position: &Position) -> serde_json::Value {
    serde_json::json!({
        "symbol": position.symbol,
        "quantity": position.quantity,
        "avg_entry_price": position.avg_entry_price.to_string(),
        "realized_pnl": position.realized_pnl.to_string(),
        "unrealized_pnl": position.unrealized_pnl.to_string(),
        "last_mark": position.last_mark.to_string(),
    })
}

async fn health(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn portfolio(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let snapshot = state.tracker.snapshot();
    Json(snapshot_json(&snapshot))
}

async fn positions(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let positions = state.tracker.positions();
    Json(serde_json::json!(positions
        .iter()
        .map(position_json)
        .collect::<Vec<_>>()))
}

async fn position(
    State(state): State<Arc<ApiState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    match state.tracker.get_position(&symbol.to_uppercase()) {
        Some(position) => (StatusCode::OK, Json(position_json(&position))),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "position not found"})),
        ),
    }
}

async fn orders(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    match state.storage.get_orders().await {
        Ok(orders) => (
            StatusCode::OK,
            Json(serde_json::json!(orders
                .iter()
                .map(|o| serde_json::json!({
                    "id": o.id.to_string(),
                    "symbol": o.symbol,
                    "side": o.side.to_string(),
                    "quantity": o.quantity,
                    "order_type": o.order_type.to_string(),
                    "limit_price": o.limit_price.map(|p| p.to_string()),
                    "strategy_id": o.strategy_id,
                    "status": o.status.to_string(),
                    "created_at": o.created_at.to_rfc3339(),
                }))
                .collect::<Vec<_>>())),
        ),
        Err(err) => {
            warn!(error = %err, "orders query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "storage unavailable"})),
            )
        }
    }
}

/// Live in-memory order state, ahead of whatever persistence has seen.
async fn order(
    State(state): State<Arc<ApiState>>,
    Path(order_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.orders.get_order(order_id) {
        Some(order) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": order.id.to_string(),
                "symbol": order.symbol,
                "side": order.side.to_string(),
                "quantity": order.quantity,
                "order_type": order.order_type.to_string(),
                "limit_price": order.limit_price.map(|p| p.to_string()),
                "strategy_id": order.strategy_id,
                "status": order.status.to_string(),
                "created_at": order.created_at.to_rfc3339(),
            })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "order not found"})),
        ),
    }
}

async fn order_fills(
    State(state): State<Arc<ApiState>>,
    Path(order_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.storage.get_fills_for_order(order_id).await {
        Ok(fills) => (
            StatusCode::OK,
            Json(serde_json::json!(fills
                .iter()
                .map(|f| serde_json::json!({
                    "id": f.id,
                    "order_id": f.order_id.to_string(),
                    "symbol": f.symbol,
                    "side": f.side.to_string(),
                    "quantity": f.quantity,
                    "price": f.price.to_string(),
                    "filled_at": f.filled_at.to_rfc3339(),
                }))
                .collect::<Vec<_>>())),
        ),
        Err(err) => {
            warn!(error = %err, "fills query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "storage unavailable"})),
            )
        }
    }
}

async fn metrics() -> String {
    crate::metrics::encode_text()
}

async fn ws_portfolio(
    State(state): State<Arc<ApiState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| push_snapshots(socket, state))
}

/// Push a portfolio snapshot every second until the client goes away.
async fn push_snapshots(mut socket: WebSocket, state: Arc<ApiState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        let snapshot = state.tracker.snapshot();
        let payload = snapshot_json(&snapshot).to_string();
        if socket.send(Message::Text(payload)).await.is_err() {
            info!("ws client disconnected");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fill, OrderRequest, Side};
    use crate::orders::ExecutionConfig;
    use rust_decimal_macros::dec;
    use tokio::sync::Notify;

    async fn state() -> Arc<ApiState> {
        Arc::new(ApiState {
            tracker: PositionTracker::new(dec!(100000), Arc::new(Notify::new())),
            orders: OrderManager::new(ExecutionConfig::default()),
            storage: Arc::new(Storage::open_in_memory().await.unwrap()),
            started_at: Instant::now(),
        })
    }

    #[tokio::test]
    async fn portfolio_reports_initial_cash() {
        let state = state().await;
        let Json(body) = portfolio(State(state)).await;
        assert_eq!(body["cash"], "100000");
        assert_eq!(body["total_equity"], "100000");
    }

    #[tokio::test]
    async fn missing_position_is_not_found() {
        let state = state().await;
        let response = position(State(state), Path("ZZZ".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn known_position_is_returned() {
        let state = state().await;
        let order = OrderRequest::new_market("AAPL", Side::Buy, 10, "test");
        state
            .tracker
            .apply_fill(&Fill::new(&order, dec!(150)))
            .unwrap();

        let response = position(State(state), Path("aapl".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let state = state().await;
        let response = order(State(state), Path(uuid::Uuid::new_v4()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn orders_come_from_storage() {
        let state = state().await;
        let order = OrderRequest::new_market("AAPL", Side::Buy, 10, "test");
        state.storage.upsert_order(&order).await.unwrap();

        let response = orders(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
