// =============================================================================
// REST API Endpoints: Axum 0.7
// =============================================================================
//
// Read-only diagnostics under `/api/v1/`. Handlers take short read locks on
// the application state and never drive an evaluation themselves.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::decision::state::DecisionMetrics;
use crate::decision::{DecisionAction, SymbolSnapshot};
use crate::decision_package::DecisionPackage;
use crate::risk::RiskSnapshot;
use crate::signals::trend_tracker::{DegradationReport, TrendAnalysis};
use crate::signals::{AggregatorStats, PredictionMethod, TrendAnnotation};

/// Default number of envelopes returned by `/decisions`.
const DEFAULT_DECISION_LIMIT: usize = 50;

// =============================================================================
// Router construction
// =============================================================================

/// Build the REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/metrics", get(metrics))
        .route("/api/v1/decisions", get(decisions))
        .route("/api/v1/symbols/:symbol", get(symbol_detail))
        .route("/api/v1/trend/:symbol", get(trend))
        .layer(cors)
        .with_state(state)
}

fn not_found(what: &str, symbol: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": format!("no {what} for symbol '{symbol}'"),
        })),
    )
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    initialized: bool,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        initialized: state.engine.read().is_initialized(),
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Full state snapshot
// =============================================================================

async fn full_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

// =============================================================================
// Metrics
// =============================================================================

#[derive(Serialize)]
struct MetricsResponse {
    status: String,
    decisions: DecisionMetrics,
    aggregator: AggregatorStats,
    risk: RiskSnapshot,
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, decisions) = {
        let engine = state.engine.read();
        (engine.status(), engine.metrics().clone())
    };
    Json(MetricsResponse {
        status,
        decisions,
        aggregator: state.aggregator.read().stats().clone(),
        risk: state.risk_manager.snapshot(),
    })
}

// =============================================================================
// Decisions
// =============================================================================

#[derive(Deserialize)]
struct DecisionQuery {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn decisions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DecisionQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_DECISION_LIMIT);
    Json(state.recent_decisions_for(query.symbol.as_deref(), limit))
}

// =============================================================================
// Per-symbol detail
// =============================================================================

#[derive(Serialize)]
struct SymbolDetail {
    snapshot: SymbolSnapshot,
    last_decision: Option<DecisionAction>,
    last_package: Option<DecisionPackage>,
}

async fn symbol_detail(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let engine = state.engine.read();
    let snapshot = engine
        .symbol_metrics(&symbol)
        .ok_or_else(|| not_found("registration", &symbol))?;

    Ok(Json(SymbolDetail {
        snapshot,
        last_decision: engine.last_decision(&symbol),
        last_package: engine.last_package(&symbol).cloned(),
    }))
}

// =============================================================================
// Trend
// =============================================================================

#[derive(Serialize)]
struct TrendResponse {
    symbol: String,
    annotation: TrendAnnotation,
    analysis: TrendAnalysis,
    degradation: DegradationReport,
    /// Next confidence (0..1) by simple average, exponential and linear
    /// prediction.
    prediction: [f64; 3],
}

async fn trend(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let trackers = state.trend_trackers.read();
    let tracker = trackers
        .get(&symbol)
        .ok_or_else(|| not_found("trend tracker", &symbol))?;
    let settings = tracker.settings();

    Ok(Json(TrendResponse {
        symbol: symbol.clone(),
        annotation: tracker.annotation(),
        analysis: tracker.current_trend(),
        degradation: tracker.detect_degradation(settings.short_periods, settings.long_periods),
        prediction: [
            tracker.predict_next(PredictionMethod::SimpleAverage),
            tracker.predict_next(PredictionMethod::Exponential),
            tracker.predict_next(PredictionMethod::Linear),
        ],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::RuntimeConfig;
    use crate::scheduler::{EngineEvent, Pipeline};
    use crate::signals::{AnalyzerModule, ModuleKind, ScriptedAnalyzer};
    use crate::types::Direction;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        let config = RuntimeConfig {
            symbols: vec!["EURUSD".to_string()],
            ..RuntimeConfig::default()
        };
        let modules: Vec<Box<dyn AnalyzerModule>> = ModuleKind::ALL
            .iter()
            .map(|k| {
                Box::new(ScriptedAnalyzer::constant(*k, Direction::Bullish, 70.0, 80.0))
                    as Box<dyn AnalyzerModule>
            })
            .collect();
        Arc::new(AppState::new(config, modules))
    }

    async fn get_json(state: Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_initialised_engine() {
        let (status, body) = get_json(state(), "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["initialized"], true);
    }

    #[tokio::test]
    async fn decisions_follow_evaluations() {
        let s = state();
        let pipeline = Pipeline::new(s.clone());
        s.position_manager.update_price("EURUSD", 1.1000);
        pipeline.handle(EngineEvent::Tick {
            symbol: "EURUSD".to_string(),
        });

        let (status, body) = get_json(s.clone(), "/api/v1/decisions?symbol=EURUSD&limit=5").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["final_action"], "OPEN_BUY");

        let (_, metrics) = get_json(s, "/api/v1/metrics").await;
        assert_eq!(metrics["decisions"]["total_decisions"], 1);
    }

    #[tokio::test]
    async fn symbol_detail_and_unknown_symbol() {
        let s = state();
        let (status, body) = get_json(s.clone(), "/api/v1/symbols/EURUSD").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["snapshot"]["symbol"], "EURUSD");

        let (status, _) = get_json(s, "/api/v1/symbols/XAUUSD").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn trend_for_tracked_symbol() {
        let s = state();
        Pipeline::new(s.clone()).handle(EngineEvent::Tick {
            symbol: "EURUSD".to_string(),
        });
        let (status, body) = get_json(s.clone(), "/api/v1/trend/EURUSD").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["annotation"]["samples"], 1);
        assert_eq!(body["prediction"].as_array().unwrap().len(), 3);

        let (status, _) = get_json(s, "/api/v1/trend/XAUUSD").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
