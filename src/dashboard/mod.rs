use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::error::PipelineError;
use crate::scoring::{RiskScoringService, ScoringError, ServiceState};

const SERVICE_NAME: &str = "Athlete Risk Engine";

#[derive(Clone)]
pub struct AppState {
    pub scoring: Arc<RiskScoringService>,
}

/// Build the Axum router for the scoring service and its monitoring page.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/model", get(model_handler))
        .route("/predict", post(predict_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

fn error_response(status: StatusCode, message: impl ToString) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

/// Serve the monitoring page, injecting the model state.
async fn index_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ready = matches!(state.scoring.state(), ServiceState::Ready(_));
    let html = MONITOR_HTML.replace(
        r#"<body>"#,
        &format!(r#"<body data-ready="{}">"#, ready),
    );
    Html(html)
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, model_state) = match state.scoring.state() {
        ServiceState::Ready(_) => ("ok", "ready"),
        ServiceState::Unloaded { .. } => ("degraded", "unloaded"),
    };
    let mut body = json!({
        "status": status,
        "service": SERVICE_NAME,
        "model_state": model_state,
        "model_version": state.scoring.model_info().map(|m| m.version.clone()),
    });
    if let ServiceState::Unloaded { reason } = state.scoring.state() {
        body["reason"] = json!(reason);
    }
    Json(body)
}

/// GET /api/model
async fn model_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.scoring.model_info() {
        Some(info) => Json(info.clone()).into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "no model loaded"),
    }
}

/// POST /predict
async fn predict_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let scored = serde_json::from_slice::<Value>(&body)
        .map_err(|e| {
            ScoringError::Validation(PipelineError::Validation(format!("invalid JSON body: {e}")))
        })
        .and_then(|value| state.scoring.score(&value));

    match scored {
        Ok(result) => Json(result).into_response(),
        Err(ScoringError::Unavailable(reason)) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("scoring service unavailable: {reason}"),
        ),
        Err(e @ ScoringError::Validation(_)) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, e)
        }
        // Details stay in the server log
        Err(ScoringError::Inference(_)) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal scoring error")
        }
    }
}

/// Embedded single-file monitoring page (HTML + CSS + JS)
const MONITOR_HTML: &str = r#"<!DOCTYPE html>
<html lang="fr">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Athlete 360 - Monitoring &amp; Prédiction</title>
<style>
  :root {
    --bg: #0f1117;
    --card: #1a1d27;
    --border: #2a2d3a;
    --accent: #6c63ff;
    --green: #00c896;
    --orange: #ff9800;
    --red: #ff4f6a;
    --text: #e0e0e0;
    --muted: #8888aa;
  }
  * { box-sizing: border-box; margin: 0; padding: 0; }
  body { background: var(--bg); color: var(--text); font-family: 'Segoe UI', system-ui, sans-serif; }
  header { display: flex; align-items: center; gap: 1rem; padding: 1rem 2rem; border-bottom: 1px solid var(--border); }
  header h1 { font-size: 1.4rem; font-weight: 700; }
  .badge { padding: .2rem .6rem; border-radius: 4px; font-size: .75rem; font-weight: 700; text-transform: uppercase; }
  .badge.ready { background: var(--green); color: #000; }
  .badge.unloaded { background: var(--red); color: #000; }
  main { padding: 1.5rem 2rem; display: grid; grid-template-columns: 1fr 2fr; gap: 1.5rem; }
  @media (max-width: 768px) { main { grid-template-columns: 1fr; } }
  .panel { background: var(--card); border: 1px solid var(--border); border-radius: 10px; overflow: hidden; }
  .panel-header { padding: .9rem 1.2rem; border-bottom: 1px solid var(--border); font-weight: 600; }
  form { padding: 1.2rem; display: grid; gap: .8rem; }
  label { display: grid; gap: .3rem; color: var(--muted); font-size: .8rem; text-transform: uppercase; letter-spacing: .06em; }
  input { background: var(--bg); border: 1px solid var(--border); color: var(--text); padding: .45rem .6rem; border-radius: 6px; font-size: .95rem; }
  button { background: var(--accent); border: none; color: #fff; padding: .6rem 1rem; border-radius: 6px; cursor: pointer; font-weight: 600; }
  .result { padding: 1.5rem; display: grid; gap: 1rem; }
  .level { font-size: 2rem; font-weight: 700; }
  .level.FAIBLE { color: var(--green); }
  .level.MODÉRÉ { color: var(--orange); }
  .level.CRITIQUE { color: var(--red); }
  .bar { height: 10px; background: var(--border); border-radius: 5px; overflow: hidden; }
  .bar > div { height: 100%; background: var(--accent); width: 0; transition: width .3s; }
  pre { background: var(--bg); padding: 1rem; border-radius: 6px; font-size: .8rem; overflow-x: auto; }
  .empty { color: var(--muted); text-align: center; padding: 2rem; font-size: .9rem; }
</style>
</head>
<body>
<header>
  <h1>Athlete 360</h1>
  <span class="badge" id="state-badge">…</span>
  <span style="margin-left:auto;color:var(--muted);font-size:.8rem;" id="model-version"></span>
</header>

<main>
  <div class="panel">
    <div class="panel-header">Saisie Données du Jour</div>
    <form id="metrics-form">
      <label>Âge <input name="age" type="number" min="18" max="40" step="1" value="24"></label>
      <label>Poids (kg) <input name="weight_kg" type="number" min="60" max="100" step="0.1" value="75"></label>
      <label>Historique Blessures (Index) <input name="injury_history_index" type="number" min="0" max="5" step="1" value="1"></label>
      <label>Distance Totale (m) <input name="total_distance_m" type="number" min="0" max="15000" value="8500"></label>
      <label>Distance Haute Vitesse (m) <input name="hsr_distance_m" type="number" min="0" max="2000" value="400"></label>
      <label>Vitesse Max (km/h) <input name="max_speed_kmh" type="number" min="0" max="36" step="0.1" value="28.5"></label>
      <label>Dernière VMA <input name="last_vma_test" type="number" min="10" max="25" step="0.1" value="18"></label>
      <button type="submit">Analyser le Risque</button>
    </form>
  </div>

  <div class="panel">
    <div class="panel-header">Résultat</div>
    <div class="result" id="result"><div class="empty">Aucune analyse.</div></div>
  </div>
</main>

<script>
const INTS = ['age', 'injury_history_index'];

function readForm(form) {
  const data = {};
  for (const input of form.querySelectorAll('input')) {
    data[input.name] = INTS.includes(input.name) ? parseInt(input.value, 10) : parseFloat(input.value);
  }
  return data;
}

function render(result) {
  const pct = (result.risk_probability * 100).toFixed(1);
  document.getElementById('result').innerHTML =
    `<div class="level ${result.risk_level}">RISQUE ${result.risk_level} (${pct}%)</div>
     <div class="bar"><div style="width:${pct}%"></div></div>
     <div>${result.message}</div>
     <pre>${JSON.stringify(result, null, 2)}</pre>`;
}

function renderError(text) {
  document.getElementById('result').innerHTML = `<div class="empty">${text}</div>`;
}

document.getElementById('metrics-form').addEventListener('submit', async (ev) => {
  ev.preventDefault();
  try {
    const r = await fetch('/predict', {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify(readForm(ev.target)),
    });
    const body = await r.json();
    if (r.ok) render(body); else renderError('Erreur lors de l\'appel API : ' + body.error);
  } catch (e) {
    renderError('L\'API ne répond pas.');
  }
});

async function loadModel() {
  const r = await fetch('/api/model');
  if (!r.ok) return;
  const m = await r.json();
  document.getElementById('model-version').textContent =
    'Modèle ' + m.version + ' · accuracy ' + (m.evaluation.accuracy * 100).toFixed(1) + '%';
}

document.addEventListener('DOMContentLoaded', () => {
  const ready = document.body.dataset.ready === 'true';
  const badge = document.getElementById('state-badge');
  badge.textContent = ready ? 'Modèle chargé' : 'Modèle absent';
  badge.className = 'badge ' + (ready ? 'ready' : 'unloaded');
  if (ready) loadModel();
});
</script>
</body>
</html>"#;
