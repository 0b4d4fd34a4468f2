use axum::{
    response::Html,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use super::{api, AppState};

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Dashboard page
        .route("/", get(serve_dashboard))
        .route("/api/health", get(api::health_check))
        // Settings endpoints
        .route("/api/settings", get(api::get_settings))
        .route("/api/settings/edit", post(api::post_edit))
        .route("/api/settings/lock/:key", post(api::post_toggle_lock))
        .route("/api/settings/reset", post(api::post_reset))
        .route("/api/settings/reload", post(api::post_reload))
        // Trade endpoints
        .route("/api/trades", get(api::get_trades))
        .route(
            "/api/trades/selected",
            get(api::get_selected).delete(api::delete_selected),
        )
        .route("/api/trades/select/:id", post(api::post_select))
        // Control endpoints
        .route("/api/control", get(api::get_controls))
        .route("/api/control/:command", post(api::post_control))
        .layer(cors)
        .with_state(state)
}

pub async fn start_console_server<F>(state: AppState, port: u16, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Console server starting on http://localhost:{}", port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Console server stopped");
    Ok(())
}

async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

const DASHBOARD_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>PipHawk Console</title>
    <style>
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, sans-serif;
            background: #0f1419;
            color: #e7e9ea;
            min-height: 100vh;
        }
        .header {
            background: #16202a;
            padding: 1rem 2rem;
            border-bottom: 1px solid #2f3336;
            display: flex;
            justify-content: space-between;
            align-items: center;
            gap: 2rem;
            flex-wrap: wrap;
        }
        .header h1 { font-size: 1.5rem; color: #1da1f2; }
        .controls { display: flex; gap: 0.75rem; flex-wrap: wrap; }

        .container { padding: 1.5rem; max-width: 1600px; margin: 0 auto; }
        .grid { display: grid; gap: 1.5rem; }
        .grid-3 { grid-template-columns: repeat(3, 1fr); }
        .grid-2 { grid-template-columns: 2fr 1fr; }
        @media (max-width: 1200px) { .grid-3, .grid-2 { grid-template-columns: 1fr; } }

        .card {
            background: #16202a;
            border-radius: 12px;
            padding: 1.5rem;
            border: 1px solid #2f3336;
        }
        .card-title {
            font-size: 0.875rem;
            color: #71767b;
            text-transform: uppercase;
            letter-spacing: 0.5px;
            margin-bottom: 0.75rem;
        }
        .card-value { font-size: 2rem; font-weight: 700; }

        .positive { color: #00ba7c; }
        .negative { color: #f4212e; }
        .neutral { color: #71767b; }

        .btn {
            padding: 0.5rem 1rem;
            border-radius: 9999px;
            border: none;
            font-weight: 600;
            cursor: pointer;
            background: #1da1f2;
            color: #fff;
        }
        .btn:disabled { opacity: 0.5; cursor: not-allowed; }
        .btn-danger { background: #f4212e; }
        .btn-secondary { background: #2f3336; }

        table { width: 100%; border-collapse: collapse; font-size: 0.875rem; }
        th, td { padding: 0.5rem; text-align: left; border-bottom: 1px solid #2f3336; }
        th { color: #71767b; font-weight: 500; }
        tbody tr { cursor: pointer; }
        tbody tr:hover { background: #1c2732; }

        .field { display: flex; align-items: center; gap: 0.75rem; margin-bottom: 0.75rem; }
        .field label { flex: 1; font-size: 0.875rem; }
        .field input[type=range] { flex: 2; }
        .field .value { width: 4rem; text-align: right; font-variant-numeric: tabular-nums; }
        .lock { font-size: 0.75rem; color: #71767b; }

        pre {
            background: #0f1419;
            border-radius: 8px;
            padding: 1rem;
            font-size: 0.8rem;
            overflow: auto;
            max-height: 480px;
        }
        .stale { color: #ffd400; font-size: 0.75rem; margin-bottom: 0.5rem; }
    </style>
</head>
<body>
    <div class="header">
        <h1>PipHawk Console</h1>
        <div class="controls">
            <button class="btn" data-command="start" onclick="sendCommand('start')">Start</button>
            <button class="btn btn-secondary" data-command="stop" onclick="sendCommand('stop')">Stop</button>
            <button class="btn btn-secondary" data-command="restart" onclick="sendCommand('restart')">Restart</button>
            <button class="btn btn-danger" data-command="panic_stop" onclick="sendCommand('panic_stop')">PANIC STOP</button>
        </div>
    </div>

    <div class="container">
        <div class="grid grid-3" style="margin-bottom: 1.5rem;">
            <div class="card"><div class="card-title">Wins</div><div class="card-value positive" id="wins">-</div></div>
            <div class="card"><div class="card-title">Losses</div><div class="card-value negative" id="losses">-</div></div>
            <div class="card"><div class="card-title">Win Rate</div><div class="card-value" id="win-rate">-</div></div>
        </div>

        <div class="grid grid-2">
            <div class="card">
                <div class="card-title">Recent Trades <span class="neutral" id="poll-status"></span></div>
                <table>
                    <thead>
                        <tr><th>ID</th><th>Instrument</th><th>Opened</th><th>Units</th><th>Open</th><th>Close</th><th>P/L</th><th>State</th></tr>
                    </thead>
                    <tbody id="trades"></tbody>
                </table>
            </div>

            <div class="card">
                <div class="card-title">Settings</div>
                <div id="numeric"></div>
                <div id="boolean"></div>
                <div id="enumerated"></div>
                <div class="controls" style="margin-top: 1rem;">
                    <button class="btn btn-secondary" onclick="resetSettings()">Reset to defaults</button>
                    <button class="btn btn-secondary" onclick="reloadSettings()">Reload</button>
                </div>
            </div>
        </div>

        <div class="card" id="inspector" style="margin-top: 1.5rem; display: none;">
            <div class="card-title">Trade Details <button class="btn btn-secondary" onclick="closeInspector()">Close</button></div>
            <div class="stale" id="inspector-stale" style="display: none;">No longer in the latest page</div>
            <pre id="inspector-json"></pre>
        </div>
    </div>

    <script>
        async function api(path, options) {
            const response = await fetch(path, options);
            return { ok: response.ok, status: response.status, body: await response.json() };
        }

        function fmt(value, digits) {
            return value === null || value === undefined ? '-' : Number(value).toFixed(digits);
        }

        // Backend strings never reach innerHTML unescaped.
        function esc(value) {
            if (value === null || value === undefined) return '-';
            return String(value)
                .replace(/&/g, '&amp;')
                .replace(/</g, '&lt;')
                .replace(/>/g, '&gt;')
                .replace(/"/g, '&quot;')
                .replace(/'/g, '&#39;');
        }

        function when(raw) {
            if (!raw) return '-';
            const parsed = new Date(raw);
            return isNaN(parsed.getTime()) ? esc(raw) : parsed.toLocaleString();
        }

        function plClass(pl) {
            if (pl === null || pl === undefined) return '';
            return pl >= 0 ? 'positive' : 'negative';
        }

        // === Trades ===

        async function loadTrades() {
            try {
                const { body } = await api('/api/trades');
                document.getElementById('wins').textContent = body.stats.wins;
                document.getElementById('losses').textContent = body.stats.losses;
                document.getElementById('win-rate').textContent =
                    body.stats.win_rate === null ? '-' : Number(body.stats.win_rate).toFixed(2) + '%';
                document.getElementById('poll-status').textContent =
                    body.consecutive_failures > 0 ? '(stale, ' + body.consecutive_failures + ' failed polls)' : '';

                document.getElementById('trades').innerHTML = body.trades.map(t =>
                    '<tr data-trade-id="' + esc(t.trade_id) + '">' +
                    '<td>' + esc(t.trade_id) + '</td>' +
                    '<td>' + esc(t.instrument) + '</td>' +
                    '<td>' + when(t.open_time) + '</td>' +
                    '<td>' + esc(t.units) + '</td>' +
                    '<td>' + fmt(t.open_price, 5) + '</td>' +
                    '<td>' + fmt(t.close_price, 5) + '</td>' +
                    '<td class="' + plClass(t.realized_pl) + '">' + fmt(t.realized_pl, 2) + '</td>' +
                    '<td>' + esc(t.state) + '</td>' +
                    '</tr>'
                ).join('');
            } catch (e) {
                console.error('Failed to load trades:', e);
            }
        }

        document.getElementById('trades').addEventListener('click', event => {
            const row = event.target.closest('tr[data-trade-id]');
            if (row) selectTrade(row.dataset.tradeId);
        });

        async function selectTrade(id) {
            const { ok } = await api('/api/trades/select/' + encodeURIComponent(id), { method: 'POST' });
            if (ok) loadInspector();
        }

        async function loadInspector() {
            const { body } = await api('/api/trades/selected');
            const panel = document.getElementById('inspector');
            if (!body.trade) {
                panel.style.display = 'none';
                return;
            }
            panel.style.display = 'block';
            document.getElementById('inspector-json').textContent = body.details;
            document.getElementById('inspector-stale').style.display = body.stale ? 'block' : 'none';
        }

        async function closeInspector() {
            await api('/api/trades/selected', { method: 'DELETE' });
            loadInspector();
        }

        // === Settings ===

        function lockToggle(field) {
            // Checked means the field is editable.
            return '<label class="lock"><input type="checkbox" class="lock-toggle" data-key="' + esc(field.key) + '"' +
                (field.checked ? ' checked' : '') + '> edit</label>';
        }

        function renderSettings(panel) {
            document.getElementById('numeric').innerHTML = panel.numeric.map(f =>
                '<div class="field">' +
                '<label>' + esc(f.label) + '</label>' +
                '<input type="range" data-key="' + esc(f.key) + '" data-kind="number"' +
                ' min="' + esc(f.min) + '" max="' + esc(f.max) + '" step="' + (f.integer ? 1 : 0.01) + '"' +
                ' value="' + esc(f.value) + '"' + (f.disabled ? ' disabled' : '') + '>' +
                '<span class="value">' + esc(f.value) + '</span>' +
                lockToggle(f) +
                '</div>'
            ).join('');

            document.getElementById('boolean').innerHTML = panel.boolean.map(f =>
                '<div class="field">' +
                '<label>' + esc(f.label) + '</label>' +
                '<input type="checkbox" data-key="' + esc(f.key) + '" data-kind="flag"' +
                (f.value ? ' checked' : '') + (f.disabled ? ' disabled' : '') + '>' +
                lockToggle(f) +
                '</div>'
            ).join('');

            document.getElementById('enumerated').innerHTML = panel.enumerated.map(f =>
                '<div class="field">' +
                '<label>' + esc(f.label) + '</label>' +
                '<select data-key="' + esc(f.key) + '" data-kind="choice"' + (f.disabled ? ' disabled' : '') + '>' +
                (f.value === null ? '<option value="" selected>-</option>' : '') +
                f.options.map(o =>
                    '<option value="' + esc(o) + '"' + (o === f.value ? ' selected' : '') + '>' + esc(o) + '</option>'
                ).join('') +
                '</select>' +
                lockToggle(f) +
                '</div>'
            ).join('');
        }

        function onSettingChange(event) {
            const input = event.target;
            const key = input.dataset.key;
            if (!key) return;
            if (input.classList.contains('lock-toggle')) {
                toggleLock(key);
            } else if (input.dataset.kind === 'number') {
                editSetting(key, Number(input.value));
            } else if (input.dataset.kind === 'flag') {
                editSetting(key, input.checked);
            } else {
                editSetting(key, input.value);
            }
        }

        ['numeric', 'boolean', 'enumerated'].forEach(id =>
            document.getElementById(id).addEventListener('change', onSettingChange));

        async function loadSettings() {
            const { body } = await api('/api/settings');
            renderSettings(body);
        }

        async function editSetting(key, value) {
            await api('/api/settings/edit', {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify({ key, value })
            });
            loadSettings();
        }

        async function toggleLock(key) {
            await api('/api/settings/lock/' + encodeURIComponent(key), { method: 'POST' });
            loadSettings();
        }

        async function resetSettings() {
            await api('/api/settings/reset', { method: 'POST' });
            loadSettings();
        }

        async function reloadSettings() {
            const { body } = await api('/api/settings/reload', { method: 'POST' });
            renderSettings(body);
        }

        // === Controls ===

        async function sendCommand(command) {
            if (command === 'panic_stop' && !confirm('Stop the bot and flatten positions?')) return;
            await api('/api/control/' + command, { method: 'POST' });
            loadControls();
        }

        async function loadControls() {
            const { body } = await api('/api/control');
            body.forEach(s => {
                const button = document.querySelector('[data-command="' + s.command + '"]');
                if (button) button.disabled = s.busy;
            });
        }

        loadSettings();
        loadTrades();
        loadControls();
        setInterval(loadTrades, 5000);
        setInterval(loadControls, 1000);
    </script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeBackend;
    use crate::client::{BackendApi, HttpBackend};
    use crate::config::SettingsCatalog;
    use crate::telemetry::PollerConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn app(backend: Arc<dyn BackendApi>) -> (AppState, Router) {
        let state = AppState::mount(
            backend,
            Arc::new(SettingsCatalog::builtin()),
            PollerConfig::default(),
            None,
        )
        .await;
        (state.clone(), build_router(state))
    }

    async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_settings_panel_and_lock_flow() {
        let backend = Arc::new(FakeBackend::new().with_settings(json!({
            "AI_COOLDOWN_SEC_OPEN": 45,
            "TRAIL_ENABLED": true,
        })));
        let (state, router) = app(backend.clone()).await;

        let (status, panel) = call(&router, Method::GET, "/api/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(panel["numeric"][0]["key"], "AI_COOLDOWN_SEC_OPEN");
        assert_eq!(panel["numeric"][0]["label"], "AI Cool-down (Open)");
        assert_eq!(panel["numeric"][0]["checked"], true);
        assert_eq!(panel["boolean"].as_array().unwrap().len(), 1);

        let (_, lock) = call(&router, Method::POST, "/api/settings/lock/AI_COOLDOWN_SEC_OPEN", None).await;
        assert_eq!(lock["locked"], true);
        assert_eq!(lock["checked"], false);
        let (_, panel) = call(&router, Method::GET, "/api/settings", None).await;
        assert_eq!(panel["locked"], json!(["AI_COOLDOWN_SEC_OPEN"]));

        let edit = json!({"key": "AI_COOLDOWN_SEC_OPEN", "value": 120});
        let (status, _) = call(&router, Method::POST, "/api/settings/edit", Some(edit.clone())).await;
        assert_eq!(status, StatusCode::LOCKED);

        call(&router, Method::POST, "/api/settings/lock/AI_COOLDOWN_SEC_OPEN", None).await;
        let (status, body) = call(&router, Method::POST, "/api/settings/edit", Some(edit)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["patch"]["AI_COOLDOWN_SEC_OPEN"], 120);

        let (status, _) = call(
            &router,
            Method::POST,
            "/api/settings/edit",
            Some(json!({"key": "TRAIL_ENABLED", "value": "yes"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        state.unmount().await;
    }

    #[tokio::test]
    async fn test_lock_on_unknown_key_is_not_found() {
        let backend = Arc::new(FakeBackend::new().with_settings(json!({"AI_COOLDOWN_SEC_OPEN": 45})));
        let (state, router) = app(backend).await;

        let (status, body) = call(&router, Method::POST, "/api/settings/lock/NOT_A_SETTING", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("NOT_A_SETTING"));

        let (_, panel) = call(&router, Method::GET, "/api/settings", None).await;
        assert!(panel["locked"].as_array().unwrap().is_empty());
        state.unmount().await;
    }

    #[tokio::test]
    async fn test_reload_clears_locks() {
        let backend = Arc::new(FakeBackend::new().with_settings(json!({"AI_COOLDOWN_SEC_OPEN": 45})));
        let (state, router) = app(backend).await;

        call(&router, Method::POST, "/api/settings/lock/AI_COOLDOWN_SEC_OPEN", None).await;
        let (status, panel) = call(&router, Method::POST, "/api/settings/reload", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(panel["numeric"][0]["locked"], false);
        state.unmount().await;
    }

    #[tokio::test]
    async fn test_control_endpoints() {
        let backend = Arc::new(FakeBackend::new());
        let (state, router) = app(backend.clone()).await;

        let (status, _) = call(&router, Method::POST, "/api/control/pause", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&router, Method::POST, "/api/control/panic_stop", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["command"], "panic_stop");

        let (status, body) = call(&router, Method::GET, "/api/control", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 4);
        state.unmount().await;
    }

    #[tokio::test]
    async fn test_trade_selection_endpoints() {
        let backend = Arc::new(FakeBackend::new());
        let (state, router) = app(backend).await;

        let (status, body) = call(&router, Method::GET, "/api/trades", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["trades"].is_array());
        assert!(body["stats"]["win_rate"].is_null());

        let (status, _) = call(&router, Method::POST, "/api/trades/select/42", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&router, Method::GET, "/api/trades/selected", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["trade"].is_null());

        let (status, _) = call(&router, Method::DELETE, "/api/trades/selected", None).await;
        assert_eq!(status, StatusCode::OK);
        state.unmount().await;
    }

    #[tokio::test]
    async fn test_health_reports_unconfigured_backend() {
        let backend = Arc::new(HttpBackend::new(None, "/settings", None).unwrap());
        let (state, router) = app(backend).await;

        let (status, body) = call(&router, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["backend"], "not_configured");

        let (status, panel) = call(&router, Method::GET, "/api/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(panel["numeric"].as_array().unwrap().is_empty());
        state.unmount().await;
    }

    #[tokio::test]
    async fn test_dashboard_page_served() {
        let (state, router) = app(Arc::new(FakeBackend::new())).await;
        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("PANIC STOP"));
        state.unmount().await;
    }

    #[test]
    fn test_dashboard_escapes_backend_strings() {
        assert!(DASHBOARD_HTML.contains("function esc(value)"));
        assert!(DASHBOARD_HTML.contains("esc(t.instrument)"));
        assert!(DASHBOARD_HTML.contains("esc(f.label)"));
        assert!(DASHBOARD_HTML.contains("esc(o)"));
        // Row and field handlers read data attributes instead of inline script.
        assert!(!DASHBOARD_HTML.contains("onclick=\"selectTrade("));
        assert!(!DASHBOARD_HTML.contains("onchange=\"editSetting("));
        assert!(!DASHBOARD_HTML.contains("onchange=\"toggleLock("));
    }
}
