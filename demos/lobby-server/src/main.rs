//! Lobby server demo: host and join sessions on an in-process LAN.
//!
//! Run with: cargo run -p lobby-server-demo
//!
//! Then open http://localhost:3000 in two browser tabs. Host in one, join
//! from the other.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Context;
use axum::{Router, response::Html, routing::get};
use multiplayer_sessions::{
    SessionOrchestrator, SessionsConfig,
    provider::{LocalNetwork, LocalSubsystem},
};
use multiplayer_sessions_menu::{
    MenuConfig,
    websocket::{WsState, create_ws_router},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = SessionsConfig::load().context("Failed to load sessions config")?;
    let network = LocalNetwork::new();
    let players = AtomicU64::new(0);

    // Every browser tab is its own player on the shared network.
    let factory = move || {
        let n = players.fetch_add(1, Ordering::Relaxed) + 1;
        let subsystem = LocalSubsystem::new(Arc::clone(&network), format!("player-{n}"));
        let player_config = SessionsConfig {
            local_player: None,
            ..config.clone()
        };
        SessionOrchestrator::from_subsystem(&subsystem, &player_config)
    };

    let app = Router::new()
        .route("/", get(index_handler))
        .merge(create_ws_router(WsState::new(factory, MenuConfig::default())));

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Multiplayer Sessions - Lobby</title>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            color: #d4d4d4;
            font-family: system-ui, sans-serif;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        button { font-size: 16px; padding: 8px 20px; margin-right: 8px; }
        #log { font-family: Menlo, Monaco, monospace; font-size: 13px; white-space: pre-wrap; }
        .status { color: #888; font-size: 14px; margin-bottom: 10px; }
        .connected { color: #4a4; }
        .disconnected { color: #a44; }
    </style>
</head>
<body>
    <h1>Lobby</h1>
    <div class="status" id="status">Connecting...</div>
    <p>
        <button id="host">Host</button>
        <button id="join">Join</button>
        <button id="start">Start</button>
        <button id="destroy">Leave</button>
    </p>
    <div id="log"></div>

    <script>
        const status = document.getElementById('status');
        const log = document.getElementById('log');
        const buttons = {
            host: document.getElementById('host'),
            join: document.getElementById('join'),
        };
        let ws;

        function write(line) {
            log.textContent = line + '\n' + log.textContent;
        }

        function send(type) {
            if (ws && ws.readyState === WebSocket.OPEN) {
                ws.send(JSON.stringify({ type }));
            }
        }

        for (const type of ['host', 'join', 'start', 'destroy']) {
            document.getElementById(type).onclick = () => send(type);
        }

        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/ws`);

            ws.onopen = () => {
                status.textContent = 'Connected';
                status.className = 'status connected';
            };

            ws.onclose = () => {
                status.textContent = 'Disconnected - reconnecting...';
                status.className = 'status disconnected';
                setTimeout(connect, 2000);
            };

            ws.onmessage = (event) => {
                try {
                    const msg = JSON.parse(event.data);
                    if (msg.type === 'buttons') {
                        buttons.host.disabled = !msg.host_enabled;
                        buttons.join.disabled = !msg.join_enabled;
                    } else if (msg.type === 'sessions_found') {
                        for (const s of msg.sessions) {
                            write(`found ${s.session_id} (${s.match_type}) hosted by ${s.owner_name}`);
                        }
                    } else if (msg.type === 'travel') {
                        write(`travel (${msg.mode}) -> ${msg.destination}`);
                    } else if (msg.type === 'status') {
                        write(`${msg.operation}: ${msg.success ? 'ok' : 'failed'}` +
                            (msg.error ? ` (${msg.error})` : ''));
                    } else if (msg.type === 'error') {
                        write(`error: ${msg.message}`);
                    }
                } catch (e) {
                    console.error('Failed to parse message:', e);
                }
            };
        }

        connect();
    </script>
</body>
</html>
"#;
