use std::sync::{Arc, Once};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, Request};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use galley::config::{Api, Config, Database, Management, Replay};

static TRACING_INITIALIZED: Once = Once::new();

// Help function to add tracing to tests
// Note: This is safe to use for multiple tests, but since tests are run concurrently the
// output may be interleaved
#[allow(dead_code)]
pub fn enable_tracing() {
    TRACING_INITIALIZED.call_once(|| {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "galley=trace".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

pub const SECRET: &str = "a secret with minimum length of 32 characters";

#[allow(dead_code)]
pub fn config(port: u16) -> Config {
    Config {
        database: Database {
            url: "sqlite::memory:".to_string(),
        },
        api: Api {
            base_url: format!("http://127.0.0.1:{}", port),
            timeout_ms: 2000,
            ..Default::default()
        },
        replay: Replay {
            max_attempts: 20,
            probe_interval_secs: 1,
        },
        management: Management {
            listen: "127.0.0.1:0".to_string(),
            secret: Some(SECRET.to_string()),
        },
        ..Default::default()
    }
}

/// A port nothing is listening on.
#[allow(dead_code)]
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[allow(dead_code)]
#[derive(Clone, Debug)]
pub struct Received {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub type Sentinel = Arc<Mutex<Vec<Received>>>;

/// Records every request it sees and answers 200 `{}`.
#[allow(dead_code)]
pub async fn record_handler(State(sentinel): State<Sentinel>, req: Request<Body>) -> &'static str {
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    sentinel.lock().await.push(Received {
        method: parts.method,
        path: parts.uri.path().to_string(),
        headers: parts.headers,
        body,
    });
    "{}"
}

#[allow(dead_code)]
pub async fn serve_on(port: u16, router: Router) {
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
}

#[allow(dead_code)]
pub async fn serve(router: Router) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    port
}
