//! demos/backend.rs
//! Throwaway upstream for trying the balancer by hand.
//! Run: cargo run --example backend -- <port> [name]

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use rand::Rng;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::sleep;

#[derive(Clone)]
struct BackendState {
    name: String,
    req_counter: Arc<AtomicU64>,
    healthy_flag: Arc<AtomicBool>,
    jitter_ms: u64,
}

async fn handle(req: Request<Body>, state: BackendState) -> Result<Response<Body>, Infallible> {
    let path = req.uri().path().to_owned();

    // /health answers immediately with whatever the flag says
    if path == "/health" {
        let status = if state.healthy_flag.load(Ordering::SeqCst) {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        let mut response = Response::new(Body::empty());
        *response.status_mut() = status;
        return Ok(response);
    }

    let n = state.req_counter.fetch_add(1, Ordering::SeqCst) + 1;
    if state.jitter_ms > 0 {
        let delay = rand::thread_rng().gen_range(0..=state.jitter_ms);
        sleep(Duration::from_millis(delay)).await;
    }

    let body = format!(
        r#"{{"backend":"{}","req":{},"method":"{}","path":"{}"}}"#,
        state.name,
        n,
        req.method(),
        path
    );

    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        "content-type",
        hyper::header::HeaderValue::from_static("application/json"),
    );
    if let Ok(value) = hyper::header::HeaderValue::from_str(&state.name) {
        response.headers_mut().insert("x-backend-name", value);
    }
    Ok(response)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let port: u16 = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "8080".into())
        .parse()?;
    let name = std::env::args()
        .nth(2)
        .or_else(|| std::env::var("BACKEND_NAME").ok())
        .unwrap_or_else(|| format!("backend-{port}"));
    let jitter_ms = std::env::var("JITTER_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    // Flip /health every N seconds to watch the balancer mark us down and up
    let flip_secs: Option<u64> = std::env::var("HEALTH_FLIP_SECS")
        .ok()
        .and_then(|v| v.parse().ok());

    let state = BackendState {
        name: name.clone(),
        req_counter: Arc::new(AtomicU64::new(0)),
        healthy_flag: Arc::new(AtomicBool::new(true)),
        jitter_ms,
    };

    if let Some(secs) = flip_secs.filter(|s| *s > 0) {
        let st = state.clone();
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs(secs)).await;
                let was = st.healthy_flag.fetch_xor(true, Ordering::SeqCst);
                println!("[{}] health -> {}", st.name, if was { "down" } else { "up" });
            }
        });
    }

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let make_svc = make_service_fn(move |_conn| {
        let st = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, st.clone()))) }
    });

    println!("Demo backend '{}' on http://{} [jitter={}ms]", name, addr, jitter_ms);

    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}
