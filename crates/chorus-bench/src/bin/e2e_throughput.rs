//! End-to-end throughput benchmark for Chorus.
//!
//! Connects N WebSocket clients to a running server and has each of them
//! send as fast as it can, counting every broadcast received back.
//!
//! ```bash
//! cargo run --release -p chorus-server &
//! cargo run --release -p chorus-bench --bin e2e_throughput -- 16
//! ```

use chorus_protocol::{codec, Message};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let server_url = args.get(2).cloned().unwrap_or_else(|| SERVER_URL.to_string());

    println!("Chorus end-to-end throughput benchmark");
    println!("Server: {} (start it with `cargo run --release`)", server_url);
    println!();

    run_broadcast_benchmark(num_clients, server_url).await;
}

async fn run_broadcast_benchmark(num_clients: usize, server_url: String) {
    println!("Broadcast benchmark: {} clients", num_clients);
    println!("  Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);

    let received = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));
    let mut handles = Vec::with_capacity(num_clients);

    for client_id in 0..num_clients {
        let received = Arc::clone(&received);
        let barrier = Arc::clone(&barrier);
        let url = format!("{}?nickname=bench-{}", server_url, client_id);

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(&url, received, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    barrier.wait().await;
    println!("  All {} clients connected", num_clients);

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;
    let elapsed = start.elapsed();
    let total = received.load(Ordering::SeqCst);

    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("Results");
    println!("  Clients:          {:>10}", num_clients);
    println!("  Duration:         {:>10.2}s", elapsed.as_secs_f64());
    println!("  Delivered:        {:>10}", total);
    println!("  Throughput:       {:>10.0} msg/s", per_sec);
    println!("  Per-client:       {:>10.0} msg/s", per_sec / num_clients as f64);

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    url: &str,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    barrier.wait().await;

    let text = codec::encode(&Message::new("x".repeat(64)))?;

    // Count broadcasts on a separate task so sending never waits on reading.
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            if let WsMessage::Text(text) = frame {
                if codec::decode(text.as_bytes()).is_ok() {
                    received.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    while sender.send(WsMessage::Text(text.clone())).await.is_ok() {
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
