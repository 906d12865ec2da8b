//! FlashNet - demo server
//!
//! Runs a FlashNet server with two sample routers and a pair of connection
//! hooks, and stops gracefully on Ctrl+C.
//!
//! | type in | reply type | reply                 |
//! |---------|------------|-----------------------|
//! | 0       | 1          | `ping...ping...ping`  |
//! | 1       | 2          | the request payload   |
//!
//! Every new connection is greeted with a type 202 frame.

use flashnet::{router_fn, Connection, Frame, Request, Router, Server, ServerConfig};
use std::str::FromStr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PING_TYPE: u32 = 0;
const ECHO_TYPE: u32 = 1;
const GREETING_TYPE: u32 = 202;

/// Parse configuration from command-line arguments
fn config_from_args() -> ServerConfig {
    let mut config = ServerConfig::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-h" => {
                config.host = flag_value(&args, i).to_string();
                i += 2;
            }
            "--port" | "-p" => {
                config.port = parse_flag(&args, i);
                i += 2;
            }
            "--max-conn" => {
                config.max_connections = parse_flag(&args, i);
                i += 2;
            }
            "--max-frame" => {
                config.max_frame_size = parse_flag(&args, i);
                i += 2;
            }
            "--workers" => {
                config.worker_pool_size = parse_flag(&args, i);
                i += 2;
            }
            "--queue-len" => {
                config.max_worker_task_len = parse_flag(&args, i);
                i += 2;
            }
            "--name" => {
                config.name = flag_value(&args, i).to_string();
                i += 2;
            }
            "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("FlashNet version {}", flashnet::VERSION);
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    config
}

fn flag_value(args: &[String], i: usize) -> &str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", args[i]);
            std::process::exit(1);
        }
    }
}

fn parse_flag<T: FromStr>(args: &[String], i: usize) -> T {
    let value = flag_value(args, i);
    value.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid value '{}' for {}", value, args[i]);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
FlashNet - A Lightweight TCP Application Server Framework

USAGE:
    flashnet [OPTIONS]

OPTIONS:
    -h, --host <HOST>        Host to bind to (default: 0.0.0.0)
    -p, --port <PORT>        Port to listen on (default: 8999)
        --max-conn <N>       Maximum live connections (default: 1000)
        --max-frame <BYTES>  Maximum payload size (default: 4096)
        --workers <N>        Worker pool size, 0 to disable (default: 10)
        --queue-len <N>      Per-worker queue capacity (default: 1024)
        --name <NAME>        Server name used in logs (default: FlashNetServer)
    -v, --version            Print version information
        --help               Print this help message

EXAMPLES:
    flashnet                         # Start on 0.0.0.0:8999
    flashnet --port 9000 --workers 4
    flashnet --workers 0             # One task per request, no ordering

LOGGING:
    Set RUST_LOG to change verbosity, e.g. RUST_LOG=flashnet=debug
"#
    );
}

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
 ___ _         _    _  _     _
| __| |__ _ __| |_ | \| |___| |_
| _|| / _` (_-< ' \| .` / -_)  _|
|_| |_\__,_/__/_||_|_|\_\___|\__|

FlashNet v{} - {}
──────────────────────────────────────────────────────────────
Binding {} ({} workers, max {} connections, max frame {} bytes)

Use Ctrl+C to shutdown gracefully.
"#,
        flashnet::VERSION,
        config.name,
        config.bind_address(),
        config.worker_pool_size,
        config.max_connections,
        config.max_frame_size,
    );
}

/// Answers every type 0 message with a fixed type 1 reply.
struct PingRouter;

#[async_trait::async_trait]
impl Router for PingRouter {
    async fn pre_handle(&self, request: &Request) {
        info!(conn_id = request.connection().id(), "Ping received");
    }

    async fn handle(&self, request: &Request) -> anyhow::Result<()> {
        request
            .connection()
            .send(ECHO_TYPE, "ping...ping...ping")
            .await?;
        Ok(())
    }
}

async fn on_conn_start(conn: Arc<Connection>) {
    info!(conn_id = conn.id(), peer = %conn.peer_addr(), "Client connected");
    if let Err(e) = conn.send(GREETING_TYPE, "DoConnection BEGIN").await {
        warn!(conn_id = conn.id(), error = %e, "Could not greet client");
    }

    conn.set_property("name", format!("client-{}", conn.id()));
    conn.set_property("peer", conn.peer_addr().to_string());
    conn.set_property("connected_at", std::time::Instant::now());
}

async fn on_conn_stop(conn: Arc<Connection>) {
    let name = conn.property::<String>("name").ok();
    let session = conn
        .property::<std::time::Instant>("connected_at")
        .map(|at| at.elapsed())
        .ok();

    info!(
        conn_id = conn.id(),
        name = ?name.as_deref(),
        session = ?session,
        "Client lost"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = config_from_args();

    // Set up logging; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner(&config);

    let mut server = Server::new(config);
    server.add_router(PING_TYPE, PingRouter)?;
    server.add_router(
        ECHO_TYPE,
        router_fn(|conn: Arc<Connection>, frame: Frame| async move {
            conn.send(2, &frame.payload).await?;
            Ok(())
        }),
    )?;
    server.set_on_conn_start(on_conn_start);
    server.set_on_conn_stop(on_conn_stop);

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C, running until killed");
            std::future::pending::<()>().await;
        }
    };

    server.serve(shutdown).await?;
    Ok(())
}
