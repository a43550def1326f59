//! DarkFlows — router and gateway administration dashboard
//!
//! A single-binary web service for DarkFlows router hosts that:
//! - Edits the flat-file network/CAKE/DDNS configuration
//! - Manages Kea DHCP reservations and VLAN definitions
//! - Relays the daemon-written status snapshots from /dev/shm
//! - Bridges a fixed set of host scripts (bandwidth, routes, DNS)
//! - Streams speed test progress to the browser over SSE

mod api;
mod auth;
mod config;
mod ddns;
mod dhcp;
mod fslock;
mod interfaces;
mod scripts;
mod secondary_routes;
mod speedtest;
mod status;
mod subnet;
mod vlans;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use clap::Parser;
use std::time::Duration;
use tracing::{debug, info, warn};

/// DarkFlows — router administration dashboard
#[derive(Parser)]
#[command(name = "darkflows", version, about = "Web dashboard for DarkFlows router hosts")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = 9000)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Directory holding the dashboard's static assets
    #[arg(long)]
    web_dir: Option<String>,
}

/// Serve the login page for unauthenticated requests to /
async fn index_handler(req: HttpRequest, state: web::Data<api::AppState>) -> HttpResponse {
    let now = chrono::Utc::now().timestamp();
    let authenticated = req
        .cookie(auth::SESSION_COOKIE)
        .and_then(|c| auth::verify_token(&state.secret, c.value(), now))
        .is_some();

    let web_dir = find_web_dir();
    let page = if authenticated { "index.html" } else { "login.html" };
    match std::fs::read_to_string(format!("{}/{}", web_dir, page)) {
        Ok(content) => HttpResponse::Ok().content_type("text/html").body(content),
        Err(_) => HttpResponse::InternalServerError().body("Web UI not found"),
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("darkflows=info".parse().unwrap())
                .add_directive("actix_web=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    // Session signing secret, generated on first start
    let secret = match auth::load_or_create_secret() {
        Ok(s) => s,
        Err(e) => {
            return Err(std::io::Error::other(format!(
                "cannot initialize session secret: {}",
                e
            )))
        }
    };

    info!("");
    info!("  DarkFlows v{}", env!("CARGO_PKG_VERSION"));
    info!("  ──────────────────────────────────");
    info!("  Hostname:   {}", hostname);
    info!("  Dashboard:  http://{}:{}", cli.bind, cli.port);
    if auth::load_credentials().ok().flatten().is_none() {
        info!("  No admin credential yet — POST /api/setup to create one");
    }

    // Shared HTTP client for Cloudflare and public IP detection
    let http = reqwest::Client::builder()
        .timeout(ddns::HTTP_TIMEOUT)
        .build()
        .unwrap_or_default();

    let app_state = web::Data::new(api::AppState {
        secret,
        locks: fslock::PathLocks::new(),
        monitor: std::sync::Mutex::new(status::SystemMonitor::new()),
        http: http.clone(),
    });

    // Background: dynamic DNS refresh, only pushes when the address moves
    tokio::spawn(async move {
        let mut last_ip: Option<String> = None;
        loop {
            tokio::time::sleep(Duration::from_secs(300)).await;
            let settings = match ddns::load_settings() {
                Ok(Some(s)) => s,
                _ => continue,
            };
            let ip = match ddns::public_ip(&http).await {
                Ok(ip) => ip,
                Err(e) => {
                    debug!("public IP detection failed: {}", e);
                    continue;
                }
            };
            if last_ip.as_deref() == Some(ip.as_str()) {
                continue;
            }
            match ddns::push_record(&http, &settings, &ip).await {
                Ok(()) => {
                    info!("DDNS record {} -> {}", settings.record_name, ip);
                    last_ip = Some(ip);
                }
                Err(e) => warn!("DDNS update failed: {}", e),
            }
        }
    });

    // Determine web directory
    let web_dir = cli.web_dir.clone().unwrap_or_else(find_web_dir);
    info!("  Serving web UI from: {}", web_dir);
    info!("");

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(api::configure)
            .route("/", web::get().to(index_handler))
            .service(actix_files::Files::new("/", &web_dir).index_file("login.html"))
    })
    .bind(format!("{}:{}", cli.bind, cli.port))?
    .run()
    .await
}

/// Find the web directory — check multiple locations
fn find_web_dir() -> String {
    let candidates = [
        // Development
        "web",
        // Installed
        "/opt/darkflows/web",
        "/usr/share/darkflows/web",
    ];

    for dir in &candidates {
        let path = std::path::Path::new(dir);
        if path.exists() && path.join("login.html").exists() {
            return dir.to_string();
        }
    }

    // Fallback
    "web".to_string()
}
