//! REST API for the DarkFlows dashboard.
//!
//! Every route is a thin authenticated layer over one config file, one
//! script, or one status snapshot. Handlers re-read from disk on every
//! call; mutations hold the per-path lock for the whole
//! read-modify-write.

use actix_web::{cookie::Cookie, web, HttpRequest, HttpResponse};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use crate::auth;
use crate::config;
use crate::ddns;
use crate::dhcp;
use crate::fslock::{write_atomic, PathLocks};
use crate::interfaces;
use crate::scripts;
use crate::secondary_routes;
use crate::speedtest;
use crate::status::{self, SystemMonitor};
use crate::subnet;
use crate::vlans;

/// Shared application state.
pub struct AppState {
    pub secret: Vec<u8>,
    pub locks: PathLocks,
    pub monitor: std::sync::Mutex<SystemMonitor>,
    pub http: reqwest::Client,
}

// ─── Auth helpers ───

fn session_token(req: &HttpRequest) -> Option<String> {
    req.cookie(auth::SESSION_COOKIE)
        .map(|c| c.value().to_string())
}

/// Check the session cookie; returns the username or a 401 response.
/// The negative result carries no-store so proxies never cache it.
pub fn require_auth(req: &HttpRequest, state: &web::Data<AppState>) -> Result<String, HttpResponse> {
    let now = chrono::Utc::now().timestamp();
    match session_token(req).and_then(|t| auth::verify_token(&state.secret, &t, now)) {
        Some(username) => Ok(username),
        None => Err(HttpResponse::Unauthorized()
            .insert_header(("Cache-Control", "no-store"))
            .json(json!({ "error": "Not authenticated" }))),
    }
}

/// 500 with a generic client message; the underlying cause goes to the log.
fn upstream_error(context: &str, cause: String) -> HttpResponse {
    error!("{}: {}", context, cause);
    HttpResponse::InternalServerError().json(json!({ "error": format!("{} failed", context) }))
}

fn field_error(field: &str, message: impl std::fmt::Display) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({ "field": field, "error": message.to_string() }))
}

fn not_found(message: &str) -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "error": message }))
}

// ─── Auth API ───

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// POST /api/login — authenticate with the shared admin credential
pub async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> HttpResponse {
    let creds = match auth::load_credentials() {
        Ok(Some(c)) => c,
        Ok(None) => {
            return HttpResponse::Unauthorized()
                .json(json!({ "error": "No admin credential configured; run setup" }))
        }
        Err(e) => return upstream_error("reading credentials", e),
    };

    if auth::verify_login(&creds, &body.username, &body.password) {
        let token = auth::issue_token(&state.secret, &body.username, chrono::Utc::now().timestamp());
        let cookie = Cookie::build(auth::SESSION_COOKIE, token)
            .path("/")
            .http_only(true)
            .max_age(actix_web::cookie::time::Duration::hours(24))
            .finish();
        info!("login for '{}'", body.username);
        HttpResponse::Ok()
            .cookie(cookie)
            .json(json!({ "success": true, "username": body.username }))
    } else {
        warn!("failed login attempt for '{}'", body.username);
        HttpResponse::Unauthorized().json(json!({ "error": "Invalid username or password" }))
    }
}

/// POST /api/logout — clear the session cookie
pub async fn logout() -> HttpResponse {
    let mut cookie = Cookie::build(auth::SESSION_COOKIE, "").path("/").finish();
    cookie.make_removal();
    HttpResponse::Ok().cookie(cookie).json(json!({ "success": true }))
}

/// GET /api/auth/check — 200/401 session probe
pub async fn auth_check(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match require_auth(&req, &state) {
        Ok(username) => {
            HttpResponse::Ok().json(json!({ "authenticated": true, "username": username }))
        }
        Err(resp) => resp,
    }
}

#[derive(Deserialize)]
pub struct SetupRequest {
    pub username: String,
    pub password: String,
}

/// POST /api/setup — first-run credential creation, refused once one exists
pub async fn setup(body: web::Json<SetupRequest>) -> HttpResponse {
    match auth::load_credentials() {
        Ok(Some(_)) => {
            return HttpResponse::Forbidden()
                .json(json!({ "error": "Admin credential already configured" }))
        }
        Ok(None) => {}
        Err(e) => return upstream_error("reading credentials", e),
    }
    if body.username.trim().is_empty() {
        return field_error("username", "username is required");
    }
    if body.password.len() < 8 {
        return field_error("password", "password must be at least 8 characters");
    }
    let creds = auth::Credentials {
        username: body.username.trim().to_string(),
        password_hash: auth::hash_password(&body.password),
    };
    match auth::save_credentials(&creds) {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(e) => upstream_error("writing credentials", e),
    }
}

// ─── Network config API ───

/// GET /api/network/config — parsed d_network.cfg
pub async fn get_network_config(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    match std::fs::read_to_string(config::NETWORK_CFG) {
        Ok(text) => HttpResponse::Ok().json(config::parse(&text)),
        Err(e) => upstream_error("reading network config", e.to_string()),
    }
}

/// PUT /api/network/config — selective rewrite of the recognized keys
pub async fn put_network_config(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<config::NetworkConfig>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let lock = state.locks.for_path(config::NETWORK_CFG);
    let _guard = lock.lock().await;

    let text = match std::fs::read_to_string(config::NETWORK_CFG) {
        Ok(t) => t,
        Err(e) => return upstream_error("reading network config", e.to_string()),
    };
    let mut merged = config::parse(&text);
    merged.merge(body.into_inner());
    let updated = config::render(&text, &merged);
    if let Err(e) = write_atomic(config::NETWORK_CFG, &updated) {
        return upstream_error("writing network config", e);
    }
    info!("network config updated");
    HttpResponse::Ok().json(merged)
}

/// POST /api/network/apply — run changebw.sh against the saved config
pub async fn apply_network_config(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    match scripts::apply_bandwidth().await {
        Ok(out) => HttpResponse::Ok().json(json!({ "message": out.stdout.trim() })),
        Err(e) => upstream_error("applying bandwidth config", e),
    }
}

// ─── Interfaces API ───

/// GET /api/network/interfaces — live interface list
pub async fn get_interfaces(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    HttpResponse::Ok().json(interfaces::list_interfaces())
}

/// GET /api/network/interfaces/{name}/static — Debian stanza address/netmask
pub async fn get_static_stanza(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let name = path.into_inner();
    let text = match std::fs::read_to_string(interfaces::INTERFACES_FILE) {
        Ok(t) => t,
        Err(e) => return upstream_error("reading interfaces file", e.to_string()),
    };
    match interfaces::static_stanza(&text, &name) {
        Some(stanza) => HttpResponse::Ok().json(stanza),
        None => not_found("No static stanza for that interface"),
    }
}

/// PUT /api/network/interfaces/{name}/static — rewrite one stanza
pub async fn put_static_stanza(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<interfaces::StaticStanza>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let name = path.into_inner();
    let stanza = body.into_inner();
    if let Err(e) = subnet::parse_ipv4(&stanza.address) {
        return field_error("address", e);
    }
    if let Err(e) = subnet::mask_to_prefix(&stanza.netmask) {
        return field_error("netmask", e);
    }

    let lock = state.locks.for_path(interfaces::INTERFACES_FILE);
    let _guard = lock.lock().await;

    let text = match std::fs::read_to_string(interfaces::INTERFACES_FILE) {
        Ok(t) => t,
        Err(e) => return upstream_error("reading interfaces file", e.to_string()),
    };
    let updated = match interfaces::set_static_stanza(&text, &name, &stanza) {
        Ok(u) => u,
        Err(_) => return not_found("No static stanza for that interface"),
    };
    if let Err(e) = write_atomic(interfaces::INTERFACES_FILE, &updated) {
        return upstream_error("writing interfaces file", e);
    }
    info!("static stanza for {} updated", name);
    HttpResponse::Ok().json(stanza)
}

// ─── VLAN API ───

/// DHCP pools for the conflict check. A host without Kea simply has no
/// system pools; any other read problem is logged and skipped so VLAN
/// management keeps working.
fn system_pools() -> Vec<(String, subnet::IpRange)> {
    match dhcp::load(dhcp::KEA_CONF) {
        Ok(conf) => dhcp::pools(&conf),
        Err(e) => {
            warn!("DHCP pools unavailable for VLAN validation: {}", e);
            Vec::new()
        }
    }
}

fn validate_vlan_candidate(
    candidate: &vlans::VlanConfig,
    siblings: &[vlans::VlanConfig],
) -> Result<(), HttpResponse> {
    let iface_subnets = interfaces::conflict_subnets(&interfaces::list_interfaces());
    vlans::validate(candidate, siblings, &iface_subnets, &system_pools())
        .map_err(|e| field_error(&e.field, e.message))
}

/// GET /api/vlans
pub async fn list_vlans(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    match vlans::load(vlans::VLANS_FILE) {
        Ok(list) => HttpResponse::Ok().json(list),
        Err(e) => upstream_error("reading VLANs", e),
    }
}

/// POST /api/vlans — validated create
pub async fn create_vlan(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<vlans::VlanConfig>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let mut vlan = body.into_inner();

    // An omitted range gets the default pool: network+2 through
    // broadcast-1, leaving room for the conventional gateway at .1.
    if vlan.ip_range.start.is_empty() && vlan.ip_range.end.is_empty() {
        if let Ok(net) = subnet::Subnet::parse_cidr(&vlan.subnet) {
            if let Some(pool) = net.default_pool() {
                vlan.ip_range = vlans::VlanRange {
                    start: subnet::format_ipv4(pool.start()),
                    end: subnet::format_ipv4(pool.end()),
                };
            }
        }
    }

    let lock = state.locks.for_path(vlans::VLANS_FILE);
    let _guard = lock.lock().await;

    let mut list = match vlans::load(vlans::VLANS_FILE) {
        Ok(l) => l,
        Err(e) => return upstream_error("reading VLANs", e),
    };
    if let Err(resp) = validate_vlan_candidate(&vlan, &list) {
        return resp;
    }

    let now = chrono::Utc::now().to_rfc3339();
    vlan.created = now.clone();
    vlan.modified = now;
    if let Err(e) = vlans::insert(&mut list, vlan.clone()) {
        return field_error(&e.field, e.message);
    }
    if let Err(e) = vlans::save(vlans::VLANS_FILE, &list) {
        return upstream_error("writing VLANs", e);
    }
    info!("VLAN {} ({}) created", vlan.id, vlan.name);
    HttpResponse::Ok().json(vlan)
}

/// PUT /api/vlans/{id} — validated update
pub async fn update_vlan(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<u16>,
    body: web::Json<vlans::VlanConfig>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let id = path.into_inner();
    let mut vlan = body.into_inner();
    vlan.id = id;

    let lock = state.locks.for_path(vlans::VLANS_FILE);
    let _guard = lock.lock().await;

    let mut list = match vlans::load(vlans::VLANS_FILE) {
        Ok(l) => l,
        Err(e) => return upstream_error("reading VLANs", e),
    };
    if let Err(resp) = validate_vlan_candidate(&vlan, &list) {
        return resp;
    }

    vlan.modified = chrono::Utc::now().to_rfc3339();
    if !vlans::replace(&mut list, id, vlan) {
        return not_found("VLAN not found");
    }
    if let Err(e) = vlans::save(vlans::VLANS_FILE, &list) {
        return upstream_error("writing VLANs", e);
    }
    info!("VLAN {} updated", id);
    let updated = list.into_iter().find(|v| v.id == id);
    HttpResponse::Ok().json(updated)
}

/// DELETE /api/vlans/{id}
pub async fn delete_vlan(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<u16>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let id = path.into_inner();

    let lock = state.locks.for_path(vlans::VLANS_FILE);
    let _guard = lock.lock().await;

    let mut list = match vlans::load(vlans::VLANS_FILE) {
        Ok(l) => l,
        Err(e) => return upstream_error("reading VLANs", e),
    };
    if !vlans::remove(&mut list, id) {
        return not_found("VLAN not found");
    }
    if let Err(e) = vlans::save(vlans::VLANS_FILE, &list) {
        return upstream_error("writing VLANs", e);
    }
    info!("VLAN {} deleted", id);
    HttpResponse::Ok().json(json!({ "removed": true }))
}

// ─── DHCP reservations API ───

/// GET /api/dhcp/reservations
pub async fn list_reservations(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    match dhcp::load(dhcp::KEA_CONF) {
        Ok(conf) => HttpResponse::Ok().json(dhcp::reservations(&conf)),
        Err(e) => upstream_error("reading DHCP config", e),
    }
}

/// Best-effort post-commit hooks. Failures never roll back the primary
/// operation; they come back as warnings beside the success payload.
async fn sync_after_mutation(warnings: &mut Vec<String>) {
    if let Err(e) = scripts::sync_all_systems().await {
        warn!("system sync after DHCP change failed: {}", e);
        warnings.push(format!("system sync failed: {}", e));
    }
}

/// POST /api/dhcp/reservations — create, then DNS + sync side effects
pub async fn create_reservation(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<dhcp::Reservation>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let res = body.into_inner();
    if let Err(e) = subnet::parse_ipv4(&res.ip_address) {
        return field_error("ip-address", e);
    }
    if !dhcp::valid_mac(&res.hw_address) {
        return field_error("hw-address", format!("invalid MAC address: {}", res.hw_address));
    }

    let lock = state.locks.for_path(dhcp::KEA_CONF);
    let _guard = lock.lock().await;

    let mut conf = match dhcp::load(dhcp::KEA_CONF) {
        Ok(c) => c,
        Err(e) => return upstream_error("reading DHCP config", e),
    };
    if let Err(e) = dhcp::add_reservation(&mut conf, &res) {
        return field_error("hw-address", e);
    }
    if let Err(e) = dhcp::save(dhcp::KEA_CONF, &conf) {
        return upstream_error("writing DHCP config", e);
    }
    info!("reservation added for {} ({})", res.hw_address, res.ip_address);

    let mut warnings = Vec::new();
    if let Some(hostname) = &res.hostname {
        if let Err(e) = scripts::dns_add(hostname, &res.ip_address).await {
            warn!("DNS add for {} failed: {}", hostname, e);
            warnings.push(format!("DNS update failed: {}", e));
        }
    }
    sync_after_mutation(&mut warnings).await;

    HttpResponse::Ok().json(json!({ "reservation": res, "warnings": warnings }))
}

#[derive(Deserialize)]
pub struct UpdateReservationRequest {
    #[serde(rename = "hw-address")]
    pub hw_address: String,
    #[serde(rename = "ip-address")]
    pub ip_address: Option<String>,
    pub hostname: Option<String>,
}

/// PUT /api/dhcp/reservations — patch matched by hw-address only
pub async fn update_reservation(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<UpdateReservationRequest>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let request = body.into_inner();
    if let Some(ip) = &request.ip_address {
        if let Err(e) = subnet::parse_ipv4(ip) {
            return field_error("ip-address", e);
        }
    }

    let lock = state.locks.for_path(dhcp::KEA_CONF);
    let _guard = lock.lock().await;

    let mut conf = match dhcp::load(dhcp::KEA_CONF) {
        Ok(c) => c,
        Err(e) => return upstream_error("reading DHCP config", e),
    };
    let patch = dhcp::ReservationPatch {
        ip_address: request.ip_address.clone(),
        hostname: request.hostname.clone(),
    };
    let outcome = match dhcp::update_reservation(&mut conf, &request.hw_address, &patch) {
        Ok(Some(o)) => o,
        Ok(None) => return not_found("Reservation not found"),
        Err(e) => return upstream_error("updating reservation", e),
    };
    if let Err(e) = dhcp::save(dhcp::KEA_CONF, &conf) {
        return upstream_error("writing DHCP config", e);
    }
    info!("reservation {} updated", request.hw_address);

    let mut warnings = Vec::new();
    if outcome.old_ip != outcome.new_ip {
        if let Some(hostname) = &outcome.hostname {
            if let Err(e) = scripts::dns_remove(hostname, &outcome.old_ip).await {
                warn!("DNS remove for {} failed: {}", hostname, e);
                warnings.push(format!("DNS removal failed: {}", e));
            }
            if let Err(e) = scripts::dns_add(hostname, &outcome.new_ip).await {
                warn!("DNS add for {} failed: {}", hostname, e);
                warnings.push(format!("DNS update failed: {}", e));
            }
        }
    }
    sync_after_mutation(&mut warnings).await;

    HttpResponse::Ok().json(json!({ "success": true, "warnings": warnings }))
}

#[derive(Deserialize)]
pub struct DeleteReservationRequest {
    pub ip: String,
    pub mac: String,
}

/// DELETE /api/dhcp/reservations — remove entries matching IP or MAC
pub async fn delete_reservation(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<DeleteReservationRequest>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let request = body.into_inner();

    let lock = state.locks.for_path(dhcp::KEA_CONF);
    let _guard = lock.lock().await;

    let mut conf = match dhcp::load(dhcp::KEA_CONF) {
        Ok(c) => c,
        Err(e) => return upstream_error("reading DHCP config", e),
    };
    // hostname must be recovered before the entry disappears
    let hostname = dhcp::hostname_for_ip(&conf, &request.ip);
    let removed = match dhcp::remove_reservations(&mut conf, &request.ip, &request.mac) {
        Ok(r) => r,
        Err(e) => return upstream_error("updating DHCP config", e),
    };
    if removed.is_empty() {
        return not_found("Reservation not found");
    }
    if let Err(e) = dhcp::save(dhcp::KEA_CONF, &conf) {
        return upstream_error("writing DHCP config", e);
    }
    info!("removed {} reservation(s) for {}", removed.len(), request.ip);

    let mut warnings = Vec::new();
    if let Some(hostname) = &hostname {
        if let Err(e) = scripts::dns_remove(hostname, &request.ip).await {
            warn!("DNS remove for {} failed: {}", hostname, e);
            warnings.push(format!("DNS removal failed: {}", e));
        }
    }
    sync_after_mutation(&mut warnings).await;

    HttpResponse::Ok().json(json!({ "removed": removed.len(), "warnings": warnings }))
}

/// GET /api/dhcp/leases — active leases from the Kea memfile
pub async fn list_leases(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let text = match std::fs::read_to_string(dhcp::KEA_LEASES) {
        Ok(t) => t,
        // no lease file yet simply means no leases
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return upstream_error("reading lease database", e.to_string()),
    };
    let leases = dhcp::parse_leases(&text, chrono::Utc::now().timestamp());
    HttpResponse::Ok().json(leases)
}

// ─── Secondary routes API ───

/// GET /api/routes/secondary
pub async fn get_secondary_routes(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let text = match std::fs::read_to_string(secondary_routes::ROUTES_FILE) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return upstream_error("reading secondary routes", e.to_string()),
    };
    HttpResponse::Ok().json(json!({ "ips": secondary_routes::parse(&text) }))
}

#[derive(Deserialize)]
pub struct RouteRequest {
    pub ip: String,
}

/// POST /api/routes/secondary — add an address to the failover list
pub async fn add_secondary_route(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<RouteRequest>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let lock = state.locks.for_path(secondary_routes::ROUTES_FILE);
    let _guard = lock.lock().await;

    let text = match std::fs::read_to_string(secondary_routes::ROUTES_FILE) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return upstream_error("reading secondary routes", e.to_string()),
    };
    let updated = match secondary_routes::add(&text, &body.ip) {
        Ok(u) => u,
        Err(e) => return field_error("ip", e),
    };
    if let Err(e) = write_atomic(secondary_routes::ROUTES_FILE, &updated) {
        return upstream_error("writing secondary routes", e);
    }
    HttpResponse::Ok().json(json!({ "ips": secondary_routes::parse(&updated) }))
}

/// DELETE /api/routes/secondary — drop an address from the list
pub async fn remove_secondary_route(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<RouteRequest>,
) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let lock = state.locks.for_path(secondary_routes::ROUTES_FILE);
    let _guard = lock.lock().await;

    let text = match std::fs::read_to_string(secondary_routes::ROUTES_FILE) {
        Ok(t) => t,
        Err(e) => return upstream_error("reading secondary routes", e.to_string()),
    };
    let updated = match secondary_routes::remove(&text, &body.ip) {
        Some(u) => u,
        None => return not_found("Address is not in the secondary route list"),
    };
    if let Err(e) = write_atomic(secondary_routes::ROUTES_FILE, &updated) {
        return upstream_error("writing secondary routes", e);
    }
    HttpResponse::Ok().json(json!({ "ips": secondary_routes::parse(&updated) }))
}

/// POST /api/routes/secondary/apply — run the route script; stderr is
/// part of the payload, the script reports skipped routes there
pub async fn apply_secondary_routes(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    match scripts::apply_secondary_routes().await {
        Ok(out) => HttpResponse::Ok().json(json!({
            "success": out.success,
            "stdout": out.stdout,
            "stderr": out.stderr,
        })),
        Err(e) => upstream_error("applying secondary routes", e),
    }
}

// ─── Status API ───

/// GET /api/status — relay the daemon-written traffic snapshot
pub async fn get_status(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    match status::read_snapshot(status::STATUS_FILE) {
        Ok(value) => HttpResponse::Ok().json(value),
        Err(e) => upstream_error("reading status snapshot", e),
    }
}

/// GET /api/ping-status — relay the WAN reachability snapshot
pub async fn get_ping_status(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    match status::read_snapshot(status::PING_STATUS_FILE) {
        Ok(value) => HttpResponse::Ok().json(value),
        Err(e) => upstream_error("reading ping snapshot", e),
    }
}

/// GET /api/system/info — locally collected host metrics
pub async fn system_info(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let info = state.monitor.lock().unwrap().collect();
    HttpResponse::Ok().json(info)
}

// ─── Speed test API ───

fn sse_response(rx: tokio::sync::mpsc::Receiver<speedtest::SpeedtestEvent>) -> HttpResponse {
    let stream = ReceiverStream::new(rx).map(|event| {
        Ok::<_, actix_web::Error>(web::Bytes::from(speedtest::sse_frame(&event)))
    });
    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .streaming(stream)
}

/// GET /api/speedtest — SSE relay of the vendor binary's progress
pub async fn speedtest_vendor(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    sse_response(speedtest::spawn_vendor_events())
}

/// GET /api/speedtest-cli — SSE relay of the Ookla CLI's JSON result
pub async fn speedtest_cli(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    sse_response(speedtest::spawn_cli_result())
}

// ─── DDNS API ───

/// GET /api/ddns/status — configuration presence and current public IP
pub async fn ddns_status(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let settings = match ddns::load_settings() {
        Ok(s) => s,
        Err(e) => return upstream_error("reading network config", e),
    };
    let public_ip = ddns::public_ip(&state.http).await.ok();
    HttpResponse::Ok().json(json!({
        "configured": settings.is_some(),
        "recordName": settings.map(|s| s.record_name),
        "publicIp": public_ip,
    }))
}

/// POST /api/ddns/update — push the A record now
pub async fn ddns_update(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = require_auth(&req, &state) {
        return resp;
    }
    let settings = match ddns::load_settings() {
        Ok(Some(s)) => s,
        Ok(None) => {
            return HttpResponse::BadRequest().json(json!({ "error": "DDNS is not configured" }))
        }
        Err(e) => return upstream_error("reading network config", e),
    };
    let ip = match ddns::public_ip(&state.http).await {
        Ok(ip) => ip,
        Err(e) => return upstream_error("detecting public IP", e),
    };
    match ddns::push_record(&state.http, &settings, &ip).await {
        Ok(()) => {
            info!("DDNS record {} -> {}", settings.record_name, ip);
            HttpResponse::Ok().json(json!({ "success": true, "ip": ip }))
        }
        Err(e) => upstream_error("updating DDNS record", e),
    }
}

/// Configure all API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // Auth (no auth required)
        .route("/api/login", web::post().to(login))
        .route("/api/logout", web::post().to(logout))
        .route("/api/auth/check", web::get().to(auth_check))
        .route("/api/setup", web::post().to(setup))
        // Network config
        .route("/api/network/config", web::get().to(get_network_config))
        .route("/api/network/config", web::put().to(put_network_config))
        .route("/api/network/apply", web::post().to(apply_network_config))
        // Interfaces
        .route("/api/network/interfaces", web::get().to(get_interfaces))
        .route(
            "/api/network/interfaces/{name}/static",
            web::get().to(get_static_stanza),
        )
        .route(
            "/api/network/interfaces/{name}/static",
            web::put().to(put_static_stanza),
        )
        // VLANs
        .route("/api/vlans", web::get().to(list_vlans))
        .route("/api/vlans", web::post().to(create_vlan))
        .route("/api/vlans/{id}", web::put().to(update_vlan))
        .route("/api/vlans/{id}", web::delete().to(delete_vlan))
        // DHCP
        .route("/api/dhcp/reservations", web::get().to(list_reservations))
        .route("/api/dhcp/reservations", web::post().to(create_reservation))
        .route("/api/dhcp/reservations", web::put().to(update_reservation))
        .route("/api/dhcp/reservations", web::delete().to(delete_reservation))
        .route("/api/dhcp/leases", web::get().to(list_leases))
        // Secondary WAN routes
        .route("/api/routes/secondary", web::get().to(get_secondary_routes))
        .route("/api/routes/secondary", web::post().to(add_secondary_route))
        .route("/api/routes/secondary", web::delete().to(remove_secondary_route))
        .route(
            "/api/routes/secondary/apply",
            web::post().to(apply_secondary_routes),
        )
        // Status
        .route("/api/status", web::get().to(get_status))
        .route("/api/ping-status", web::get().to(get_ping_status))
        .route("/api/system/info", web::get().to(system_info))
        // Speed tests (SSE)
        .route("/api/speedtest", web::get().to(speedtest_vendor))
        .route("/api/speedtest-cli", web::get().to(speedtest_cli))
        // DDNS
        .route("/api/ddns/status", web::get().to(ddns_status))
        .route("/api/ddns/update", web::post().to(ddns_update));
}
