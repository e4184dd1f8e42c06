//! Fake Vault transit engine served by axum on an ephemeral port.
//!
//! Mirrors the status codes and bodies of the real endpoints the backend
//! calls. Signatures are `vault:v<N>:<base64(sha256(seed || input))>`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use keyguard::TransitConfig;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

pub const ROOT_TOKEN: &str = "root-token";

#[derive(Debug, Clone)]
pub struct FakeKey {
    pub key_type: String,
    /// One seed per version, version 1 first
    pub versions: Vec<u64>,
    pub deletion_allowed: bool,
}

#[derive(Debug, Default)]
struct VaultState {
    keys: HashMap<String, FakeKey>,
    next_seed: u64,
    health_checks: usize,
    token_lookups: usize,
    sealed: bool,
    fail_verify: bool,
}

#[derive(Clone, Default)]
pub struct FakeVault {
    inner: Arc<Mutex<VaultState>>,
}

type VaultResult = Result<Response, Response>;

fn vault_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "errors": [message] }))).into_response()
}

fn signature_for(seed: u64, input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_be_bytes());
    hasher.update(input);
    BASE64.encode(hasher.finalize())
}

fn public_key_text(key_type: &str, seed: u64) -> String {
    let raw = Sha256::digest(seed.to_be_bytes()).to_vec();
    if key_type == "ed25519" {
        BASE64.encode(raw)
    } else {
        format!(
            "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n",
            BASE64.encode(raw)
        )
    }
}

impl FakeVault {
    fn lock(&self) -> MutexGuard<'_, VaultState> {
        self.inner.lock().expect("vault lock poisoned")
    }

    /// Serve on 127.0.0.1 and return a config pointing at it.
    pub async fn start(&self) -> TransitConfig {
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .expect("bind fake vault");
        let addr = listener.local_addr().expect("fake vault address");
        let app = self.router();

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake vault server");
        });

        TransitConfig {
            address: format!("http://{}", addr),
            token: ROOT_TOKEN.to_string(),
            mount: "transit".to_string(),
            namespace: None,
        }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/v1/sys/health", get(health))
            .route("/v1/auth/token/lookup-self", get(lookup_self))
            .route(
                "/v1/transit/keys/:name",
                post(create_key).get(read_key).delete(delete_key),
            )
            .route("/v1/transit/keys/:name/config", post(configure_key))
            .route("/v1/transit/sign/:name", post(sign))
            .route("/v1/transit/verify/:name", post(verify))
            .with_state(self.clone())
    }

    pub fn health_checks(&self) -> usize {
        self.lock().health_checks
    }

    pub fn token_lookups(&self) -> usize {
        self.lock().token_lookups
    }

    pub fn set_sealed(&self, sealed: bool) {
        self.lock().sealed = sealed;
    }

    pub fn set_fail_verify(&self, fail: bool) {
        self.lock().fail_verify = fail;
    }

    pub fn key(&self, name: &str) -> Option<FakeKey> {
        self.lock().keys.get(name).cloned()
    }

    /// Add a new version to an existing key, like `POST /keys/:name/rotate`.
    pub fn rotate(&self, name: &str) {
        let mut state = self.lock();
        let seed = state.next_seed;
        state.next_seed += 1;
        if let Some(key) = state.keys.get_mut(name) {
            key.versions.push(seed);
        }
    }
}

fn authorize(headers: &HeaderMap) -> Result<(), Response> {
    match headers.get("X-Vault-Token").and_then(|v| v.to_str().ok()) {
        Some(ROOT_TOKEN) => Ok(()),
        _ => Err(vault_error(StatusCode::FORBIDDEN, "permission denied")),
    }
}

async fn health(State(vault): State<FakeVault>) -> StatusCode {
    let mut state = vault.lock();
    state.health_checks += 1;
    if state.sealed {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn lookup_self(State(vault): State<FakeVault>, headers: HeaderMap) -> VaultResult {
    vault.lock().token_lookups += 1;
    authorize(&headers)?;
    Ok(Json(json!({ "data": { "policies": ["root"] } })).into_response())
}

#[derive(Debug, Deserialize)]
struct CreateKeyBody {
    #[serde(rename = "type")]
    key_type: String,
    #[serde(default)]
    exportable: bool,
}

async fn create_key(
    State(vault): State<FakeVault>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateKeyBody>,
) -> VaultResult {
    authorize(&headers)?;
    if !matches!(body.key_type.as_str(), "rsa-2048" | "ecdsa-p256" | "ed25519") {
        return Err(vault_error(
            StatusCode::BAD_REQUEST,
            &format!("unknown key type {}", body.key_type),
        ));
    }
    if !body.exportable {
        return Err(vault_error(StatusCode::BAD_REQUEST, "test expects exportable keys"));
    }

    let mut state = vault.lock();
    // Upsert: an existing key is left untouched, whatever its type
    if !state.keys.contains_key(&name) {
        let seed = state.next_seed;
        state.next_seed += 1;
        state.keys.insert(
            name,
            FakeKey {
                key_type: body.key_type,
                versions: vec![seed],
                deletion_allowed: false,
            },
        );
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn read_key(
    State(vault): State<FakeVault>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> VaultResult {
    authorize(&headers)?;
    let state = vault.lock();
    let key = state
        .keys
        .get(&name)
        .ok_or_else(|| StatusCode::NOT_FOUND.into_response())?;

    let keys: serde_json::Map<String, serde_json::Value> = key
        .versions
        .iter()
        .enumerate()
        .map(|(i, seed)| {
            (
                (i + 1).to_string(),
                json!({
                    "name": key.key_type,
                    "public_key": public_key_text(&key.key_type, *seed),
                    "creation_time": "2026-01-01T00:00:00Z"
                }),
            )
        })
        .collect();

    Ok(Json(json!({
        "data": {
            "type": key.key_type,
            "latest_version": key.versions.len(),
            "deletion_allowed": key.deletion_allowed,
            "exportable": true,
            "keys": keys
        }
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
struct ConfigBody {
    deletion_allowed: Option<bool>,
}

async fn configure_key(
    State(vault): State<FakeVault>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ConfigBody>,
) -> VaultResult {
    authorize(&headers)?;
    let mut state = vault.lock();
    let key = state.keys.get_mut(&name).ok_or_else(|| {
        vault_error(
            StatusCode::BAD_REQUEST,
            &format!("no existing key named {} could be found", name),
        )
    })?;
    if let Some(allowed) = body.deletion_allowed {
        key.deletion_allowed = allowed;
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn delete_key(
    State(vault): State<FakeVault>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> VaultResult {
    authorize(&headers)?;
    let mut state = vault.lock();
    match state.keys.get(&name) {
        None => Err(vault_error(StatusCode::NOT_FOUND, "key not found")),
        Some(key) if !key.deletion_allowed => Err(vault_error(
            StatusCode::BAD_REQUEST,
            "deletion is not allowed for this key",
        )),
        Some(_) => {
            state.keys.remove(&name);
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignBody {
    input: String,
}

async fn sign(
    State(vault): State<FakeVault>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SignBody>,
) -> VaultResult {
    authorize(&headers)?;
    let input = BASE64
        .decode(&body.input)
        .map_err(|_| vault_error(StatusCode::BAD_REQUEST, "unable to decode input as base64"))?;

    let state = vault.lock();
    let key = state
        .keys
        .get(&name)
        .ok_or_else(|| vault_error(StatusCode::BAD_REQUEST, "signing key not found"))?;
    let version = key.versions.len();
    let seed = key.versions[version - 1];

    Ok(Json(json!({
        "data": {
            "signature": format!("vault:v{}:{}", version, signature_for(seed, &input)),
            "key_version": version
        }
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
struct VerifyBody {
    input: String,
    signature: String,
}

async fn verify(
    State(vault): State<FakeVault>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<VerifyBody>,
) -> VaultResult {
    authorize(&headers)?;
    let state = vault.lock();
    if state.fail_verify {
        return Err(vault_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error"));
    }

    let key = state.keys.get(&name).ok_or_else(|| {
        vault_error(StatusCode::BAD_REQUEST, "signature verification key not found")
    })?;
    let input = BASE64
        .decode(&body.input)
        .map_err(|_| vault_error(StatusCode::BAD_REQUEST, "unable to decode input as base64"))?;

    let mut parts = body.signature.splitn(3, ':');
    let (Some("vault"), Some(version), Some(encoded)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(vault_error(StatusCode::BAD_REQUEST, "invalid signature: no prefix"));
    };
    let version: usize = version
        .strip_prefix('v')
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| vault_error(StatusCode::BAD_REQUEST, "invalid signature: bad version"))?;
    let seed = key
        .versions
        .get(version.wrapping_sub(1))
        .copied()
        .ok_or_else(|| vault_error(StatusCode::BAD_REQUEST, "invalid key version"))?;

    Ok(Json(json!({
        "data": { "valid": signature_for(seed, &input) == encoded }
    }))
    .into_response())
}
