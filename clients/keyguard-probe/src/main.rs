//! keyguard probe - exercise the configured backend end to end

use anyhow::{Context, Result};
use keyguard::{Algorithm, BackendConfig, BackendKind, KeyBackend};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PROBE_PAYLOAD: &[u8] = b"keyguard probe payload";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProbeSummary {
    backend: BackendKind,
    label: String,
    algorithm: Algorithm,
    key_id: String,
    public_key_hex: String,
    signature: String,
    verified: bool,
    tampered_verified: bool,
    deleted: bool,
}

async fn probe(backend: &mut dyn KeyBackend, label: &str) -> Result<ProbeSummary> {
    backend
        .initialize()
        .await
        .context("Failed to initialize backend")?;

    let algorithm = backend.default_algorithm();
    let pair = backend
        .generate_key_pair(label, Some(algorithm))
        .await
        .context("Failed to generate key pair")?;
    tracing::info!(label, key_id = %pair.key_id, "Generated probe key");

    let signature = backend
        .sign(label, PROBE_PAYLOAD, None)
        .await
        .context("Failed to sign probe payload")?;
    let verified = backend
        .verify(label, PROBE_PAYLOAD, &signature, None)
        .await
        .context("Failed to verify probe signature")?;

    let mut tampered = PROBE_PAYLOAD.to_vec();
    tampered[0] ^= 0x01;
    let tampered_verified = backend
        .verify(label, &tampered, &signature, None)
        .await
        .context("Failed to verify tampered payload")?;

    backend
        .delete_key_pair(label)
        .await
        .context("Failed to delete probe key")?;

    Ok(ProbeSummary {
        backend: backend.kind(),
        label: label.to_string(),
        algorithm,
        key_id: pair.key_id,
        public_key_hex: pair.public_key_hex,
        signature,
        verified,
        tampered_verified,
        deleted: true,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyguard=info,keyguard_probe=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = BackendConfig::from_env().context("Invalid backend configuration")?;
    tracing::info!(backend = %config.kind(), "Starting keyguard probe");

    let label = format!("keyguard-probe-{}", std::process::id());
    let mut backend = keyguard::connect(config);

    // Close even when the probe fails part way
    let result = probe(backend.as_mut(), &label).await;
    backend.close().await;

    let summary = result?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !summary.verified || summary.tampered_verified {
        anyhow::bail!("Backend returned inconsistent verification results");
    }
    Ok(())
}
