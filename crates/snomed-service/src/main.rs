//! SNOMED CT authoring server binary.

use snomed_service::TerminologyServer;
use snomed_store::{Rf2Config, MAIN};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let server = TerminologyServer::from_env();
    server.ensure_main()?;

    if let Ok(data_path) = std::env::var("SNOMED_DATA_PATH") {
        let rf2 = Rf2Config {
            active_only: env_flag("SNOMED_IMPORT_ACTIVE_ONLY"),
            ..Rf2Config::default()
        };
        tracing::info!("Loading SNOMED CT release from: {}", data_path);
        let import = server.clone();
        let summary = tokio::task::spawn_blocking(move || import.import_release(&data_path, &rf2)).await??;
        tracing::info!(
            "Loaded {} concepts, {} descriptions, {} relationships, {} language members",
            summary.concepts,
            summary.descriptions,
            summary.relationships,
            summary.members
        );
    } else {
        tracing::info!("SNOMED_DATA_PATH not set, starting with an empty {}", MAIN);
    }

    if env_flag("SNOMED_REBUILD_SEMANTIC_INDEX") {
        let semantic = server.semantic().clone();
        let counts = tokio::task::spawn_blocking(move || {
            semantic.rebuild_stated_and_inferred_semantic_index(MAIN, false)
        })
        .await??;
        tracing::info!("Semantic index rebuilt: {:?}", counts);
    }

    let summary = server.branch_summary(MAIN)?;
    tracing::info!("{}", serde_json::to_string(&summary)?);
    tracing::info!("Terminology server running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}
