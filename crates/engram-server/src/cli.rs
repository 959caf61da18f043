//! Offline CLI commands. These open the store directly; no LLM tiers,
//! no writer loop.

use clap::Args;

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Only entries at or after this RFC 3339 timestamp
    #[arg(long)]
    pub since: Option<String>,

    /// Only entries of this kind (snake_case, e.g. edge_inserted)
    #[arg(long)]
    pub kind: Option<String>,

    /// Maximum entries to print
    #[arg(long, default_value = "50")]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output format: full (json) or graphml
    #[arg(long, default_value = "full")]
    pub format: String,

    /// Output file; stdout when omitted
    #[arg(long)]
    pub output: Option<std::path::PathBuf>,
}

pub mod stats {
    use crate::config::ServerConfig;
    use engram_core::{RedbStorage, Storage};

    pub fn run(config: &ServerConfig) -> anyhow::Result<()> {
        let storage = RedbStorage::open(config.db_path())?;
        let stats = storage.stats()?;

        println!("nodes:    {}", stats.node_count);
        println!("edges:    {} ({} active, {} retracted, {} archived)",
            stats.edge_count,
            stats.active_edge_count,
            stats.retracted_edge_count,
            stats.archived_edge_count,
        );
        println!("episodes: {}", stats.episode_count);

        let mut by_kind: Vec<_> = stats.node_counts_by_kind.into_iter().collect();
        by_kind.sort_by(|a, b| b.1.cmp(&a.1));
        for (kind, count) in by_kind {
            println!("  {:14} {}", kind.as_str(), count);
        }
        Ok(())
    }
}

pub mod audit {
    use super::AuditArgs;
    use crate::config::ServerConfig;
    use chrono::DateTime;
    use engram_core::{AuditFilter, AuditLog, RedbStorage};

    pub fn run(args: AuditArgs, config: &ServerConfig) -> anyhow::Result<()> {
        let storage = RedbStorage::open(config.db_path())?;
        let log = AuditLog::new(storage.database());

        let since = args
            .since
            .as_deref()
            .map(DateTime::parse_from_rfc3339)
            .transpose()?
            .map(|t| t.to_utc());
        let kind = args
            .kind
            .as_deref()
            .map(|k| {
                serde_json::from_value(serde_json::Value::String(k.to_string()))
                    .map_err(|_| anyhow::anyhow!("unknown audit kind '{}'", k))
            })
            .transpose()?;

        let entries = log.query(AuditFilter {
            since,
            kind,
            limit: Some(args.limit),
            ..Default::default()
        })?;

        for entry in entries {
            println!(
                "{} {:24} {:?} target={} {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.kind.to_string(),
                entry.component,
                entry
                    .target_id
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                entry.reasoning.unwrap_or_default(),
            );
        }
        Ok(())
    }
}

pub mod export {
    use super::ExportArgs;
    use crate::config::ServerConfig;
    use engram_core::{AuditLog, ConfidenceConfig, DecayRates, EventBus, GraphStore, RedbStorage};
    use std::sync::Arc;

    pub fn run(args: ExportArgs, config: &ServerConfig) -> anyhow::Result<()> {
        let storage = Arc::new(RedbStorage::open(config.db_path())?);
        let bus = EventBus::new(config.engram.bus.clone());
        let audit = Arc::new(AuditLog::new(storage.database()));
        let store = GraphStore::new(
            storage,
            bus,
            audit,
            ConfidenceConfig::default(),
            DecayRates::default(),
        );

        let snapshot = store.snapshot()?;
        let rendered = match args.format.as_str() {
            "graphml" => snapshot.to_graphml(),
            "full" | "json" => serde_json::to_string_pretty(&snapshot)?,
            other => anyhow::bail!("unknown export format '{}'", other),
        };

        match args.output {
            Some(path) => std::fs::write(path, rendered)?,
            None => println!("{}", rendered),
        }
        Ok(())
    }
}
