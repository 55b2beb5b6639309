//! Demo workload configuration
//!
//! Loaded from TOML; falls back to a built-in two-worker schedule.

use crate::worker::WorkerOptions;
use anyhow::Context;
use cfgscope_core::ScopeOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One keyed service and the named options it is bound to
#[derive(Debug, Clone, Deserialize, Serialize)]
pub(crate) struct ServiceSpec {
    pub(crate) key: String,
    pub(crate) options_name: String,
    #[serde(default)]
    pub(crate) options: WorkerOptions,
}

/// Options update applied at a fixed offset from start
#[derive(Debug, Clone, Deserialize, Serialize)]
pub(crate) struct ScheduledChange {
    pub(crate) at_ms: u64,
    pub(crate) options_name: String,
    pub(crate) options: WorkerOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DemoConfig {
    #[serde(default)]
    pub(crate) scope: ScopeOptions,
    #[serde(default = "default_work_interval_ms")]
    pub(crate) work_interval_ms: u64,
    pub(crate) services: Vec<ServiceSpec>,
    #[serde(default)]
    pub(crate) schedule: Vec<ScheduledChange>,
}

fn default_work_interval_ms() -> u64 {
    1000
}

impl DemoConfig {
    pub(crate) fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub(crate) fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.services.is_empty(), "at least one service is required");
        for change in &self.schedule {
            anyhow::ensure!(
                self.services.iter().any(|s| s.options_name == change.options_name),
                "scheduled change targets unknown options `{}`",
                change.options_name
            );
        }
        Ok(())
    }

    /// Two services on separate named options; the second one starts
    /// disabled and is enabled, changed, then disabled again
    pub(crate) fn builtin() -> Self {
        let services = vec![
            ServiceSpec {
                key: "Service1".into(),
                options_name: "Options1".into(),
                options: WorkerOptions::enabled(1),
            },
            ServiceSpec {
                key: "Service2".into(),
                options_name: "Options2".into(),
                options: WorkerOptions::default(),
            },
        ];

        let at = |at_ms, name: &str, options| ScheduledChange {
            at_ms,
            options_name: name.to_owned(),
            options,
        };
        let schedule = vec![
            at(2_500, "Options2", WorkerOptions::enabled(7)),
            at(4_500, "Options1", WorkerOptions::enabled(2)),
            // unchanged value: suppressed, no swap
            at(5_000, "Options1", WorkerOptions::enabled(2)),
            at(6_500, "Options2", WorkerOptions::default()),
        ];

        Self {
            scope: ScopeOptions::default(),
            work_interval_ms: default_work_interval_ms(),
            services,
            schedule,
        }
    }
}
