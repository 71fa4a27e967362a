// # globalipd - Global IP Daemon
//
// Thin integration layer: all reconciliation logic lives in globalip-core.
//
// The globalipd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering providers, target sources and state stores
// 4. Running apply cycles over the plan file
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Provider
// - `GLOBALIP_PROVIDER_TYPE`: Provider type (softlayer)
// - `GLOBALIP_SOFTLAYER_USERNAME`: SoftLayer API username
// - `GLOBALIP_SOFTLAYER_API_KEY`: SoftLayer API key
// - `GLOBALIP_SOFTLAYER_ENDPOINT`: REST endpoint (optional)
//
// ### Targets
// - `GLOBALIP_TARGET_SOURCE_TYPE`: Where target attributes come from
//   (static, softlayer_virtual_guest)
//
// ### Plan
// - `GLOBALIP_PLAN_PATH`: JSON plan with `targets` and `bindings`; re-read every cycle
//
// ### State Store
// - `GLOBALIP_STATE_STORE_TYPE`: Type of state store (file, memory)
// - `GLOBALIP_STATE_STORE_PATH`: Path to state file (for file store)
//
// ### Engine
// - `GLOBALIP_MAX_RETRIES`: Retries for transient failures (0-10)
// - `GLOBALIP_RETRY_DELAY_MS`: Base backoff delay in milliseconds
// - `GLOBALIP_APPLY_INTERVAL_SECS`: Repeat cycles at this interval; unset runs once
//
// ## Example
//
// ```bash
// export GLOBALIP_SOFTLAYER_USERNAME=sluser
// export GLOBALIP_SOFTLAYER_API_KEY=...
// export GLOBALIP_TARGET_SOURCE_TYPE=softlayer_virtual_guest
// export GLOBALIP_PLAN_PATH=/etc/globalip/plan.json
// export GLOBALIP_STATE_STORE_PATH=/var/lib/globalip/state.json
//
// globalipd
// ```

use anyhow::{Context, Result};
use globalip_core::{
    CancelHandle, CancelToken, CycleReport, EngineConfig, GlobalIpConfig, NodeOutcome, Orchestrator,
    Plan, ProviderConfig, ProviderRegistry, ReconcileEvent, ReconcileOutcome, Reconciler,
    StateStoreConfig, TargetSourceConfig, cancel_pair,
};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum GlobalIpExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error, including a one-shot cycle with failed nodes
    RuntimeError = 2,
}

impl From<GlobalIpExitCode> for ExitCode {
    fn from(code: GlobalIpExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    provider_type: String,
    softlayer_username: String,
    softlayer_api_key: String,
    softlayer_endpoint: Option<String>,
    target_source_type: String,
    plan_path: PathBuf,
    state_store_type: String,
    state_store_path: Option<String>,
    max_retries: Option<usize>,
    retry_delay_ms: Option<u64>,
    apply_interval_secs: Option<u64>,
    log_level: String,
}

/// Read an optional numeric variable; a malformed value is an error
fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} must be a number, got '{}': {}", name, raw, e)),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            provider_type: env::var("GLOBALIP_PROVIDER_TYPE")
                .unwrap_or_else(|_| "softlayer".to_string()),
            softlayer_username: env::var("GLOBALIP_SOFTLAYER_USERNAME").unwrap_or_default(),
            softlayer_api_key: env::var("GLOBALIP_SOFTLAYER_API_KEY").unwrap_or_default(),
            softlayer_endpoint: env::var("GLOBALIP_SOFTLAYER_ENDPOINT")
                .ok()
                .filter(|s| !s.is_empty()),
            target_source_type: env::var("GLOBALIP_TARGET_SOURCE_TYPE")
                .unwrap_or_else(|_| "static".to_string()),
            plan_path: env::var("GLOBALIP_PLAN_PATH")
                .context("GLOBALIP_PLAN_PATH is required. Set it via: export GLOBALIP_PLAN_PATH=/etc/globalip/plan.json")?
                .into(),
            state_store_type: env::var("GLOBALIP_STATE_STORE_TYPE")
                .unwrap_or_else(|_| "file".to_string()),
            state_store_path: env::var("GLOBALIP_STATE_STORE_PATH").ok(),
            max_retries: parse_var("GLOBALIP_MAX_RETRIES")?,
            retry_delay_ms: parse_var("GLOBALIP_RETRY_DELAY_MS")?,
            apply_interval_secs: parse_var("GLOBALIP_APPLY_INTERVAL_SECS")?,
            log_level: env::var("GLOBALIP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Every message names the variable to fix.
    fn validate(&self) -> Result<()> {
        match self.provider_type.as_str() {
            "softlayer" => {
                if self.softlayer_username.is_empty() {
                    anyhow::bail!(
                        "GLOBALIP_SOFTLAYER_USERNAME is required. \
                        Set it via: export GLOBALIP_SOFTLAYER_USERNAME=your_user"
                    );
                }
                if self.softlayer_api_key.is_empty() {
                    anyhow::bail!(
                        "GLOBALIP_SOFTLAYER_API_KEY is required. \
                        Set it via: export GLOBALIP_SOFTLAYER_API_KEY=your_key"
                    );
                }
                let key_lower = self.softlayer_api_key.to_lowercase();
                if key_lower.contains("your_key") || key_lower.contains("replace_me") {
                    anyhow::bail!(
                        "GLOBALIP_SOFTLAYER_API_KEY appears to be a placeholder. \
                        Use the API key from your SoftLayer account."
                    );
                }
            }
            _ => anyhow::bail!(
                "GLOBALIP_PROVIDER_TYPE '{}' is not supported. \
                Supported providers: softlayer",
                self.provider_type
            ),
        }

        if let Some(ref endpoint) = self.softlayer_endpoint
            && !endpoint.starts_with("https://")
            && !endpoint.starts_with("http://")
        {
            anyhow::bail!(
                "GLOBALIP_SOFTLAYER_ENDPOINT must use HTTP or HTTPS scheme. Got: {}",
                endpoint
            );
        }

        match self.target_source_type.as_str() {
            "static" | "softlayer_virtual_guest" => {}
            _ => anyhow::bail!(
                "GLOBALIP_TARGET_SOURCE_TYPE '{}' is not supported. \
                Supported types: static, softlayer_virtual_guest",
                self.target_source_type
            ),
        }

        if !self.plan_path.is_file() {
            anyhow::bail!(
                "GLOBALIP_PLAN_PATH does not point to a file: {}",
                self.plan_path.display()
            );
        }

        match self.state_store_type.as_str() {
            "file" => match self.state_store_path.as_deref() {
                None | Some("") => anyhow::bail!(
                    "GLOBALIP_STATE_STORE_PATH is required when GLOBALIP_STATE_STORE_TYPE=file. \
                    Set it via: export GLOBALIP_STATE_STORE_PATH=/var/lib/globalip/state.json"
                ),
                Some(path) => {
                    if let Some(parent) = std::path::Path::new(path).parent()
                        && !parent.as_os_str().is_empty()
                        && !parent.exists()
                    {
                        anyhow::bail!(
                            "GLOBALIP_STATE_STORE_PATH parent directory does not exist: {}. \
                            Create it first: sudo mkdir -p {}",
                            parent.display(),
                            parent.display()
                        );
                    }
                }
            },
            "memory" => {}
            _ => anyhow::bail!(
                "GLOBALIP_STATE_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                self.state_store_type
            ),
        }

        if let Some(max_retries) = self.max_retries
            && max_retries > 10
        {
            anyhow::bail!(
                "GLOBALIP_MAX_RETRIES must be between 0 and 10. Got: {}",
                max_retries
            );
        }

        if let Some(delay) = self.retry_delay_ms
            && !(10..=60_000).contains(&delay)
        {
            anyhow::bail!(
                "GLOBALIP_RETRY_DELAY_MS must be between 10 and 60000. Got: {}",
                delay
            );
        }

        if let Some(interval) = self.apply_interval_secs
            && !(10..=86_400).contains(&interval)
        {
            anyhow::bail!(
                "GLOBALIP_APPLY_INTERVAL_SECS must be between 10 and 86400 seconds. Got: {}",
                interval
            );
        }

        if self.log_level().is_none() {
            anyhow::bail!(
                "GLOBALIP_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            );
        }

        Ok(())
    }

    fn log_level(&self) -> Option<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Some(Level::TRACE),
            "debug" => Some(Level::DEBUG),
            "info" => Some(Level::INFO),
            "warn" => Some(Level::WARN),
            "error" => Some(Level::ERROR),
            _ => None,
        }
    }

    /// Translate into the core configuration
    fn to_core(&self) -> GlobalIpConfig {
        let provider = ProviderConfig::Softlayer {
            username: self.softlayer_username.clone(),
            api_key: self.softlayer_api_key.clone(),
            endpoint: self.softlayer_endpoint.clone(),
            provisioning_timeout_secs: None,
        };

        let targets = match self.target_source_type.as_str() {
            "softlayer_virtual_guest" => TargetSourceConfig::SoftlayerVirtualGuest {
                username: self.softlayer_username.clone(),
                api_key: self.softlayer_api_key.clone(),
                endpoint: self.softlayer_endpoint.clone(),
            },
            _ => TargetSourceConfig::Static,
        };

        let state_store = match (self.state_store_type.as_str(), &self.state_store_path) {
            ("file", Some(path)) => StateStoreConfig::File { path: path.clone() },
            _ => StateStoreConfig::Memory,
        };

        let mut engine = EngineConfig::default();
        if let Some(max_retries) = self.max_retries {
            engine.max_retries = max_retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            engine.retry_base_delay_ms = delay;
            engine.retry_max_delay_ms = engine.retry_max_delay_ms.max(delay);
        }

        GlobalIpConfig {
            provider,
            targets,
            state_store,
            engine,
        }
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return GlobalIpExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return GlobalIpExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level().unwrap_or(Level::INFO))
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return GlobalIpExitCode::ConfigError.into();
    }

    info!("Starting globalipd daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return GlobalIpExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run_daemon(config)).into()
}

/// Build components and run apply cycles
async fn run_daemon(config: Config) -> GlobalIpExitCode {
    let orchestrator = match build_orchestrator(&config).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            return GlobalIpExitCode::ConfigError;
        }
    };

    let (handle, token) = cancel_pair();
    let signals = tokio::spawn(cancel_on_shutdown(handle));

    let interval = config.apply_interval_secs.map(Duration::from_secs);
    let code = loop {
        let outcome = run_cycle(&orchestrator, &config, &token).await;

        if token.is_cancelled() {
            info!("Shutting down daemon");
            break GlobalIpExitCode::CleanShutdown;
        }

        let Some(interval) = interval else {
            break match outcome {
                Ok(report) if report.is_success() => GlobalIpExitCode::CleanShutdown,
                Ok(_) => GlobalIpExitCode::RuntimeError,
                Err(e) => {
                    error!("Apply cycle failed: {:#}", e);
                    GlobalIpExitCode::RuntimeError
                }
            };
        };

        if let Err(e) = outcome {
            error!("Apply cycle failed: {:#}", e);
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = token.cancelled() => {
                info!("Shutting down daemon");
                break GlobalIpExitCode::CleanShutdown;
            }
        }
    };

    signals.abort();
    code
}

async fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let core = config.to_core();
    core.validate()?;

    let registry = ProviderRegistry::with_builtins();

    #[cfg(feature = "softlayer")]
    {
        info!("Registering SoftLayer provider");
        globalip_provider_softlayer::register(&registry);
    }

    info!("Provider type: {}", core.provider.type_name());
    info!("Target source type: {}", core.targets.type_name());
    info!("State store type: {}", core.state_store.type_name());

    let service = registry.create_service(&core.provider)?;
    let targets = registry.create_target_source(&core.targets)?;
    let store = registry.create_state_store(&core.state_store).await?;

    let (reconciler, events) = Reconciler::new(service, store, core.engine)?;
    tokio::spawn(log_events(events));

    Ok(Orchestrator::new(reconciler, targets))
}

/// Load the plan and run one apply cycle
async fn run_cycle(
    orchestrator: &Orchestrator,
    config: &Config,
    token: &CancelToken,
) -> Result<CycleReport> {
    let raw = tokio::fs::read_to_string(&config.plan_path)
        .await
        .with_context(|| format!("Failed to read plan {}", config.plan_path.display()))?;
    let plan = Plan::from_json(&raw)
        .with_context(|| format!("Invalid plan {}", config.plan_path.display()))?;

    let report = orchestrator.apply(&plan, token).await?;
    summarize(&report);
    Ok(report)
}

fn summarize(report: &CycleReport) {
    for node in &report.nodes {
        match &node.result {
            Ok(NodeOutcome::Binding(ReconcileOutcome::Unchanged(_)))
            | Ok(NodeOutcome::TargetConverged { .. }) => {}
            Ok(NodeOutcome::Binding(outcome)) => match outcome.binding() {
                Some(binding) => info!(
                    "{}: {} -> {} (id {})",
                    node.id, binding.ip_address, binding.routes_to, binding.id
                ),
                None => info!("{}: released", node.id),
            },
            Err(e) => warn!("{}: {}", node.id, e),
        }
    }

    if report.is_success() {
        info!("Apply cycle converged {} node(s)", report.nodes.len());
    } else {
        warn!(
            "Apply cycle finished with {} failure(s){}",
            report.failures().count(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
    }
}

/// Drain reconcile events into the log
async fn log_events(events: tokio::sync::mpsc::Receiver<ReconcileEvent>) {
    let mut stream = ReceiverStream::new(events);
    while let Some(event) = stream.next().await {
        match event {
            ReconcileEvent::Created {
                name,
                id,
                ip_address,
                routes_to,
            } => info!("[event] created {} (id {}) {} -> {}", name, id, ip_address, routes_to),
            ReconcileEvent::RouteUpdated {
                name,
                previous_route,
                routes_to,
                ..
            } => info!("[event] re-routed {} {} -> {}", name, previous_route, routes_to),
            ReconcileEvent::Unchanged { name, .. } => {
                tracing::debug!("[event] {} unchanged", name)
            }
            ReconcileEvent::Recreated {
                name,
                previous_id,
                id,
                ip_address,
            } => info!(
                "[event] recreated {} (id {} -> {}) as {}",
                name, previous_id, id, ip_address
            ),
            ReconcileEvent::Deleted { name, id } => info!("[event] deleted {} (id {})", name, id),
            ReconcileEvent::DriftDetected { name, id, detail } => {
                warn!("[event] drift on {} (id {}): {}", name, id, detail)
            }
            ReconcileEvent::Failed { name, error } => warn!("[event] {} failed: {}", name, error),
        }
    }
}

/// Cancel the running cycle on SIGTERM or SIGINT
#[cfg(unix)]
async fn cancel_on_shutdown(handle: CancelHandle) {
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to setup signal handlers: {}", e);
                return;
            }
        };

    let received = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };

    info!("Received shutdown signal: {}", received);
    handle.cancel();
}

/// Cancel the running cycle on CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn cancel_on_shutdown(handle: CancelHandle) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal: SIGINT");
            handle.cancel();
        }
        Err(e) => error!("Failed to wait for CTRL-C: {}", e),
    }
}
