//! Read-only inspection commands. None of them sign or move funds.

use crate::config::CliConfig;
use crate::output::{
    print_failure, print_json, print_success, print_table, print_warning, OutputFormat,
};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use qnet_activation_adapters::{HttpBridgeGateway, HttpNetworkRegistry};
use qnet_activation_core::{
    ActivationMonitor, ActivationStatus, BridgeGateway, BurnFraction, CodeValidator,
    MonitorSchedule, NetworkPhaseState, NetworkStateSource, NodeClass, NodeClassOffer, Phase,
    PhaseDetector, PhaseReason, PhaseResolution, PricingQuote, TokioClock,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Quote the activation price for a node class
    Quote(QuoteArgs),

    /// Resolve the active payment phase from the network registry
    Phase,

    /// Check an activation code's grammar and checksum
    Validate {
        /// Activation code, e.g. QNET-F1A2B3-C4D5E6-X9Y83K
        code: String,
    },

    /// Compare the local burn price with the verification service's view
    Pricing {
        #[arg(value_parser = parse_node_class)]
        class: NodeClass,
    },

    /// List node classes offered by the verification service
    Classes,

    /// Check verification service health
    Health,

    /// Follow an issued credential until it reaches a terminal status
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
pub struct QuoteArgs {
    #[arg(value_parser = parse_node_class)]
    pub class: NodeClass,

    /// Burned share of the source-token supply (0.0 - 1.0); quotes offline
    #[arg(long)]
    pub burned: Option<f64>,

    /// Network age in years; quotes offline
    #[arg(long)]
    pub age_years: Option<f64>,

    /// Active node count; quotes offline
    #[arg(long)]
    pub network_size: Option<u64>,

    /// Force the phase (1 or 2) instead of resolving it
    #[arg(long, value_parser = parse_phase)]
    pub phase: Option<Phase>,
}

impl QuoteArgs {
    /// Builds a local observation when any state flag was given.
    fn offline_state(&self) -> Option<NetworkPhaseState> {
        if self.burned.is_none() && self.age_years.is_none() && self.network_size.is_none() {
            return None;
        }
        Some(NetworkPhaseState::new(
            BurnFraction::from_f64(self.burned.unwrap_or(0.0)),
            self.age_years.unwrap_or(0.0),
            self.network_size.unwrap_or(0),
            Utc::now(),
        ))
    }
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    pub code: String,

    /// Polls before giving up (default from configuration)
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Delay between polls in milliseconds (default from configuration)
    #[arg(long)]
    pub interval_ms: Option<u64>,
}

impl WatchArgs {
    fn schedule(&self, configured: MonitorSchedule) -> MonitorSchedule {
        MonitorSchedule::new(
            self.max_attempts.unwrap_or(configured.max_attempts),
            Duration::from_millis(self.interval_ms.unwrap_or(configured.interval_ms)),
        )
    }
}

fn parse_node_class(value: &str) -> Result<NodeClass, String> {
    value.parse()
}

fn parse_phase(value: &str) -> Result<Phase, String> {
    let number: u8 = value
        .parse()
        .map_err(|_| format!("phase must be 1 or 2, got '{value}'"))?;
    Phase::try_from(number)
}

/// Everything a command may need; remote clients are only contacted when used.
pub struct CommandContext {
    pub config: CliConfig,
    pub format: OutputFormat,
    bridge: HttpBridgeGateway,
    registry: HttpNetworkRegistry,
}

impl CommandContext {
    pub fn new(config: CliConfig, format: OutputFormat) -> Result<Self> {
        let timeout = config.request_timeout();
        let bridge = HttpBridgeGateway::new(&config.bridge_url, timeout)
            .context("building verification service client")?;
        let registry = HttpNetworkRegistry::new(&config.network_url, timeout)
            .context("building network registry client")?;
        Ok(Self {
            config,
            format,
            bridge,
            registry,
        })
    }

    fn detector(&self) -> PhaseDetector {
        PhaseDetector::new(self.config.orchestrator.phase.rules.clone())
    }

    async fn observe(&self) -> Result<(NetworkPhaseState, PhaseResolution)> {
        let state = self
            .registry
            .fetch_phase_state()
            .await
            .with_context(|| format!("fetching phase state from {}", self.config.network_url))?;
        let state = self.config.orchestrator.phase.admit(state);
        let resolution = self.detector().resolve(&state);
        Ok((state, resolution))
    }
}

pub async fn execute(command: Command, ctx: &CommandContext) -> Result<()> {
    match command {
        Command::Quote(args) => quote(args, ctx).await,
        Command::Phase => phase(ctx).await,
        Command::Validate { code } => validate(&code, ctx),
        Command::Pricing { class } => pricing(class, ctx).await,
        Command::Classes => classes(ctx).await,
        Command::Health => health(ctx).await,
        Command::Watch(args) => watch_status(args, ctx).await,
    }
}

#[derive(Serialize)]
struct QuoteView {
    resolution: PhaseResolution,
    burned_fraction: BurnFraction,
    network_age_years: f64,
    network_size: u64,
    #[serde(flatten)]
    quote: PricingQuote,
}

/// Table row for quote display
#[derive(Debug, Tabled)]
struct QuoteRow {
    class: NodeClass,
    phase: Phase,
    reason: String,
    price: String,
    base: u64,
    floor: u64,
    burned: BurnFraction,
    age: String,
    nodes: u64,
}

impl QuoteRow {
    fn new(quote: &PricingQuote, resolution: PhaseResolution, state: &NetworkPhaseState) -> Self {
        Self {
            class: quote.node_class,
            phase: resolution.phase,
            reason: format!("{:?}", resolution.reason),
            price: format!("{} {:?}", quote.amount, quote.currency),
            base: quote.base_amount,
            floor: quote.floor_amount,
            burned: state.burned_fraction,
            age: format!("{:.2}y", state.network_age_years),
            nodes: state.network_size,
        }
    }
}

async fn quote(args: QuoteArgs, ctx: &CommandContext) -> Result<()> {
    let (state, resolution) = match args.offline_state() {
        Some(state) => {
            let resolution = ctx.detector().resolve(&state);
            (state, resolution)
        }
        None => ctx.observe().await?,
    };

    let resolution = match args.phase {
        Some(forced) if forced != resolution.phase => {
            warn!(resolved = %resolution.phase, forced = %forced, "quoting a phase that is not active");
            PhaseResolution {
                phase: forced,
                reason: PhaseReason::ExplicitOverride,
            }
        }
        _ => resolution,
    };

    let quote = ctx
        .config
        .orchestrator
        .pricing
        .quote(args.class, resolution.phase, &state);

    match ctx.format {
        OutputFormat::Json => print_json(&QuoteView {
            resolution,
            burned_fraction: state.burned_fraction,
            network_age_years: state.network_age_years,
            network_size: state.network_size,
            quote,
        }),
        OutputFormat::Text => {
            print_table(vec![QuoteRow::new(&quote, resolution, &state)]);
            Ok(())
        }
    }
}

async fn phase(ctx: &CommandContext) -> Result<()> {
    let (state, resolution) = ctx.observe().await?;

    match ctx.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "phase": resolution.phase,
            "reason": resolution.reason,
            "state": state,
        })),
        OutputFormat::Text => {
            println!("{} ({:?})", resolution.phase, resolution.reason);
            println!("  burned:       {}", state.burned_fraction);
            println!("  network age:  {:.2} years", state.network_age_years);
            println!("  network size: {}", state.network_size);
            println!("  observed at:  {}", state.observed_at);
            Ok(())
        }
    }
}

fn validate(code: &str, ctx: &CommandContext) -> Result<()> {
    let parsed = match CodeValidator::parse(code) {
        Ok(parsed) => parsed,
        Err(err) => bail!("{code} is not a valid activation code: {err}"),
    };

    match ctx.format {
        OutputFormat::Json => print_json(&parsed),
        OutputFormat::Text => {
            print_success(code);
            println!("  class:    {}", parsed.class_tag);
            println!("  node id:  {}", parsed.node_id);
            println!("  checksum: {}", parsed.checksum);
            Ok(())
        }
    }
}

async fn pricing(class: NodeClass, ctx: &CommandContext) -> Result<()> {
    let remote = ctx
        .bridge
        .get_current_pricing(class)
        .await
        .context("fetching pricing from verification service")?;
    let local = ctx
        .config
        .orchestrator
        .pricing
        .burn_price(remote.burned_fraction);
    let agrees = local == remote.amount;

    if !agrees {
        warn!(local, remote = remote.amount, class = %class, "pricing disagreement");
    }

    match ctx.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "class": class,
            "local": local,
            "remote": remote,
            "agrees": agrees,
        })),
        OutputFormat::Text => {
            println!("Class:   {class}");
            println!("Burned:  {}", remote.burned_fraction);
            println!("Local:   {local}");
            println!("Service: {}", remote.amount);
            if agrees {
                print_success("prices agree");
            } else {
                print_warning("prices differ");
            }
            Ok(())
        }
    }
}

/// Table row for node class display
#[derive(Debug, Tabled)]
struct ClassRow {
    class: NodeClass,
    cost: u64,
    cores: u32,
    #[tabled(rename = "memory (GB)")]
    memory_gb: u32,
    #[tabled(rename = "disk (GB)")]
    storage_gb: u32,
    #[tabled(rename = "bandwidth (Mbps)")]
    bandwidth_mbps: u32,
}

impl From<NodeClassOffer> for ClassRow {
    fn from(offer: NodeClassOffer) -> Self {
        let req = offer.requirements;
        Self {
            class: offer.node_class,
            cost: offer.current_cost,
            cores: req.cpu_cores,
            memory_gb: req.memory_gb,
            storage_gb: req.storage_gb,
            bandwidth_mbps: req.bandwidth_mbps,
        }
    }
}

async fn classes(ctx: &CommandContext) -> Result<()> {
    let offers = ctx
        .bridge
        .get_supported_node_classes()
        .await
        .context("fetching node classes")?;

    match ctx.format {
        OutputFormat::Json => print_json(&offers),
        OutputFormat::Text => {
            print_table(offers.into_iter().map(ClassRow::from).collect());
            Ok(())
        }
    }
}

async fn health(ctx: &CommandContext) -> Result<()> {
    let health = ctx
        .bridge
        .check_health()
        .await
        .with_context(|| format!("contacting verification service at {}", ctx.config.bridge_url))?;

    match ctx.format {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Text => {
            for (label, up) in [
                ("service healthy", health.healthy),
                ("source chain connected", health.source_chain_connected),
                ("target chain connected", health.target_chain_connected),
            ] {
                if up {
                    print_success(label);
                } else {
                    print_failure(label);
                }
            }
        }
    }

    if !health.is_operational() {
        bail!("verification service is not operational");
    }
    Ok(())
}

async fn watch_status(args: WatchArgs, ctx: &CommandContext) -> Result<()> {
    if let Err(err) = CodeValidator::parse(&args.code) {
        bail!("{} is not a valid activation code: {err}", args.code);
    }

    let schedule = args.schedule(ctx.config.orchestrator.monitor);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; stopping status watch");
            let _ = cancel_tx.send(true);
        }
    });

    let monitor = ActivationMonitor::new(Arc::new(TokioClock));
    let mut last = None;
    let report = monitor
        .await_activation_until(
            &ctx.bridge,
            &args.code,
            schedule,
            |status: ActivationStatus| {
                if last != Some(status) {
                    eprintln!("status: {status}");
                    last = Some(status);
                }
            },
            cancel_rx,
        )
        .await?;

    match ctx.format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!("{} after {} polls", report.status, report.polls);
            if let Some(node_id) = &report.node_id {
                println!("  node id:    {node_id}");
            }
            if let Some(tx) = &report.network_tx_reference {
                println!("  network tx: {tx}");
            }
        }
    }

    if report.status == ActivationStatus::Failed {
        bail!("activation of {} failed", args.code);
    }
    Ok(())
}
