use {
  anyhow::Context,
  bgp_sentry::{
    bus::MessageBus,
    cli::{CliOpts, Command, RunOpts},
    config::Config,
    node::{Node, NodeReport},
    observation::{self, Observation, ObservationSource},
    primitives::{KeyRegistry, Keypair},
    relations::RelationshipTable,
    roa::RoaTable,
    stake::StakeRegistry,
  },
  clap::Parser,
  std::{collections::HashMap, sync::Arc, time::Duration},
  tokio::sync::watch,
  tracing::{error, info, warn, Level},
  tracing_subscriber::{
    filter::filter_fn,
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
    Layer,
  },
};

fn print_essentials(opts: &RunOpts, config: &Config, committee: usize) {
  info!("Starting BGP-Sentry validator committee");
  info!("Version: {}", env!("CARGO_PKG_VERSION"));
  info!("Dataset: {}", opts.dataset.display());
  info!("Duration: {}s at {}x speed", opts.duration, opts.speed);
  info!("Data directory: {}", opts.data_dir.display());
  info!("Committee size: {committee}");
  info!(
    "Consensus: quorum {} / cap {}, timeouts {}s regular / {}s attack",
    config.min_signatures,
    config.cap_signatures,
    config.regular_timeout.as_secs(),
    config.attack_timeout.as_secs()
  );
}

/// Loads or fabricates the committee key material. With a registry
/// on disk, every validator needs its `as<N>.key` secret next to
/// it; without one, ephemeral keys are generated for the ASes named
/// on the command line.
fn committee_keys(
  opts: &RunOpts,
) -> anyhow::Result<(Arc<KeyRegistry>, HashMap<u32, Keypair>)> {
  match &opts.key_registry {
    Some(registry_path) => {
      let registry = KeyRegistry::load(registry_path)
        .with_context(|| format!("loading {}", registry_path.display()))?;
      let keys_dir = opts
        .keys_dir
        .as_ref()
        .context("--keys-dir is required with --key-registry")?;
      let mut secrets = HashMap::new();
      for asn in registry.validators() {
        let path = keys_dir.join(format!("as{asn:02}.key"));
        let keypair = Keypair::read_from_file(&path)
          .with_context(|| format!("loading {}", path.display()))?;
        anyhow::ensure!(
          Some(&keypair.public()) == registry.get(asn),
          "secret key for AS{asn} does not match the registry"
        );
        secrets.insert(asn, keypair);
      }
      Ok((Arc::new(registry), secrets))
    }
    None => {
      let mut registry = KeyRegistry::default();
      let mut secrets = HashMap::new();
      for &asn in &opts.validators {
        let keypair = Keypair::unique();
        registry.insert(asn, keypair.public());
        secrets.insert(asn, keypair);
      }
      info!("No key registry given; running with ephemeral keys");
      Ok((Arc::new(registry), secrets))
    }
  }
}

async fn run(opts: RunOpts, config: Config) -> anyhow::Result<()> {
  let (registry, mut secrets) = committee_keys(&opts)?;
  print_essentials(&opts, &config, registry.len());

  let roa = Arc::new(
    RoaTable::load(&opts.roa)
      .with_context(|| format!("loading {}", opts.roa.display()))?,
  );
  info!("ROA table: {} entries", roa.len());

  let relations = Arc::new(match &opts.relationships {
    Some(path) => RelationshipTable::load(path)
      .with_context(|| format!("loading {}", path.display()))?,
    None => RelationshipTable::default(),
  });

  let stakes = Arc::new(match &opts.stakes {
    Some(path) => StakeRegistry::load(path)
      .with_context(|| format!("loading {}", path.display()))?,
    None => StakeRegistry::default(),
  });

  let (observations, skipped) = observation::load_dataset(&opts.dataset)
    .with_context(|| format!("loading {}", opts.dataset.display()))?;
  if skipped > 0 {
    warn!("{skipped} malformed observations skipped at load");
  }
  info!("Dataset: {} observations", observations.len());

  // each node replays only what it observed itself
  let mut streams: HashMap<u32, Vec<Observation>> = HashMap::new();
  let mut foreign = 0u64;
  for observation in observations {
    if registry.contains(observation.observer_asn) {
      streams
        .entry(observation.observer_asn)
        .or_default()
        .push(observation);
    } else {
      foreign += 1;
    }
  }
  if foreign > 0 {
    warn!("{foreign} observations from ASes outside the committee ignored");
  }

  let bus = Arc::new(MessageBus::new());
  let (shutdown_tx, shutdown_rx) = watch::channel(false);

  let mut handles = Vec::new();
  for asn in registry.validators().collect::<Vec<_>>() {
    let mut node_observations = streams.remove(&asn).unwrap_or_default();
    node_observations.sort_by_key(|o| o.timestamp);
    let source = ObservationSource::replay(node_observations, opts.speed);

    let node = Node::new(
      asn,
      secrets.remove(&asn).expect("secret for every validator"),
      Arc::clone(&registry),
      config.clone(),
      Arc::clone(&roa),
      Arc::clone(&relations),
      Arc::clone(&stakes),
      Arc::clone(&bus),
      source,
      &opts.data_dir,
    )?;
    handles.push(tokio::spawn(node.run(shutdown_rx.clone())));
  }

  tokio::time::sleep(Duration::from_secs(opts.duration)).await;
  info!("Run duration elapsed, shutting the committee down");
  let _ = shutdown_tx.send(true);

  let mut reports: Vec<NodeReport> = Vec::new();
  for joined in futures::future::join_all(handles).await {
    reports.push(joined.context("node task panicked")??);
  }

  let stats = bus.stats();
  info!(
    "Bus: {} sent, {} delivered, {} dropped",
    stats.sent, stats.delivered, stats.dropped
  );
  let total_height: usize = reports.iter().map(|r| r.chain_height).sum();
  let total_observed: u64 = reports.iter().map(|r| r.observed).sum();
  info!(
    "Committee processed {total_observed} observations into {total_height} \
     blocks across {} chains",
    reports.len()
  );
  Ok(())
}

/// Writes the fatal-path diagnostic dump and returns its location.
fn write_diagnostic(
  data_dir: &std::path::Path,
  reason: &str,
) -> Option<std::path::PathBuf> {
  let path = data_dir.join("diagnostic.json");
  let dump = serde_json::json!({
    "reason": reason,
    "timestamp": chrono::Utc::now().to_rfc3339(),
  });
  match std::fs::create_dir_all(data_dir)
    .and_then(|_| std::fs::write(&path, dump.to_string()))
  {
    Ok(()) => Some(path),
    Err(_) => None,
  }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
  let opts = CliOpts::parse();

  let loglevel = match opts.verbose {
    1 => Level::DEBUG,
    2 => Level::TRACE,
    _ => Level::INFO,
  };
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::fmt::layer()
        .with_filter(filter_fn(move |metadata| metadata.level() <= &loglevel)),
    )
    .init();

  let config = match Config::from_env() {
    Ok(config) => config,
    Err(e) => {
      error!("configuration error: {e}");
      std::process::exit(2);
    }
  };

  let Command::Run(run_opts) = opts.command;
  let data_dir = run_opts.data_dir.clone();
  match run(run_opts, config).await {
    Ok(()) => {
      info!("Clean shutdown");
    }
    Err(e) => {
      let reason = format!("{e:#}");
      match write_diagnostic(&data_dir, &reason) {
        Some(path) => error!("fatal: {reason} (diagnostic: {})", path.display()),
        None => error!("fatal: {reason}"),
      }
      std::process::exit(1);
    }
  }
}
