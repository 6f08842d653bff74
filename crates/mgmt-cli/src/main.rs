//! `mgmtctl`: run management operations against the cache model
//!
//! ```text
//! mgmtctl run ops.json --model model.json --save model.json
//! mgmtctl transform ops.json --peer 1.3.0
//! mgmtctl snapshot --model model.json --peer 1.4.0
//! mgmtctl describe /container=bar/cache=foo
//! ```

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use mgmt_core::{Controller, ControllerConfig};
use mgmt_model::{Address, ExpressionResolver, ModelStore, ModelVersion, Operation};
use mgmt_runtime::NoopProvider;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn model_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("model")
                .long("model")
                .value_parser(value_parser!(PathBuf))
                .help("Persisted model snapshot to start from"),
        )
        .arg(
            Arg::new("property")
                .long("property")
                .short('D')
                .action(ArgAction::Append)
                .help("Expression property as key=value"),
        )
}

fn peer_arg(required: bool) -> Arg {
    Arg::new("peer")
        .long("peer")
        .required(required)
        .value_parser(value_parser!(ModelVersion))
        .help("Model version of the peer, e.g. 1.3.0")
}

fn operations_arg() -> Arg {
    Arg::new("operations")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("JSON file holding one operation or an array of them")
}

fn cli() -> Command {
    Command::new("mgmtctl")
        .version(mgmt_core::VERSION)
        .about("Management control plane for the cache model")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Controller configuration (TOML)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            model_args(Command::new("run").about("Boot the model and execute operations"))
                .arg(operations_arg())
                .arg(peer_arg(false))
                .arg(
                    Arg::new("boot")
                        .long("boot")
                        .action(ArgAction::SetTrue)
                        .help("Apply the operations as boot operations"),
                )
                .arg(
                    Arg::new("save")
                        .long("save")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the resulting model snapshot here"),
                ),
        )
        .subcommand(
            model_args(Command::new("transform").about("Show operations as a peer would receive them"))
                .arg(operations_arg())
                .arg(peer_arg(true)),
        )
        .subcommand(
            model_args(Command::new("snapshot").about("Print the model, optionally for a peer"))
                .arg(peer_arg(false)),
        )
        .subcommand(
            Command::new("describe")
                .about("Print the schema of a resource type")
                .arg(
                    Arg::new("address")
                        .default_value("/")
                        .value_parser(value_parser!(Address))
                        .help("Resource address"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn build_controller(config: ControllerConfig, args: Option<&ArgMatches>) -> Result<Controller> {
    let registry = Arc::new(mgmt_cache::registry().context("cache schema is invalid")?);
    let store = Arc::new(ModelStore::new());
    let mut resolver = ExpressionResolver::new().with_env();

    if let Some(args) = args {
        if let Some(path) = args.get_one::<PathBuf>("model") {
            let json = read(path)?;
            store
                .restore_json(&json, &registry)
                .with_context(|| format!("cannot restore {}", path.display()))?;
        }
        for property in args.get_many::<String>("property").into_iter().flatten() {
            let Some((key, value)) = property.split_once('=') else {
                bail!("property `{property}` is not key=value");
            };
            resolver.set_property(key, value);
        }
    }

    Controller::builder(registry)
        .provider(Arc::new(NoopProvider::default()))
        .config(config)
        .resolver(resolver)
        .transformations(mgmt_cache::transformations())
        .store(store)
        .build()
        .context("invalid controller configuration")
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

fn read_operations(args: &ArgMatches) -> Result<Vec<Operation>> {
    let path = args
        .get_one::<PathBuf>("operations")
        .context("no operations file given")?;
    let value: Value = serde_json::from_str(&read(path)?)
        .with_context(|| format!("{} is not JSON", path.display()))?;
    let operations = match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Operation>, _>>(),
        single => serde_json::from_value(single).map(|op| vec![op]),
    };
    operations.with_context(|| format!("{} does not hold operations", path.display()))
}

fn print(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(config: ControllerConfig, args: &ArgMatches) -> Result<()> {
    let controller = build_controller(config, Some(args))?;
    let operations = read_operations(args)?;
    let peer = args.get_one::<ModelVersion>("peer").copied();

    let outcomes = if args.get_flag("boot") {
        controller.boot(operations).await?
    } else {
        controller.boot(Vec::new()).await?;
        let mut outcomes = Vec::with_capacity(operations.len());
        for operation in operations {
            outcomes.push(controller.submit(operation, peer).await);
        }
        outcomes
    };

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    for outcome in &outcomes {
        print(&outcome.response())?;
    }

    if let Some(path) = args.get_one::<PathBuf>("save") {
        let json = controller.store().export_json()?;
        std::fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;
        info!(path = %path.display(), "model saved");
    }

    info!(
        operations = outcomes.len(),
        failed,
        state = ?controller.process_state(),
        "run finished"
    );
    controller.shutdown();
    if failed > 0 {
        bail!("{failed} of {} operations failed", outcomes.len());
    }
    Ok(())
}

fn transform(config: ControllerConfig, args: &ArgMatches) -> Result<()> {
    let controller = build_controller(config, Some(args))?;
    let peer = *args
        .get_one::<ModelVersion>("peer")
        .context("no peer version given")?;
    let mut rejected = 0;
    for operation in read_operations(args)? {
        let report = match controller.transform_for_peer(&operation, peer) {
            Ok(transformed) if transformed.is_discarded() => json!({ "discarded": true }),
            Ok(transformed) => json!({ "operation": transformed.operation() }),
            Err(error) => {
                warn!(%operation, %error, "rejected for peer");
                rejected += 1;
                json!({ "rejected": error.to_string() })
            }
        };
        print(&report)?;
    }
    if rejected > 0 {
        bail!("{rejected} operations cannot be sent to {peer}");
    }
    Ok(())
}

fn snapshot(config: ControllerConfig, args: &ArgMatches) -> Result<()> {
    let controller = build_controller(config, Some(args))?;
    let model = match args.get_one::<ModelVersion>("peer") {
        Some(peer) => controller.snapshot_for_peer(*peer)?,
        None => controller.snapshot(),
    };
    print(&model)
}

async fn describe(config: ControllerConfig, args: &ArgMatches) -> Result<()> {
    let controller = build_controller(config, None)?;
    let address = args
        .get_one::<Address>("address")
        .cloned()
        .unwrap_or_default();
    let description = controller
        .submit(Operation::read_resource_description(address), None)
        .await
        .into_result()?;
    print(&description)
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("cannot load {}", path.display()))?,
        None => ControllerConfig::default(),
    };

    match matches.subcommand() {
        Some(("run", args)) => run(config, args).await,
        Some(("transform", args)) => transform(config, args),
        Some(("snapshot", args)) => snapshot(config, args),
        Some(("describe", args)) => describe(config, args).await,
        Some((other, _)) => bail!("unknown command `{other}`"),
        None => bail!("no command given"),
    }
}
