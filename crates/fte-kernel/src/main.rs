use anyhow::{bail, Context as _, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use fte_kernel::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("fte")
        .version(fte_kernel::VERSION)
        .about("Fact Taxonomy Engine")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Engine configuration (TOML)"),
        )
        .arg(
            Arg::new("taxonomy")
                .long("taxonomy")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Taxonomy document (YAML)"),
        )
        .arg(
            Arg::new("data")
                .long("data")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Transaction records for the in-memory data store (YAML or JSON)"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("resolve")
                .about("Resolve a fact over a context")
                .arg(Arg::new("fact").required(true))
                .arg(
                    Arg::new("context")
                        .long("context")
                        .default_value("{}")
                        .help("Context as a JSON object"),
                )
                .arg(
                    Arg::new("provenance")
                        .long("provenance")
                        .action(ArgAction::SetTrue)
                        .help("Include the provenance tree"),
                ),
        )
        .subcommand(
            Command::new("inspect")
                .about("Show a fact's definition, versions and dependents")
                .arg(Arg::new("fact").required(true)),
        )
        .subcommand(
            Command::new("list")
                .about("List facts")
                .arg(Arg::new("namespace").long("namespace").help("Only facts under this namespace")),
        )
        .subcommand(
            Command::new("search")
                .about("Search identifiers and descriptions")
                .arg(Arg::new("query").required(true)),
        )
        .subcommand(
            Command::new("graph")
                .about("Print the active dependency graph")
                .arg(
                    Arg::new("dot")
                        .long("dot")
                        .action(ArgAction::SetTrue)
                        .help("Graphviz output"),
                ),
        )
        .subcommand(Command::new("check").about("Load and validate a taxonomy"))
        .subcommand(Command::new("test").about("Run version self-tests"))
        .subcommand(
            Command::new("sandbox-worker")
                .about("Execute one logic request from stdin")
                .hide(true),
        )
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_engine(args: &ArgMatches) -> Result<Engine> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if config.isolation == IsolationLevel::Subprocess && config.worker_program.is_none() {
        config.worker_program = Some(std::env::current_exe().context("locating worker program")?);
    }
    let store = match args.get_one::<PathBuf>("data") {
        Some(path) => InMemoryDataStore::from_path(path)
            .with_context(|| format!("loading data {}", path.display()))?,
        None => InMemoryDataStore::new(Vec::new()),
    };
    let engine = Engine::new(config, Arc::new(store))?;
    if let Some(path) = args.get_one::<PathBuf>("taxonomy") {
        let report = load_taxonomy_file(&engine, path)
            .with_context(|| format!("loading taxonomy {}", path.display()))?;
        tracing::debug!(activated = report.activated.len(), "taxonomy ready");
    }
    Ok(engine)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(matches: ArgMatches) -> Result<()> {
    let engine = build_engine(&matches)?;
    match matches.subcommand() {
        Some(("resolve", args)) => {
            let fact = args.get_one::<String>("fact").map_or("", String::as_str);
            let context = args.get_one::<String>("context").map_or("{}", String::as_str);
            let context: serde_json::Value =
                serde_json::from_str(context).context("--context must be JSON")?;
            let resolution = engine.resolve_json(fact, &context).await?;
            let mut out = serde_json::json!({
                "fact": resolution.version().fact,
                "version": resolution.version().version,
                "fingerprint": resolution.fingerprint(),
                "outcome": resolution.outcome.as_str(),
                "value": resolution.value().to_json(),
            });
            if args.get_flag("provenance") {
                out["provenance"] = serde_json::to_value(resolution.provenance())?;
            }
            print_json(&out)
        }
        Some(("inspect", args)) => {
            let fact = FactId::new(args.get_one::<String>("fact").map_or("", String::as_str))?;
            print_json(&engine.inspect(&fact)?)
        }
        Some(("list", args)) => {
            let namespace = args.get_one::<String>("namespace").map(String::as_str);
            for row in engine.list(namespace) {
                let active = row.active_version.map_or_else(|| "-".to_string(), |v| format!("v{v}"));
                println!("{:<40} {:<6} {}", row.id, active, row.description);
            }
            Ok(())
        }
        Some(("search", args)) => {
            let query = args.get_one::<String>("query").map_or("", String::as_str);
            for row in engine.search(query) {
                println!("{:<40} {}", row.id, row.description);
            }
            Ok(())
        }
        Some(("graph", args)) => {
            let graph = engine.graph();
            if args.get_flag("dot") {
                print!("{}", graph.to_dot());
            } else {
                for fact in graph.order() {
                    let deps = graph.dependencies(&fact);
                    if deps.is_empty() {
                        println!("{fact}");
                    } else {
                        let deps: Vec<&str> = deps.iter().map(FactId::as_str).collect();
                        println!("{fact} <- {}", deps.join(", "));
                    }
                }
            }
            Ok(())
        }
        Some(("check", _)) => {
            if matches.get_one::<PathBuf>("taxonomy").is_none() {
                bail!("check needs --taxonomy");
            }
            let graph = engine.graph();
            println!(
                "taxonomy OK: {} definitions, {} active, {} edges",
                engine.registry().len(),
                graph.node_count(),
                graph.edge_count()
            );
            Ok(())
        }
        Some(("test", _)) => {
            let report = run_self_tests(&engine).await;
            for case in &report.cases {
                let status = if case.passed { "PASS" } else { "FAIL" };
                match &case.detail {
                    Some(detail) => println!("{status} {}@v{} {}: {detail}", case.fact, case.version, case.name),
                    None => println!("{status} {}@v{} {}", case.fact, case.version, case.name),
                }
            }
            println!("{} passed, {} failed", report.passed(), report.failed());
            std::process::exit(if report.is_success() { 0 } else { 1 });
        }
        Some((other, _)) => bail!("unknown command {other}"),
        None => bail!("no command given"),
    }
}

fn main() -> Result<()> {
    let matches = cli().get_matches();

    if matches.subcommand_name() == Some("sandbox-worker") {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        fte_kernel::sandbox::worker::serve(stdin.lock(), stdout.lock())?;
        return Ok(());
    }

    init_logging(matches.get_flag("log-json"));
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(matches))
}
