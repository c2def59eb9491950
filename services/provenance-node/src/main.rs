use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use provenance_core::{logging, Config};
use provenance_identity::Identity;
use provenance_trace::{verify_trace, ExecutionTrace};

const NODE_PROTOCOL_VERSION: u32 = 1;
const NODE_RUNTIME_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: u32,
}

#[derive(Debug, Serialize)]
struct TraceCheck {
    identifier: String,
    step_count: usize,
    execution_root: String,
    recomputed_root: String,
    root_matches: bool,
    steps_match: bool,
    verified: bool,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            runtime_version: NODE_RUNTIME_VERSION,
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    logging::try_init();

    match args.get(1).map(String::as_str) {
        Some("keygen") => keygen(&args[2..]),
        Some("did") => print_did(&args[2..]),
        Some("check-config") => check_config(&args[2..]),
        Some("verify-trace") => verify_trace_file(&args[2..]),
        _ => {
            print_usage();
            bail!("missing or unknown command");
        }
    }
}

fn keygen(args: &[String]) -> Result<()> {
    let out = flag_path(args, "--out")?;
    if out.exists() && !args.iter().any(|a| a == "--force") {
        bail!("{} already exists (pass --force to overwrite)", out.display());
    }

    let identity = Identity::generate();
    identity
        .save_to_file(&out)
        .with_context(|| format!("writing key to {}", out.display()))?;
    println!("{}", identity.identifier());
    Ok(())
}

fn print_did(args: &[String]) -> Result<()> {
    let key = flag_path(args, "--key")?;
    let identity = Identity::load_from_file(&key)
        .with_context(|| format!("loading key from {}", key.display()))?;
    println!("{}", identity.identifier());
    Ok(())
}

fn check_config(args: &[String]) -> Result<()> {
    let path = flag_path(args, "--config")?;
    let config = Config::from_file(&path)
        .with_context(|| format!("reading {}", path.display()))?
        .apply_env_overrides();
    config.validate()?;

    if let Some(key_path) = &config.identity.key_path {
        let identity = Identity::load_from_file(key_path)?;
        println!("identity:  {}", identity.identifier());
    } else {
        bail!("identity.key_path is not set");
    }
    println!("contract:  {}", config.ledger.contract_address);
    println!("deployed:  {}", config.ledger.deployment_height);
    println!("window:    {}", config.ledger.max_block_range);
    println!("cache:     {}", config.cache.db_path.display());
    println!("sampling:  {}", config.cache.sample_fraction);
    Ok(())
}

fn verify_trace_file(args: &[String]) -> Result<()> {
    let path = args
        .first()
        .map(PathBuf::from)
        .context("verify-trace needs a trace file")?;
    let raw = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    let trace: ExecutionTrace = serde_json::from_slice(&raw).context("parsing trace")?;

    let check = verify_trace(&trace)?;
    let report = TraceCheck {
        identifier: trace.identifier.clone(),
        step_count: trace.steps.len(),
        execution_root: trace.execution_root.to_hex(),
        recomputed_root: check.recomputed_root.to_hex(),
        root_matches: check.root_matches,
        steps_match: check.steps_match,
        verified: check.verified(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.verified {
        std::process::exit(1);
    }
    Ok(())
}

fn flag_path(args: &[String], flag: &str) -> Result<PathBuf> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == flag {
            return iter
                .next()
                .map(PathBuf::from)
                .with_context(|| format!("{} was provided without a path", flag));
        }
    }
    bail!("missing required {} <path> argument", flag)
}

fn print_usage() {
    eprintln!("Usage: provenance-node <command> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  keygen --out <path> [--force]   Generate an identity and write it as a JWK");
    eprintln!("  did --key <path>                Print the identifier of a stored key");
    eprintln!("  check-config --config <path>    Validate a configuration file");
    eprintln!("  verify-trace <file>             Recompute the root of an exported trace");
    eprintln!();
    eprintln!("  --version-json                  Print version handshake and exit");
}
