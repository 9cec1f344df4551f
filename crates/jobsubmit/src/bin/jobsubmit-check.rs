use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser};
use serde::Serialize;

use jobsubmit::common::config::HookConfig;
use jobsubmit::common::setup::setup_logging;
use jobsubmit::ctld::{ControllerState, JobDescriptor, JobId, Uid};
use jobsubmit::engine::EngineKind;
use jobsubmit::{Decision, HookInvoker, LogSink};

#[derive(Args)]
struct CommonOpts {
    /// Hook configuration file (TOML)
    #[arg(long, value_hint = clap::ValueHint::FilePath, global = true)]
    config: Option<PathBuf>,

    /// Policy script, overrides the configuration
    #[arg(long, value_hint = clap::ValueHint::FilePath, global = true)]
    script: Option<PathBuf>,

    /// Script engine, overrides the configuration
    #[arg(long, global = true)]
    engine: Option<EngineKind>,

    /// Enables more detailed log output
    #[arg(long, env = "JOBSUBMIT_DEBUG", global = true)]
    debug: bool,
}

#[derive(Args)]
struct RequestOpts {
    /// Controller snapshot (JSON)
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    state: PathBuf,

    /// Job request (JSON)
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    request: PathBuf,

    /// User that issues the request
    #[arg(long)]
    submit_uid: u32,
}

#[derive(Args)]
struct ModifyOpts {
    #[clap(flatten)]
    request: RequestOpts,

    /// Job that is being modified
    #[arg(long)]
    job_id: u32,
}

#[derive(Parser)]
enum SubCommand {
    /// Evaluates the submission of a new job
    Submit(RequestOpts),
    /// Evaluates a modification of an existing job
    Modify(ModifyOpts),
}

/// Runs a job submit policy script against a controller snapshot
#[derive(Parser)]
#[command(author, about, version(jobsubmit::JOBSUBMIT_VERSION), help_expected(true))]
struct RootOptions {
    #[clap(flatten)]
    common: CommonOpts,

    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Serialize)]
struct CheckOutput {
    decision: Decision,
    request: JobDescriptor,
}

fn make_config(opts: &CommonOpts) -> anyhow::Result<HookConfig> {
    let config = match &opts.config {
        Some(path) => HookConfig::load(path)?,
        None => HookConfig::default(),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(script) = &opts.script {
        config.script = script.clone();
    }
    if let Some(engine) = opts.engine {
        config.engine = engine;
    }
    Ok(config)
}

fn load_request(path: &Path) -> anyhow::Result<JobDescriptor> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Cannot open request {}", path.display()))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("Invalid request {}", path.display()))
}

fn run(opts: RootOptions) -> anyhow::Result<bool> {
    let config = make_config(&opts.common)?;

    let request_opts = match &opts.subcmd {
        SubCommand::Submit(opts) => opts,
        SubCommand::Modify(opts) => &opts.request,
    };
    let controller = Arc::new(
        ControllerState::load_snapshot(&request_opts.state)
            .with_context(|| format!("Cannot load {}", request_opts.state.display()))?,
    );
    let mut request = load_request(&request_opts.request)?;
    let submit_uid = Uid::new(request_opts.submit_uid);

    let invoker = HookInvoker::from_config(&config, controller.clone(), Arc::new(LogSink))?;
    if let Err(error) = invoker.initialize() {
        log::error!("Policy script {} cannot be loaded: {error}", config.script.display());
    }

    let decision = match &opts.subcmd {
        SubCommand::Submit(_) => invoker.job_submit(&mut request, submit_uid),
        SubCommand::Modify(opts) => {
            let job = controller.job_snapshot(JobId::new(opts.job_id))?;
            invoker.job_modify(&mut request, &job, submit_uid)
        }
    };
    invoker.teardown();

    let accepted = decision.is_accepted();
    let output = CheckOutput { decision, request };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(accepted)
}

fn main() {
    let opts = RootOptions::parse();
    setup_logging(opts.common.debug);

    match run(opts) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e:?}");
            std::process::exit(2);
        }
    }
}
