use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use gcectl::backend::{self, rest::RestBackend};
use gcectl::batch::{BatchAction, BatchExecutor};
use gcectl::cli::{Cli, Command, SetCommand};
use gcectl::commands;
use gcectl::config::{self, Config};
use gcectl::error::GceError;
use gcectl::logging::{self, ProgressHandle};
use gcectl::output::{self, ProgressLine};
use gcectl::progress::run_with_progress;
use gcectl::repository::{GceRepository, VmRepository};
use gcectl::vm::VmRef;

/// A command failure: what was being done, and why it failed.
struct Failure {
    context: Option<String>,
    source: GceError,
}

impl Failure {
    fn new(context: impl Into<String>, source: GceError) -> Self {
        Self {
            context: Some(context.into()),
            source,
        }
    }

    fn render(&self) -> String {
        match &self.context {
            Some(context) => format!("{context}: {}", self.source),
            None => self.source.to_string(),
        }
    }
}

// Unknown VM names are reported as-is, without a context prefix.
impl From<GceError> for Failure {
    fn from(source: GceError) -> Self {
        Self {
            context: None,
            source,
        }
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let logs = logging::init(cli.verbose);

    if matches!(cli.command, Command::Version) {
        println!(
            "{}",
            output::version(
                env!("CARGO_PKG_VERSION"),
                option_env!("GCECTL_COMMIT").unwrap_or("unknown"),
                option_env!("GCECTL_BUILD_DATE").unwrap_or("unknown"),
            )
        );
        return Ok(());
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(gcectl::paths::default_config_path);
    let config = config::load_config(&config_path)?;

    let ctx = CancellationToken::new();
    cancel_on_signal(ctx.clone());

    if let Err(failure) = run(cli.command, &config, &ctx, &logs).await {
        if failure.source.is_cancelled() {
            tracing::debug!("command interrupted");
        }
        output::error(&failure.render());
        std::process::exit(1);
    }
    Ok(())
}

async fn run(
    command: Command,
    config: &Config,
    ctx: &CancellationToken,
    logs: &ProgressHandle,
) -> Result<(), Failure> {
    match command {
        Command::Version => unreachable!(),
        Command::List => {
            let repo = repository(config.vms.clone())?;
            let items = commands::list_vms(&repo, ctx, Utc::now())
                .await
                .map_err(|e| Failure::new("Failed to list VMs", e))?;
            tracing::debug!(count = items.len(), "listed VMs");
            println!("{}", output::render_table(&items));
        }
        Command::Describe { vm } => {
            let vm = resolve_one(config, &vm)?;
            let repo = repository(config.vms.clone())?;
            let item = commands::describe_vm(&repo, ctx, &vm, Utc::now())
                .await
                .map_err(|e| Failure::new("Failed to describe VM", e))?;
            println!("{}", output::render_detail(&item));
        }
        Command::On { vms } => {
            run_batch(config, ctx, logs, &vms, BatchAction::Start).await?;
            output::success(&format!("Turned on the instances: {}", vms.join(", ")));
        }
        Command::Off { vms } => {
            run_batch(config, ctx, logs, &vms, BatchAction::Stop).await?;
            output::success(&format!("Turned off the instances: {}", vms.join(", ")));
        }
        Command::Set { setting } => match setting {
            SetCommand::MachineType { vm, machine_type } => {
                let vm = resolve_one(config, &vm)?;
                let line = Arc::new(ProgressLine::start(&format!(
                    "Setting machine type of {} to {machine_type}",
                    vm.name
                )));
                let repo = repository(config.vms.clone())?.with_tick_sink(line.clone());

                let result = with_line(logs, &line, async {
                    commands::update_machine_type(&repo, ctx, &vm, &machine_type).await
                })
                .await;
                result.map_err(|e| Failure::new("Failed to set machine type", e))?;
                output::success(&format!(
                    "Set machine type of {} to {machine_type}",
                    vm.name
                ));
            }
            SetCommand::SchedulePolicy { vm, policy, un } => {
                let vm = resolve_one(config, &vm)?;
                let message = if un {
                    format!("Unsetting schedule policy {policy} from {}", vm.name)
                } else {
                    format!("Setting schedule policy {policy} to {}", vm.name)
                };
                let line = Arc::new(ProgressLine::start(&message));
                let repo = repository(config.vms.clone())?.with_tick_sink(line.clone());

                let result = with_line(logs, &line, async {
                    if un {
                        commands::unset_schedule_policy(&repo, ctx, &vm, &policy).await
                    } else {
                        commands::set_schedule_policy(&repo, ctx, &vm, &policy).await
                    }
                })
                .await;

                if un {
                    result.map_err(|e| Failure::new("Failed to unset schedule policy", e))?;
                    output::success(&format!(
                        "Unset schedule policy {policy} from {}",
                        vm.name
                    ));
                } else {
                    result.map_err(|e| Failure::new("Failed to set schedule policy", e))?;
                    output::success(&format!("Set schedule policy {policy} to {}", vm.name));
                }
            }
        },
    }
    Ok(())
}

async fn run_batch(
    config: &Config,
    ctx: &CancellationToken,
    logs: &ProgressHandle,
    names: &[String],
    action: BatchAction,
) -> Result<(), Failure> {
    let vms = config.resolve(names)?;
    let repo: Arc<dyn VmRepository> = Arc::new(repository(config.vms.clone())?);
    let executor = BatchExecutor::new(repo);

    let (verb, context) = match action {
        BatchAction::Start => ("Starting", "Failed to turn on the instances"),
        BatchAction::Stop => ("Stopping", "Failed to turn off the instances"),
    };
    let line = ProgressLine::start(&format!("{verb} VMs {}", names.join(", ")));

    let (executor, vms) = (&executor, vms.as_slice());
    let batch = run_with_progress(ctx, &line, |ctx| async move {
        executor.execute(&ctx, vms, action).await
    });
    with_line(logs, &line, batch)
        .await
        .map_err(|e| Failure::new(context, e))
}

/// Drive `work` with `line` on screen, routing log output around it.
async fn with_line<T>(
    logs: &ProgressHandle,
    line: &ProgressLine,
    work: impl Future<Output = T>,
) -> T {
    if let Some(bar) = line.bar() {
        logs.attach(bar);
    }
    let result = work.await;
    line.finish();
    logs.detach();
    result
}

fn resolve_one(config: &Config, name: &str) -> Result<VmRef, Failure> {
    let vm = config.vm(name).cloned().ok_or_else(|| GceError::UnknownVm {
        name: name.to_string(),
    })?;
    Ok(vm)
}

fn repository(inventory: Vec<VmRef>) -> Result<GceRepository<RestBackend>, Failure> {
    let api = backend::create_backend()
        .map_err(|e| Failure::new("Failed to initialize compute client", e))?;
    Ok(GceRepository::new(api, inventory))
}

/// Cancel `ctx` on Ctrl-C or SIGTERM.
fn cancel_on_signal(ctx: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate => {}
        }
        tracing::debug!("signal received, cancelling");
        ctx.cancel();
    });
}
