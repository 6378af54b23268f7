use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;

use trellis_core::config::StackConfig;
use trellis_core::differ::{baseline, create_plan, plan_deletions};
use trellis_core::effect::Effect;
use trellis_core::interpreter::{ApplyResult, EffectOutcome, Interpreter};
use trellis_core::plan::Plan;
use trellis_core::provider::Provider;
use trellis_core::resource::{Resource, ResourceId, State, Value};
use trellis_core::schema::validate_resources;
use trellis_core::stack::Stack;
use trellis_provider_local::LocalProvider;
use trellis_state::{BackendConfig, ResourceState, StateBackend, StateFile, create_backend};
use trellis_webapp::PROJECT;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Declare, preview and apply the webapp stack", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Stack to operate on
    #[arg(long, global = true, default_value = "dev")]
    stack: String,

    /// Deployment artifact to upload
    #[arg(long, global = true, default_value = "./app/deployment.zip")]
    artifact: PathBuf,

    /// State file
    #[arg(long, global = true, default_value = "trellis.state.json")]
    state: PathBuf,

    /// Records of the simulated control plane
    #[arg(long, global = true, default_value = ".trellis/cloud.json")]
    cloud: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what `up` would change
    Preview,
    /// Create or update resources to match the stack
    Up,
    /// Delete every recorded resource
    Destroy {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show exported outputs
    Output {
        /// Output to show; all when omitted
        name: Option<String>,

        /// Print secret values in clear text
        #[arg(long)]
        show_secrets: bool,
    },
    /// Show resources grouped by the order they are provisioned in
    Graph,
    /// Remove a state lock left behind by an interrupted run
    ForceUnlock {
        /// ID printed in the "State is locked" error
        lock_id: String,
    },
    /// Read or change stack configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print a configuration value
    Get { key: String },
    /// Set a configuration value in the stack file
    Set {
        key: String,
        value: String,

        /// Store the value as a secret
        #[arg(long)]
        secret: bool,
    },
}

/// Paths and names every command works with
struct Context {
    stack: String,
    config_path: PathBuf,
    artifact: PathBuf,
    state: PathBuf,
    cloud: PathBuf,
}

impl Context {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            stack: cli.stack.clone(),
            config_path: PathBuf::from(StackConfig::file_name(&cli.stack)),
            artifact: cli.artifact.clone(),
            state: cli.state.clone(),
            cloud: cli.cloud.clone(),
        }
    }

    fn load_config(&self) -> Result<StackConfig, String> {
        StackConfig::load_with_env(&self.config_path, PROJECT, &self.stack)
            .map_err(|e| e.to_string())
    }

    fn declare(&self) -> Result<Stack, String> {
        let config = self.load_config()?;
        trellis_webapp::declare(&config, &self.artifact).map_err(|e| e.to_string())
    }

    fn provider(&self) -> Result<LocalProvider, String> {
        LocalProvider::persistent(&self.cloud)
            .map_err(|e| format!("Failed to open {}: {}", self.cloud.display(), e))
    }

    fn backend(&self) -> Result<Box<dyn StateBackend>, String> {
        create_backend(&BackendConfig::local(self.state.display().to_string()))
            .map_err(|e| e.to_string())
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let ctx = Context::from_cli(&cli);

    let result = match cli.command {
        Commands::Preview => run_preview(&ctx).await,
        Commands::Up => run_up(&ctx).await,
        Commands::Destroy { yes } => run_destroy(&ctx, yes).await,
        Commands::Output { name, show_secrets } => {
            run_output(&ctx, name.as_deref(), show_secrets).await
        }
        Commands::Graph => run_graph(&ctx),
        Commands::ForceUnlock { lock_id } => run_force_unlock(&ctx, &lock_id).await,
        Commands::Config { command } => run_config(&ctx, command),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn validate(provider: &impl Provider, stack: &Stack) -> Result<(), String> {
    validate_resources(&provider.schemas(), stack.resources()).map_err(|errors| {
        errors
            .iter()
            .map(|(id, error)| format!("{}: {}", id, error))
            .collect::<Vec<_>>()
            .join("\n")
    })
}

/// Current state of each declared resource, as the provider reports it
async fn read_current_states(
    provider: &impl Provider,
    state_file: &StateFile,
    resources: &[Resource],
) -> Result<HashMap<ResourceId, State>, String> {
    let mut states = HashMap::new();
    for resource in resources {
        let recorded = state_file.find_resource(&resource.id.resource_type, &resource.id.name);
        let identifier = recorded.and_then(|r| r.identifier.as_deref());
        let state = provider
            .read(&resource.id, identifier)
            .await
            .map_err(|e| format!("Failed to read {}: {}", resource.id, e))?;

        if recorded.is_some() && !state.exists {
            log::warn!("{} is recorded but no longer exists", resource.id);
        }
        states.insert(resource.id.clone(), state);
    }
    Ok(states)
}

/// Creates and updates for the declared stack, then deletes for what it no longer declares
async fn build_plan(
    provider: &impl Provider,
    stack: &Stack,
    state_file: &StateFile,
) -> Result<(Plan, HashMap<ResourceId, State>), String> {
    let resources = stack.sorted_resources().map_err(|e| e.to_string())?;
    let current = read_current_states(provider, state_file, &resources).await?;

    let mut plan = create_plan(&resources, &current);
    let declared: Vec<ResourceId> = resources.iter().map(|r| r.id.clone()).collect();
    let orphans = state_file.orphans(&declared).map_err(|e| e.to_string())?;
    plan.extend(plan_deletions(&orphans));
    Ok((plan, current))
}

async fn read_state_file(backend: &dyn StateBackend) -> Result<StateFile, String> {
    Ok(backend
        .read_state()
        .await
        .map_err(|e| e.to_string())?
        .unwrap_or_default())
}

async fn run_preview(ctx: &Context) -> Result<(), String> {
    let stack = ctx.declare()?;
    let provider = ctx.provider()?;
    validate(&provider, &stack)?;

    let backend = ctx.backend()?;
    let state_file = read_state_file(backend.as_ref()).await?;
    let (plan, _) = build_plan(&provider, &stack, &state_file).await?;

    print_plan(&plan);
    Ok(())
}

async fn run_up(ctx: &Context) -> Result<(), String> {
    let stack = ctx.declare()?;
    let provider = ctx.provider()?;
    validate(&provider, &stack)?;

    let backend = ctx.backend()?;
    backend.init().await.map_err(|e| e.to_string())?;
    let lock = backend.acquire_lock("up").await.map_err(|e| e.to_string())?;

    let result = up_locked(backend.as_ref(), provider, &stack).await;

    backend
        .release_lock(&lock)
        .await
        .map_err(|e| e.to_string())?;
    result
}

async fn up_locked(
    backend: &dyn StateBackend,
    provider: LocalProvider,
    stack: &Stack,
) -> Result<(), String> {
    let mut state_file = read_state_file(backend).await?;
    let (plan, current) = build_plan(&provider, stack, &state_file).await?;

    print_plan(&plan);
    if !plan.is_empty() {
        println!();
        println!("{}", "Applying changes...".cyan().bold());
        println!();
    }

    let mut resolution = baseline(&plan, &current);
    let interpreter = Interpreter::new(provider);
    let result = interpreter
        .apply(&plan, &mut resolution)
        .await
        .map_err(|e| e.to_string())?;
    print_outcomes(&result);

    // Resources the plan left alone are refreshed as well
    let provider_name = interpreter.provider().name();
    let untouched = current
        .values()
        .filter(|state| state.exists && !plan.touches(&state.id));
    for state in untouched.chain(result.states()) {
        let dependencies = stack
            .resource(&state.id)
            .map(Resource::dependencies)
            .unwrap_or_default();
        state_file.upsert_resource(ResourceState::from_state(state, provider_name, dependencies));
    }
    for id in result.deleted() {
        state_file.remove_resource(&id.resource_type, &id.name);
    }

    match stack.resolve_outputs(&resolution) {
        Ok(outputs) => state_file.set_outputs(&outputs),
        Err(e) => log::warn!("outputs not recorded: {}", e),
    }
    state_file.increment_serial();
    backend
        .write_state(&state_file)
        .await
        .map_err(|e| e.to_string())?;

    println!();
    if result.is_success() {
        if !plan.is_empty() {
            println!(
                "{}",
                format!("Apply complete! {} changes applied.", result.success_count)
                    .green()
                    .bold()
            );
        }
        print_outputs(&state_file, None, false)
    } else {
        Err(format!(
            "Apply failed. {} succeeded, {} failed.",
            result.success_count, result.failure_count
        ))
    }
}

async fn run_destroy(ctx: &Context, yes: bool) -> Result<(), String> {
    let backend = ctx.backend()?;
    let mut state_file = read_state_file(backend.as_ref()).await?;

    let orphans = state_file.orphans(&[]).map_err(|e| e.to_string())?;
    let plan = plan_deletions(&orphans);
    if plan.is_empty() {
        println!("{}", "No resources to destroy.".green());
        return Ok(());
    }

    print_plan(&plan);
    println!();

    if !yes && !confirm("Do you really want to destroy all resources?")? {
        println!("{}", "Destroy cancelled.".yellow());
        return Ok(());
    }

    let lock = backend
        .acquire_lock("destroy")
        .await
        .map_err(|e| e.to_string())?;

    let provider = ctx.provider()?;
    let interpreter = Interpreter::new(provider);
    let mut resolution = trellis_core::output::Resolution::new();
    let applied = interpreter.apply(&plan, &mut resolution).await;

    let outcome = match applied {
        Ok(result) => {
            print_outcomes(&result);
            for id in result.deleted() {
                state_file.remove_resource(&id.resource_type, &id.name);
            }
            if state_file.resources.is_empty() {
                state_file.set_outputs(&BTreeMap::new());
            }
            state_file.increment_serial();
            match backend.write_state(&state_file).await {
                Ok(()) if result.is_success() => {
                    println!();
                    println!(
                        "{}",
                        format!("Destroy complete! {} resources destroyed.", result.success_count)
                            .green()
                            .bold()
                    );
                    Ok(())
                }
                Ok(()) => Err(format!(
                    "Destroy failed. {} succeeded, {} failed.",
                    result.success_count, result.failure_count
                )),
                Err(e) => Err(e.to_string()),
            }
        }
        Err(e) => Err(e.to_string()),
    };

    backend
        .release_lock(&lock)
        .await
        .map_err(|e| e.to_string())?;
    outcome
}

async fn run_force_unlock(ctx: &Context, lock_id: &str) -> Result<(), String> {
    let backend = ctx.backend()?;
    backend
        .force_unlock(lock_id)
        .await
        .map_err(|e| e.to_string())?;
    println!("{}", format!("Lock {} released.", lock_id).green());
    Ok(())
}

fn confirm(question: &str) -> Result<bool, String> {
    println!("{}", question.yellow().bold());
    println!(
        "  {}",
        "This action cannot be undone. Type 'yes' to confirm.".yellow()
    );
    print!("\n  Enter a value: ");
    std::io::Write::flush(&mut std::io::stdout()).map_err(|e| e.to_string())?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    println!();
    Ok(input.trim() == "yes")
}

async fn run_output(ctx: &Context, name: Option<&str>, show_secrets: bool) -> Result<(), String> {
    let backend = ctx.backend()?;
    let state_file = read_state_file(backend.as_ref()).await?;
    print_outputs(&state_file, name, show_secrets)
}

fn print_outputs(state_file: &StateFile, name: Option<&str>, show_secrets: bool) -> Result<(), String> {
    match name {
        Some(name) => {
            let value = state_file
                .output(name)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("No output named '{}'", name))?;
            println!("{}", format_output(&value, show_secrets));
        }
        None => {
            if state_file.outputs.is_empty() {
                return Ok(());
            }
            println!("{}", "Outputs:".cyan().bold());
            for output in state_file.outputs.keys() {
                if let Some(value) = state_file.output(output).map_err(|e| e.to_string())? {
                    println!("  {} = {}", output.bold(), format_output(&value, show_secrets));
                }
            }
        }
    }
    Ok(())
}

/// Outputs print bare strings, not quoted ones
fn format_output(value: &Value, show_secrets: bool) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Secret(inner) if show_secrets => format_output(inner, show_secrets),
        other => format_value(other, show_secrets),
    }
}

fn run_graph(ctx: &Context) -> Result<(), String> {
    let stack = ctx.declare()?;
    let graph = stack.graph();
    let layers = graph.layers().map_err(|e| e.to_string())?;

    for (i, layer) in layers.iter().enumerate() {
        println!("{}", format!("Wave {}:", i + 1).cyan().bold());
        for binding in layer {
            let mut targets: Vec<&str> = graph
                .dependencies_of(binding)
                .iter()
                .map(|d| d.target.as_str())
                .collect();
            targets.sort();
            targets.dedup();
            if targets.is_empty() {
                println!("  {}", binding);
            } else {
                println!("  {} {} {}", binding, "<-".dimmed(), targets.join(", "));
            }
        }
    }
    Ok(())
}

fn run_config(ctx: &Context, command: ConfigCommands) -> Result<(), String> {
    match command {
        ConfigCommands::Get { key } => {
            let config = ctx.load_config()?;
            let value = config
                .get(&key)
                .ok_or_else(|| format!("Configuration '{}' is not set", key))?;
            if value.secret {
                println!("[secret]");
            } else {
                println!("{}", value.value);
            }
            Ok(())
        }
        ConfigCommands::Set { key, value, secret } => {
            set_config(&ctx.config_path, &ctx.stack, &key, value, secret)
        }
    }
}

/// Write one value into the stack file, keeping every other entry
fn set_config(
    path: &Path,
    stack: &str,
    key: &str,
    value: String,
    secret: bool,
) -> Result<(), String> {
    let mut config = StackConfig::load(path, PROJECT, stack).map_err(|e| e.to_string())?;
    if secret {
        config.set_secret(key, value);
    } else {
        config.set(key, value);
    }
    let yaml = config.to_yaml().map_err(|e| e.to_string())?;
    std::fs::write(path, yaml).map_err(|e| format!("Failed to write {}: {}", path.display(), e))
}

fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for effect in plan.effects() {
        match effect {
            Effect::Create(resource) => {
                println!("  {} {}", "+".green().bold(), resource.id.to_string().cyan().bold());
                for (key, value) in sorted_attributes(&resource.attributes) {
                    println!("      {}: {}", key, format_value(value, false).green());
                }
            }
            Effect::Update { id, from, to } => {
                println!("  {} {}", "~".yellow().bold(), id.to_string().cyan().bold());
                for (key, value) in sorted_attributes(&to.attributes) {
                    match from.attributes.get(key) {
                        Some(old) if old == value => {}
                        Some(old) => println!(
                            "      {}: {} → {}",
                            key,
                            format_value(old, false).red(),
                            format_value(value, false).green()
                        ),
                        None => println!("      {}: {}", key, format_value(value, false).green()),
                    }
                }
            }
            Effect::Delete { id, identifier } => {
                println!(
                    "  {} {} {}",
                    "-".red().bold(),
                    id.to_string().cyan().bold(),
                    format!("({})", identifier).dimmed()
                );
            }
        }
    }

    println!();
    println!("{}", plan.summary().to_string().bold());
}

fn print_outcomes(result: &ApplyResult) {
    for (id, outcome) in &result.outcomes {
        match outcome {
            Ok(EffectOutcome::Created { .. }) => println!("  {} created {}", "✓".green(), id),
            Ok(EffectOutcome::Updated { .. }) => println!("  {} updated {}", "✓".green(), id),
            Ok(EffectOutcome::Deleted) => println!("  {} deleted {}", "✓".green(), id),
            Ok(EffectOutcome::Skipped { reason }) => {
                println!("  {} {} ({})", "-".yellow(), id, reason)
            }
            Err(e) => println!("  {} {} - {}", "✗".red(), id, e),
        }
    }
}

fn sorted_attributes(attributes: &HashMap<String, Value>) -> Vec<(&String, &Value)> {
    let mut entries: Vec<_> = attributes
        .iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

fn format_value(value: &Value, show_secrets: bool) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        Value::Int(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::List(items) => {
            let strs: Vec<_> = items.iter().map(|v| format_value(v, show_secrets)).collect();
            format!("[{}]", strs.join(", "))
        }
        Value::Map(map) => {
            let strs: Vec<_> = sorted_attributes(map)
                .into_iter()
                .map(|(k, v)| format!("{}: {}", k, format_value(v, show_secrets)))
                .collect();
            format!("{{{}}}", strs.join(", "))
        }
        Value::ResourceRef(binding, attr) => format!("{}.{}", binding, attr),
        Value::Deferred(_) => "(known after apply)".to_string(),
        Value::Secret(inner) if show_secrets => format_value(inner, show_secrets),
        Value::Secret(_) => "[secret]".to_string(),
    }
}
