// ============================================================================
// narrio — command-line front end for avatar video generation
// ============================================================================
// Usage:
//   narrio generate --script "Hi" --avatar-id A1 --voice-id V1   Render a video
//   narrio resume                          Resume jobs left by a previous run
//   narrio status TASK_ID                  Ask the backend about one task
//   narrio server-status                   Check the backend is running
//   narrio avatars [--search TEXT]         List stock avatars
//   narrio voices [--locale en-US]         List voices
//   narrio avatar-create --prompt TEXT     Generate an avatar from a prompt
//   narrio projects [--status STATUS]      List projects
//   narrio jobs                            List in-flight job records
//   narrio rename ID NAME                  Rename a project
//   narrio delete ID                       Delete a project and its job
//   narrio stats                           Show project statistics
//   narrio export --format json            Export projects and jobs as JSON
// ============================================================================

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use narrio_core::api::wait_for_task;
use narrio_core::{
    AppConfig, AppContext, AvatarRef, BackgroundRef, GenerationEvent, GenerationManager,
    GenerationPhase, GenerationRequest, HttpJobApi, ProjectStatus, RemoteJobApi, TerminalOutcome,
    VideoDimensions, VoiceRef,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Narrio avatar video generator
#[derive(Parser)]
#[command(name = "narrio", version, about = "Generate and manage AI avatar videos")]
struct Cli {
    /// Path to the database file (default: ~/.narrio/narrio.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new video and wait for it to finish
    Generate {
        /// Script text to speak
        #[arg(long, conflicts_with = "script_file")]
        script: Option<String>,

        /// Read the script from a file
        #[arg(long)]
        script_file: Option<PathBuf>,

        /// Stock avatar id
        #[arg(long, required_unless_present = "avatar_image")]
        avatar_id: Option<String>,

        /// Photo to animate instead of a stock avatar
        #[arg(long, conflicts_with = "avatar_id")]
        avatar_image: Option<PathBuf>,

        /// Avatar display name
        #[arg(long, default_value = "Avatar")]
        avatar_name: String,

        #[arg(long)]
        voice_id: String,

        #[arg(long, default_value = "Voice")]
        voice_name: String,

        /// Voice locale, e.g. en-US
        #[arg(long)]
        locale: Option<String>,

        /// Project title
        #[arg(long)]
        title: Option<String>,

        /// Solid background as #RRGGBB
        #[arg(long)]
        background_color: Option<String>,

        /// landscape, portrait or square
        #[arg(long, default_value = "landscape")]
        dimensions: String,
    },

    /// Resume polling every job recorded by a previous run
    Resume,

    /// Query the backend for one task's status
    Status { task_id: String },

    /// Check whether the backend is running
    ServerStatus,

    /// List stock avatars usable with --avatar-id
    Avatars {
        /// Only avatars whose name or id contains this text
        #[arg(long)]
        search: Option<String>,
    },

    /// List voices usable with --voice-id
    Voices {
        /// Only voices with this language code, e.g. en-US
        #[arg(long)]
        locale: Option<String>,
    },

    /// Generate a new avatar from a text prompt
    AvatarCreate {
        #[arg(long)]
        prompt: String,

        /// Use the slower, higher quality model
        #[arg(long)]
        no_fast: bool,
    },

    /// List projects with optional status filter
    Projects {
        /// Filter by status: not-started, in-progress, ready, failed, planned
        #[arg(long)]
        status: Option<String>,
    },

    /// List in-flight job records
    Jobs,

    /// Rename a project
    Rename { id: String, name: String },

    /// Delete a project, cancelling and forgetting its job
    Delete { id: String },

    /// Show project statistics
    Stats,

    /// Export projects and job records as JSON
    Export {
        /// Output format (currently only json is supported)
        #[arg(long, default_value = "json")]
        format: String,
    },
}

fn init_tracing() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("No .env file loaded: {}", e);
    }

    let filter = EnvFilter::from_default_env()
        .add_directive("narrio_core=info".parse()?)
        .add_directive("narrio=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn parse_status(s: &str) -> Result<ProjectStatus> {
    ProjectStatus::from_str(s).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown status '{}'. Valid values: not-started, in-progress, ready, failed, planned",
            s
        )
    })
}

fn parse_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("Invalid project id '{}'", s))
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let cli = Cli::parse();
    let mut config = AppConfig::from_env();
    if cli.db_path.is_some() {
        config.db_path = cli.db_path.clone();
    }

    match &cli.command {
        Commands::Status { task_id } => return cmd_status(&config, task_id).await,
        Commands::ServerStatus => return cmd_server_status(&config).await,
        Commands::Avatars { search } => return cmd_avatars(&config, search.as_deref()).await,
        Commands::Voices { locale } => return cmd_voices(&config, locale.as_deref()).await,
        Commands::AvatarCreate { prompt, no_fast } => {
            return cmd_avatar_create(&config, prompt, !*no_fast).await
        }
        _ => {}
    }

    let ctx = AppContext::from_config(&config)?;

    match cli.command {
        Commands::Generate {
            script,
            script_file,
            avatar_id,
            avatar_image,
            avatar_name,
            voice_id,
            voice_name,
            locale,
            title,
            background_color,
            dimensions,
        } => {
            let script = match (script, script_file) {
                (Some(s), _) => s,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read script file {}", path.display()))?,
                (None, None) => anyhow::bail!("Provide --script or --script-file"),
            };

            let avatar = match (avatar_id, avatar_image) {
                (_, Some(path)) => {
                    let image = std::fs::read(&path)
                        .with_context(|| format!("Failed to read avatar image {}", path.display()))?;
                    let image_name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| "avatar.jpg".to_string());
                    AvatarRef::custom(avatar_name, image, image_name)
                }
                (Some(id), None) => AvatarRef::preset(avatar_name, id),
                (None, None) => anyhow::bail!("Provide --avatar-id or --avatar-image"),
            };

            let dimensions = VideoDimensions::from_str(&dimensions).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown dimensions '{}'. Valid values: landscape, portrait, square",
                    dimensions
                )
            })?;

            let voice = VoiceRef {
                voice_id,
                name: voice_name,
                locale,
            };
            let mut request = GenerationRequest::new(script, avatar, voice).with_dimensions(dimensions);
            if let Some(title) = title {
                request = request.with_title(title);
            }
            if let Some(color) = background_color {
                request = request.with_background(BackgroundRef {
                    name: "Custom".to_string(),
                    color_hex: Some(color),
                });
            }

            cmd_generate(ctx, request).await
        }
        Commands::Resume => cmd_resume(ctx).await,
        Commands::Projects { status } => cmd_projects(&ctx, status).await,
        Commands::Jobs => cmd_jobs(&ctx).await,
        Commands::Rename { id, name } => cmd_rename(&ctx, &id, &name).await,
        Commands::Delete { id } => cmd_delete(ctx, &id).await,
        Commands::Stats => cmd_stats(&ctx, &config).await,
        Commands::Export { format } => cmd_export(&ctx, &format).await,
        Commands::Status { .. }
        | Commands::ServerStatus
        | Commands::Avatars { .. }
        | Commands::Voices { .. }
        | Commands::AvatarCreate { .. } => Ok(()),
    }
}

// ============================================================================
// Generation Commands
// ============================================================================

async fn cmd_generate(ctx: AppContext, request: GenerationRequest) -> Result<()> {
    let mut events = ctx.subscribe();
    let manager = GenerationManager::new(ctx.clone());

    let instance = manager.start_new_generation(request).await?;
    println!("Project {} ({})", instance.project_id(), instance.id());

    let mut last_phase: Option<GenerationPhase> = None;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(GenerationEvent::Progress { instance_id, phase, percent, eta_seconds, .. })
                    if instance_id == instance.id() =>
                {
                    if last_phase != Some(phase) {
                        if last_phase.is_some() {
                            println!();
                        }
                        last_phase = Some(phase);
                    }
                    print!(
                        "\r[{}/5] {:<20} {:>3}%  ~{}s left ",
                        phase.step_number(),
                        phase.title(),
                        percent,
                        eta_seconds
                    );
                    let _ = std::io::stdout().flush();
                }
                Ok(GenerationEvent::Terminal { instance_id, outcome, .. })
                    if instance_id == instance.id() =>
                {
                    println!();
                    print_outcome(&outcome);
                    return match outcome {
                        TerminalOutcome::Ready { .. } => Ok(()),
                        TerminalOutcome::Failed { message, .. } => anyhow::bail!(message),
                    };
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Skipped {} progress events", n);
                }
                Err(e) => anyhow::bail!("Event stream closed: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                manager.shutdown().await;
                println!("Interrupted. Run `narrio resume` to pick the job back up.");
                return Ok(());
            }
        }
    }
}

async fn cmd_resume(ctx: AppContext) -> Result<()> {
    let manager = GenerationManager::new(ctx);
    let restored = manager.restore().await?;

    if restored == 0 {
        println!("No jobs to resume.");
        return Ok(());
    }
    println!("Resuming {} job(s)...", restored);

    let instances = manager.active().await;
    let waits = instances.iter().map(|instance| async move {
        let outcome = instance.wait_for_outcome().await;
        (instance.project_id(), outcome)
    });

    tokio::select! {
        results = futures_util::future::join_all(waits) => {
            for (project_id, outcome) in results {
                print!("{}  ", project_id);
                match outcome {
                    Some(outcome) => print_outcome(&outcome),
                    None => println!("cancelled"),
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            manager.shutdown().await;
            println!("Interrupted. Remaining jobs stay recorded.");
        }
    }

    Ok(())
}

fn print_outcome(outcome: &TerminalOutcome) {
    match outcome {
        TerminalOutcome::Ready {
            video_url,
            duration_secs,
            ..
        } => {
            match duration_secs {
                Some(d) => println!("Ready ({:.0}s): {}", d, video_url),
                None => println!("Ready: {}", video_url),
            }
        }
        TerminalOutcome::Failed { kind, message } => {
            println!("Failed ({:?}): {}", kind, message);
        }
    }
}

// ============================================================================
// Backend Commands
// ============================================================================

async fn cmd_status(config: &AppConfig, task_id: &str) -> Result<()> {
    let api = HttpJobApi::new(&config.api)?;
    let response = api.get_job_status(task_id).await?;

    println!("Task:   {}", task_id);
    println!("Status: {}", response.status);
    if let Some(error) = response.error {
        println!("Error:  {}", error);
    }
    Ok(())
}

async fn cmd_server_status(config: &AppConfig) -> Result<()> {
    let api = HttpJobApi::new(&config.api)?;
    let running = api.check_server_status().await?;
    info!("Checked server status at {}", config.api.base_url);

    if running {
        println!("Server at {} is running", config.api.base_url);
        Ok(())
    } else {
        anyhow::bail!("Server at {} is not running", config.api.base_url)
    }
}

// ============================================================================
// Catalog Commands
// ============================================================================

async fn cmd_avatars(config: &AppConfig, search: Option<&str>) -> Result<()> {
    let api = HttpJobApi::new(&config.api)?;
    let generation = &config.generation;
    let mut avatars = api
        .list_avatar_presets(&generation.poll, generation.completion_timeout)
        .await?;

    if let Some(text) = search {
        let text = text.to_lowercase();
        avatars.retain(|a| {
            a.avatar_name.to_lowercase().contains(&text) || a.avatar_id.to_lowercase().contains(&text)
        });
    }

    if avatars.is_empty() {
        println!("No avatars found.");
        return Ok(());
    }

    println!("{:<36}  {:<8}  {:<7}  {}", "AVATAR ID", "GENDER", "PREMIUM", "NAME");
    println!("{}", "-".repeat(80));
    for avatar in &avatars {
        println!(
            "{:<36}  {:<8}  {:<7}  {}",
            avatar.avatar_id,
            avatar.gender.as_deref().unwrap_or("-"),
            if avatar.premium { "yes" } else { "no" },
            avatar.avatar_name
        );
    }
    println!("\n{} avatars", avatars.len());
    Ok(())
}

async fn cmd_voices(config: &AppConfig, locale: Option<&str>) -> Result<()> {
    let api = HttpJobApi::new(&config.api)?;
    let generation = &config.generation;
    let mut voices = api
        .list_voices(&generation.poll, generation.completion_timeout)
        .await?;

    if let Some(locale) = locale {
        voices.retain(|v| {
            v.language_code
                .as_deref()
                .is_some_and(|code| code.eq_ignore_ascii_case(locale))
        });
    }

    if voices.is_empty() {
        println!("No voices found.");
        return Ok(());
    }

    println!("{:<34}  {:<8}  {:<8}  {}", "VOICE ID", "LOCALE", "GENDER", "NAME");
    println!("{}", "-".repeat(80));
    for voice in &voices {
        println!(
            "{:<34}  {:<8}  {:<8}  {}",
            voice.voice_id,
            voice.language_code.as_deref().unwrap_or("-"),
            voice.gender.as_deref().unwrap_or("-"),
            voice.display_name()
        );
    }
    println!("\n{} voices", voices.len());
    Ok(())
}

async fn cmd_avatar_create(config: &AppConfig, prompt: &str, go_fast: bool) -> Result<()> {
    let api = HttpJobApi::new(&config.api)?;
    let task_id = api.create_avatar_from_prompt(prompt, go_fast).await?;
    println!("Avatar task {} submitted", task_id);

    let generation = &config.generation;
    wait_for_task(&api, &task_id, &generation.poll, generation.completion_timeout).await?;
    println!("Avatar task {} completed", task_id);
    Ok(())
}

// ============================================================================
// Store Commands
// ============================================================================

async fn cmd_projects(ctx: &AppContext, status_filter: Option<String>) -> Result<()> {
    let projects = match status_filter.as_deref().map(parse_status).transpose()? {
        Some(status) => ctx.projects.list_by_status(status).await?,
        None => ctx.projects.list().await?,
    };

    if projects.is_empty() {
        println!("No projects found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<12}  {:<22}  {:>6}  {}",
        "PROJECT ID", "STATUS", "CREATED AT", "LENGTH", "TITLE"
    );
    println!("{}", "-".repeat(100));

    for project in &projects {
        let title = project.title.chars().take(30).collect::<String>();
        println!(
            "{:<36}  {:<12}  {:<22}  {:>6}  {}",
            project.id,
            project.status.as_str(),
            format_timestamp(&project.created_at),
            project.formatted_duration(),
            title
        );
    }

    println!("\nTotal: {} projects", projects.len());
    Ok(())
}

async fn cmd_jobs(ctx: &AppContext) -> Result<()> {
    let jobs = ctx.registry.all().await?;

    if jobs.is_empty() {
        println!("No jobs in flight.");
        return Ok(());
    }

    println!("{:<36}  {:<24}  {}", "PROJECT ID", "TASK ID", "SUBMITTED AT");
    println!("{}", "-".repeat(86));
    for job in &jobs {
        println!(
            "{:<36}  {:<24}  {}",
            job.project_id,
            job.remote_task_id,
            format_timestamp(&job.created_at)
        );
    }

    println!("\nTotal: {} jobs", jobs.len());
    Ok(())
}

async fn cmd_rename(ctx: &AppContext, id: &str, name: &str) -> Result<()> {
    let project = ctx.projects.rename(parse_id(id)?, name).await?;
    println!("Renamed {} to \"{}\"", project.id, project.title);
    Ok(())
}

async fn cmd_delete(ctx: AppContext, id: &str) -> Result<()> {
    let project_id = parse_id(id)?;
    let manager = GenerationManager::new(ctx);

    if manager.delete_project(project_id).await? {
        println!("Deleted project {}", project_id);
    } else {
        println!("No project {}", project_id);
    }
    Ok(())
}

async fn cmd_stats(ctx: &AppContext, config: &AppConfig) -> Result<()> {
    let stats = ctx.projects.stats().await?;
    let jobs = ctx.registry.all().await?;

    println!("=== Narrio Project Stats ===");
    if let Some(path) = &config.db_path {
        println!("Database: {}", path);
    }
    println!();
    println!("Projects: {} total", stats.total);
    let mut by_status: Vec<_> = stats.by_status.iter().collect();
    by_status.sort();
    for (status, count) in by_status {
        println!("  {:12} {}", status, count);
    }
    println!("Created in the last 7 days: {}", stats.created_last_week);
    println!("Jobs in flight: {}", jobs.len());

    Ok(())
}

async fn cmd_export(ctx: &AppContext, format: &str) -> Result<()> {
    if format != "json" {
        anyhow::bail!("Unsupported format '{}'. Only 'json' is supported.", format);
    }

    let projects = ctx.projects.list().await?;
    let jobs = ctx.registry.all().await?;
    let stats = ctx.projects.stats().await?;

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "stats": stats,
        "projects": projects,
        "jobs": jobs,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}
