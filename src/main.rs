//! Lamad Progress CLI
//!
//! Drives one course navigator per invocation against the configured
//! completion store. Useful for seeding progress, checking what a learner
//! has completed and inspecting device drafts.
//!
//! ## Usage
//!
//! ```bash
//! # Is the unit complete for u1?
//! lamad-progress --learner u1 --course course.toml status ethics:week1:privacy
//!
//! # Mark complete, answering the unit's quiz first
//! lamad-progress --learner u1 --course course.toml complete ethics:week1:quiz -a q1=0 -a q2=1
//!
//! # Course summary
//! lamad-progress --learner u1 --course course.toml progress
//!
//! # Drafts on this device
//! lamad-progress draft save privacy:week2:redaction demo "My SSN is [REDACTED]"
//! lamad-progress draft show privacy:week2:redaction demo
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use lamad_progress::events::spawn_logging_listener;
use lamad_progress::{
    AuthProvider, Collaborators, CompletionStore, Config, ContentUnit, ContentUnitKey,
    Course, CourseNavigator, DraftCache, EventBus, HttpAuthProvider, HttpCompletionStore,
    IdentityResolver, LearnerIdentity, RemoteConfig, RemoteStore, SledStorage,
    SqliteCompletionStore, StaticAuthProvider, StoreScope,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lamad-progress")]
#[command(about = "Learner progress tracking for Lamad lessons")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Course catalog (TOML)
    #[arg(long, env = "LAMAD_COURSE")]
    course: Option<PathBuf>,

    /// Learner to act as (omit for an anonymous session)
    #[arg(long, env = "LAMAD_LEARNER_ID")]
    learner: Option<String>,

    /// Hosted store base URL
    #[arg(long, env = "LAMAD_REMOTE_URL")]
    remote_url: Option<String>,

    /// Learner session token for the hosted auth endpoint
    #[arg(long, env = "LAMAD_SESSION_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show page state for a unit
    Status { unit: String },
    /// Mark a unit complete
    Complete {
        unit: String,
        /// Quiz answer as question_id=option_index (repeatable)
        #[arg(short, long = "answer", value_parser = parse_answer)]
        answers: Vec<(String, usize)>,
    },
    /// Print the unit that follows, if advancing is allowed
    Advance { unit: String },
    /// Summarise completion across the course
    Progress,
    /// Device-local practice drafts
    Draft {
        #[command(subcommand)]
        action: DraftAction,
    },
}

#[derive(Subcommand, Debug)]
enum DraftAction {
    Save { unit: String, field: String, value: String },
    Show { unit: String, field: String },
}

fn parse_answer(s: &str) -> Result<(String, usize), String> {
    let (question, option) = s
        .split_once('=')
        .ok_or_else(|| format!("expected question_id=option_index, got '{}'", s))?;
    let option = option
        .parse()
        .map_err(|e| format!("bad option index '{}': {}", option, e))?;
    Ok((question.to_string(), option))
}

fn build_store(config: &Config) -> anyhow::Result<Arc<dyn RemoteStore>> {
    match config.remote_url {
        Some(ref url) => {
            info!(url = %url, "Using hosted completion store");
            Ok(Arc::new(HttpCompletionStore::new(remote_config(config, url))?))
        }
        None => Ok(Arc::new(SqliteCompletionStore::open(
            &config.completions_db_path(),
            StoreScope::from_config(config)?,
        )?)),
    }
}

fn remote_config(config: &Config, url: &str) -> RemoteConfig {
    RemoteConfig {
        base_url: url.to_string(),
        api_key: config.remote_api_key.clone(),
        table: config.remote_table.clone(),
        timeout: config.remote_timeout(),
    }
}

fn build_auth(config: &Config, args: &Args) -> anyhow::Result<Arc<dyn AuthProvider>> {
    match (&config.remote_url, &args.token) {
        (Some(url), Some(token)) => Ok(Arc::new(HttpAuthProvider::new(
            &remote_config(config, url),
            Some(token),
        )?)),
        _ => Ok(Arc::new(match args.learner {
            Some(ref id) => StaticAuthProvider::signed_in(id.clone()),
            None => StaticAuthProvider::anonymous(),
        })),
    }
}

fn load_course(config: &Config) -> anyhow::Result<Option<Course>> {
    config
        .course_file
        .as_ref()
        .map(|path| Course::load(path).with_context(|| format!("loading {}", path.display())))
        .transpose()
}

fn navigator_for(
    course: Option<&Course>,
    unit: &str,
    services: Collaborators,
    config: &Config,
) -> anyhow::Result<CourseNavigator> {
    let key = ContentUnitKey::new(unit)?;
    match course {
        Some(course) => Ok(CourseNavigator::for_course(
            course,
            &key,
            services,
            config.focus_band_bottom_margin,
        )?),
        None => Ok(CourseNavigator::new(
            ContentUnit::ungated(key, unit),
            None,
            services,
            config.focus_band_bottom_margin,
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("lamad_progress=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(ref dir) = args.storage_dir {
        config.storage_dir = dir.clone();
    }
    if let Some(ref course) = args.course {
        config.course_file = Some(course.clone());
    }
    if let Some(ref url) = args.remote_url {
        config.remote_url = Some(url.clone());
    }

    tokio::fs::create_dir_all(&config.storage_dir).await?;
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let drafts = Arc::new(DraftCache::new(Box::new(SledStorage::open(config.drafts_db_path())?)));

    if let Command::Draft { ref action } = args.command {
        match action {
            DraftAction::Save { unit, field, value } => {
                drafts.save(&ContentUnitKey::new(unit.as_str())?, field, value)?;
            }
            DraftAction::Show { unit, field } => {
                match drafts.restore(&ContentUnitKey::new(unit.as_str())?, field)? {
                    Some(value) => println!("{}", value),
                    None => bail!("no draft for {} / {}", unit, field),
                }
            }
        }
        return Ok(());
    }

    let store = Arc::new(CompletionStore::new(build_store(&config)?, config.remote_timeout()));
    let resolver = Arc::new(IdentityResolver::new(build_auth(&config, &args)?, config.remote_timeout()));
    let events = Arc::new(EventBus::new());
    let listener = spawn_logging_listener(events.clone());
    let services = Collaborators {
        resolver,
        store,
        drafts,
        events,
    };
    let course = load_course(&config)?;

    let outcome = run(args.command, course, services, &config).await;
    // Every bus handle is gone once run returns, so the listener drains and exits
    let _ = listener.await;
    outcome
}

async fn run(
    command: Command,
    course: Option<Course>,
    services: Collaborators,
    config: &Config,
) -> anyhow::Result<()> {
    match command {
        Command::Status { unit } => {
            let nav = navigator_for(course.as_ref(), &unit, services, config)?;
            let page = nav.load().await;
            println!("{}", serde_json::to_string_pretty(&page)?);
            if let Some(notice) = nav.take_notice() {
                eprintln!("{}", notice.message());
            }
        }
        Command::Complete { unit, answers } => {
            let nav = navigator_for(course.as_ref(), &unit, services, config)?;
            nav.load().await;
            if !answers.is_empty() {
                for (question, option) in &answers {
                    nav.select_answer(question, *option);
                }
                nav.submit_quiz();
            }
            match nav.mark_complete().await {
                Ok(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                Err(e) => bail!(e.user_message()),
            }
        }
        Command::Advance { unit } => {
            let nav = navigator_for(course.as_ref(), &unit, services, config)?;
            nav.load().await;
            match nav.advance() {
                Ok(Some(next)) => println!("{}", next),
                Ok(None) => println!("end of course"),
                Err(e) => bail!(e.user_message()),
            }
        }
        Command::Progress => {
            let Some(course) = course else {
                bail!("progress needs a course catalog (--course)");
            };
            let LearnerIdentity::Identified(learner_id) =
                services.resolver.resolve().await.identity.clone()
            else {
                bail!("sign in to see progress");
            };
            let records = services.store.read_many(&learner_id, &course.unit_keys()).await?;
            println!("{}", serde_json::to_string_pretty(&course.progress(&records))?);
        }
        Command::Draft { .. } => {}
    }

    Ok(())
}
