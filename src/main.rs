mod document;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use qrouter_core::config::AppConfig;
use qrouter_core::ConditionEvaluator;
use qrouter_engine::{ParallelRouter, TaskRouter};
use qrouter_expr::ExpressionEvaluator;

use document::Document;

#[derive(Parser)]
#[command(name = "qrouter", version, about = "Route questionnaires through their section graphs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "qrouter.toml", env = "QROUTER_CONFIG")]
    config: PathBuf,

    /// Include the full context in the output
    #[arg(long, global = true)]
    context: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the router and report where the questionnaire stands
    Validate { document: PathBuf },
    /// Show the current section, or move to a visited one
    Current {
        document: PathBuf,
        /// Section id or `#machine` to move to
        #[arg(long)]
        section: Option<String>,
        /// Persist the moved cursor back to the document
        #[arg(long)]
        write: bool,
    },
    /// First section of the current task
    First { document: PathBuf },
    /// Last section of the current task
    Last { document: PathBuf },
    /// Answer a section and move on
    Next {
        document: PathBuf,
        #[arg(long)]
        section: Option<String>,
        /// Event to fire (defaults to router.default_event)
        #[arg(long)]
        event: Option<String>,
        /// Answers for the section, as JSON
        #[arg(long)]
        answers: Option<String>,
        #[arg(long)]
        write: bool,
    },
    /// Step back to the previous section
    Previous {
        document: PathBuf,
        #[arg(long)]
        section: Option<String>,
        #[arg(long)]
        write: bool,
    },
}

impl Commands {
    fn document(&self) -> &Path {
        match self {
            Commands::Validate { document }
            | Commands::Current { document, .. }
            | Commands::First { document }
            | Commands::Last { document }
            | Commands::Next { document, .. }
            | Commands::Previous { document, .. } => document,
        }
    }

    fn writes(&self) -> bool {
        match self {
            Commands::Current { write, .. }
            | Commands::Next { write, .. }
            | Commands::Previous { write, .. } => *write,
            _ => false,
        }
    }
}

fn parse_answers(raw: Option<&str>) -> anyhow::Result<Option<Value>> {
    raw.map(|raw| {
        serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("--answers is not valid JSON: {e}"))
    })
    .transpose()
}

fn not_available(section: Option<&str>) -> anyhow::Error {
    anyhow::anyhow!("section \"{}\" is not available", section.unwrap_or_default())
}

/// Operations shared by both routers, reduced to the section id they land on.
trait Navigate {
    fn current_id(&self) -> String;
    fn move_to(&mut self, section: Option<&str>) -> Option<String>;
    fn first_id(&self) -> String;
    fn last_id(&self) -> String;
    fn advance(
        &mut self,
        answers: Option<Value>,
        section: Option<&str>,
        event: Option<&str>,
    ) -> qrouter_core::Result<String>;
    fn back(&mut self, section: Option<&str>) -> qrouter_core::Result<String>;
}

impl Navigate for TaskRouter {
    fn current_id(&self) -> String {
        self.current_section_id().to_string()
    }
    fn move_to(&mut self, section: Option<&str>) -> Option<String> {
        self.current(section).map(|step| step.id)
    }
    fn first_id(&self) -> String {
        self.first().to_string()
    }
    fn last_id(&self) -> String {
        self.last().to_string()
    }
    fn advance(
        &mut self,
        answers: Option<Value>,
        section: Option<&str>,
        event: Option<&str>,
    ) -> qrouter_core::Result<String> {
        Ok(self.next(answers, section, event)?.id)
    }
    fn back(&mut self, section: Option<&str>) -> qrouter_core::Result<String> {
        Ok(self.previous(section)?.id)
    }
}

impl Navigate for ParallelRouter {
    fn current_id(&self) -> String {
        self.current_section_id().to_string()
    }
    fn move_to(&mut self, section: Option<&str>) -> Option<String> {
        self.current(section).map(|step| step.id)
    }
    fn first_id(&self) -> String {
        self.first().to_string()
    }
    fn last_id(&self) -> String {
        self.last().to_string()
    }
    fn advance(
        &mut self,
        answers: Option<Value>,
        section: Option<&str>,
        event: Option<&str>,
    ) -> qrouter_core::Result<String> {
        Ok(self.next(answers, section, event)?.id)
    }
    fn back(&mut self, section: Option<&str>) -> qrouter_core::Result<String> {
        Ok(self.previous(section)?.id)
    }
}

fn run(router: &mut impl Navigate, command: &Commands) -> anyhow::Result<String> {
    let id = match command {
        Commands::Validate { .. } => router.current_id(),
        Commands::Current { section, .. } => router
            .move_to(section.as_deref())
            .ok_or_else(|| not_available(section.as_deref()))?,
        Commands::First { .. } => router.first_id(),
        Commands::Last { .. } => router.last_id(),
        Commands::Next {
            section,
            event,
            answers,
            ..
        } => {
            let answers = parse_answers(answers.as_deref())?;
            router.advance(answers, section.as_deref(), event.as_deref())?
        }
        Commands::Previous { section, .. } => router.back(section.as_deref())?,
    };
    Ok(id)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        AppConfig::default()
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    debug!(config = %cli.config.display(), "Loaded configuration");

    let evaluator: Arc<dyn ConditionEvaluator> = Arc::new(ExpressionEvaluator::new());
    let path = cli.command.document();

    let output = match Document::load(path)? {
        Document::Task(context) => {
            let mut router = TaskRouter::with_options(context, evaluator, config.router)?;
            let id = run(&mut router, &cli.command)?;
            if cli.command.writes() {
                document::save(path, router.context())?;
                info!(document = %path.display(), "Saved questionnaire");
            }
            let mut output = json!({"id": id});
            if cli.context {
                output["context"] = serde_json::to_value(router.context())?;
            }
            output
        }
        Document::Parallel(context) => {
            let mut router = ParallelRouter::with_options(context, evaluator, config.router)?;
            let id = run(&mut router, &cli.command)?;
            if cli.command.writes() {
                document::save(path, router.context())?;
                info!(document = %path.display(), "Saved questionnaire");
            }
            let mut output = json!({"id": id, "value": router.value()});
            if cli.context {
                output["context"] = serde_json::to_value(router.context())?;
            }
            output
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
