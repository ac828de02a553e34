//! CLI command definitions and dispatch

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Subcommand;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::common::config::{RunConf, ServerConf};
use crate::common::{Error, Result};
use crate::run::{CommandStatus, InteractionEngine, Run, RunEvent, RunResult};
use crate::script::{compile, EnvSet};
use crate::server::{
    CombinedStats, NullStore, ProcessFactory, Rejection, Scheduler, StaticCatalog,
    StaticIdentityStore, SubmissionRequest,
};
use crate::sim::ProcessConsole;

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a script and print the resulting command list
    Compile {
        /// Path to the script file
        script: PathBuf,

        /// Run configuration file (TOML)
        #[arg(long, short)]
        conf: Option<PathBuf>,

        /// Emit the command list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compile and execute a script against a live simulator
    Run {
        /// Path to the script file
        script: PathBuf,

        /// Kernel image to boot
        #[arg(long, short, default_value = "kernel")]
        kernel: String,

        /// Run configuration file (TOML)
        #[arg(long, short)]
        conf: Option<PathBuf>,

        /// Directory the simulator session runs in
        #[arg(long, short, default_value = ".")]
        workdir: PathBuf,

        /// Print the finished run snapshot as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Run the submission server, speaking JSON lines on stdin/stdout
    Serve {
        /// Server configuration file (TOML)
        #[arg(long, short, default_value = "sim161.toml")]
        conf: PathBuf,
    },
}

pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Compile { script, conf, json } => compile_cmd(&script, conf.as_deref(), json),
        Commands::Run {
            script,
            kernel,
            conf,
            workdir,
            json,
        } => run_cmd(&script, &kernel, conf.as_deref(), &workdir, json).await,
        Commands::Serve { conf } => serve_cmd(&conf).await,
    }
}

fn load_run_conf(path: Option<&Path>) -> Result<RunConf> {
    let Some(path) = path else {
        return Ok(RunConf::default());
    };
    let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
    toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))
}

fn compile_cmd(script: &Path, conf: Option<&Path>, json: bool) -> Result<()> {
    let conf = load_run_conf(conf)?;
    let text = read_script(script)?;
    let envs = EnvSet::new(&conf.env_defs)?;
    let commands = compile(&text, &envs, &conf.overrides)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&commands)?);
        return Ok(());
    }

    for command in &commands {
        println!("{:>3}  {:8}  {}", command.index, command.env.cyan(), command.input);
    }
    Ok(())
}

async fn run_cmd(
    script: &Path,
    kernel: &str,
    conf: Option<&Path>,
    workdir: &Path,
    json: bool,
) -> Result<()> {
    let conf = load_run_conf(conf)?;
    let text = read_script(script)?;
    let run = Run::new(&text, conf)?;

    // Stream output lines as they complete
    let mut events = run.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let RunEvent::OutputAppended { line, .. } = event {
                println!("{}", line.line);
            }
        }
    });

    let mut console = ProcessConsole::launch(&run.conf.sim, run.seed, kernel, workdir).await?;
    let result = InteractionEngine::new().run(&run, &mut console).await;
    printer.abort();

    if json {
        println!("{}", serde_json::to_string_pretty(&run.snapshot())?);
        return Ok(());
    }

    println!();
    for command in run.commands().lock().unwrap_or_else(|e| e.into_inner()).iter() {
        let status = match command.status {
            CommandStatus::Matched => "ok".green(),
            CommandStatus::None | CommandStatus::Sent => "-".normal(),
            other => format!("{:?}", other).to_lowercase().red(),
        };
        println!("{:>3}  {:8}  {:10}  {}", command.index, command.env, status, command.input);
    }

    let label = match result {
        RunResult::Shutdown => "shutdown".green(),
        other => format!("{:?}", other).to_lowercase().red(),
    };
    println!("\nresult: {}  (sim time {:.1}s)", label, run.sim_time());

    if result == RunResult::Shutdown {
        Ok(())
    } else {
        Err(Error::Config(format!("run ended with {:?}", result)))
    }
}

/// One request line on the server's stdin
#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
enum ServerRequest {
    Submit(SubmissionRequest),
    Stats,
    Targets,
    Drain,
}

/// One reply line on the server's stdout
#[derive(Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
enum ServerReply {
    Accepted {
        id: Uuid,
    },
    Rejected {
        #[serde(flatten)]
        rejection: Rejection,
    },
    Stats {
        #[serde(flatten)]
        stats: CombinedStats,
    },
    Targets {
        targets: Vec<String>,
    },
    Error {
        message: String,
    },
}

async fn serve_cmd(conf_path: &Path) -> Result<()> {
    let conf = ServerConf::load(conf_path)?;

    let catalog = if conf.targets.exists() {
        StaticCatalog::load_yaml(&conf.targets)?
    } else {
        tracing::warn!(path = %conf.targets.display(), "target catalog not found, serving none");
        StaticCatalog::default()
    };

    let scheduler = Scheduler::new(
        conf,
        Arc::new(catalog),
        Arc::new(StaticIdentityStore::default()),
        Arc::new(NullStore),
        Arc::new(ProcessFactory::new(PathBuf::from("runs"))),
    );

    tracing::info!("server ready, reading requests from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                scheduler.shutdown();
                break;
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) if !line.trim().is_empty() => {
                        let reply = handle_request(&scheduler, &line).await;
                        println!("{}", serde_json::to_string(&reply)?);
                    }
                    Some(_) => {}
                    None => {
                        scheduler.drain();
                        break;
                    }
                }
            }
        }
    }

    // Let in-flight work finish before exiting
    loop {
        let stats = scheduler.combined_stats();
        if stats.running == 0 && stats.queued == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(())
}

async fn handle_request(scheduler: &Scheduler, line: &str) -> ServerReply {
    let request: ServerRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return ServerReply::Error {
                message: format!("bad request: {}", e),
            }
        }
    };

    match request {
        ServerRequest::Submit(request) => match scheduler.submit(request).await {
            Ok(submission) => {
                let id = submission.id;
                scheduler.run(submission);
                ServerReply::Accepted { id }
            }
            Err(rejection) => ServerReply::Rejected { rejection },
        },
        ServerRequest::Stats => ServerReply::Stats {
            stats: scheduler.combined_stats(),
        },
        ServerRequest::Targets => ServerReply::Targets {
            targets: scheduler.targets().await.into_iter().map(|t| t.name).collect(),
        },
        ServerRequest::Drain => {
            scheduler.drain();
            ServerReply::Stats {
                stats: scheduler.combined_stats(),
            }
        }
    }
}
