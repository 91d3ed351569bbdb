use clap::{Args, Parser, Subcommand};
use config::Config;
use drgreen::{Credentials, DrGreenClient, StrainCache};
use proxy::ActionRouter;
use serde::Serialize;
use service::EdgeService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use store::config::get_store;
use synchronizer::{RehomeOptions, StrainSyncOptions, SyncApi, SyncError};

mod config;
mod logging;
mod service;

#[derive(thiserror::Error, Debug)]
pub enum GreenbridgeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("job failed: {0}")]
    Job(#[from] SyncError),
    #[error("could not encode job report: {0}")]
    Report(#[from] serde_json::Error),
}

#[derive(Args)]
struct ConfigArgs {
    /// Path to the YAML config file
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the edge functions and the admin listener
    Serve(ConfigArgs),
    /// Synchronize the strain catalog once
    SyncStrains {
        #[command(flatten)]
        config: ConfigArgs,
        /// Country to sync, repeatable. Overrides the configured list.
        #[arg(long = "country")]
        countries: Vec<String>,
        #[arg(long)]
        skip_if_fresh_minutes: Option<i64>,
    },
    /// Link upstream clients to local users once
    SyncClients(ConfigArgs),
    /// Re-register clients whose upstream record no longer resolves
    Rehome {
        #[command(flatten)]
        config: ConfigArgs,
        /// Restrict to these upstream client ids, repeatable
        #[arg(long = "client-id")]
        client_ids: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Parser)]
#[command(name = "greenbridge", version, about)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

impl CliCommand {
    fn config_path(&self) -> &std::path::Path {
        match self {
            CliCommand::Serve(args) | CliCommand::SyncClients(args) => &args.config,
            CliCommand::SyncStrains { config, .. } | CliCommand::Rehome { config, .. } => {
                &config.config
            }
        }
    }
}

struct Components {
    client: Arc<DrGreenClient>,
    router: Arc<ActionRouter>,
    jobs: Arc<SyncApi>,
}

fn build(config: &Config) -> Components {
    let client = Arc::new(DrGreenClient::new(&config.upstream, Credentials::from_env()));
    let store = get_store(&config.store);
    let cache = Arc::new(StrainCache::new(&config.cache));

    Components {
        router: Arc::new(ActionRouter::new(
            client.clone(),
            store.clone(),
            cache.clone(),
        )),
        jobs: Arc::new(SyncApi::new(
            client.clone(),
            store,
            cache,
            config.rehome.clone(),
        )),
        client,
    }
}

fn print_report<T: Serialize>(report: &T) -> Result<(), GreenbridgeError> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

async fn serve(config: Config, components: Components) -> Result<(), GreenbridgeError> {
    let Components {
        client,
        router,
        jobs,
    } = components;
    let edge = EdgeService::new(router, jobs);
    let admin = AdminService::<_, GreenbridgeError>::new(move || client.is_configured());

    tracing::info!(
        listener = %format!("{}:{}", config.listener.host, config.listener.port),
        admin_listener = %format!("{}:{}", config.admin_listener.host, config.admin_listener.port),
        "Starting greenbridge"
    );
    tokio::try_join!(
        run_http_service(&config.listener.host, config.listener.port, edge),
        run_http_service(
            &config.admin_listener.host,
            config.admin_listener.port,
            admin
        ),
    )?;
    Ok(())
}

async fn run(command: CliCommand, config: Config) -> Result<(), GreenbridgeError> {
    let components = build(&config);

    match command {
        CliCommand::Serve(_) => serve(config, components).await,
        CliCommand::SyncStrains {
            countries,
            skip_if_fresh_minutes,
            ..
        } => {
            let mut options: StrainSyncOptions = config.jobs.sync_strains.clone();
            if !countries.is_empty() {
                options.country_codes = countries;
                options.country_code = None;
            }
            if skip_if_fresh_minutes.is_some() {
                options.skip_if_fresh_minutes = skip_if_fresh_minutes;
            }
            print_report(&components.jobs.strains().run(&options).await?)
        }
        CliCommand::SyncClients(_) => {
            let report = components
                .jobs
                .clients()
                .run(&config.jobs.sync_clients)
                .await?;
            print_report(&report)
        }
        CliCommand::Rehome {
            client_ids,
            dry_run,
            ..
        } => {
            let options = RehomeOptions {
                client_ids: Some(client_ids).filter(|ids| !ids.is_empty()),
                dry_run,
                batch_size: None,
            };
            print_report(&components.jobs.rehomer().run(&options).await?)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(cli.command.config_path()).and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _sentry = logging::init_logging(&config.logging);
    if let Some(metrics) = &config.metrics
        && let Err(e) = logging::init_metrics(metrics)
    {
        tracing::error!(error = %e, "Metrics disabled");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Could not start the runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli.command, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "greenbridge exited with an error");
            ExitCode::FAILURE
        }
    }
}
