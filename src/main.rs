//! Artifact repository CLI
//!
//! Entry point for the `artifact-repo` command-line tool.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use artifact_repo_client::{ClientConfig, IncludeContent, RepoError, RepositoryClient};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "artifact-repo")]
#[command(about = "Query and manage an artifact repository", version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Repository base URL (overrides the config file)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the repository's status
    Status,

    /// List namespaces
    Namespaces,

    /// List the AUs of a namespace
    Aus { namespace: String },

    /// List artifacts of an AU
    List {
        namespace: String,
        auid: String,

        /// Only this URL
        #[arg(long, conflicts_with = "prefix")]
        url: Option<String>,

        /// Only URLs starting with this prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Every committed version rather than the latest
        #[arg(long)]
        all_versions: bool,
    },

    /// Fetch one artifact by UUID
    Get {
        namespace: String,
        uuid: String,

        /// ALWAYS, IF_SMALL or NEVER
        #[arg(long, default_value = "ALWAYS", value_parser = parse_include)]
        include: IncludeContent,

        /// Write the payload here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Commit an uncommitted artifact
    Commit { namespace: String, uuid: String },

    /// Delete an artifact
    Delete { namespace: String, uuid: String },

    /// Show the size of an AU
    AuSize { namespace: String, auid: String },

    /// Show repository storage information
    RepoInfo,
}

fn parse_include(s: &str) -> Result<IncludeContent, String> {
    IncludeContent::parse(&s.to_ascii_uppercase()).ok_or_else(|| format!("unknown include mode: {s}"))
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let overrides = cli.base_url.as_ref().map(|url| json!({ "base_url": url }));
    let config = match ClientConfig::load(cli.config.as_deref(), overrides) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(2);
        }
    };
    debug!(?config, "configuration loaded");

    let client = match RepositoryClient::connect(&config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };

    if let Err(e) = run(&client, cli.command) {
        eprintln!("Error: {}", e);
        process::exit(if e.is_not_found() { 3 } else { 1 });
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn run(client: &RepositoryClient, command: Commands) -> Result<(), RepoError> {
    match command {
        Commands::Status => print_json(&client.get_status()?),
        Commands::Namespaces => {
            for namespace in client.get_namespaces() {
                println!("{}", namespace?);
            }
            Ok(())
        }
        Commands::Aus { namespace } => {
            for auid in client.get_au_ids(&namespace)? {
                println!("{}", auid?);
            }
            Ok(())
        }
        Commands::List {
            namespace,
            auid,
            url,
            prefix,
            all_versions,
        } => {
            let artifacts = match (url, prefix, all_versions) {
                (Some(url), _, _) if all_versions => client.get_artifacts_all_versions(&namespace, &auid, &url)?,
                (Some(url), _, _) => {
                    let found = client.get_artifact(&namespace, &auid, &url)?;
                    return print_json(&found);
                }
                (None, Some(prefix), true) => client.get_artifacts_with_prefix_all_versions(&namespace, &auid, &prefix)?,
                (None, Some(prefix), false) => client.get_artifacts_with_prefix(&namespace, &auid, &prefix)?,
                (None, None, true) => client.get_artifacts_all_versions_all_urls(&namespace, &auid)?,
                (None, None, false) => client.get_artifacts(&namespace, &auid)?,
            };
            for artifact in artifacts {
                let artifact = artifact?;
                println!(
                    "{}\t{}\t{}\t{}",
                    artifact.uuid(),
                    artifact.version(),
                    artifact.content_length,
                    artifact.uri()
                );
            }
            Ok(())
        }
        Commands::Get {
            namespace,
            uuid,
            include,
            output,
        } => {
            let mut data = client.get_artifact_data_by_uuid(&namespace, &uuid, include)?;
            if let Some(status) = &data.http_status {
                eprintln!("{}", status);
            }
            for (name, value) in data.headers.iter() {
                eprintln!("{}: {}", name, value);
            }
            if let Some(content) = data.read_content()? {
                match output {
                    Some(path) => std::fs::write(path, content)?,
                    None => io::stdout().write_all(&content)?,
                }
            }
            Ok(())
        }
        Commands::Commit { namespace, uuid } => print_json(&client.commit_artifact(&namespace, &uuid)?),
        Commands::Delete { namespace, uuid } => {
            client.delete_artifact(&namespace, &uuid)?;
            println!("Deleted {}", uuid);
            Ok(())
        }
        Commands::AuSize { namespace, auid } => print_json(&client.au_size(&namespace, &auid)?),
        Commands::RepoInfo => print_json(&client.get_repository_info()?),
    }
}

fn print_json(value: &impl Serialize) -> Result<(), RepoError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
