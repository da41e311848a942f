#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

//! Command line front end: run sets and manage their definitions and data.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;

use xenia::definitions::{Mask, Regex, Script, Set};
use xenia::document::documents_from_json_str;
use xenia::pipeline::Vars;
use xenia::{Config, Xenia};

#[derive(Parser, Debug)]
#[clap(name = "xenia", version, about = "Executes parameterized sets of aggregation pipelines.")]
struct Cli {
    #[clap(flatten)]
    overrides: ConfigArgs,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// JSON config file; flags and environment variables override it.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(long, global = true, env = "XENIA_DATA_PATH")]
    data_path: Option<PathBuf>,

    #[clap(long, global = true, env = "XENIA_CACHE_CAPACITY")]
    cache_capacity: Option<usize>,

    #[clap(long, global = true, env = "XENIA_CACHE_TTL_SECS")]
    cache_ttl_secs: Option<u64>,

    #[clap(long, global = true, env = "XENIA_SCRIPT_COLLECTION")]
    script_collection: Option<String>,
}

impl ConfigArgs {
    fn resolve(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(data_path) = self.data_path {
            config.data_path = data_path;
        }
        if let Some(capacity) = self.cache_capacity {
            config.cache_capacity = capacity;
        }
        if let Some(ttl) = self.cache_ttl_secs {
            config.cache_ttl_secs = ttl;
        }
        if let Some(collection) = self.script_collection {
            config.script_collection = collection;
        }
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a stored set by name, or an inline set from a file.
    Exec(ExecArgs),

    /// Manage sets.
    Set {
        #[clap(subcommand)]
        command: DefinitionCommand,
    },

    /// Manage named validation regexes.
    Regex {
        #[clap(subcommand)]
        command: DefinitionCommand,
    },

    /// Manage pre/post scripts.
    Script {
        #[clap(subcommand)]
        command: DefinitionCommand,
    },

    /// Manage field masks.
    Mask {
        #[clap(subcommand)]
        command: MaskCommand,
    },

    /// Load or drop collection data.
    Data {
        #[clap(subcommand)]
        command: DataCommand,
    },
}

#[derive(Args, Debug)]
struct ExecArgs {
    #[clap(short, long, conflicts_with = "file", required_unless_present = "file")]
    name: Option<String>,

    #[clap(short, long)]
    file: Option<PathBuf>,

    /// Variables as key=value; repeatable.
    #[clap(short = 'v', long = "var", value_parser = parse_var)]
    vars: Vec<(String, String)>,
}

#[derive(Subcommand, Debug)]
enum DefinitionCommand {
    Upsert {
        #[clap(short, long)]
        file: PathBuf,
    },
    Get {
        #[clap(short, long)]
        name: String,
    },
    List,
    Delete {
        #[clap(short, long)]
        name: String,
    },
    /// Prior versions, oldest first.
    History {
        #[clap(short, long)]
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum MaskCommand {
    Upsert {
        #[clap(short, long)]
        file: PathBuf,
    },
    Get {
        #[clap(short, long)]
        collection: String,
        #[clap(short, long)]
        name: String,
    },
    List,
    Delete {
        #[clap(short, long)]
        collection: String,
        #[clap(short, long)]
        name: String,
    },
    /// Prior versions, oldest first.
    History {
        #[clap(short, long)]
        collection: String,
        #[clap(short, long)]
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum DataCommand {
    /// Append a JSON array of documents to a collection.
    Load {
        #[clap(short, long)]
        collection: String,
        #[clap(short, long)]
        file: PathBuf,
    },
    Drop {
        #[clap(short, long)]
        collection: String,
    },
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {raw}")),
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    serde_json::from_str(&read(path)?).with_context(|| format!("parsing {}", path.display()))
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exec(xenia: &Xenia, args: ExecArgs) -> Result<ExitCode> {
    let vars: Vars = args.vars.into_iter().collect();
    let result = match (args.name, args.file) {
        (Some(name), _) => xenia.executor().exec_name(&name, vars),
        (None, Some(file)) => xenia.executor().exec(&Set::from_json_str(&read(&file)?)?, vars),
        (None, None) => bail!("exec needs --name or --file"),
    };
    print(&result)?;
    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn set(xenia: &Xenia, command: DefinitionCommand) -> Result<()> {
    let registry = xenia.registry();
    match command {
        DefinitionCommand::Upsert { file } => {
            let set = Set::from_json_str(&read(&file)?)?;
            log::info!("cli : set : upserting {}", set.name);
            registry.upsert_set(set)?;
        }
        DefinitionCommand::Get { name } => print(&*registry.set(&name)?)?,
        DefinitionCommand::List => print(&registry.list_sets()?)?,
        DefinitionCommand::Delete { name } => registry.delete_set(&name)?,
        DefinitionCommand::History { name } => print(&registry.set_history(&name)?)?,
    }
    Ok(())
}

fn regex(xenia: &Xenia, command: DefinitionCommand) -> Result<()> {
    let registry = xenia.registry();
    match command {
        DefinitionCommand::Upsert { file } => registry.upsert_regex(read_json::<Regex>(&file)?)?,
        DefinitionCommand::Get { name } => print(&registry.regex_definition(&name)?)?,
        DefinitionCommand::List => print(&registry.list_regexes()?)?,
        DefinitionCommand::Delete { name } => registry.delete_regex(&name)?,
        DefinitionCommand::History { name } => print(&registry.regex_history(&name)?)?,
    }
    Ok(())
}

fn script(xenia: &Xenia, command: DefinitionCommand) -> Result<()> {
    let registry = xenia.registry();
    match command {
        DefinitionCommand::Upsert { file } => registry.upsert_script(read_json::<Script>(&file)?)?,
        DefinitionCommand::Get { name } => print(&*registry.script(&name)?)?,
        DefinitionCommand::List => print(&registry.list_scripts()?)?,
        DefinitionCommand::Delete { name } => registry.delete_script(&name)?,
        DefinitionCommand::History { name } => print(&registry.script_history(&name)?)?,
    }
    Ok(())
}

fn mask(xenia: &Xenia, command: MaskCommand) -> Result<()> {
    let registry = xenia.registry();
    match command {
        MaskCommand::Upsert { file } => registry.upsert_mask(read_json::<Mask>(&file)?)?,
        MaskCommand::Get { collection, name } => print(&registry.mask(&collection, &name)?)?,
        MaskCommand::List => print(&registry.list_masks()?)?,
        MaskCommand::Delete { collection, name } => registry.delete_mask(&collection, &name)?,
        MaskCommand::History { collection, name } => {
            print(&registry.mask_history(&collection, &name)?)?
        }
    }
    Ok(())
}

fn data(xenia: &Xenia, command: DataCommand) -> Result<()> {
    match command {
        DataCommand::Load { collection, file } => {
            let docs = documents_from_json_str(&read(&file)?)
                .with_context(|| format!("parsing {}", file.display()))?;
            let count = xenia.load(&collection, docs)?;
            print(&serde_json::json!({ "collection": collection, "inserted": count }))?;
        }
        DataCommand::Drop { collection } => xenia.drop_collection(&collection)?,
    }
    Ok(())
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.overrides.resolve()?;
    let xenia = Xenia::open(&config)?;
    let code = match cli.command {
        Commands::Exec(args) => exec(&xenia, args)?,
        Commands::Set { command } => set(&xenia, command).map(|_| ExitCode::SUCCESS)?,
        Commands::Regex { command } => regex(&xenia, command).map(|_| ExitCode::SUCCESS)?,
        Commands::Script { command } => script(&xenia, command).map(|_| ExitCode::SUCCESS)?,
        Commands::Mask { command } => mask(&xenia, command).map(|_| ExitCode::SUCCESS)?,
        Commands::Data { command } => data(&xenia, command).map(|_| ExitCode::SUCCESS)?,
    };
    xenia.flush()?;
    Ok(code)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            log::error!("cli : run : {err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
