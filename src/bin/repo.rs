//! Repository administration tool.
//!
//! ```text
//! genoserve-repo ./repo init
//! genoserve-repo ./repo add-referenceset grch38.fa.gz --description "GRCh38"
//! genoserve-repo ./repo add-dataset cohort
//! genoserve-repo ./repo add-variantset cohort ./calls --reference-set grch38
//! genoserve-repo ./repo check
//! ```

use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use genoserve::{
    Error,
    manager::{AddOptions, RepoManager},
    registry::MoveMode,
};

#[derive(Parser)]
#[command(name = "genoserve-repo")]
#[command(version)]
#[command(about = "Create and maintain a genoserve data repository")]
struct Cli {
    /// Repository root
    repo_path: PathBuf,

    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty repository
    Init,

    /// Verify every registered file and index
    Check,

    /// Print the object tree
    List,

    /// Delete the repository and everything in it
    Destroy {
        /// Required; destroying cannot be undone
        #[arg(long)]
        force: bool,
    },

    /// Register a dataset
    AddDataset {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Remove a dataset with its variant and read group sets
    RemoveDataset {
        name: String,
        #[arg(short, long)]
        force: bool,
    },

    /// Register a bgzipped, indexed FASTA and its references
    AddReferenceSet {
        file_path: PathBuf,
        #[command(flatten)]
        add: AddArgs,
        #[arg(short, long)]
        description: Option<String>,
    },

    RemoveReferenceSet {
        name: String,
        #[arg(short, long)]
        force: bool,
    },

    /// Register an indexed BAM under a dataset
    AddReadGroupSet {
        dataset: String,
        file_path: PathBuf,
        #[command(flatten)]
        add: AddArgs,
        /// Reference set the reads were aligned against
        #[arg(long)]
        reference_set: Option<String>,
    },

    RemoveReadGroupSet {
        dataset: String,
        name: String,
        #[arg(short, long)]
        force: bool,
    },

    /// Register a directory of indexed VCF/BCF shards under a dataset
    AddVariantSet {
        dataset: String,
        dir_path: PathBuf,
        #[command(flatten)]
        add: AddArgs,
        /// Reference set the variants were called against
        #[arg(long)]
        reference_set: Option<String>,
        /// Ontology map used for annotation effect terms
        #[arg(long)]
        ontology_map: Option<String>,
    },

    RemoveVariantSet {
        dataset: String,
        name: String,
        #[arg(short, long)]
        force: bool,
    },

    /// Register a tab-separated id/term ontology map
    AddOntologyMap {
        file_path: PathBuf,
        #[command(flatten)]
        add: AddArgs,
    },

    RemoveOntologyMap {
        name: String,
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(clap::Args)]
struct AddArgs {
    /// Register under this name instead of the file name
    #[arg(short, long)]
    name: Option<String>,

    /// How source files are brought into the repository
    #[arg(short, long, value_enum, default_value_t = MoveMode::Copy)]
    move_mode: MoveMode,
}

impl AddArgs {
    fn options(self) -> AddOptions {
        AddOptions {
            name: self.name,
            move_mode: self.move_mode,
            ..AddOptions::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("genoserve=debug,info")
    } else {
        EnvFilter::new("genoserve=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let manager = RepoManager::noodles(&cli.repo_path);
    match run(&manager, cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error[{}]: {}", e.kind(), e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(manager: &RepoManager, command: Commands) -> genoserve::Result<ExitCode> {
    match command {
        Commands::Init => manager.init()?,
        Commands::Check => {
            let problems = manager.check().await?;
            if problems.is_empty() {
                println!("OK");
            } else {
                for problem in &problems {
                    println!("{}", problem);
                }
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::List => {
            for listed in manager.list()? {
                println!(
                    "{}{} {}",
                    "  ".repeat(listed.depth),
                    listed.entry.object_type,
                    listed.entry.name
                );
            }
        }
        Commands::Destroy { force } => {
            if !force {
                return Err(Error::InvalidInput(
                    "refusing to destroy the repository without --force".to_string(),
                ));
            }
            manager.destroy()?;
        }
        Commands::AddDataset { name, description } => {
            manager.add_dataset(&name, description.as_deref())?;
        }
        Commands::RemoveDataset { name, force } => {
            if confirm(force, &format!("dataset {}", name))? {
                manager.remove_dataset(&name)?;
            }
        }
        Commands::AddReferenceSet {
            file_path,
            add,
            description,
        } => {
            let options = AddOptions {
                description,
                ..add.options()
            };
            manager.add_reference_set(&file_path, options).await?;
        }
        Commands::RemoveReferenceSet { name, force } => {
            if confirm(force, &format!("reference set {}", name))? {
                manager.remove_reference_set(&name)?;
            }
        }
        Commands::AddReadGroupSet {
            dataset,
            file_path,
            add,
            reference_set,
        } => {
            let options = AddOptions {
                reference_set,
                ..add.options()
            };
            manager
                .add_read_group_set(&dataset, &file_path, options)
                .await?;
        }
        Commands::RemoveReadGroupSet {
            dataset,
            name,
            force,
        } => {
            if confirm(force, &format!("read group set {}/{}", dataset, name))? {
                manager.remove_read_group_set(&dataset, &name)?;
            }
        }
        Commands::AddVariantSet {
            dataset,
            dir_path,
            add,
            reference_set,
            ontology_map,
        } => {
            let options = AddOptions {
                reference_set,
                ontology_map,
                ..add.options()
            };
            manager.add_variant_set(&dataset, &dir_path, options).await?;
        }
        Commands::RemoveVariantSet {
            dataset,
            name,
            force,
        } => {
            if confirm(force, &format!("variant set {}/{}", dataset, name))? {
                manager.remove_variant_set(&dataset, &name)?;
            }
        }
        Commands::AddOntologyMap { file_path, add } => {
            manager.add_ontology_map(&file_path, add.options()).await?;
        }
        Commands::RemoveOntologyMap { name, force } => {
            if confirm(force, &format!("ontology map {}", name))? {
                manager.remove_ontology_map(&name)?;
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Ask on stdin unless `--force` was given.
fn confirm(force: bool, what: &str) -> genoserve::Result<bool> {
    if force {
        return Ok(true);
    }
    print!("Remove {} and its files? [y/N] ", what);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
