mod commands;
mod output;

use clap::{ArgAction, Args, Parser, Subcommand};
use docfill_core::{Deadline, EngineConfig, PagePlaceholderPolicy};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "docfill",
    version,
    about = "Find and fill blank fields in spreadsheets, Word documents and PDF forms"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct EngineArgs {
    /// Directory relative document paths are resolved against
    #[arg(long, env = "FORMS_DIR", value_name = "DIR", global = true)]
    forms_dir: Option<PathBuf>,

    /// Directory under which filled documents are written (default: system temp dir)
    #[arg(long, env = "DOCFILL_WORK_DIR", value_name = "DIR", global = true)]
    work_dir: Option<PathBuf>,

    /// Abort scanning or filling after this many seconds
    #[arg(long, value_name = "SECS", global = true)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the fillable fields of a document
    Extract {
        /// Path to a .xlsx, .docx or .pdf file
        input_file: PathBuf,

        /// Output format: table (default) or json
        #[arg(short, long, default_value = "table")]
        output: String,

        /// Include the preview (sheet grids, paragraphs, page text) in table output
        #[arg(long)]
        preview: bool,
    },
    /// Write a filled copy of a document
    Fill {
        /// Path to a .xlsx, .docx or .pdf file
        input_file: PathBuf,

        /// Field value, repeatable. Applied after --values and --preset.
        #[arg(short, long = "set", value_name = "ID=VALUE", value_parser = commands::fill::parse_assignment)]
        set: Vec<(String, String)>,

        /// JSON file mapping field ids to values
        #[arg(long, value_name = "FILE")]
        values: Option<PathBuf>,

        /// Presets file to take values from
        #[arg(long, value_name = "FILE")]
        presets: Option<PathBuf>,

        /// Preset name (default: the form's default preset)
        #[arg(long, value_name = "NAME", requires = "presets")]
        preset: Option<String>,

        /// Accept PDFs without form fields and write an unchanged copy
        #[arg(long)]
        allow_page_passthrough: bool,

        /// Output format: table (default) or json
        #[arg(short, long, default_value = "table")]
        output: String,
    },
    /// Inspect preset files
    Presets {
        #[command(subcommand)]
        action: PresetsAction,
    },
}

#[derive(Subcommand)]
enum PresetsAction {
    /// List presets, optionally for one form
    List {
        /// Path to JSON presets file
        file: PathBuf,

        /// Form file name, e.g. ficha_lote.xlsx
        #[arg(long)]
        form: Option<String>,
    },
    /// Print the values of one preset
    Show {
        /// Path to JSON presets file
        file: PathBuf,

        /// Form file name
        form: String,

        /// Preset name (default: the form's default preset)
        name: Option<String>,
    },
    /// Validate a presets file
    Validate {
        /// Path to JSON presets file
        file: PathBuf,
    },
}

impl EngineArgs {
    fn config(&self, allow_page_passthrough: bool) -> EngineConfig {
        EngineConfig {
            forms_dir: self.forms_dir.clone(),
            work_dir: self.work_dir.clone(),
            page_placeholders: if allow_page_passthrough {
                PagePlaceholderPolicy::PassThrough
            } else {
                PagePlaceholderPolicy::Reject
            },
            ..EngineConfig::default()
        }
    }

    fn deadline(&self) -> Deadline {
        match self.timeout {
            Some(secs) => Deadline::after(Duration::from_secs(secs)),
            None => Deadline::none(),
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let deadline = cli.engine.deadline();
    let result = match cli.command {
        Commands::Extract {
            input_file,
            output,
            preview,
        } => commands::extract::run(
            input_file,
            &cli.engine.config(false),
            deadline,
            &output,
            preview,
        ),
        Commands::Fill {
            input_file,
            set,
            values,
            presets,
            preset,
            allow_page_passthrough,
            output,
        } => commands::fill::run(
            commands::fill::FillArgs {
                input_file,
                set,
                values,
                presets,
                preset,
            },
            &cli.engine.config(allow_page_passthrough),
            deadline,
            &output,
        ),
        Commands::Presets { action } => match action {
            PresetsAction::List { file, form } => commands::presets::list(&file, form.as_deref()),
            PresetsAction::Show { file, form, name } => {
                commands::presets::show(&file, &form, name.as_deref())
            }
            PresetsAction::Validate { file } => commands::presets::validate(&file),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
