use std::path::PathBuf;

use clap::{Parser, Subcommand};

use prereq::cli::commands::{self, RunOptions};
use prereq::util::logger::{LogLevel, init_logger};

#[derive(Parser)]
#[command(
    name = "prereq",
    about = "Run test suites whose tests require each other at runtime",
    version
)]
struct Cli {
    /// Log level: trace, debug, info, warn, error (PREREQ_LOG overrides)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run suite files to a fixpoint and report the results
    Run {
        /// Input suite files
        files: Vec<PathBuf>,

        /// Output format: text, json, yaml
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Upper bound on tree passes, the first full pass included
        #[arg(long, default_value_t = 100)]
        max_passes: usize,

        /// Stream test output instead of capturing it
        #[arg(long)]
        no_capture: bool,
    },

    /// Validate suite files without running them
    Validate {
        /// Input suite files
        files: Vec<PathBuf>,
    },

    /// List the fully-qualified test names of suite files
    List {
        /// Input suite files
        files: Vec<PathBuf>,
    },
}

fn require_files(files: &[PathBuf]) {
    if files.is_empty() {
        eprintln!("error: no input files provided");
        std::process::exit(1);
    }
}

fn main() {
    let cli = Cli::parse();

    let Some(level) = LogLevel::from_str(&cli.log_level) else {
        eprintln!(
            "error: unknown log level '{}' (expected: trace, debug, info, warn, error)",
            cli.log_level
        );
        std::process::exit(1);
    };
    init_logger(level);

    match cli.command {
        Some(Commands::Run {
            files,
            format,
            output,
            max_passes,
            no_capture,
        }) => {
            require_files(&files);
            let options = RunOptions {
                format,
                output,
                max_passes,
                capture_output: !no_capture,
            };
            match commands::run_run(&files, &options) {
                Ok(outcome) => {
                    print!("{}", outcome.output);
                    if let Some(out_path) = &options.output {
                        eprintln!("results written to {}", out_path.display());
                    }
                    if !outcome.success {
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Validate { files }) => {
            require_files(&files);
            match commands::run_validate(&files) {
                Ok(result) => println!("{result}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::List { files }) => {
            require_files(&files);
            match commands::run_list(&files) {
                Ok(result) => print!("{result}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            // No subcommand: clap prints help and exits
            Cli::parse_from(["prereq", "--help"]);
        }
    }
}
