use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ghostmark::types::CommentTag;
use ghostmark::{commands, diagnostics, watch};

#[derive(Parser)]
#[command(name = "ghostmark", about = "Comments that stay attached to code as it changes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a comment to a line or range of a file
    Add {
        /// Source file
        file: PathBuf,
        /// Line, 1-based
        line: u32,
        /// Comment text
        text: String,
        /// Author (defaults to `default_author` from .ghostmark.toml)
        #[arg(long)]
        author: Option<String>,
        /// Last line of a range comment
        #[arg(long)]
        end_line: Option<u32>,
        /// Tag: todo, fixme, note, question, hack, warning, star
        #[arg(long, value_parser = parse_tag)]
        tag: Option<CommentTag>,
    },
    /// Delete a comment
    Delete {
        /// Source file
        file: PathBuf,
        /// Comment id or unique id prefix
        id: String,
    },
    /// Move a comment to other lines, optionally in another file
    Move {
        /// Source file holding the comment
        file: PathBuf,
        /// Comment id or unique id prefix
        id: String,
        /// Target line
        #[arg(long)]
        line: u32,
        /// Last line of a range
        #[arg(long)]
        end_line: Option<u32>,
        /// Target file (defaults to the same file)
        #[arg(long)]
        to: Option<PathBuf>,
    },
    /// List orphaned comments across the workspace
    Orphans {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-anchor comments after code changes
    Reconcile {
        /// Files to reconcile (defaults to every commented file)
        files: Vec<PathBuf>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore a file's comments from the newest backup
    Restore {
        /// Source file
        file: PathBuf,
    },
    /// Show a file's comments at their current lines
    Status {
        /// Source file
        file: PathBuf,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the symbol outline of a file
    Symbols {
        /// Source file
        file: PathBuf,
    },
    /// Keep comments anchored while files change
    Watch,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Add {
            author,
            end_line,
            file,
            line,
            tag,
            text,
        } => commands::add(&file, line, &text, end_line, author, tag).map(|()| return ExitCode::SUCCESS),
        Commands::Delete { file, id } => commands::delete(&file, &id).map(|()| return ExitCode::SUCCESS),
        Commands::Move {
            end_line,
            file,
            id,
            line,
            to,
        } => commands::move_comment(&file, &id, line, end_line, to.as_deref()).map(|()| return ExitCode::SUCCESS),
        Commands::Orphans { json } => commands::orphans(json),
        Commands::Reconcile { files, json } => commands::reconcile(&files, json),
        Commands::Restore { file } => commands::restore(&file).map(|()| return ExitCode::SUCCESS),
        Commands::Status { file, json } => commands::status(&file, json).map(|()| return ExitCode::SUCCESS),
        Commands::Symbols { file } => commands::symbols(&file).map(|()| return ExitCode::SUCCESS),
        Commands::Watch => watch::run().map(|()| return ExitCode::SUCCESS),
    };

    return match result {
        Ok(code) => code,
        Err(e) => {
            diagnostics::print_error(&e);
            ExitCode::FAILURE
        },
    };
}

/// Clap value parser for `--tag`.
fn parse_tag(name: &str) -> Result<CommentTag, String> {
    return CommentTag::parse(name).ok_or_else(|| {
        return format!("unknown tag `{name}` (expected todo, fixme, note, question, hack, warning, or star)");
    });
}
