use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::ai::AiService;

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Parser)]
#[command(name = "brevify")]
#[command(about = "YouTube channel, video and transcript cache")]
#[command(version)]
#[command(arg_required_else_help = true)]
#[command(after_help = "Examples:
  brevify channel https://www.youtube.com/@rustlang --transcripts
  brevify transcript https://youtu.be/dQw4w9WgXcQ
  brevify prompt dQw4w9WgXcQ --template study_guide --service claude --open
  brevify serve --port 8888")]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Same as `brevify refresh`
    #[arg(long = "refresh", hide = true)]
    pub refresh_flag: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Command {
    /// Run the JSON API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show a channel and its videos
    Channel {
        url: String,
        /// Also fetch missing transcripts
        #[arg(long)]
        transcripts: bool,
    },

    /// Print a video transcript
    Transcript {
        #[arg(value_name = "URL_OR_ID")]
        input: String,
    },

    /// Build an AI prompt and deep links
    Prompt {
        #[arg(value_name = "URL_OR_ID")]
        input: String,
        #[arg(long, value_name = "NAME")]
        template: Option<String>,
        /// chatgpt, claude or gemini
        #[arg(long)]
        service: Option<AiService>,
        /// Open the link in the browser
        #[arg(long)]
        open: bool,
    },

    /// Refresh all stale cached channels
    Refresh,

    /// Show submitted URLs
    History {
        #[arg(long)]
        favorites: bool,
        #[arg(long, value_name = "QUERY")]
        search: Option<String>,
        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
}

impl Cli {
    /// The command to run; the legacy `--refresh` flag stands for `refresh`.
    pub fn selected_command(&self) -> Option<Command> {
        match (&self.command, self.refresh_flag) {
            (Some(command), _) => Some(command.clone()),
            (None, true) => Some(Command::Refresh),
            (None, false) => None,
        }
    }
}
