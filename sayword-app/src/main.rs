//! `sayword`: terminal host for the speech engine.
//!
//! ```text
//! sayword [--settings FILE] listen [--target WORD] [--language TAG] [--vocab a,b,c]
//!                                  [--wav FILE] [--save-audio FILE]
//! sayword [--settings FILE] preload [grammar|free-form] [--language TAG]
//! sayword [--settings FILE] speak TEXT [--language TAG]
//! sayword [--settings FILE] status [--reset-cache]
//! sayword match TARGET HEARD...
//! ```
//!
//! Events are printed to stdout as JSON lines; logs go to stderr.

mod commands;
mod playback;
mod settings;
mod storage;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sayword_core::ModelKind;
use tracing::info;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(
    name = "sayword",
    version,
    about = "Listen for a spoken answer and check it against a target word"
)]
pub struct Cli {
    /// Path to the settings file
    ///
    /// Defaults to settings.json in the per-user data directory.
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run one recognition session and print its events
    Listen(ListenArgs),

    /// Load a model ahead of the first session
    Preload {
        #[arg(value_enum, default_value_t = ModelChoice::Grammar)]
        kind: ModelChoice,

        /// Language tag; the configured language when omitted
        #[arg(long)]
        language: Option<String>,
    },

    /// Speak text through the configured TTS command
    Speak {
        #[arg(required = true)]
        text: Vec<String>,

        #[arg(long)]
        language: Option<String>,
    },

    /// Print settings, configured models and cached flags
    Status {
        /// Forget which models were cached in earlier runs
        #[arg(long)]
        reset_cache: bool,
    },

    /// Check recognized alternatives against a target word, no audio involved
    Match {
        target: String,

        #[arg(required = true)]
        heard: Vec<String>,
    },
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ListenArgs {
    /// Word the answer is checked against
    #[arg(value_name = "TARGET", conflicts_with = "target")]
    pub word: Option<String>,

    #[arg(long)]
    pub target: Option<String>,

    #[arg(long)]
    pub language: Option<String>,

    /// Closed answer set; selects the grammar recognizer
    #[arg(long = "vocab", value_delimiter = ',')]
    pub vocabulary: Option<Vec<String>>,

    /// Recognize this recording instead of the microphone
    #[arg(long)]
    pub wav: Option<PathBuf>,

    /// Write the captured audio here
    #[arg(long)]
    pub save_audio: Option<PathBuf>,
}

impl ListenArgs {
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref().or(self.word.as_deref())
    }

    /// Vocabulary words with blanks from stray commas removed.
    pub fn vocabulary(&self) -> Option<Vec<String>> {
        self.vocabulary.as_ref().map(|words| {
            words
                .iter()
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty())
                .collect()
        })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelChoice {
    Grammar,
    #[value(alias = "freeform")]
    FreeForm,
}

impl From<ModelChoice> for ModelKind {
    fn from(choice: ModelChoice) -> Self {
        match choice {
            ModelChoice::Grammar => ModelKind::Grammar,
            ModelChoice::FreeForm => ModelKind::FreeForm,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sayword_app=info,sayword_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!(command = ?cli.command, "sayword starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(commands::run(cli))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("sayword").chain(line.split_whitespace()))
    }

    #[test]
    fn listen_with_everything() {
        let cli = parse("--settings s.json listen --target cat --vocab cat,,dog --wav in.wav --language es").unwrap();
        assert_eq!(cli.settings, Some(PathBuf::from("s.json")));
        let Command::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(args.target(), Some("cat"));
        assert_eq!(args.language.as_deref(), Some("es"));
        assert_eq!(args.vocabulary(), Some(vec!["cat".to_string(), "dog".to_string()]));
        assert_eq!(args.wav, Some(PathBuf::from("in.wav")));
        assert_eq!(args.save_audio, None);
    }

    #[test]
    fn settings_may_follow_the_command() {
        let cli = parse("status --settings s.json").unwrap();
        assert_eq!(cli.settings, Some(PathBuf::from("s.json")));
    }

    #[test]
    fn listen_target_may_be_positional() {
        let cli = parse("listen elephant").unwrap();
        match cli.command {
            Command::Listen(args) => assert_eq!(args.target(), Some("elephant")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse("listen elephant --target cat").is_err());
    }

    #[test]
    fn preload_defaults_to_grammar() {
        assert_eq!(
            parse("preload").unwrap().command,
            Command::Preload {
                kind: ModelChoice::Grammar,
                language: None
            }
        );
        for name in ["free-form", "freeform"] {
            match parse(&format!("preload {name}")).unwrap().command {
                Command::Preload { kind, .. } => assert_eq!(ModelKind::from(kind), ModelKind::FreeForm),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(parse("preload acoustic").is_err());
    }

    #[test]
    fn match_needs_alternatives() {
        assert!(parse("match cat").is_err());
        assert_eq!(
            parse("match cat cap kat").unwrap().command,
            Command::Match {
                target: "cat".into(),
                heard: vec!["cap".into(), "kat".into()]
            }
        );
    }

    #[test]
    fn rejects_unknown_input() {
        assert!(parse("").is_err());
        assert!(parse("dance").is_err());
        assert!(parse("listen --target").is_err());
        assert!(parse("speak hello --wav x.wav").is_err());
        assert!(parse("--verbose status").is_err());
    }

    #[test]
    fn status_reset_flag() {
        assert_eq!(
            parse("status --reset-cache").unwrap().command,
            Command::Status { reset_cache: true }
        );
        assert_eq!(
            parse("status").unwrap().command,
            Command::Status { reset_cache: false }
        );
    }
}
