//! Audio output through external programs: cue sounds via a player command,
//! speech via a TTS command. Children are killed when their future drops.

use std::path::PathBuf;
use std::process::Stdio;

use sayword_core::engine::BoxFuture;
use sayword_core::{Cue, CuePlayer, SaywordError, SpeechSynthesizer};
use tokio::process::Command;
use tracing::debug;

pub struct CommandCuePlayer {
    command: Vec<String>,
    start: Option<PathBuf>,
    stop: Option<PathBuf>,
}

impl CommandCuePlayer {
    pub fn new(command: Vec<String>, start: Option<PathBuf>, stop: Option<PathBuf>) -> Self {
        Self {
            command,
            start,
            stop,
        }
    }
}

impl CuePlayer for CommandCuePlayer {
    fn play(&self, cue: Cue) -> BoxFuture<'_, sayword_core::Result<()>> {
        Box::pin(async move {
            let file = match cue {
                Cue::ListeningStarted => self.start.as_ref(),
                Cue::ListeningStopped => self.stop.as_ref(),
            };
            let Some(file) = file else {
                return Ok(());
            };
            let mut args: Vec<String> = self.command.iter().skip(1).cloned().collect();
            args.push(file.display().to_string());
            run(&self.command, args)
                .await
                .map_err(|e| SaywordError::AudioStream(format!("cue {cue:?}: {e}")))
        })
    }
}

pub struct CommandSpeaker {
    command: Vec<String>,
}

impl CommandSpeaker {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn arguments(&self, text: &str, language: &str) -> Vec<String> {
        let mut mentions_text = false;
        let mut args: Vec<String> = self
            .command
            .iter()
            .skip(1)
            .map(|arg| {
                mentions_text |= arg.contains("{text}");
                arg.replace("{text}", text).replace("{language}", language)
            })
            .collect();
        if !mentions_text {
            args.push(text.to_string());
        }
        args
    }
}

impl SpeechSynthesizer for CommandSpeaker {
    fn speak<'a>(&'a self, text: &'a str, language: &'a str) -> BoxFuture<'a, sayword_core::Result<()>> {
        Box::pin(async move {
            if self.command.is_empty() {
                return Err(SaywordError::Synthesis("no TTS command configured".into()));
            }
            run(&self.command, self.arguments(text, language))
                .await
                .map_err(SaywordError::Synthesis)
        })
    }
}

async fn run(command: &[String], args: Vec<String>) -> Result<(), String> {
    let Some(program) = command.first() else {
        return Err("empty command".into());
    };
    debug!(program = program.as_str(), ?args, "spawning");
    let status = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| format!("{program}: {e}"))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("{program} exited with {status}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_substituted() {
        let speaker = CommandSpeaker::new(vec![
            "espeak-ng".into(),
            "-v".into(),
            "{language}".into(),
        ]);
        assert_eq!(speaker.arguments("cat", "en-US"), vec!["-v", "en-US", "cat"]);

        let speaker = CommandSpeaker::new(vec!["say".into(), "--text={text}".into()]);
        assert_eq!(speaker.arguments("dog", "en"), vec!["--text=dog"]);
    }

    #[tokio::test]
    async fn missing_cue_file_is_silent() {
        let player = CommandCuePlayer::new(vec!["definitely-not-a-player".into()], None, None);
        player.play(Cue::ListeningStarted).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_program_is_an_error() {
        let speaker = CommandSpeaker::new(vec!["definitely-not-a-tts-binary".into()]);
        assert!(matches!(
            speaker.speak("hi", "en").await,
            Err(SaywordError::Synthesis(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropping_playback_kills_the_child() {
        let speaker = CommandSpeaker::new(vec!["sleep".into(), "{text}".into()]);
        let started = std::time::Instant::now();
        let outcome =
            tokio::time::timeout(std::time::Duration::from_millis(100), speaker.speak("5", "en")).await;
        assert!(outcome.is_err());
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }
}
