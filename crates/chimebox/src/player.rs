//! Handing clip bytes to the external player.

use async_trait::async_trait;
use bytes::Bytes;
use chimeconf::{PlayerInput, ToolsConfig};
use std::time::{Duration, Instant};

use crate::error::{ChimeError, Result};
use crate::process;
use crate::types::ClipId;

/// Diagnostic output that means the player could not read its input even
/// though it may still exit 0.
pub const FAILURE_MARKERS: [&str; 2] = ["open failed", "Failed to open file"];

#[async_trait]
pub trait Player: Send + Sync {
    /// Play one clip to completion. `volume` is 0-100; 0 still plays, silently.
    async fn play(&self, clip: &ClipId, audio: Bytes, volume: u8) -> Result<()>;
}

/// First diagnostic line carrying a known failure marker.
pub fn failure_line(lines: &[String]) -> Option<&str> {
    lines
        .iter()
        .find(|line| FAILURE_MARKERS.iter().any(|marker| line.contains(marker)))
        .map(String::as_str)
}

/// ffplay-compatible subprocess player.
#[derive(Debug, Clone)]
pub struct ProcessPlayer {
    program: String,
    input: PlayerInput,
    timeout: Duration,
}

impl ProcessPlayer {
    pub fn new(program: impl Into<String>, input: PlayerInput, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            input,
            timeout,
        }
    }

    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self::new(
            tools.player.clone(),
            tools.player_input,
            Duration::from_secs(tools.player_timeout_secs),
        )
    }

    pub fn args(volume: u8, input: &str) -> Vec<String> {
        vec![
            "-volume".to_string(),
            volume.to_string(),
            "-nodisp".to_string(),
            "-autoexit".to_string(),
            "-i".to_string(),
            input.to_string(),
        ]
    }

    async fn run(&self, clip: &ClipId, args: &[String], stdin: Option<Bytes>) -> Result<()> {
        let output = process::run(&self.program, args, stdin, self.timeout)
            .await
            .map_err(|e| ChimeError::Playback(format!("{} failed for {clip}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(ChimeError::Playback(format!(
                "{} exited with {} for {clip}",
                self.program, output.status
            )));
        }
        if let Some(line) = failure_line(&output.stderr) {
            return Err(ChimeError::Playback(format!(
                "{} reported an error for {clip}: {line}",
                self.program
            )));
        }
        Ok(())
    }

    async fn play_from_file(&self, clip: &ClipId, audio: Bytes, volume: u8) -> Result<()> {
        let started = Instant::now();
        // no extension: after normalization the bytes no longer match the
        // clip's original container, so the player has to probe them
        let file = tempfile::Builder::new().prefix("chimebox-").tempfile()?;
        tokio::fs::write(file.path(), &audio).await?;
        tracing::debug!(
            clip = %clip,
            path = %file.path().display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "wrote clip to temporary file"
        );

        let input = file.path().to_string_lossy().into_owned();
        let result = self.run(clip, &Self::args(volume, &input), None).await;

        if let Err(e) = file.close() {
            tracing::warn!(clip = %clip, error = %e, "failed to delete temporary file");
        }
        result
    }
}

#[async_trait]
impl Player for ProcessPlayer {
    async fn play(&self, clip: &ClipId, audio: Bytes, volume: u8) -> Result<()> {
        let started = Instant::now();
        let volume = volume.min(100);

        match self.input {
            PlayerInput::File => self.play_from_file(clip, audio, volume).await?,
            PlayerInput::Stdin => self.run(clip, &Self::args(volume, "-"), Some(audio)).await?,
        }

        tracing::info!(
            clip = %clip,
            volume,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "played clip"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_markers() {
        let lines = vec![
            "Input #0, mp3, from 'x.mp3':".to_string(),
            "x.mp3: Failed to open file 'x.mp3'".to_string(),
        ];
        assert_eq!(failure_line(&lines), Some("x.mp3: Failed to open file 'x.mp3'"));

        let lines = vec!["pipe:0: open failed".to_string()];
        assert!(failure_line(&lines).is_some());

        let lines = vec!["  Duration: 00:00:02.04".to_string()];
        assert!(failure_line(&lines).is_none());
    }

    #[test]
    fn test_player_args() {
        assert_eq!(
            ProcessPlayer::args(35, "-").join(" "),
            "-volume 35 -nodisp -autoexit -i -"
        );
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use tempfile::TempDir;

        /// Write an executable stand-in for the player.
        fn script(dir: &TempDir, body: &str) -> String {
            let path = dir.path().join("player.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().into_owned()
        }

        fn player(program: String, input: PlayerInput) -> ProcessPlayer {
            ProcessPlayer::new(program, input, Duration::from_secs(5))
        }

        #[tokio::test]
        async fn test_file_input_is_readable_and_removed() {
            let dir = TempDir::new().unwrap();
            let record = dir.path().join("seen");
            // last argument is the input path
            let body = format!(
                "for last; do :; done\ncat \"$last\" > {}\necho \"$last\" >> {}.path",
                record.display(),
                record.display()
            );
            let player = player(script(&dir, &body), PlayerInput::File);

            player
                .play(&ClipId::new("/a/b.wav"), Bytes::from_static(b"ID3 audio"), 40)
                .await
                .unwrap();

            assert_eq!(std::fs::read(&record).unwrap(), b"ID3 audio");
            let used = std::fs::read_to_string(format!("{}.path", record.display())).unwrap();
            assert!(Path::new(used.trim()).extension().is_none());
            assert!(!Path::new(used.trim()).exists());
        }

        #[tokio::test]
        async fn test_stdin_input() {
            let dir = TempDir::new().unwrap();
            let record = dir.path().join("seen");
            let player = player(
                script(&dir, &format!("cat > {}", record.display())),
                PlayerInput::Stdin,
            );

            player
                .play(&ClipId::new("x"), Bytes::from_static(b"piped"), 0)
                .await
                .unwrap();

            assert_eq!(std::fs::read(&record).unwrap(), b"piped");
        }

        #[tokio::test]
        async fn test_marker_fails_despite_zero_exit() {
            let dir = TempDir::new().unwrap();
            let player = player(
                script(&dir, "echo 'x: open failed' >&2\nexit 0"),
                PlayerInput::File,
            );

            let err = player
                .play(&ClipId::new("x"), Bytes::from_static(b"a"), 50)
                .await
                .unwrap_err();
            assert!(matches!(err, ChimeError::Playback(_)));
        }

        #[tokio::test]
        async fn test_nonzero_exit_fails() {
            let dir = TempDir::new().unwrap();
            let player = player(script(&dir, "exit 1"), PlayerInput::File);

            let err = player
                .play(&ClipId::new("x"), Bytes::from_static(b"a"), 50)
                .await
                .unwrap_err();
            assert!(matches!(err, ChimeError::Playback(_)));
        }
    }
}
