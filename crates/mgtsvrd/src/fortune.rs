//! The fortune service: the command extension shipped with the daemon.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::info;

use crate::dispatch::{CommandContext, CommandExtension, CommandOutcome, command_not_recognized};

const FORTUNE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::fortune");

const BUILTIN_FORTUNES: &[&str] = &[
    "You will be successful in your work.",
    "A closed mouth gathers no feet.",
    "Today is a good day to finish what you started.",
    "The best way to predict the future is to invent it.\n    -- Alan Kay",
    "Beware of bugs in the above code; I have only proved it correct, not tried it.\n    -- Donald Knuth",
    "There is no place like 127.0.0.1.",
    "It works on my machine.",
];

/// Errors raised while loading a fortune file.
#[derive(Debug, Error)]
pub enum FortuneError {
    /// The file could not be read.
    #[error("failed to read fortune file '{path}': {source}")]
    Read {
        /// File that was requested.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The file held no fortunes.
    #[error("fortune file '{path}' contains no fortunes")]
    Empty {
        /// File that was requested.
        path: Utf8PathBuf,
    },
}

/// Serves `FORTUNE` and `FORTUNES`.
#[derive(Debug, Clone)]
pub struct FortuneService {
    fortunes: Vec<String>,
}

impl FortuneService {
    /// Service backed by the compiled-in list.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            fortunes: BUILTIN_FORTUNES.iter().map(|text| (*text).to_owned()).collect(),
        }
    }

    /// Loads fortunes separated by lines holding a single `%`.
    ///
    /// # Errors
    ///
    /// Returns [`FortuneError`] when the file is unreadable or empty.
    pub fn from_file(path: &Utf8Path) -> Result<Self, FortuneError> {
        let text = fs::read_to_string(path).map_err(|source| FortuneError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let fortunes = parse_fortunes(&text);
        if fortunes.is_empty() {
            return Err(FortuneError::Empty {
                path: path.to_path_buf(),
            });
        }
        info!(target: FORTUNE_TARGET, path = %path, count = fortunes.len(), "fortunes loaded");
        Ok(Self { fortunes })
    }

    /// Number of fortunes available.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fortunes.len()
    }

    /// Whether no fortune is available.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fortunes.is_empty()
    }

    fn pick(&self) -> Option<&str> {
        self.fortunes
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }
}

impl Default for FortuneService {
    fn default() -> Self {
        Self::builtin()
    }
}

fn parse_fortunes(text: &str) -> Vec<String> {
    let mut fortunes = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines().chain(std::iter::once("%")) {
        if line.trim_end() == "%" {
            let fortune = current.join("\n");
            if !fortune.trim().is_empty() {
                fortunes.push(fortune.trim_end().to_owned());
            }
            current.clear();
        } else {
            current.push(line);
        }
    }
    fortunes
}

impl CommandExtension for FortuneService {
    fn external_command(
        &self,
        context: &mut CommandContext<'_>,
        command: &[String],
    ) -> CommandOutcome {
        let name = command.first().map_or("", String::as_str);
        match name {
            "FORTUNE" => match self.pick() {
                Some(fortune) => context.reply_lines(fortune.lines()),
                None => context.reply("[no fortunes available]"),
            },
            "FORTUNES" => context.reply(&format!("[{} fortunes available]", self.len())),
            other => context.reply(&command_not_recognized(other)),
        }
        CommandOutcome::Continue
    }

    fn help(&self) -> Vec<String> {
        vec![
            "FORTUNE               show a random fortune".to_owned(),
            "FORTUNES              show how many fortunes are loaded".to_owned(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::*;
    use crate::registry::test_support::{RecordingNotifier, record, sent_lines};

    fn run(service: &FortuneService, words: &[&str]) -> Vec<String> {
        let notifier = Arc::new(RecordingNotifier::default());
        let connection = record(1, &notifier);
        let mut context = CommandContext::new(&connection, Some("alice"), Some(0));
        let command: Vec<String> = words.iter().map(|word| (*word).to_owned()).collect();
        assert_eq!(
            service.external_command(&mut context, &command),
            CommandOutcome::Continue
        );
        sent_lines(&connection)
    }

    #[rstest]
    #[case("one\n%\ntwo\nlines\n%\n", &["one", "two\nlines"])]
    #[case("%\n%\nonly\n", &["only"])]
    #[case("trailing spaces   \n%   \nnext", &["trailing spaces", "next"])]
    #[case("\n\n%\n", &[])]
    fn parses_percent_separated_blocks(#[case] text: &str, #[case] expected: &[&str]) {
        assert_eq!(parse_fortunes(text), expected);
    }

    #[test]
    fn fortune_replies_with_a_known_fortune() {
        let service = FortuneService::builtin();
        let reply = run(&service, &["FORTUNE"]).join("\n");
        assert!(BUILTIN_FORTUNES.contains(&reply.as_str()), "{reply}");
    }

    #[test]
    fn fortunes_reports_count() {
        let service = FortuneService::builtin();
        assert_eq!(
            run(&service, &["FORTUNES"]),
            vec![format!("[{} fortunes available]", BUILTIN_FORTUNES.len())]
        );
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert_eq!(
            run(&FortuneService::builtin(), &["LOTTO", "7"]),
            vec!["[command LOTTO not recognized]"]
        );
    }

    #[test]
    fn loads_fortunes_from_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("fortunes")).expect("utf8 path");
        fs::write(&path, "alpha\n%\nbeta\n").expect("write fortunes");

        let service = FortuneService::from_file(&path).expect("load fortunes");
        assert_eq!(service.len(), 2);
        let reply = run(&service, &["FORTUNE"]);
        assert!(reply == ["alpha"] || reply == ["beta"], "{reply:?}");
    }

    #[test]
    fn empty_or_missing_files_are_errors() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("fortunes")).expect("utf8 path");
        assert!(matches!(
            FortuneService::from_file(&path),
            Err(FortuneError::Read { .. })
        ));
        fs::write(&path, "%\n%\n").expect("write fortunes");
        assert!(matches!(
            FortuneService::from_file(&path),
            Err(FortuneError::Empty { .. })
        ));
    }
}
