//! Command line tokenizing.

/// Prefix that marks a server built-in command.
pub const INTERNAL_MARKER: char = '/';

/// Splits `line` on whitespace, keeping double-quoted runs together.
///
/// Quotes are removed from the output. An unterminated quote extends to the
/// end of the line. `""` yields an empty argument.
#[must_use]
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;

    for character in line.chars() {
        match character {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// A tokenized command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Upper-cased command word without the internal marker.
    pub name: String,
    /// Remaining tokens, case preserved.
    pub args: Vec<String>,
    /// Whether the command carried the internal marker.
    pub internal: bool,
}

impl CommandLine {
    /// Parses a line; `None` when it holds no tokens.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = tokenize(line).into_iter();
        let first = tokens.next()?;
        let (internal, word) = match first.strip_prefix(INTERNAL_MARKER) {
            Some(rest) => (true, rest),
            None => (false, first.as_str()),
        };
        Some(Self {
            name: word.to_uppercase(),
            args: tokens.collect(),
            internal,
        })
    }

    /// Name followed by arguments, as handed to extensions.
    #[must_use]
    pub fn to_vector(&self) -> Vec<String> {
        std::iter::once(self.name.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("fortune", &["fortune"])]
    #[case("  spaced   out  ", &["spaced", "out"])]
    #[case("say \"hello world\" now", &["say", "hello world", "now"])]
    #[case("a\"b c\"d", &["ab cd"])]
    #[case("empty \"\" arg", &["empty", "", "arg"])]
    #[case("open \"never closed", &["open", "never closed"])]
    #[case("tab\tseparated", &["tab", "separated"])]
    #[case("", &[])]
    fn tokenizes_lines(#[case] line: &str, #[case] expected: &[&str]) {
        assert_eq!(tokenize(line), expected);
    }

    #[test]
    fn internal_commands_are_marked_and_uppercased() {
        let command = CommandLine::parse("/broadcast \"Hello All\" again").expect("command");
        assert!(command.internal);
        assert_eq!(command.name, "BROADCAST");
        assert_eq!(command.args, vec!["Hello All", "again"]);
    }

    #[test]
    fn external_commands_keep_arguments() {
        let command = CommandLine::parse("Fortune Short").expect("command");
        assert!(!command.internal);
        assert_eq!(command.to_vector(), vec!["FORTUNE", "Short"]);
    }

    #[test]
    fn blank_line_is_not_a_command() {
        assert_eq!(CommandLine::parse("   "), None);
    }
}
