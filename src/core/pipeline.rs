//! Pipeline descriptions and the line parser that produces them.

use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::str::Chars;

use log::debug;

use crate::errors::{Error, Result};

/// A single stage of a pipeline: `argv[0]` names a program or builtin.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    argv: Vec<String>,
}

impl Command {
    /// # Panics
    /// Panics if `argv` is empty.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let argv: Vec<String> = argv.into_iter().map(|s| s.as_ref().to_string()).collect();
        assert!(!argv.is_empty(), "a command needs at least a program name");
        Self { argv }
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

/// Output redirection applied to the last stage of a pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputRedirect {
    pub path: PathBuf,
    /// Append instead of truncating.
    pub append: bool,
}

/// Everything the executor needs to launch one line of input.
///
/// Built once by the parser (or `PipelineSpecBuilder`) and never modified.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSpec {
    input: String,
    commands: Vec<Command>,
    input_file: Option<PathBuf>,
    output: Option<OutputRedirect>,
    background: bool,
}

impl PipelineSpec {
    /// Parses `input` into a `PipelineSpec`. Returns `None` for blank input.
    ///
    /// # Examples
    ///
    /// ```
    /// use jcsh::core::pipeline::PipelineSpec;
    ///
    /// let spec = PipelineSpec::parse("cat < in.txt | sort >> out.txt &").unwrap().unwrap();
    /// assert_eq!(spec.commands().len(), 2);
    /// assert_eq!(spec.input_file().unwrap().to_str(), Some("in.txt"));
    /// assert!(spec.output().unwrap().append);
    /// assert!(spec.background());
    /// ```
    pub fn parse(input: &str) -> Result<Option<Self>> {
        let input_trimmed = input.trim();
        let tokens = tokenize(input_trimmed)?;
        if tokens.is_empty() {
            return Ok(None);
        }

        let mut builder = PipelineSpecBuilder::new(input_trimmed);
        let mut stages: Vec<Vec<String>> = vec![Vec::new()];
        let mut output_stage = None;
        let mut tokens = tokens.into_iter().peekable();
        while let Some(token) = tokens.next() {
            match token {
                Token::Word(word) => stages.last_mut().unwrap().push(word),
                Token::Pipe => {
                    if stages.last().unwrap().is_empty() {
                        return Err(Error::syntax("|"));
                    }
                    stages.push(Vec::new());
                }
                Token::Less => {
                    if stages.len() > 1 {
                        return Err(Error::syntax("<"));
                    }
                    builder.input_file(expect_word(&mut tokens, "<")?);
                }
                Token::Great | Token::DoubleGreat => {
                    let operator = if token == Token::Great { ">" } else { ">>" };
                    let path = expect_word(&mut tokens, operator)?;
                    builder.output_file(path, token == Token::DoubleGreat);
                    output_stage = Some(stages.len() - 1);
                }
                Token::Ampersand => {
                    if tokens.peek().is_some() {
                        return Err(Error::syntax("&"));
                    }
                    builder.background(true);
                }
            }
        }

        if stages.iter().any(Vec::is_empty) {
            return Err(Error::syntax(input_trimmed));
        }
        if output_stage.map_or(false, |stage| stage != stages.len() - 1) {
            return Err(Error::syntax(">"));
        }

        for argv in stages {
            builder.command(Command::new(argv));
        }
        let spec = builder.build();
        debug!("parsed PipelineSpec: {:?}", spec);
        Ok(Some(spec))
    }

    /// The original source text, used as the job label.
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn input_file(&self) -> Option<&Path> {
        self.input_file.as_deref()
    }

    pub fn output(&self) -> Option<&OutputRedirect> {
        self.output.as_ref()
    }

    pub fn background(&self) -> bool {
        self.background
    }
}

/// Build a `PipelineSpec` without going through the parser.
#[derive(Debug)]
pub struct PipelineSpecBuilder {
    input: String,
    commands: Vec<Command>,
    input_file: Option<PathBuf>,
    output: Option<OutputRedirect>,
    background: bool,
}

impl PipelineSpecBuilder {
    /// Construct a new `PipelineSpecBuilder` labelled `input`, with the following default
    /// configuration:
    ///
    /// * No input/output redirection
    /// * Runs in foreground
    /// * No commands
    pub fn new(input: &str) -> Self {
        Self {
            input: input.to_string(),
            commands: Vec::new(),
            input_file: None,
            output: None,
            background: false,
        }
    }

    /// Read the first stage's stdin from `path`.
    pub fn input_file<P: Into<PathBuf>>(&mut self, path: P) -> &mut Self {
        self.input_file = Some(path.into());
        self
    }

    /// Write the last stage's stdout to `path`.
    pub fn output_file<P: Into<PathBuf>>(&mut self, path: P, append: bool) -> &mut Self {
        self.output = Some(OutputRedirect {
            path: path.into(),
            append,
        });
        self
    }

    pub fn background(&mut self, background: bool) -> &mut Self {
        self.background = background;
        self
    }

    /// Append a stage.
    pub fn command(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// # Panics
    /// Panics if no command was added.
    pub fn build(self) -> PipelineSpec {
        assert!(!self.commands.is_empty(), "a pipeline needs at least one command");
        PipelineSpec {
            input: self.input,
            commands: self.commands,
            input_file: self.input_file,
            output: self.output,
            background: self.background,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    Pipe,
    Less,
    Great,
    DoubleGreat,
    Ampersand,
}

fn expect_word<I>(tokens: &mut Peekable<I>, operator: &str) -> Result<String>
where
    I: Iterator<Item = Token>,
{
    match tokens.next() {
        Some(Token::Word(word)) => Ok(word),
        _ => Err(Error::syntax(operator)),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut word = String::new();
    // distinguishes an empty quoted word ("") from no word at all
    let mut in_word = false;

    while let Some(c) = chars.next() {
        let operator = match c {
            '|' => Some(Token::Pipe),
            '<' => Some(Token::Less),
            '&' => Some(Token::Ampersand),
            '>' if chars.peek() == Some(&'>') => {
                chars.next();
                Some(Token::DoubleGreat)
            }
            '>' => Some(Token::Great),
            _ => None,
        };

        if operator.is_some() || c.is_whitespace() {
            if in_word {
                tokens.push(Token::Word(word.split_off(0)));
                in_word = false;
            }
            tokens.extend(operator);
            continue;
        }

        in_word = true;
        match c {
            '\'' => read_quoted(&mut chars, '\'', &mut word, input)?,
            '"' => read_quoted(&mut chars, '"', &mut word, input)?,
            '\\' => match chars.next() {
                Some(escaped) => word.push(escaped),
                None => return Err(Error::syntax(input)),
            },
            _ => word.push(c),
        }
    }

    if in_word {
        tokens.push(Token::Word(word));
    }
    Ok(tokens)
}

fn read_quoted(
    chars: &mut Peekable<Chars<'_>>,
    quote: char,
    word: &mut String,
    input: &str,
) -> Result<()> {
    while let Some(c) = chars.next() {
        match c {
            c if c == quote => return Ok(()),
            '\\' if quote == '"' && matches!(chars.peek(), Some('"') | Some('\\')) => {
                word.extend(chars.next());
            }
            _ => word.push(c),
        }
    }

    Err(Error::syntax(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> PipelineSpec {
        PipelineSpec::parse(input).unwrap().unwrap()
    }

    #[test]
    fn test_empty() {
        assert!(PipelineSpec::parse("").unwrap().is_none());
        assert!(PipelineSpec::parse("   \t").unwrap().is_none());
    }

    #[test]
    fn test_single_cmd_with_args() {
        let input = "cmd var1 var2 var3";
        let mut expected = PipelineSpecBuilder::new(input);
        expected.command(Command::new(&["cmd", "var1", "var2", "var3"]));
        assert_eq!(parse(input), expected.build());
    }

    #[test]
    fn test_pipeline_stages() {
        let spec = parse("echo a | tr a-z A-Z|wc -c");
        let programs: Vec<&str> = spec.commands().iter().map(Command::program).collect();
        assert_eq!(programs, vec!["echo", "tr", "wc"]);
        assert_eq!(spec.commands()[1].args(), &["a-z".to_string(), "A-Z".to_string()]);
        assert!(!spec.background());
        assert_eq!(spec.input(), "echo a | tr a-z A-Z|wc -c");
    }

    #[test]
    fn test_redirects_with_and_without_space() {
        for input in &["cmd <infile >outfile", "cmd < infile > outfile"] {
            let spec = parse(input);
            assert_eq!(spec.input_file(), Some(Path::new("infile")));
            assert_eq!(
                spec.output(),
                Some(&OutputRedirect {
                    path: PathBuf::from("outfile"),
                    append: false,
                })
            );
        }
    }

    #[test]
    fn test_append_redirect() {
        let spec = parse("cmd >> log.txt");
        assert!(spec.output().unwrap().append);
        assert_eq!(spec.commands()[0].argv(), &["cmd".to_string()]);
    }

    #[test]
    fn test_background() {
        let spec = parse("sleep 5 &");
        assert!(spec.background());
        assert_eq!(spec.commands()[0].argv(), &["sleep".to_string(), "5".to_string()]);
        assert!(parse("sleep 5&").background());
    }

    #[test]
    fn test_quotes() {
        let spec = parse(r#"echo 'a | b' "c \"d\"" e\ f """#);
        assert_eq!(
            spec.commands()[0].args(),
            &[
                "a | b".to_string(),
                "c \"d\"".to_string(),
                "e f".to_string(),
                "".to_string()
            ]
        );
    }

    #[test]
    fn test_syntax_errors() {
        for input in &[
            "cmd <",
            "cmd >",
            "| cmd",
            "cmd |",
            "cmd || other",
            "cmd & other",
            "a | b < in",
            "a > out | b",
            "echo 'unterminated",
            "&",
        ] {
            assert!(PipelineSpec::parse(input).is_err(), "{} should not parse", input);
        }
    }
}
