use std::fmt;
use std::io;
use std::path::Path;

use rustyline::{
    self,
    completion::{Completer, FilenameCompleter, Pair},
    error::ReadlineError,
    highlight::Highlighter,
    hint::Hinter,
    history::{DefaultHistory, History},
    validate::Validator,
    CompletionType, Config, Helper,
};

use crate::errors::{Error, Result};

struct EditorHelper(FilenameCompleter);

impl Completer for EditorHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        self.0.complete(line, pos, ctx)
    }
}

impl Hinter for EditorHelper {
    type Hint = String;
}

impl Highlighter for EditorHelper {}

impl Helper for EditorHelper {}

impl Validator for EditorHelper {}

/// Line editing and command history for the interactive prompt.
pub struct Editor {
    internal: rustyline::Editor<EditorHelper, DefaultHistory>,
    history_capacity: usize,
}

impl Editor {
    pub fn with_capacity(history_capacity: usize) -> Result<Editor> {
        let config = Config::builder()
            .max_history_size(history_capacity)
            .map_err(readline_error)?
            .history_ignore_space(true)
            .completion_type(CompletionType::Circular)
            .build();

        let mut internal = rustyline::Editor::with_config(config).map_err(readline_error)?;
        internal.set_helper(Some(EditorHelper(FilenameCompleter::new())));

        Ok(Editor {
            internal,
            history_capacity,
        })
    }

    /// Reads one line. Returns `None` at end of file, and an empty line when
    /// the user interrupts the input so that the caller prompts again.
    pub fn readline(&mut self, prompt: &str) -> Result<Option<String>> {
        match self.internal.readline(prompt) {
            Ok(line) => Ok(Some(line)),
            Err(ReadlineError::Eof) => Ok(None),
            Err(ReadlineError::Interrupted) => Ok(Some(String::new())),
            Err(e) => Err(readline_error(e)),
        }
    }

    pub fn load_history<P: AsRef<Path> + ?Sized>(&mut self, path: &P) -> Result<()> {
        match self.internal.load_history(path) {
            Ok(()) => Ok(()),
            Err(ReadlineError::Io(ref inner)) if inner.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(readline_error(e)),
        }
    }

    pub fn save_history<P: AsRef<Path> + ?Sized>(&mut self, path: &P) -> Result<()> {
        self.internal.save_history(path).map_err(readline_error)
    }

    pub fn add_history_entry(&mut self, line: &str) {
        let temp_result = self.internal.add_history_entry(line);
        log_if_err!(temp_result, "failed to add history entry");
    }

    pub fn history_len(&self) -> usize {
        self.internal.history().len()
    }
}

fn readline_error(e: ReadlineError) -> Error {
    Error::readline(e.to_string())
}

impl fmt::Debug for Editor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "entries: {}", self.history_len())?;
        write!(f, "capacity: {}", self.history_capacity)
    }
}
