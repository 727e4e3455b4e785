/// One word of a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    /// Any part was quoted or escaped, so `<` / `>` are plain text.
    pub quoted: bool,
}

impl Word {
    #[cfg(test)]
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quoted: false,
        }
    }

    /// Whether this word is the bare operator `op`.
    pub fn is_operator(&self, op: &str) -> bool {
        !self.quoted && self.text == op
    }
}

/// One input line, split into words and ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub words: Vec<Word>,
    /// Trailing `&`: run without waiting.
    pub background: bool,
    /// The line as typed, minus the trailing `&`, for job reports.
    pub display: String,
}

/// States for the tokenizer state machine.
enum State {
    /// Between tokens; whitespace is skipped
    Normal,
    /// Building an unquoted word; whitespace ends it
    InWord,
    /// Inside double quotes
    InDoubleQuote,
    /// Inside single quotes, everything is literal
    InSingleQuote,
}

/// A word plus whether it ended in an unquoted `&`.
struct Token {
    text: String,
    quoted: bool,
    trailing_amp: bool,
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    // Set when the last char of the current word is an unquoted `&`.
    let mut amp = false;
    let mut quoted = false;
    let mut state = State::Normal;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match (&state, ch) {
            (State::Normal, ' ' | '\t' | '\r' | '\n') => {}
            (State::Normal | State::InWord, ' ' | '\t' | '\r' | '\n') => {
                tokens.push(Token {
                    text: std::mem::take(&mut current),
                    quoted,
                    trailing_amp: amp,
                });
                amp = false;
                quoted = false;
                state = State::Normal;
            }
            (State::Normal | State::InWord, '"') => {
                amp = false;
                quoted = true;
                state = State::InDoubleQuote;
            }
            (State::Normal | State::InWord, '\'') => {
                amp = false;
                quoted = true;
                state = State::InSingleQuote;
            }
            (State::Normal | State::InWord, '\\') => {
                current.push(chars.next().unwrap_or('\\'));
                amp = false;
                quoted = true;
                state = State::InWord;
            }
            (State::Normal | State::InWord, c) => {
                current.push(c);
                amp = c == '&';
                state = State::InWord;
            }

            (State::InDoubleQuote, '"') => {
                state = State::InWord;
            }
            (State::InDoubleQuote, '\\') => match chars.peek() {
                Some(&next) if matches!(next, '"' | '\\' | '$') => {
                    current.push(next);
                    chars.next();
                }
                _ => current.push('\\'),
            },
            (State::InDoubleQuote, c) => current.push(c),

            (State::InSingleQuote, '\'') => {
                state = State::InWord;
            }
            (State::InSingleQuote, c) => current.push(c),
        }
    }

    if !matches!(state, State::Normal) {
        tokens.push(Token {
            text: current,
            quoted,
            trailing_amp: amp,
        });
    }

    tokens
}

/// Split a line into a [`CommandLine`]. Returns `None` for blank lines and
/// for a lone `&`.
pub fn parse(line: &str) -> Option<CommandLine> {
    let mut tokens = tokenize(line);

    let mut background = false;
    if let Some(last) = tokens.last_mut() {
        if last.trailing_amp {
            background = true;
            last.text.pop();
            if last.text.is_empty() {
                tokens.pop();
            }
        }
    }

    let words: Vec<Word> = tokens
        .into_iter()
        .map(|t| Word {
            text: t.text,
            quoted: t.quoted,
        })
        .collect();
    if words.is_empty() {
        return None;
    }

    let mut display = line.trim();
    if background {
        display = display.strip_suffix('&').unwrap_or(display).trim_end();
    }

    Some(CommandLine {
        words,
        background,
        display: display.to_string(),
    })
}

/// Replace every `$?` with the last status.
pub fn expand_status(words: &mut [Word], last_status: i32) {
    for word in words.iter_mut().filter(|w| w.text.contains("$?")) {
        word.text = word.text.replace("$?", &last_status.to_string());
    }
}
