use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;

use crate::error::{ShellError, ShellResult};
use crate::parser::Word;

/// A command with its `<` / `>` redirections stripped out and opened.
///
/// Dropping it closes any descriptor that was not handed to a child.
#[derive(Debug)]
pub struct Resolved {
    pub args: Vec<String>,
    pub input: Option<File>,
    pub output: Option<File>,
}

/// Separate `<` and `>` from regular arguments and open their targets.
/// Quoted or escaped operators are ordinary arguments.
///
/// The whole vector is validated before any file is opened, so a rejected
/// command never creates or truncates its output file.
pub fn resolve(tokens: &[Word]) -> ShellResult<Resolved> {
    let mut args = Vec::new();
    let mut input_path: Option<&str> = None;
    let mut output_path: Option<&str> = None;
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];
        let operator = if token.is_operator("<") {
            '<'
        } else if token.is_operator(">") {
            '>'
        } else {
            args.push(token.text.clone());
            i += 1;
            continue;
        };

        i += 1;
        let path = expect_filename(i, tokens, operator)?;
        let target = if operator == '<' {
            &mut input_path
        } else {
            &mut output_path
        };
        if target.is_some() {
            return Err(ShellError::DuplicateRedirection { operator });
        }
        *target = Some(path);
        i += 1;
    }

    let input = input_path.map(open_input).transpose()?;
    let output = output_path.map(open_output).transpose()?;

    Ok(Resolved {
        args,
        input,
        output,
    })
}

fn expect_filename(i: usize, tokens: &[Word], operator: char) -> ShellResult<&str> {
    match tokens.get(i) {
        Some(path) if !path.is_operator("<") && !path.is_operator(">") => Ok(&path.text),
        _ => Err(ShellError::RedirectionSyntax { operator }),
    }
}

fn open_input(path: &str) -> ShellResult<File> {
    File::open(path).map_err(|source| ShellError::RedirectionOpen {
        path: path.to_string(),
        source,
    })
}

fn open_output(path: &str) -> ShellResult<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(|source| ShellError::RedirectionOpen {
            path: path.to_string(),
            source,
        })
}
