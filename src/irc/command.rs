//! Lenient IRC line parsing.
//!
//! Accepts the common wire shape: an optional `:prefix`, a verb, space
//! separated parameters, and an optional trailing parameter introduced by
//! `:` that may contain spaces. The trailing parameter is folded into
//! `params` as the final element.

/// One parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcCommand {
    /// Verb, uppercased.
    pub verb: String,
    pub params: Vec<String>,
}

/// Parse one line (without its `\n`). Returns `None` for empty input.
pub fn parse(line: &str) -> Option<IrcCommand> {
    let mut rest = line.trim_end_matches('\r').trim_start();

    if rest.starts_with(':') {
        // Client-supplied prefix; tolerated and ignored.
        let (_, after) = rest.split_once(' ')?;
        rest = after.trim_start();
    }

    let (verb, mut rest) = match rest.split_once(' ') {
        Some((verb, after)) => (verb, after),
        None => (rest, ""),
    };
    if verb.is_empty() {
        return None;
    }

    let mut params = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing.to_string());
            break;
        }
        match rest.split_once(' ') {
            Some((token, after)) => {
                params.push(token.to_string());
                rest = after;
            }
            None => {
                params.push(rest.to_string());
                break;
            }
        }
    }

    Some(IrcCommand {
        verb: verb.to_ascii_uppercase(),
        params,
    })
}
