//! Command-line composition for `CreateProcessW`
//!
//! Windows passes a single command-line string to the child, which splits it
//! again with the `CommandLineToArgvW` rules. Quoting here is the inverse of
//! that split.

use std::io;

use crate::error::{Error, Result};

/// Append `arg` to `out`, quoted and escaped as needed
fn append_escaped(out: &mut String, arg: &str) {
    if arg.is_empty() {
        out.push_str("\"\"");
        return;
    }

    let needs_backslash = arg.contains(['"', '\\']);
    let has_space = arg.contains([' ', '\t']);

    if !needs_backslash && !has_space {
        out.push_str(arg);
        return;
    }
    if !needs_backslash {
        out.push('"');
        out.push_str(arg);
        out.push('"');
        return;
    }

    if has_space {
        out.push('"');
    }
    let mut slashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => slashes += 1,
            '"' => {
                // backslashes before a quote are doubled, plus one for the quote
                out.extend(std::iter::repeat('\\').take(slashes + 1));
                slashes = 0;
            }
            _ => slashes = 0,
        }
        out.push(c);
    }
    if has_space {
        // trailing backslashes would escape the closing quote
        out.extend(std::iter::repeat('\\').take(slashes));
        out.push('"');
    }
}

/// Escape a single argument
pub fn escape_arg(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    append_escaped(&mut out, arg);
    out
}

/// Join `args` (program first) into one command line
pub fn compose_command_line<S: AsRef<str>>(args: &[S]) -> String {
    let mut out = String::new();
    for arg in args {
        if !out.is_empty() {
            out.push(' ');
        }
        append_escaped(&mut out, arg.as_ref());
    }
    out
}

/// NUL-terminated UTF-16 copy of `s` for a Win32 string parameter.
///
/// An interior NUL would silently cut the string short, so it is rejected.
pub fn to_wide(s: &str) -> Result<Vec<u16>> {
    if s.contains('\0') {
        return Err(Error::Spawn(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("string contains a NUL: {:?}", s),
        )));
    }
    Ok(s.encode_utf16().chain(Some(0)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// `CommandLineToArgvW` splitting rules, for checking the quoting
    fn split_command_line(line: &str) -> Vec<String> {
        let mut args = Vec::new();
        let mut chars = line.chars().peekable();
        loop {
            while matches!(chars.peek(), Some(' ') | Some('\t')) {
                chars.next();
            }
            if chars.peek().is_none() {
                break;
            }
            let mut arg = String::new();
            let mut in_quotes = false;
            while let Some(&c) = chars.peek() {
                match c {
                    ' ' | '\t' if !in_quotes => break,
                    '\\' => {
                        let mut n = 0;
                        while chars.peek() == Some(&'\\') {
                            chars.next();
                            n += 1;
                        }
                        if chars.peek() == Some(&'"') {
                            arg.extend(std::iter::repeat('\\').take(n / 2));
                            if n % 2 == 1 {
                                arg.push('"');
                                chars.next();
                            }
                        } else {
                            arg.extend(std::iter::repeat('\\').take(n));
                        }
                    }
                    '"' => {
                        in_quotes = !in_quotes;
                        chars.next();
                    }
                    _ => {
                        arg.push(c);
                        chars.next();
                    }
                }
            }
            args.push(arg);
        }
        args
    }

    #[test]
    fn test_escape_plain() {
        assert_eq!(escape_arg("cmd.exe"), "cmd.exe");
    }

    #[test]
    fn test_escape_empty() {
        assert_eq!(escape_arg(""), "\"\"");
    }

    #[test]
    fn test_escape_space() {
        assert_eq!(escape_arg("C:\\Program Files\\x"), "\"C:\\Program Files\\x\"");
        assert_eq!(escape_arg("a b"), "\"a b\"");
    }

    #[test]
    fn test_escape_quote() {
        assert_eq!(escape_arg("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(escape_arg("a\"b"), "a\\\"b");
    }

    #[test]
    fn test_escape_trailing_backslash_in_quotes() {
        assert_eq!(escape_arg("C:\\dir with space\\"), "\"C:\\dir with space\\\\\"");
    }

    #[test]
    fn test_backslashes_without_quotes_untouched() {
        assert_eq!(escape_arg("C:\\dir\\file"), "C:\\dir\\file");
    }

    #[test]
    fn test_compose_command_line() {
        let line = compose_command_line(&["cmd.exe", "/c", "echo hi", ""]);
        assert_eq!(line, "cmd.exe /c \"echo hi\" \"\"");
    }

    #[test]
    fn test_to_wide_terminates_and_rejects_nul() {
        assert_eq!(to_wide("ab").unwrap(), vec![b'a' as u16, b'b' as u16, 0]);
        assert_eq!(to_wide("").unwrap(), vec![0]);
        let err = to_wide("cmd.exe\0/c evil").unwrap_err();
        assert!(matches!(err, Error::Spawn(ref e) if e.kind() == io::ErrorKind::InvalidInput));
    }

    proptest! {
        #[test]
        fn prop_command_line_splits_back(
            args in proptest::collection::vec("[a-z \\\\\"\t]{0,8}", 1..6)
        ) {
            let line = compose_command_line(&args);
            prop_assert_eq!(split_command_line(&line), args);
        }
    }
}
