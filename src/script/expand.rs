//! Line-level macro expansion
//!
//! Two macros are expanded before the main compile pass so that the stack
//! logic never has to look at them:
//!
//! - `Nx command` repeats `command` N times
//! - `|command` wraps `command` in a `khu` / command / `khu` triple
//!
//! The pass runs twice so one macro may produce the other.

use crate::common::{Error, Result};

/// Expand repeat and bracket macros over a command list
pub fn expand_macros(lines: Vec<String>) -> Result<Vec<String>> {
    expand_once(expand_once(lines)?)
}

fn expand_once(lines: Vec<String>) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(lines.len());

    for line in lines {
        let line = line.trim();

        if let Some(inner) = line.strip_prefix('|') {
            out.push("khu".to_string());
            out.push(inner.trim().to_string());
            out.push("khu".to_string());
            continue;
        }

        if let Some((count, rest)) = split_repeat(line) {
            let count = count
                .parse::<usize>()
                .map_err(|_| Error::CompileBadRepeat(line.to_string()))?;
            for _ in 0..count {
                out.push(rest.trim().to_string());
            }
            continue;
        }

        out.push(line.to_string());
    }

    Ok(out)
}

/// Split `123x rest` into ("123", " rest"); None if the line isn't a repeat
fn split_repeat(line: &str) -> Option<(&str, &str)> {
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    match line[digits..].strip_prefix('x') {
        Some(rest) => Some((&line[..digits], rest)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(script: &[&str]) -> Vec<String> {
        script.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn repeat_expands_to_n_copies() {
        let out = expand_macros(lines(&["3x cmd"])).unwrap();
        assert_eq!(out, vec!["cmd", "cmd", "cmd"]);
    }

    #[test]
    fn bracket_expands_to_triple() {
        let out = expand_macros(lines(&["|$ /bin/true"])).unwrap();
        assert_eq!(out, vec!["khu", "$ /bin/true", "khu"]);
    }

    #[test]
    fn nested_macros_expand_in_second_pass() {
        let out = expand_macros(lines(&["2x |cmd"])).unwrap();
        assert_eq!(out, vec!["khu", "cmd", "khu", "khu", "cmd", "khu"]);
    }

    #[test]
    fn plain_lines_pass_through() {
        let out = expand_macros(lines(&["q", "$ exit"])).unwrap();
        assert_eq!(out, vec!["q", "$ exit"]);
    }

    #[test]
    fn command_named_like_repeat_is_left_alone() {
        // "x" needs leading digits to be a repeat
        let out = expand_macros(lines(&["xyzzy"])).unwrap();
        assert_eq!(out, vec!["xyzzy"]);
    }

    #[test]
    fn huge_repeat_count_is_rejected() {
        let line = format!("{}x cmd", "9".repeat(40));
        assert!(matches!(
            expand_macros(lines(&[&line])),
            Err(Error::CompileBadRepeat(_))
        ));
    }
}
