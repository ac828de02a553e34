//! Interaction environments
//!
//! An environment is a named interaction context (kernel console, shell,
//! nested sub-program) with its own prompt, start, and end commands.
//! User-supplied definitions are validated as a set, then frozen into an
//! `EnvSet`: an immutable array of descriptors with precompiled prompt
//! patterns, addressed by index everywhere else in the compiler and engine.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// Index of the built-in kernel environment in every `EnvSet`
pub const KERNEL: usize = 0;

/// Index of the built-in shell environment in every `EnvSet`
pub const SHELL: usize = 1;

/// Characters allowed as environment prefixes ($ is reserved for the shell)
pub const LEGAL_PREFIXES: &str = "!@#$%^&*";

pub const KERNEL_PROMPT: &str = "OS/161 kernel [? for menu]: ";
pub const SHELL_PROMPT: &str = "OS/161$ ";

/// One environment definition as it appears in test configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSpec {
    /// Single-character line prefix selecting this environment; empty only
    /// for the built-in kernel
    #[serde(default)]
    pub prefix: String,

    /// Literal prompt the environment prints when ready for input
    pub prompt: String,

    /// Command that enters the environment, written as it appears in a
    /// script (it may carry the prefix of the environment it is typed in)
    #[serde(default)]
    pub start: String,

    /// Command that leaves the environment, written without any prefix
    pub end: String,
}

impl EnvSpec {
    fn kernel() -> Self {
        Self {
            prefix: String::new(),
            prompt: KERNEL_PROMPT.to_string(),
            start: String::new(),
            end: "q".to_string(),
        }
    }

    fn shell() -> Self {
        Self {
            prefix: "$".to_string(),
            prompt: SHELL_PROMPT.to_string(),
            start: "s".to_string(),
            end: "exit".to_string(),
        }
    }

    fn prefix_char(&self) -> Option<char> {
        self.prefix.chars().next()
    }
}

/// A validated environment plus its precompiled prompt pattern
#[derive(Debug, Clone)]
pub struct Env {
    pub spec: EnvSpec,
    pub prompt: Arc<Regex>,
}

/// Immutable, pre-validated set of environments
///
/// Index 0 is always the kernel, index 1 the shell; user definitions follow
/// in declaration order. Declaration order doubles as start-line scan
/// priority.
#[derive(Debug, Clone)]
pub struct EnvSet {
    envs: Vec<Env>,
}

impl EnvSet {
    /// Validate user environment definitions and freeze the set
    ///
    /// All-or-nothing: any invalid definition fails the whole set before
    /// compilation looks at a single script line.
    pub fn new(user_defs: &[EnvSpec]) -> Result<Self> {
        let mut seen = String::from("$");

        for def in user_defs {
            if def.prefix.is_empty()
                || def.prompt.is_empty()
                || def.start.is_empty()
                || def.end.is_empty()
            {
                return Err(Error::EnvIncomplete);
            }
            if def.prefix.chars().count() > 1 {
                return Err(Error::EnvMultiCharPrefix(def.prefix.clone()));
            }
            let prefix = def.prefix_char().ok_or(Error::EnvIncomplete)?;
            if !LEGAL_PREFIXES.contains(prefix) {
                return Err(Error::EnvInvalidPrefix(prefix));
            }
            if prefix == '$' {
                return Err(Error::EnvReservedPrefix);
            }
            if seen.contains(prefix) {
                return Err(Error::EnvDuplicatePrefix(prefix));
            }
            seen.push(prefix);

            if let (Some(start_prefix), _) = split_prefix(&def.start) {
                if start_prefix == prefix {
                    return Err(Error::EnvStartOwnPrefix(def.start.clone()));
                }
            }
            if let (Some(_), _) = split_prefix(&def.end) {
                return Err(Error::EnvEndPrefixed(def.end.clone()));
            }
        }

        // Start lines may only reference prefixes that exist in the set
        for def in user_defs {
            if let (Some(start_prefix), _) = split_prefix(&def.start) {
                if !seen.contains(start_prefix) {
                    return Err(Error::EnvUnknownStartPrefix(def.start.clone()));
                }
            }
        }

        let mut envs = Vec::with_capacity(user_defs.len() + 2);
        for spec in [EnvSpec::kernel(), EnvSpec::shell()]
            .into_iter()
            .chain(user_defs.iter().cloned())
        {
            let prompt = Arc::new(
                Regex::new(&regex::escape(&spec.prompt))
                    .map_err(|e| Error::Internal(format!("prompt pattern: {e}")))?,
            );
            envs.push(Env { spec, prompt });
        }

        Ok(Self { envs })
    }

    /// The built-in environments only
    pub fn builtin() -> Self {
        // Infallible for an empty definition list
        Self::new(&[]).unwrap_or_else(|_| unreachable!())
    }

    pub fn len(&self) -> usize {
        self.envs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envs.is_empty()
    }

    pub fn env(&self, idx: usize) -> &Env {
        &self.envs[idx]
    }

    /// Resolve a line prefix to an environment index
    pub fn by_prefix(&self, prefix: Option<char>) -> Option<usize> {
        match prefix {
            None => Some(KERNEL),
            Some('$') => Some(SHELL),
            Some(p) => self.envs[2..]
                .iter()
                .position(|e| e.spec.prefix_char() == Some(p))
                .map(|i| i + 2),
        }
    }

    /// Display name of an environment: "kernel", "shell", or its prefix
    pub fn name(&self, idx: usize) -> &str {
        match idx {
            KERNEL => "kernel",
            SHELL => "shell",
            _ => &self.envs[idx].spec.prefix,
        }
    }

    /// Fixed start-line scan priority: user environments in declaration
    /// order, then shell, then kernel
    pub fn scan_order(&self) -> impl Iterator<Item = usize> {
        (2..self.envs.len()).chain([SHELL, KERNEL])
    }
}

/// Split an optional environment prefix off a script line
///
/// A prefix is a single legal character followed by a space; anything else
/// is part of the command.
pub fn split_prefix(line: &str) -> (Option<char>, &str) {
    let line = line.trim();
    let mut chars = line.chars();
    if let (Some(p), Some(' ')) = (chars.next(), chars.next()) {
        if LEGAL_PREFIXES.contains(p) {
            return (Some(p), chars.as_str().trim_start());
        }
    }
    (None, line)
}

/// Join a prefix and a command back into a script line
pub fn prefixed(prefix: &str, line: &str) -> String {
    if prefix.is_empty() {
        line.trim().to_string()
    } else {
        format!("{} {}", prefix, line.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(prefix: &str, start: &str) -> EnvSpec {
        EnvSpec {
            prefix: prefix.to_string(),
            prompt: "sub> ".to_string(),
            start: start.to_string(),
            end: "done".to_string(),
        }
    }

    #[test]
    fn builtins_are_fixed() {
        let envs = EnvSet::builtin();
        assert_eq!(envs.len(), 2);
        assert_eq!(envs.name(KERNEL), "kernel");
        assert_eq!(envs.name(SHELL), "shell");
        assert_eq!(envs.env(KERNEL).spec.end, "q");
        assert_eq!(envs.env(SHELL).spec.start, "s");
        assert_eq!(envs.env(SHELL).spec.end, "exit");
    }

    #[test]
    fn split_prefix_recognizes_legal_markers() {
        assert_eq!(split_prefix("$ /bin/true"), (Some('$'), "/bin/true"));
        assert_eq!(split_prefix("! nested"), (Some('!'), "nested"));
        assert_eq!(split_prefix("q"), (None, "q"));
        // No space means no prefix
        assert_eq!(split_prefix("$exit"), (None, "$exit"));
        // Not in the legal set
        assert_eq!(split_prefix("- foo"), (None, "- foo"));
    }

    #[test]
    fn accepts_valid_custom_environment() {
        let envs = EnvSet::new(&[def("!", "$ subshell")]).unwrap();
        assert_eq!(envs.len(), 3);
        assert_eq!(envs.by_prefix(Some('!')), Some(2));
        assert_eq!(envs.name(2), "!");
    }

    #[test]
    fn rejects_reserved_prefix() {
        assert!(matches!(
            EnvSet::new(&[def("$", "run")]),
            Err(Error::EnvReservedPrefix)
        ));
    }

    #[test]
    fn rejects_duplicate_prefix() {
        assert!(matches!(
            EnvSet::new(&[def("!", "run"), def("!", "other")]),
            Err(Error::EnvDuplicatePrefix('!'))
        ));
    }

    #[test]
    fn rejects_multicharacter_prefix() {
        assert!(matches!(
            EnvSet::new(&[def("!!", "run")]),
            Err(Error::EnvMultiCharPrefix(_))
        ));
    }

    #[test]
    fn rejects_illegal_prefix_character() {
        assert!(matches!(
            EnvSet::new(&[def("-", "run")]),
            Err(Error::EnvInvalidPrefix('-'))
        ));
    }

    #[test]
    fn rejects_start_with_own_prefix() {
        assert!(matches!(
            EnvSet::new(&[def("!", "! run")]),
            Err(Error::EnvStartOwnPrefix(_))
        ));
    }

    #[test]
    fn rejects_prefixed_end() {
        let mut bad = def("!", "run");
        bad.end = "$ done".to_string();
        assert!(matches!(
            EnvSet::new(&[bad]),
            Err(Error::EnvEndPrefixed(_))
        ));
    }

    #[test]
    fn rejects_unknown_start_prefix() {
        assert!(matches!(
            EnvSet::new(&[def("!", "@ run")]),
            Err(Error::EnvUnknownStartPrefix(_))
        ));
    }

    #[test]
    fn rejects_incomplete_definition() {
        let mut bad = def("!", "run");
        bad.prompt = String::new();
        assert!(matches!(EnvSet::new(&[bad]), Err(Error::EnvIncomplete)));
    }

    #[test]
    fn scan_order_prefers_declared_environments() {
        let envs = EnvSet::new(&[def("!", "a"), def("@", "b")]).unwrap();
        let order: Vec<usize> = envs.scan_order().collect();
        assert_eq!(order, vec![2, 3, SHELL, KERNEL]);
    }
}
