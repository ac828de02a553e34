//! The main compile pass
//!
//! Compilation treats the active environments as a stack of indices into
//! the validated `EnvSet`, seeded with the kernel and an implicit `boot`
//! command. The first remaining script line is repeatedly inspected; when
//! its prefix does not match the top of the stack the compiler synthesizes
//! the missing enter or exit line and looks again. Success requires the
//! line list and the stack to empty out together.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::run::{Command, InputClass, Policy};

use super::env::{prefixed, split_prefix, EnvSet, KERNEL};
use super::expand::expand_macros;

/// Ceiling on compile-loop iterations; exceeding it means a synthesized
/// line fed back into itself
pub const MAX_EXPANSION_LOOPS: usize = 1024;

/// Named override applied to compiled commands by base name
///
/// Overrides whose name matches no command are silently ignored; a script
/// may carry overrides for commands that only some configurations emit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandOverride {
    pub name: String,

    /// Replacement wall-clock timeout in seconds
    #[serde(default)]
    pub timeout: Option<f32>,

    /// Replacement timeout tolerance
    #[serde(default, rename = "timesout")]
    pub times_out: Option<Policy>,

    /// Replacement panic expectation
    #[serde(default)]
    pub panics: Option<Policy>,
}

/// Compile script text into an ordered command list
///
/// Fails without producing any commands; the returned list always begins
/// with the implicit kernel `boot` command.
pub fn compile(
    script: &str,
    envs: &EnvSet,
    overrides: &[CommandOverride],
) -> Result<Vec<Command>> {
    let mut commands = vec![Command::new(
        0,
        envs.name(KERNEL).to_string(),
        InputClass::Kernel,
        "boot".to_string(),
        Some(envs.env(KERNEL).prompt.clone()),
    )];

    let raw: Vec<String> = script
        .trim()
        .lines()
        .map(|l| l.trim().to_string())
        .collect();
    let mut lines: VecDeque<String> = expand_macros(raw)?.into();

    // Innermost environment last
    let mut stack: Vec<usize> = vec![KERNEL];

    for iteration in 0..=MAX_EXPANSION_LOOPS {
        if iteration == MAX_EXPANSION_LOOPS {
            return Err(Error::CompileExpansionLoop);
        }

        let Some(&current) = stack.last() else {
            if let Some(line) = lines.front() {
                return Err(Error::CompilePrematureExit(line.clone()));
            }
            break;
        };
        let current_spec = &envs.env(current).spec;

        // Out of script but still nested: synthesize the exit of the
        // innermost environment and unwind
        let Some(line) = lines.front() else {
            lines.push_front(prefixed(&current_spec.prefix, &current_spec.end));
            continue;
        };

        if line.is_empty() {
            return Err(Error::CompileEmptyCommand);
        }

        let (prefix, input) = split_prefix(line);
        let Some(target) = envs.by_prefix(prefix) else {
            return Err(Error::CompileUnknownPrefix(line.clone()));
        };

        if target != current {
            if stack.contains(&target) {
                // Re-entry into an outer environment: leave the current one
                lines.push_front(prefixed(&current_spec.prefix, &current_spec.end));
            } else {
                // A deeper environment: enter it first
                lines.push_front(envs.env(target).spec.start.clone());
            }
            continue;
        }

        // The line belongs to the active environment; classify it
        let input = input.to_string();
        lines.pop_front();

        let mut started = None;
        if input == current_spec.end {
            stack.pop();
        } else {
            let full = prefixed(&current_spec.prefix, &input);
            for idx in envs.scan_order() {
                if envs.env(idx).spec.start == full {
                    stack.push(idx);
                    started = Some(idx);
                    break;
                }
            }
        }

        let type_env = started.unwrap_or(current);
        let class = if !envs.env(type_env).spec.prefix.is_empty() || input.starts_with("p ") {
            InputClass::User
        } else {
            InputClass::Kernel
        };

        let prompt = stack.last().map(|&idx| envs.env(idx).prompt.clone());

        let mut command = Command::new(
            commands.len(),
            envs.name(current).to_string(),
            class,
            input,
            prompt,
        );
        apply_overrides(&mut command, overrides);
        commands.push(command);
    }

    Ok(commands)
}

fn apply_overrides(command: &mut Command, overrides: &[CommandOverride]) {
    for tmpl in overrides {
        if tmpl.name != command.base_name() {
            continue;
        }
        if let Some(timeout) = tmpl.timeout {
            command.timeout = timeout;
        }
        if let Some(times_out) = tmpl.times_out {
            command.times_out = times_out;
        }
        if let Some(panics) = tmpl.panics {
            command.panics = panics;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::CommandStatus;
    use crate::script::env::EnvSpec;

    fn compile_builtin(script: &str) -> Result<Vec<Command>> {
        compile(script, &EnvSet::builtin(), &[])
    }

    fn inputs(commands: &[Command]) -> Vec<&str> {
        commands.iter().map(|c| c.input.as_str()).collect()
    }

    fn env_tags(commands: &[Command]) -> Vec<&str> {
        commands.iter().map(|c| c.env.as_str()).collect()
    }

    #[test]
    fn kernel_quit_compiles_to_boot_and_quit() {
        let commands = compile_builtin("q").unwrap();
        assert_eq!(inputs(&commands), vec!["boot", "q"]);
        assert_eq!(env_tags(&commands), vec!["kernel", "kernel"]);
        assert!(commands.iter().all(|c| c.status == CommandStatus::None));
    }

    #[test]
    fn shell_script_compiles_to_five_commands() {
        let commands = compile_builtin("s\n$ /bin/true\n$ exit\nq").unwrap();
        assert_eq!(inputs(&commands), vec!["boot", "s", "/bin/true", "exit", "q"]);
        assert_eq!(
            env_tags(&commands),
            vec!["kernel", "kernel", "shell", "shell", "kernel"]
        );
    }

    #[test]
    fn flat_script_is_boot_plus_one_command_per_line() {
        let commands = compile_builtin("tt1\ntt2\nq").unwrap();
        assert_eq!(inputs(&commands), vec!["boot", "tt1", "tt2", "q"]);
    }

    #[test]
    fn missing_exits_are_synthesized() {
        // Enters the shell and never leaves it; the shell exit and kernel
        // quit both get synthesized, innermost first
        let commands = compile_builtin("$ /bin/true").unwrap();
        assert_eq!(inputs(&commands), vec!["boot", "s", "/bin/true", "exit", "q"]);
        assert_eq!(
            env_tags(&commands),
            vec!["kernel", "kernel", "shell", "shell", "kernel"]
        );
    }

    #[test]
    fn reentry_synthesizes_exit_of_inner_environment() {
        // A kernel line while the shell is active exits the shell first
        let commands = compile_builtin("s\n$ /bin/true\nq").unwrap();
        assert_eq!(inputs(&commands), vec!["boot", "s", "/bin/true", "exit", "q"]);
    }

    #[test]
    fn repeat_macro_repeats_commands() {
        let commands = compile_builtin("3x tt1\nq").unwrap();
        assert_eq!(inputs(&commands), vec!["boot", "tt1", "tt1", "tt1", "q"]);
    }

    #[test]
    fn bracket_macro_produces_three_commands() {
        let commands = compile_builtin("|tt1\nq").unwrap();
        assert_eq!(inputs(&commands), vec!["boot", "khu", "tt1", "khu", "q"]);
    }

    #[test]
    fn empty_line_fails_compilation() {
        // An explicitly blank line inside the script body; outer whitespace
        // is trimmed before splitting
        let err = compile("s\n \n$ exit\nq", &EnvSet::builtin(), &[]);
        assert!(matches!(err, Err(Error::CompileEmptyCommand)));
    }

    #[test]
    fn unknown_prefix_fails_compilation() {
        assert!(matches!(
            compile_builtin("! foo\nq"),
            Err(Error::CompileUnknownPrefix(_))
        ));
    }

    #[test]
    fn lines_after_final_exit_are_premature() {
        assert!(matches!(
            compile_builtin("q\ntt1"),
            Err(Error::CompilePrematureExit(_))
        ));
    }

    #[test]
    fn shell_commands_are_user_class() {
        let commands = compile_builtin("$ /bin/true\nq").unwrap();
        let true_cmd = commands.iter().find(|c| c.input == "/bin/true").unwrap();
        assert_eq!(true_cmd.class, InputClass::User);
        let q = commands.iter().find(|c| c.input == "q").unwrap();
        assert_eq!(q.class, InputClass::Kernel);
    }

    #[test]
    fn kernel_program_launch_is_user_class() {
        let commands = compile_builtin("p /testbin/forktest\nq").unwrap();
        let p = commands.iter().find(|c| c.input.starts_with("p ")).unwrap();
        assert_eq!(p.class, InputClass::User);
    }

    #[test]
    fn last_command_has_no_prompt() {
        let commands = compile_builtin("q").unwrap();
        assert!(commands.last().unwrap().prompt.is_none());
        // All earlier commands expect some prompt
        assert!(commands[..commands.len() - 1]
            .iter()
            .all(|c| c.prompt.is_some()));
    }

    #[test]
    fn prompt_tracks_environment_after_command() {
        let commands = compile_builtin("s\n$ exit\nq").unwrap();
        // "s" enters the shell, so its prompt is the shell prompt
        let s = &commands[1];
        assert!(s.prompt.as_ref().unwrap().is_match("OS/161$ "));
        // "exit" returns to the kernel
        let exit = &commands[2];
        assert!(exit
            .prompt
            .as_ref()
            .unwrap()
            .is_match("OS/161 kernel [? for menu]: "));
    }

    #[test]
    fn custom_environment_round_trip() {
        let envs = EnvSet::new(&[EnvSpec {
            prefix: "!".to_string(),
            prompt: "sub> ".to_string(),
            start: "$ subshell".to_string(),
            end: "done".to_string(),
        }])
        .unwrap();

        let commands = compile("! probe", &envs, &[]).unwrap();
        assert_eq!(
            inputs(&commands),
            vec!["boot", "s", "subshell", "probe", "done", "exit", "q"]
        );
        assert_eq!(
            env_tags(&commands),
            vec!["kernel", "kernel", "shell", "!", "!", "shell", "kernel"]
        );
    }

    #[test]
    fn mutually_recursive_starts_hit_the_expansion_ceiling() {
        // Each start line references the other environment, so synthesizing
        // enter lines never converges
        let envs = EnvSet::new(&[
            EnvSpec {
                prefix: "!".to_string(),
                prompt: "a> ".to_string(),
                start: "@ enter-a".to_string(),
                end: "done".to_string(),
            },
            EnvSpec {
                prefix: "@".to_string(),
                prompt: "b> ".to_string(),
                start: "! enter-b".to_string(),
                end: "done".to_string(),
            },
        ])
        .unwrap();

        assert!(matches!(
            compile("! probe", &envs, &[]),
            Err(Error::CompileExpansionLoop)
        ));
    }

    #[test]
    fn overrides_apply_by_base_name() {
        let overrides = vec![CommandOverride {
            name: "forktest".to_string(),
            timeout: Some(120.0),
            times_out: Some(Policy::Maybe),
            panics: None,
        }];
        let commands = compile("p /testbin/forktest\nq", &EnvSet::builtin(), &overrides).unwrap();
        let fork = commands.iter().find(|c| c.input.starts_with("p ")).unwrap();
        assert_eq!(fork.timeout, 120.0);
        assert_eq!(fork.times_out, Policy::Maybe);
        assert_eq!(fork.panics, Policy::No);
    }

    #[test]
    fn unmatched_override_names_are_ignored() {
        let overrides = vec![CommandOverride {
            name: "nosuchcommand".to_string(),
            timeout: Some(5.0),
            ..Default::default()
        }];
        let commands = compile("q", &EnvSet::builtin(), &overrides).unwrap();
        assert!(commands.iter().all(|c| c.timeout == 0.0));
    }

    #[test]
    fn compilation_is_deterministic() {
        let script = "s\n$ /bin/true\n3x tt1\nq";
        let a = compile_builtin(script).unwrap();
        let b = compile_builtin(script).unwrap();
        assert_eq!(inputs(&a), inputs(&b));
        assert_eq!(env_tags(&a), env_tags(&b));
        let classes = |cs: &[Command]| cs.iter().map(|c| c.class).collect::<Vec<_>>();
        assert_eq!(classes(&a), classes(&b));
    }
}
