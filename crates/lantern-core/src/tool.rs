use std::time::Duration;

use anyhow::{anyhow, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Builds a command from a configured argv template, replacing `{key}`
    /// placeholders in every element.
    pub fn from_template(template: &[String], substitutions: &[(&str, &str)]) -> Result<Self> {
        let mut parts = template.iter().map(|part| {
            substitutions
                .iter()
                .fold(part.clone(), |acc, (key, value)| {
                    acc.replace(&format!("{{{key}}}"), value)
                })
        });
        let program = parts
            .next()
            .filter(|program| !program.trim().is_empty())
            .ok_or_else(|| anyhow!("command template must name a program"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn display(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                rendered.push_str(&format!("'{arg}'"));
            } else {
                rendered.push_str(arg);
            }
        }
        rendered
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolExit {
    Exited(i32),
    /// Terminated by a signal not sent by the runner.
    Killed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit: ToolExit,
}

impl ToolOutput {
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit: ToolExit::Exited(code),
        }
    }

    pub fn success(&self) -> bool {
        self.exit == ToolExit::Exited(0)
    }

    pub fn was_cancelled(&self) -> bool {
        self.exit == ToolExit::Cancelled
    }

    pub fn failure_summary(&self, command: &ToolCommand, timeout: Duration) -> String {
        match self.exit {
            ToolExit::Exited(code) => format!(
                "`{}` exited with status {code} stderr='{}'",
                command.display(),
                self.stderr.trim()
            ),
            ToolExit::Killed => format!("`{}` was terminated by a signal", command.display()),
            ToolExit::TimedOut => format!(
                "`{}` timed out after {}s",
                command.display(),
                timeout.as_secs()
            ),
            ToolExit::Cancelled => format!("`{}` was cancelled by interrupt", command.display()),
        }
    }
}

/// Capability for invoking external programs. Every call is blocking and bounded
/// by `timeout`; `Err` is reserved for failures to launch the program at all.
pub trait ExternalToolRunner {
    fn run(&self, command: &ToolCommand, timeout: Duration) -> Result<ToolOutput>;
}
