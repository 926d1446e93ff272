//! Tool dependency preflight checks
//!
//! Workflows that shell out declare the tools they need up front and run
//! [`preflight`] before doing any work, so a missing or mispinned binary
//! fails the run immediately instead of halfway through a sync.

use crate::command::ToolCommand;
use crate::error::{Error, Result};

/// A required external tool and how to probe it
#[derive(Debug, Clone)]
pub struct ToolCheck {
    tool: String,
    version_args: Vec<String>,
    expected: Option<String>,
}

impl ToolCheck {
    pub fn new<I, S>(tool: impl Into<String>, version_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tool: tool.into(),
            version_args: version_args.into_iter().map(Into::into).collect(),
            expected: None,
        }
    }

    /// Require this version string to appear in the probe output
    pub fn expect_version(mut self, version: impl Into<String>) -> Self {
        self.expected = Some(version.into());
        self
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Probe the tool, verifying presence and (when pinned) version
    pub fn run(&self) -> Result<()> {
        let probe = ToolCommand::new(&self.tool).args(self.version_args.iter().cloned());
        let output = match probe.status() {
            Ok(output) => output,
            Err(_) => {
                return Err(Error::MissingDependency {
                    tool: self.tool.clone(),
                });
            }
        };
        if !output.success {
            return Err(Error::MissingDependency {
                tool: self.tool.clone(),
            });
        }
        if let Some(expected) = &self.expected {
            let text = output.stdout_text();
            if !text.contains(expected.as_str()) {
                return Err(Error::WrongVersion {
                    tool: self.tool.clone(),
                    expected: expected.clone(),
                    output: text,
                });
            }
        }
        Ok(())
    }
}

/// Run every check in order, failing on the first problem
pub fn preflight(checks: &[ToolCheck]) -> Result<()> {
    for check in checks {
        tracing::debug!(tool = check.tool(), "checking tool dependency");
        check.run()?;
    }
    Ok(())
}
