use crate::error::{MelodyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between org, project and stack in a qualified stack name.
///
/// Pulumi only accepts `org/project/stack` against its hosted service; the
/// local and object-store backends reject `/`, so components are joined
/// with `.` instead.
pub const STACK_SEPARATOR: char = '.';

// ---------------------------------------------------------------------------
// StackIdentity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackIdentity {
    pub org: String,
    pub project: String,
    pub stack: String,
}

impl StackIdentity {
    pub fn new(
        org: impl Into<String>,
        project: impl Into<String>,
        stack: impl Into<String>,
    ) -> Result<Self> {
        let id = Self {
            org: org.into(),
            project: project.into(),
            stack: stack.into(),
        };
        for component in [&id.org, &id.project, &id.stack] {
            validate_component(component)?;
        }
        Ok(id)
    }

    /// The qualified name passed to `pulumi --stack`.
    pub fn qualified_name(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.org,
            self.project,
            self.stack,
            sep = STACK_SEPARATOR
        )
    }
}

impl fmt::Display for StackIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// Check that `component` can be joined into a qualified stack name.
pub fn validate_component(component: &str) -> Result<()> {
    if component.trim().is_empty() || component.contains(STACK_SEPARATOR) || component.contains('/')
    {
        return Err(MelodyError::InvalidStackName(component.to_string()));
    }
    Ok(())
}

/// Join org, project and stack into a qualified stack name.
pub fn build_stack_name(org: &str, project: &str, stack: &str) -> Result<String> {
    StackIdentity::new(org, project, stack).map(|id| id.qualified_name())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
