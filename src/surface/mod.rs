//! Control-surface host interface
//!
//! The synchronizers describe what they expose (actions, boolean feedbacks,
//! per-channel variables) as plain data. The orchestrator merges those
//! contributions and hands them to a [`Surface`] implementation once.

pub mod local;
pub mod params;

use serde::Serialize;
use serde_json::Value;

use crate::device::ConnectionState;

pub use local::{LocalSurface, SurfaceEvent};
pub use params::{parse_options, Choice, OptionField, OptionKind, OptionValues, ParsedOptions};

/// RGB color as used by feedback styles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

/// Style a surface applies while a boolean feedback is true
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedbackStyle {
    pub bgcolor: Rgb,
    pub color: Rgb,
}

/// A mutating action the surface can trigger
#[derive(Debug, Clone, Serialize)]
pub struct ActionDefinition {
    pub id: String,
    pub name: String,
    pub options: Vec<OptionField>,
}

/// A boolean feedback the surface can evaluate
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackDefinition {
    pub id: String,
    pub name: String,
    pub style: FeedbackStyle,
    pub options: Vec<OptionField>,
}

/// A named value pushed to the surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableDefinition {
    pub variable_id: String,
    pub name: String,
}

impl VariableDefinition {
    pub fn new(variable_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            variable_id: variable_id.into(),
            name: name.into(),
        }
    }
}

/// What one synchronizer registers with the surface
#[derive(Debug, Clone, Default, Serialize)]
pub struct SurfaceContribution {
    pub actions: Vec<ActionDefinition>,
    pub feedbacks: Vec<FeedbackDefinition>,
    pub variables: Vec<VariableDefinition>,
}

impl SurfaceContribution {
    /// Append another contribution, keeping registration order
    pub fn merge(&mut self, other: SurfaceContribution) {
        self.actions.extend(other.actions);
        self.feedbacks.extend(other.feedbacks);
        self.variables.extend(other.variables);
    }
}

/// Host side of the control surface
///
/// Implementations receive read-only snapshots; they never reach back into a
/// synchronizer cache.
pub trait Surface: Send + Sync {
    /// Replace the full action/feedback/variable catalog
    fn set_definitions(&self, definitions: &SurfaceContribution);

    /// Push new variable values
    fn set_variable_values(&self, values: Vec<(String, Value)>);

    /// Ask the surface to re-evaluate the given feedbacks
    fn check_feedbacks(&self, feedback_ids: &[&str]);

    /// Connection state changed
    fn update_status(&self, _state: ConnectionState) {
        // Default: surfaces without a status indicator ignore this
    }
}
