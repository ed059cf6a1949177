//! Error types for backward graph construction.

use thiserror::Error;

/// Errors that can occur while building operators or their gradient graphs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackwardError {
    /// No prototype is registered for the operator kind.
    #[error("Operator '{0}' is not registered")]
    UnknownOperator(String),

    /// The operator kind is registered but has no gradient operator.
    #[error("Operator '{0}' does not register a gradient operator")]
    GradientNotRegistered(String),

    /// A prototype with the same kind was registered twice.
    #[error("Operator '{0}' is already registered")]
    DuplicateRegistration(String),

    /// A declared argument slot was not bound when creating an operator.
    #[error("Operator '{kind}' is missing argument '{slot}'")]
    MissingArgument { kind: String, slot: String },

    /// An argument slot that the prototype does not declare was supplied.
    #[error("Operator '{kind}' has no argument named '{slot}'")]
    UnexpectedArgument { kind: String, slot: String },

    /// A non-duplicable slot bound something other than exactly one variable.
    #[error("Argument '{slot}' of operator '{kind}' expects 1 variable, got {got}")]
    ArgumentArity {
        kind: String,
        slot: String,
        got: usize,
    },

    /// A single-variable accessor was used on a missing slot.
    #[error("Operator '{kind}' has no slot '{slot}'")]
    SlotNotFound { kind: String, slot: String },

    /// Gradient operators can only be created for leaf operators.
    #[error("Cannot create a gradient operator for net '{0}'")]
    NotALeaf(String),

    /// The net was already sealed by `complete_add_op`.
    #[error("Net '{0}' is sealed; no more operators can be added")]
    NetSealed(String),

    /// A forward net whose bindings were never derived from its children.
    #[error("Net '{0}' must be sealed with complete_add_op(true) before differentiation")]
    NetNotSealed(String),

    /// Insertion position past the end of the net.
    #[error("Cannot insert at position {pos} into a net of {len} operators")]
    InsertOutOfRange { pos: usize, len: usize },

    /// A gradient variable name too short to carry the gradient suffix.
    #[error("Variable '{name}' is too short to carry gradient suffix '{suffix}'")]
    MalformedGradName { name: String, suffix: String },

    /// The forward graph is nested deeper than the configured limit.
    #[error("Forward graph nesting exceeds the maximum depth of {0}")]
    DepthLimitExceeded(usize),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BackwardError>;
