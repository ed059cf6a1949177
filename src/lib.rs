//! netgrad: backward graph construction for operator nets
//!
//! netgrad turns a forward computation graph into the graph that computes its
//! gradients. It only builds graph descriptions; executing them is left to the
//! caller.
//!
//! # Architecture
//!
//! netgrad provides:
//! - **operator**: leaf operators and nets of operators bound to variables by name
//! - **naming**: gradient / zero / empty variable naming conventions
//! - **no_grad**: the set of gradients known to be unneeded
//! - **registry**: operator prototypes and gradient operator construction
//! - **backward**: the recursive backward builder and its driver
//!
//! # Example
//!
//! ```
//! use netgrad::prelude::*;
//! use netgrad::vars;
//!
//! let registry = OpRegistry::with_default_ops();
//! let fwd = registry.create_op(
//!     "sigmoid",
//!     vars! { "X" => ["x"] },
//!     vars! { "Y" => ["y"] },
//!     AttributeMap::new(),
//! )?;
//!
//! let bwd = backward(&fwd, Vec::<String>::new(), &registry)?;
//! assert_eq!(bwd.kind(), "sigmoid_grad");
//! assert_eq!(bwd.output("X@GRAD")?, "x@GRAD");
//! # Ok::<(), netgrad::BackwardError>(())
//! ```

// ============================================================================
// Core Modules
// ============================================================================

pub mod backward;
pub mod config;
pub mod error;
pub mod naming;
pub mod no_grad;
pub mod operator;
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use backward::{BackwardBuilder, backward, backward_with_config};
pub use config::BackwardConfig;
pub use error::{BackwardError, Result};
pub use no_grad::NoGradSet;
pub use operator::{NetOp, Operator};

// ============================================================================
// Prelude
// ============================================================================

/// Prelude module with commonly used types and traits
pub mod prelude {
    pub use crate::backward::{BackwardBuilder, backward, backward_with_config};
    pub use crate::config::BackwardConfig;
    pub use crate::error::{BackwardError, Result};
    pub use crate::naming::{EMPTY_VAR_NAME, grad_var_name};
    pub use crate::no_grad::NoGradSet;
    pub use crate::operator::{Attribute, AttributeMap, LeafOp, NetOp, Operator, VarNameMap};
    pub use crate::registry::{ArgProto, OpFactory, OpProto, OpRegistry};
}
