//! Backward graph construction.
//!
//! Given a forward operator (a leaf or a net of operators) and the variables
//! whose gradients are not wanted, builds the operator that computes every
//! other gradient.
//!
//! - Nets are walked child by child in reverse execution order.
//! - An operator none of whose input gradients is needed becomes a no-op.
//! - An operator none of whose output gradients is available becomes a no-op,
//!   and its inputs' gradients are marked unneeded for the operators visited
//!   after it.
//! - When several children of a net produce the same gradient, each
//!   contribution is renamed and an `add` operator sums them back into the
//!   original name.
//! - Gradient inputs that will never be computed are replaced by explicit
//!   `fill_zeros_like` outputs; gradient outputs nobody needs are bound to
//!   [`EMPTY_VAR_NAME`](crate::naming::EMPTY_VAR_NAME).

mod builder;

pub use builder::BackwardBuilder;

use log::debug;

use crate::config::BackwardConfig;
use crate::error::Result;
use crate::no_grad::NoGradSet;
use crate::operator::Operator;
use crate::registry::OpFactory;

/// Builds the backward operator of `forward` with the default configuration.
///
/// `no_grad_vars` names forward variables (without gradient suffix) whose
/// gradients must not be computed.
///
/// # Example
///
/// ```
/// use netgrad::operator::{AttributeMap, NetOp};
/// use netgrad::registry::{OpFactory, OpRegistry};
/// use netgrad::vars;
///
/// let registry = OpRegistry::with_default_ops();
/// let mut net = NetOp::new();
/// net.append_op(registry.create_op(
///     "mul",
///     vars! { "X" => ["x"], "Y" => ["w"] },
///     vars! { "Out" => ["y"] },
///     AttributeMap::new(),
/// )?)?;
/// net.complete_add_op(true);
///
/// let bwd = netgrad::backward(&net.into(), ["w"], &registry)?;
/// assert_eq!(bwd.kind(), "@GENERATED_BACKWARD@");
/// assert_eq!(bwd.as_net().map(|net| net.len()), Some(1));
/// # Ok::<(), netgrad::BackwardError>(())
/// ```
pub fn backward<F, I, S>(forward: &Operator, no_grad_vars: I, registry: &F) -> Result<Operator>
where
    F: OpFactory,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    backward_with_config(forward, no_grad_vars, registry, BackwardConfig::default())
}

/// [`backward`] with an explicit configuration.
pub fn backward_with_config<F, I, S>(
    forward: &Operator,
    no_grad_vars: I,
    registry: &F,
    config: BackwardConfig,
) -> Result<Operator>
where
    F: OpFactory,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut no_grad = NoGradSet::seeded(no_grad_vars);
    let mut uniq_id = 0;

    debug!(
        "building backward of {} with {} unneeded gradients",
        forward.kind(),
        no_grad.len()
    );
    let bwd = BackwardBuilder::with_config(registry, config).build(
        forward,
        &mut no_grad,
        &mut uniq_id,
    )?;
    debug!(
        "built backward {} ({} nets expanded, {} unneeded gradients)",
        bwd.kind(),
        uniq_id,
        no_grad.len()
    );
    Ok(bwd)
}

#[cfg(test)]
mod tests;
