//! Recursive construction of backward operators.

use std::collections::BTreeSet;

use log::trace;
use rustc_hash::FxHashMap;

use crate::config::BackwardConfig;
use crate::error::{BackwardError, Result};
use crate::naming::{EMPTY_VAR_NAME, rename_var_name, zero_var_name};
use crate::no_grad::{NoGradSet, all_grads_unneeded};
use crate::operator::{AttributeMap, GENERATED_BACKWARD_KIND, NetOp, Operator};
use crate::registry::OpFactory;
use crate::vars;

/// Builds the backward operator of a forward operator.
///
/// The no-gradient set and the unique-id counter are owned by the caller and
/// threaded through every recursive call, so one builder can serve many
/// independent passes.
pub struct BackwardBuilder<'a, F: OpFactory> {
    registry: &'a F,
    config: BackwardConfig,
}

impl<'a, F: OpFactory> BackwardBuilder<'a, F> {
    pub fn new(registry: &'a F) -> Self {
        Self::with_config(registry, BackwardConfig::default())
    }

    pub fn with_config(registry: &'a F, config: BackwardConfig) -> Self {
        BackwardBuilder { registry, config }
    }

    /// Returns the operator computing the gradients of `forward`.
    ///
    /// Never returns an absent operator: wherever nothing is computable the
    /// result is a fresh no-op. `no_grad` only grows. Each net expanded
    /// consumes exactly one value of `uniq_id`.
    ///
    /// Every net in `forward` must have been sealed with
    /// `complete_add_op(true)`; otherwise [`BackwardError::NetNotSealed`].
    pub fn build(
        &self,
        forward: &Operator,
        no_grad: &mut NoGradSet,
        uniq_id: &mut usize,
    ) -> Result<Operator> {
        ensure_bindings_calculated(forward)?;
        self.build_at(forward, no_grad, uniq_id, 0)
    }

    fn build_at(
        &self,
        forward: &Operator,
        no_grad: &mut NoGradSet,
        uniq_id: &mut usize,
        depth: usize,
    ) -> Result<Operator> {
        if depth > self.config.max_depth {
            return Err(BackwardError::DepthLimitExceeded(self.config.max_depth));
        }

        // Nobody needs any gradient this operator could produce.
        if all_grads_unneeded(forward.inputs(), no_grad) {
            trace!("prune {}: no input gradient needed", forward.kind());
            return Ok(Operator::nop());
        }

        // Without output gradients nothing flows back, so the inputs'
        // gradients are unavailable to every operator visited later.
        if all_grads_unneeded(forward.outputs(), no_grad) {
            trace!("prune {}: no output gradient available", forward.kind());
            no_grad.insert_grads_of(forward.inputs());
            return Ok(Operator::nop());
        }

        match forward {
            Operator::Net(net) => self.build_net(net, no_grad, uniq_id, depth),
            Operator::Leaf(_) => self.build_leaf(forward, no_grad),
        }
    }

    fn build_net(
        &self,
        forward: &NetOp,
        no_grad: &mut NoGradSet,
        uniq_id: &mut usize,
        depth: usize,
    ) -> Result<Operator> {
        let mut net = NetOp::with_kind(GENERATED_BACKWARD_KIND);

        // Output gradient name -> positions in `net` of the operators producing it.
        let mut dup_output_ops: FxHashMap<String, Vec<usize>> = FxHashMap::default();

        for (local_op_id, fwd) in forward.ops().iter().rev().enumerate() {
            let bwd = self.build_at(fwd, no_grad, uniq_id, depth + 1)?;
            for out in bwd.outputs().values().flatten() {
                let positions = dup_output_ops.entry(out.clone()).or_default();
                // A child binding one gradient in several slots counts once,
                // so those contributions are not summed.
                if positions.last() != Some(&local_op_id) {
                    positions.push(local_op_id);
                }
            }
            net.append_op(bwd)?;
        }

        let uid = *uniq_id;
        *uniq_id += 1;

        let mut duplicated: Vec<(String, Vec<usize>)> = dup_output_ops
            .into_iter()
            .filter(|(name, positions)| positions.len() > 1 && name != EMPTY_VAR_NAME)
            .collect();
        duplicated.sort();

        let mut insert_position: Vec<(usize, Operator)> = Vec::with_capacity(duplicated.len());
        for (name, positions) in duplicated {
            let mut dup_outputs = Vec::with_capacity(positions.len());
            for (i, &op_offset) in positions.iter().enumerate() {
                let renamed = rename_var_name(&name, uid, i);
                net.ops_mut()[op_offset].rename(&name, &renamed);
                dup_outputs.push(renamed);
            }
            let Some(&last) = positions.last() else {
                continue;
            };
            trace!(
                "sum {} gradient contributions into {name} after op {last}",
                dup_outputs.len()
            );
            let mut inputs = vars! {};
            inputs.insert("X".to_string(), dup_outputs);
            let add = self.registry.create_op(
                "add",
                inputs,
                vars! { "Out" => [name] },
                AttributeMap::new(),
            )?;
            insert_position.push((last, add));
        }

        // Highest position first, so pending positions stay valid.
        insert_position.sort_by(|l, r| r.0.cmp(&l.0));
        for (pos, op) in insert_position {
            net.insert_op(pos + 1, op)?;
        }

        net.complete_add_op(true);
        Ok(net.into())
    }

    fn build_leaf(&self, forward: &Operator, no_grad: &NoGradSet) -> Result<Operator> {
        let mut grad_op = self.registry.create_grad_op(forward)?;
        let mut net = NetOp::with_kind(GENERATED_BACKWARD_KIND);
        let mut filled = BTreeSet::new();

        for grad_input in grad_op.inputs_mut().values_mut().flatten() {
            if !no_grad.contains(grad_input.as_str()) {
                continue;
            }
            let (prefix, zero) = zero_var_name(grad_input.as_str())?;
            *grad_input = zero.clone();

            if self.config.dedup_zero_fill && !filled.insert(zero.clone()) {
                continue;
            }
            trace!("fill {zero} with zeros shaped like {prefix}");
            let fill = self.registry.create_op(
                "fill_zeros_like",
                vars! { "Src" => [prefix] },
                vars! { "Dst" => [zero] },
                AttributeMap::new(),
            )?;
            net.append_op(fill)?;
        }

        for grad_output in grad_op.outputs_mut().values_mut().flatten() {
            if no_grad.contains(grad_output.as_str()) {
                *grad_output = EMPTY_VAR_NAME.to_string();
            }
        }

        if net.is_empty() {
            return Ok(grad_op);
        }
        net.append_op(grad_op)?;
        net.complete_add_op(true);
        Ok(net.into())
    }
}

/// Pruning reads each net's own bindings, which only exist once derived from
/// its children. Fails on the first net, at any nesting level, without them.
fn ensure_bindings_calculated(forward: &Operator) -> Result<()> {
    let mut pending = vec![forward];
    while let Some(op) = pending.pop() {
        if let Operator::Net(net) = op {
            if !net.bindings_calculated() {
                return Err(BackwardError::NetNotSealed(net.kind().to_string()));
            }
            pending.extend(net.ops());
        }
    }
    Ok(())
}
