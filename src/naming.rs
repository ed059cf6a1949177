//! Variable naming conventions shared by the builder and the registry.

use crate::error::{BackwardError, Result};

/// Suffix marking the gradient of a variable.
pub const GRAD_VAR_SUFFIX: &str = "@GRAD";

/// Name of the absent variable. Outputs bound to it are never materialized.
pub const EMPTY_VAR_NAME: &str = "@EMPTY@";

/// Suffix of a gradient slot that has been replaced by a zero-filled tensor.
pub const ZERO_VAR_SUFFIX: &str = "@ZERO";

/// Delimiter used when renaming duplicated gradient outputs.
pub const RENAME_DELIMITER: &str = "@RENAME@";

/// Returns the gradient variable name of `name`.
pub fn grad_var_name(name: &str) -> String {
    format!("{name}{GRAD_VAR_SUFFIX}")
}

/// Returns the synthetic name of the `index`-th duplicate of `name` inside the
/// composite expansion identified by `uid`.
pub fn rename_var_name(name: &str, uid: usize, index: usize) -> String {
    format!("{name}{RENAME_DELIMITER}{uid}@{index}")
}

/// Strips the gradient suffix from `grad_name` by length.
///
/// Only the length of the suffix is checked, not its content: the suffix is a
/// fixed constant and every gradient name reaching here was built by
/// [`grad_var_name`].
pub fn strip_grad_suffix(grad_name: &str) -> Result<&str> {
    grad_name
        .len()
        .checked_sub(GRAD_VAR_SUFFIX.len())
        .and_then(|cut| grad_name.get(..cut))
        .ok_or_else(|| BackwardError::MalformedGradName {
            name: grad_name.to_string(),
            suffix: GRAD_VAR_SUFFIX.to_string(),
        })
}

/// Returns `(forward_name, zero_name)` for a gradient variable that will be
/// replaced by zeros, e.g. `X@GRAD` -> (`X`, `X@ZERO`).
pub fn zero_var_name(grad_name: &str) -> Result<(String, String)> {
    let prefix = strip_grad_suffix(grad_name)?;
    Ok((prefix.to_string(), format!("{prefix}{ZERO_VAR_SUFFIX}")))
}
