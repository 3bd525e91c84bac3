//! Parameter utilities: grouped parameter counts and gradient norms.

use std::fmt;

/// Trainable parameter counts grouped by dotted-name prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSummary {
    /// `(prefix, count)` in order of first appearance.
    pub groups: Vec<(String, usize)>,
    pub total: usize,
}

/// Group `named` parameters by the first `max_depth` components of their
/// dotted names. `None` keeps every name separate.
pub fn param_summary(named: &[(String, usize)], max_depth: Option<usize>) -> ParamSummary {
    let mut summary = ParamSummary::default();
    for (name, count) in named {
        let prefix = match max_depth {
            Some(depth) => name.split('.').take(depth).collect::<Vec<_>>().join("."),
            None => name.clone(),
        };
        match summary.groups.iter_mut().find(|(p, _)| *p == prefix) {
            Some((_, n)) => *n += count,
            None => summary.groups.push((prefix, *count)),
        }
        summary.total += count;
    }
    summary
}

impl fmt::Display for ParamSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Trainable parameters:")?;
        for (prefix, count) in &self.groups {
            writeln!(f, "{count:8}  {prefix}")?;
        }
        write!(f, "  - Total trainable parameters: {}", self.total)
    }
}

/// Which p-norm [`grad_norm`] computes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NormType {
    P(f64),
    Inf,
}

/// Norm of all gradients taken together, as if concatenated into one vector.
pub fn grad_norm(grads: &[&[f64]], norm_type: NormType) -> f64 {
    let values = grads.iter().flat_map(|g| g.iter());
    match norm_type {
        NormType::Inf => values.fold(0.0_f64, |acc, v| acc.max(v.abs())),
        NormType::P(p) => values.map(|v| v.abs().powf(p)).sum::<f64>().powf(1.0 / p),
    }
}
