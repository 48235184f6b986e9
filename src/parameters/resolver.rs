//! Two-way mapping between dashboard parameters and the optimizer vector
//!
//! Dashboard parameters are addressed by their internal index `nint`. The
//! optimizer only sees FREE and FIXED parameters, packed in dashboard order
//! into a flat vector addressed by the slot index `nmin`. COMPUTED parameters
//! have no slot: their formulas are translated once, at resolution time, into
//! expressions over slots, so that every later evaluation is a plain tree walk.
//!
//! Translation walks the dashboard strictly forward. A formula may only
//! reference parameters with a smaller internal index, which rules out
//! cycles; a reference to a COMPUTED parameter is replaced by that
//! parameter's already translated expression.

use crate::error::{MuFitError, Result};
use crate::models::{AlphaCorrection, Lineshape, Registry};
use crate::parameters::bounds::Bounds;
use crate::parameters::dashboard::Dashboard;
use crate::parameters::expression::{ExprResult, Expression, ExpressionError, SlotValues};
use crate::parameters::parameter::{Flag, Parameter};
use crate::utils::finite_difference;
use ndarray::Array1;
use std::collections::HashMap;
use std::sync::Arc;

/// Relative step for the derivatives used in linearized error propagation.
const PROPAGATION_EPSILON: f64 = 1e-6;

/// The optimizer's view of a dashboard, indexed by `nmin`.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeParameterVector {
    /// Starting values
    pub values: Vec<f64>,

    /// Initial steps
    pub errors: Vec<f64>,

    /// True for FIXED slots
    pub fixed: Vec<bool>,

    /// Limits, unbounded for the `(0, 0)` sentinel
    pub limits: Vec<Bounds>,

    /// Parameter names
    pub names: Vec<String>,

    /// Internal index of every slot
    pub nint: Vec<usize>,

    /// Number of FREE slots
    pub free_count: usize,
}

impl FreeParameterVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Slots the optimizer varies.
    pub fn free_slots(&self) -> Vec<usize> {
        (0..self.len()).filter(|&m| !self.fixed[m]).collect()
    }
}

/// Build the optimizer vector from a dashboard.
///
/// COMPUTED parameters are skipped; every other parameter gets the next slot.
///
/// # Examples
///
/// ```
/// use mufit_rs::parameters::dashboard::{Component, Dashboard};
/// use mufit_rs::parameters::parameter::Parameter;
/// use mufit_rs::parameters::resolver::int2min;
///
/// let dashboard = Dashboard::from_components(vec![
///     Component::new("X", "", vec![Parameter::new("p0", 1.0)]),
///     Component::new("Y", "", vec![Parameter::new("p1", 0.0).computed("0.5*p0")]),
/// ])
/// .unwrap();
/// let fpv = int2min(&dashboard);
/// assert_eq!(fpv.values, vec![1.0]);
/// assert_eq!(fpv.free_count, 1);
/// ```
pub fn int2min(dashboard: &Dashboard) -> FreeParameterVector {
    let mut fpv = FreeParameterVector {
        values: Vec::new(),
        errors: Vec::new(),
        fixed: Vec::new(),
        limits: Vec::new(),
        names: Vec::new(),
        nint: Vec::new(),
        free_count: 0,
    };
    for (nint, parameter) in dashboard.iter() {
        match parameter.flag {
            Flag::Computed => continue,
            Flag::Free => fpv.free_count += 1,
            Flag::Fixed => {}
        }
        fpv.values.push(parameter.value);
        fpv.errors.push(parameter.error);
        fpv.fixed.push(parameter.is_fixed());
        fpv.limits.push(parameter.limits);
        fpv.names.push(parameter.name.clone());
        fpv.nint.push(nint);
    }
    fpv
}

/// How the error of a COMPUTED parameter is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPropagation {
    /// Evaluate the formula with errors in place of values and take the
    /// absolute value. Exact only for formulas linear in their references.
    #[default]
    Substitution,

    /// First-order propagation, `sqrt(Σ (∂f/∂x_m · σ_m)²)`, with numerical
    /// partial derivatives.
    Linearized,
}

/// How one component parameter is rebuilt from the optimizer vector.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterKey {
    /// Direct copy of a slot
    Slot(usize),

    /// Translated formula over slots
    Formula(Expression),
}

impl ParameterKey {
    pub fn value(&self, x: &[f64]) -> ExprResult<f64> {
        match self {
            ParameterKey::Slot(m) => x
                .get(*m)
                .copied()
                .ok_or(ExpressionError::SlotOutOfRange { index: *m }),
            ParameterKey::Formula(expr) => expr.evaluate(&SlotValues(x)),
        }
    }
}

/// A lineshape together with the keys of its parameters.
#[derive(Debug, Clone)]
pub struct ComponentBinding {
    pub code: String,
    pub lineshape: Arc<dyn Lineshape>,
    pub keys: Vec<ParameterKey>,
}

impl ComponentBinding {
    /// Component parameters for the optimizer vector `x`, written into `out`.
    pub fn parameters_into(&self, x: &[f64], out: &mut Vec<f64>) -> ExprResult<()> {
        out.clear();
        for key in &self.keys {
            out.push(key.value(x)?);
        }
        Ok(())
    }
}

/// Sum of all bound components at times `t`, with the α correction applied
/// last when the model has one.
pub fn evaluate_model(
    bindings: &[ComponentBinding],
    t: &Array1<f64>,
    x: &[f64],
    alpha: f64,
) -> Result<Array1<f64>> {
    let mut total = Array1::zeros(t.len());
    let mut dalpha = None;
    let mut p = Vec::new();
    for binding in bindings {
        binding
            .parameters_into(x, &mut p)
            .map_err(|e| MuFitError::Numerical(format!("component '{}': {}", binding.code, e)))?;
        if binding.lineshape.corrects_alpha() {
            dalpha = Some(p[0]);
        } else {
            total += &binding.lineshape.eval(t, &p);
        }
    }
    if let Some(dalpha) = dalpha {
        AlphaCorrection::apply(&mut total, dalpha, alpha);
    }
    Ok(total)
}

/// Parameter and, for local parameters of a global fit, run behind a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotOrigin {
    nint: usize,
    run: Option<usize>,
}

/// Resolved dashboard: slot assignment and translated formulas.
///
/// A plain resolution has one run and shares every slot. A global
/// resolution over several runs gives every local FREE or FIXED parameter
/// one slot per run, after the shared ones. Formulas are translated once
/// for every run and detector group.
#[derive(Debug, Clone)]
pub struct ParameterResolver {
    /// Slot of every internal index for every run, `None` for COMPUTED parameters
    lmin: Vec<Vec<Option<usize>>>,

    /// Expression over slots, indexed by run, group and internal index
    translated: Vec<Vec<Vec<Expression>>>,

    /// True where the translation differs between groups
    per_group: Vec<bool>,

    origins: Vec<SlotOrigin>,

    /// Dashboard layout at resolution time
    flags: Vec<Flag>,
    local: Vec<bool>,
    names: Vec<String>,
    formulas: Vec<String>,
    group_formulas: Vec<Vec<String>>,

    groups: usize,
}

impl ParameterResolver {
    /// Parse, bind and translate every formula of `dashboard`.
    ///
    /// Fails on the first invalid parameter; the error names the parameter
    /// and its formula text.
    pub fn resolve(dashboard: &Dashboard) -> Result<Self> {
        Self::build(dashboard, 1, false)
    }

    /// Resolve `dashboard` for a global fit of `runs` data sets.
    ///
    /// Parameters marked local get one slot per run; all others are shared.
    pub fn resolve_global(dashboard: &Dashboard, runs: usize) -> Result<Self> {
        if runs == 0 {
            return Err(MuFitError::Configuration(
                "a global fit needs at least one run".to_string(),
            ));
        }
        Self::build(dashboard, runs, true)
    }

    fn build(dashboard: &Dashboard, runs: usize, global: bool) -> Result<Self> {
        let count = dashboard.parameter_count();
        let groups = usize::from(dashboard.groups().max(1));
        let by_name: HashMap<&str, usize> = dashboard
            .iter()
            .map(|(nint, p)| (p.name.as_str(), nint))
            .collect();

        // shared slots first, then the local ones run by run
        let is_local = |p: &Parameter| global && p.local && p.flag.has_slot();
        let mut lmin = vec![vec![None; count]; runs];
        let mut origins = Vec::new();
        for (nint, p) in dashboard.iter() {
            if p.flag.has_slot() && !is_local(p) {
                for slots in lmin.iter_mut() {
                    slots[nint] = Some(origins.len());
                }
                origins.push(SlotOrigin { nint, run: None });
            }
        }
        for (run, slots) in lmin.iter_mut().enumerate() {
            for (nint, p) in dashboard.iter() {
                if is_local(p) {
                    slots[nint] = Some(origins.len());
                    origins.push(SlotOrigin {
                        nint,
                        run: Some(run),
                    });
                }
            }
        }

        let mut resolver = Self {
            lmin,
            translated: vec![vec![Vec::with_capacity(count); groups]; runs],
            per_group: Vec::with_capacity(count),
            origins,
            flags: Vec::with_capacity(count),
            local: Vec::with_capacity(count),
            names: Vec::with_capacity(count),
            formulas: Vec::with_capacity(count),
            group_formulas: Vec::with_capacity(count),
            groups,
        };

        for (nint, parameter) in dashboard.iter() {
            parameter.validate()?;
            let formula_error = |e: ExpressionError| MuFitError::Formula {
                name: parameter.name.clone(),
                formula: parameter.formula_text(),
                message: e.to_string(),
            };
            if !parameter.group_formulas.is_empty() && parameter.group_formulas.len() != groups {
                return Err(MuFitError::Formula {
                    name: parameter.name.clone(),
                    formula: parameter.formula_text(),
                    message: format!(
                        "{} group formulas for {} detector groups",
                        parameter.group_formulas.len(),
                        groups
                    ),
                });
            }

            let parsed = if parameter.flag.has_slot() {
                Vec::new()
            } else {
                (0..groups)
                    .map(|g| {
                        Expression::parse(parameter.formula_for(g))
                            .and_then(|e| e.bind(&|name: &str| by_name.get(name).copied()))
                    })
                    .collect::<ExprResult<Vec<_>>>()
                    .map_err(formula_error)?
            };

            for run in 0..runs {
                for g in 0..groups {
                    let expr = match resolver.lmin[run][nint] {
                        Some(m) => Expression::Slot(m),
                        None => resolver
                            .translate_in(run, g, nint, &parsed[g])
                            .map_err(formula_error)?,
                    };
                    resolver.translated[run][g].push(expr);
                }
            }
            if !parameter.flag.has_slot() {
                log::debug!(
                    "{} = {} -> {}",
                    parameter.name,
                    parameter.formula_text(),
                    resolver.translated[0][0][nint]
                );
            }

            let varies = resolver.translated.iter().any(|by_group| {
                by_group[1..]
                    .iter()
                    .any(|exprs| exprs[nint] != by_group[0][nint])
            });
            resolver.per_group.push(varies);
            resolver.flags.push(parameter.flag);
            resolver.local.push(parameter.local);
            resolver.names.push(parameter.name.clone());
            resolver.formulas.push(parameter.formula.clone());
            resolver.group_formulas.push(parameter.group_formulas.clone());
        }

        Ok(resolver)
    }

    /// Rewrite the references of a bound formula owned by parameter `nint`
    /// into slots.
    ///
    /// Only parameters before `nint` can be referenced, and they must already
    /// be resolved.
    pub fn translate(&self, nint: usize, formula: &Expression) -> ExprResult<Expression> {
        self.translate_in(0, 0, nint, formula)
    }

    fn translate_in(
        &self,
        run: usize,
        group: usize,
        nint: usize,
        formula: &Expression,
    ) -> ExprResult<Expression> {
        let resolved = &self.translated[run][group];
        formula.map_references(&mut |r| {
            if r >= nint || r >= resolved.len() {
                return Err(ExpressionError::ForwardReference {
                    index: r,
                    owner: nint,
                });
            }
            Ok(match self.lmin[run][r] {
                Some(m) => Expression::Slot(m),
                None => resolved[r].clone(),
            })
        })
    }

    /// Number of optimizer slots.
    pub fn slot_count(&self) -> usize {
        self.origins.len()
    }

    /// Number of runs the slots were laid out for.
    pub fn runs(&self) -> usize {
        self.lmin.len()
    }

    /// Number of detector groups formulas were translated for.
    pub fn groups(&self) -> usize {
        self.groups
    }

    /// Slot of internal index `nint`, `None` when COMPUTED or out of range.
    pub fn slot(&self, nint: usize) -> Option<usize> {
        self.run_slot(0, nint)
    }

    /// Slot of internal index `nint` in run `run` of a global resolution.
    pub fn run_slot(&self, run: usize, nint: usize) -> Option<usize> {
        self.lmin.get(run)?.get(nint).copied().flatten()
    }

    /// Translated expression of internal index `nint`.
    pub fn expression(&self, nint: usize) -> Option<&Expression> {
        self.group_expression(0, 0, nint)
    }

    /// Translated expression of internal index `nint` for one run and group.
    pub fn group_expression(&self, run: usize, group: usize, nint: usize) -> Option<&Expression> {
        self.translated.get(run)?.get(group)?.get(nint)
    }

    /// Formula text of internal index `nint`, empty unless COMPUTED.
    pub fn formula(&self, nint: usize) -> Option<&str> {
        self.formulas.get(nint).map(String::as_str)
    }

    /// Fail unless `dashboard` has the layout, flags and formulas this
    /// resolver was built from.
    pub fn check_dashboard(&self, dashboard: &Dashboard) -> Result<()> {
        let matches = dashboard.parameter_count() == self.flags.len()
            && dashboard.iter().all(|(nint, p)| {
                p.flag == self.flags[nint]
                    && p.name == self.names[nint]
                    && p.local == self.local[nint]
                    && p.formula == self.formulas[nint]
                    && p.group_formulas == self.group_formulas[nint]
            })
            && usize::from(dashboard.groups().max(1)) == self.groups;
        if matches {
            Ok(())
        } else {
            Err(MuFitError::InvalidState(
                "dashboard changed since it was resolved".to_string(),
            ))
        }
    }

    /// Optimizer vector of `dashboard`, checked against the resolution.
    ///
    /// Local slots of a global resolution are named `<name>_<run>` and all
    /// start from the dashboard value.
    pub fn int2min(&self, dashboard: &Dashboard) -> Result<FreeParameterVector> {
        self.check_dashboard(dashboard)?;
        let mut fpv = FreeParameterVector {
            values: Vec::with_capacity(self.slot_count()),
            errors: Vec::with_capacity(self.slot_count()),
            fixed: Vec::with_capacity(self.slot_count()),
            limits: Vec::with_capacity(self.slot_count()),
            names: Vec::with_capacity(self.slot_count()),
            nint: Vec::with_capacity(self.slot_count()),
            free_count: 0,
        };
        for origin in &self.origins {
            let parameter = dashboard
                .parameter(origin.nint)
                .ok_or_else(|| MuFitError::ParameterNotFound(self.names[origin.nint].clone()))?;
            if parameter.is_free() {
                fpv.free_count += 1;
            }
            fpv.values.push(parameter.value);
            fpv.errors.push(parameter.error);
            fpv.fixed.push(parameter.is_fixed());
            fpv.limits.push(parameter.limits);
            fpv.names.push(match origin.run {
                Some(run) => format!("{}_{}", parameter.name, run),
                None => parameter.name.clone(),
            });
            fpv.nint.push(origin.nint);
        }
        Ok(fpv)
    }

    /// Values of every internal index for the optimizer vector `x`.
    pub fn internal_values(&self, x: &[f64]) -> Result<Vec<f64>> {
        self.check_slots(x)?;
        self.translated[0][0]
            .iter()
            .enumerate()
            .map(|(nint, expr)| {
                expr.evaluate(&SlotValues(x))
                    .map_err(|e| self.formula_error(nint, e))
            })
            .collect()
    }

    /// Write optimizer results back into the dashboard.
    ///
    /// FREE and FIXED parameters copy their slot; COMPUTED parameters get
    /// their formula evaluated on `values` and an error according to `mode`.
    pub fn min2int(
        &self,
        dashboard: &mut Dashboard,
        values: &[f64],
        errors: &[f64],
        mode: ErrorPropagation,
    ) -> Result<()> {
        self.min2int_run(dashboard, 0, values, errors, mode)
    }

    /// Write the view of run `run` of a global fit into the dashboard.
    ///
    /// Parameters whose value differs between detector groups also get
    /// every group's value and error; the plain value is group 0's.
    pub fn min2int_run(
        &self,
        dashboard: &mut Dashboard,
        run: usize,
        values: &[f64],
        errors: &[f64],
        mode: ErrorPropagation,
    ) -> Result<()> {
        self.check_dashboard(dashboard)?;
        self.check_slots(values)?;
        self.check_slots(errors)?;
        let slots = self.lmin.get(run).ok_or_else(|| {
            MuFitError::DimensionMismatch(format!(
                "run {} of a resolution over {} run(s)",
                run,
                self.runs()
            ))
        })?;

        for (nint, slot) in slots.iter().enumerate() {
            let groups = if self.per_group[nint] { self.groups } else { 1 };
            let mut group_values = Vec::with_capacity(groups);
            let mut group_errors = Vec::with_capacity(groups);
            match slot {
                Some(m) => {
                    group_values.push(values[*m]);
                    group_errors.push(errors[*m]);
                }
                None => {
                    for by_group in &self.translated[run][..groups] {
                        let expr = &by_group[nint];
                        group_values.push(
                            expr.evaluate(&SlotValues(values))
                                .map_err(|e| self.formula_error(nint, e))?,
                        );
                        group_errors.push(self.computed_error(nint, expr, values, errors, mode)?);
                    }
                }
            }
            let parameter = dashboard
                .parameter_mut(nint)
                .ok_or_else(|| MuFitError::ParameterNotFound(self.names[nint].clone()))?;
            parameter.value = group_values[0];
            parameter.error = group_errors[0];
            if self.per_group[nint] {
                parameter.group_values = group_values;
                parameter.group_errors = group_errors;
            } else {
                parameter.group_values.clear();
                parameter.group_errors.clear();
            }
        }
        Ok(())
    }

    fn computed_error(
        &self,
        nint: usize,
        expr: &Expression,
        values: &[f64],
        errors: &[f64],
        mode: ErrorPropagation,
    ) -> Result<f64> {
        if mode == ErrorPropagation::Substitution {
            match expr.evaluate(&SlotValues(errors)) {
                Ok(error) if error.is_finite() => return Ok(error.abs()),
                _ => log::warn!(
                    "error formula of '{}' cannot be evaluated by substitution, propagating linearly",
                    self.names[nint]
                ),
            }
        }

        let slots = expr.slots();
        let point = Array1::from_iter(slots.iter().map(|&m| values[m]));
        let f = |x: &Array1<f64>| {
            let mut full = values.to_vec();
            for (k, &m) in slots.iter().enumerate() {
                full[m] = x[k];
            }
            expr.evaluate(&SlotValues(&full))
                .map_err(|e| self.formula_error(nint, e))
        };
        let gradient = finite_difference::gradient(f, &point, Some(PROPAGATION_EPSILON))?;
        let variance: f64 = slots
            .iter()
            .zip(gradient.iter())
            .map(|(&m, g)| (g * errors[m]).powi(2))
            .sum();
        Ok(variance.sqrt())
    }

    /// Pair every lineshape component with the keys of its parameters.
    ///
    /// Built once per fit; the objective walks it on every evaluation. These
    /// are the keys of run 0 and detector group 0.
    pub fn int2_int(
        &self,
        dashboard: &Dashboard,
        registry: &Registry,
    ) -> Result<Vec<ComponentBinding>> {
        self.component_bindings(dashboard, registry, 0, 0)
    }

    /// Component bindings of every detector group of run 0.
    pub fn int2_multigroup(
        &self,
        dashboard: &Dashboard,
        registry: &Registry,
    ) -> Result<Vec<Vec<ComponentBinding>>> {
        (0..self.groups)
            .map(|g| self.component_bindings(dashboard, registry, 0, g))
            .collect()
    }

    /// Component bindings of every run and detector group, `[run][group]`.
    pub fn int2_multirun(
        &self,
        dashboard: &Dashboard,
        registry: &Registry,
    ) -> Result<Vec<Vec<Vec<ComponentBinding>>>> {
        (0..self.runs())
            .map(|run| {
                (0..self.groups)
                    .map(|g| self.component_bindings(dashboard, registry, run, g))
                    .collect()
            })
            .collect()
    }

    fn component_bindings(
        &self,
        dashboard: &Dashboard,
        registry: &Registry,
        run: usize,
        group: usize,
    ) -> Result<Vec<ComponentBinding>> {
        self.check_dashboard(dashboard)?;
        let mut bindings = Vec::new();
        for (k, component) in dashboard.components().iter().enumerate() {
            if component.is_externals() {
                continue;
            }
            let lineshape = registry.get(&component.code).ok_or_else(|| {
                MuFitError::Configuration(format!("unknown component '{}'", component.code))
            })?;
            if lineshape.parameters().len() != component.len() {
                return Err(MuFitError::Configuration(format!(
                    "component '{}' has {} parameters, lineshape expects {}",
                    component.code,
                    component.len(),
                    lineshape.parameters().len()
                )));
            }
            let offset = dashboard.offset(k).unwrap_or(0);
            let keys = (offset..offset + component.len())
                .map(|nint| match self.lmin[run][nint] {
                    Some(m) => ParameterKey::Slot(m),
                    None => ParameterKey::Formula(self.translated[run][group][nint].clone()),
                })
                .collect();
            bindings.push(ComponentBinding {
                code: component.code.clone(),
                lineshape,
                keys,
            });
        }
        Ok(bindings)
    }

    fn check_slots(&self, x: &[f64]) -> Result<()> {
        if x.len() != self.slot_count() {
            return Err(MuFitError::DimensionMismatch(format!(
                "expected {} optimizer values, got {}",
                self.slot_count(),
                x.len()
            )));
        }
        Ok(())
    }

    fn formula_error(&self, nint: usize, e: ExpressionError) -> MuFitError {
        let formula = if self.group_formulas[nint].is_empty() {
            self.formulas[nint].clone()
        } else {
            self.group_formulas[nint].join("; ")
        };
        MuFitError::Formula {
            name: self.names[nint].clone(),
            formula,
            message: e.to_string(),
        }
    }
}
