//! Dashboard: the ordered, user-editable fit model
//!
//! A [`Dashboard`] is a list of [`Component`]s, each owning its parameters in
//! declaration order. The running position of a parameter over the whole
//! dashboard is its internal index `nint`; formulas of COMPUTED parameters
//! address other parameters by that index, so the declaration order is part of
//! the persisted format. Component offsets are computed once at construction
//! and never change afterwards: parameters can be edited in place but not
//! added or removed.

use crate::error::{MuFitError, Result};
use crate::models::{Lineshape, Registry, DEFAULT_STEP};
use crate::parameters::bounds::Bounds;
use crate::parameters::parameter::{Flag, Parameter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Code of the pseudo-component holding external parameters.
pub const EXTERNALS_CODE: &str = "externals";

/// Largest number of lineshape components a model string may expand to.
pub const MAX_COMPONENTS: usize = 26;

/// Largest external-parameter or group count a model string may carry.
pub const MAX_MODEL_DIGIT: u8 = 9;

/// Parsed model string.
///
/// `"2mlbl3"` is two external parameters, the components `ml` and `bl`, and
/// three detector groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Two-letter component codes, in order
    pub components: Vec<String>,

    /// Number of external parameters
    pub externals: u8,

    /// Number of detector groups fitted together
    pub groups: u8,
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.externals > 0 {
            write!(f, "{}", self.externals)?;
        }
        for code in &self.components {
            write!(f, "{}", code)?;
        }
        if self.groups > 1 {
            write!(f, "{}", self.groups)?;
        }
        Ok(())
    }
}

/// Parse a model string and check every code against `registry`.
///
/// # Examples
///
/// ```
/// use mufit_rs::models::Registry;
/// use mufit_rs::parameters::dashboard::parse_model;
///
/// let spec = parse_model("daml2", &Registry::builtin()).unwrap();
/// assert_eq!(spec.components, vec!["da", "ml"]);
/// assert_eq!(spec.groups, 2);
/// assert!(parse_model("dam", &Registry::builtin()).is_err());
/// ```
pub fn parse_model(model: &str, registry: &Registry) -> Result<ModelSpec> {
    let trimmed = model.trim();
    let mut body: &str = trimmed;
    let mut externals = 0u8;
    let mut groups = 1u8;

    if let Some(first) = body.chars().next().and_then(|c| c.to_digit(10)) {
        externals = first as u8;
        body = &body[1..];
    }
    if let Some(last) = body.chars().last().and_then(|c| c.to_digit(10)) {
        if last == 0 {
            return Err(MuFitError::Configuration(format!(
                "model '{}' declares zero detector groups",
                trimmed
            )));
        }
        groups = last as u8;
        body = &body[..body.len() - 1];
    }

    if body.is_empty() {
        return Err(MuFitError::Configuration(format!(
            "model '{}' has no components",
            trimmed
        )));
    }
    if !body.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(MuFitError::Configuration(format!(
            "model '{}': counts are limited to a single digit (0-{}) and codes to letters",
            trimmed, MAX_MODEL_DIGIT
        )));
    }
    if body.len() % 2 != 0 {
        return Err(MuFitError::Configuration(format!(
            "model '{}': component codes are two letters, '{}' has odd length",
            trimmed, body
        )));
    }

    let components: Vec<String> = body
        .as_bytes()
        .chunks(2)
        .map(|code| String::from_utf8_lossy(code).into_owned())
        .collect();
    for code in &components {
        if !registry.contains(code) {
            return Err(MuFitError::Configuration(format!(
                "model '{}': unknown component '{}'",
                trimmed, code
            )));
        }
    }

    Ok(ModelSpec {
        components,
        externals,
        groups,
    })
}

/// Label of the `k`-th lineshape component: `a`, `b`, `c`, ...
pub fn component_label(k: usize) -> Result<char> {
    if k >= MAX_COMPONENTS {
        return Err(MuFitError::Configuration(format!(
            "at most {} components can be labelled",
            MAX_COMPONENTS
        )));
    }
    Ok((b'a' + k as u8) as char)
}

/// One term of the model and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Lineshape code (`ml`, `bl`, ...) or [`EXTERNALS_CODE`]
    pub code: String,

    /// Label suffixed to the parameter base names
    #[serde(default)]
    pub label: String,

    /// Parameters in declaration order
    pub parameters: Vec<Parameter>,
}

impl Component {
    pub fn new(code: &str, label: &str, parameters: Vec<Parameter>) -> Self {
        Self {
            code: code.to_string(),
            label: label.to_string(),
            parameters,
        }
    }

    /// Instantiate a lineshape's parameter template with default values.
    pub fn from_lineshape(lineshape: &dyn Lineshape, label: char) -> Self {
        let label = label.to_string();
        let parameters = lineshape
            .parameters()
            .iter()
            .map(|template| {
                Parameter::new(&format!("{}{}", template.base, label), 0.0)
                    .with_error(template.step)
                    .with_limits(template.limits())
            })
            .collect();
        Self {
            code: lineshape.code().to_string(),
            label,
            parameters,
        }
    }

    /// External parameters `e0`, `e1`, ... available to formulas.
    pub fn externals(count: u8) -> Self {
        let parameters = (0..count)
            .map(|k| {
                Parameter::new(&format!("e{}", k), 0.0)
                    .with_error(DEFAULT_STEP)
                    .with_limits(Bounds::unbounded())
            })
            .collect();
        Self {
            code: EXTERNALS_CODE.to_string(),
            label: String::new(),
            parameters,
        }
    }

    /// True for the externals pseudo-component, which has no lineshape.
    pub fn is_externals(&self) -> bool {
        self.code == EXTERNALS_CODE
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

/// Persisted form of a [`Dashboard`]; offsets are derived on load.
#[doc(hidden)]
#[derive(Serialize, Deserialize)]
pub struct DashboardFile {
    #[serde(default = "default_groups")]
    groups: u8,
    components: Vec<Component>,
}

fn default_groups() -> u8 {
    1
}

/// Ordered collection of components with frozen internal indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DashboardFile", into = "DashboardFile")]
pub struct Dashboard {
    components: Vec<Component>,

    /// `nint` of the first parameter of each component
    offsets: Vec<usize>,

    /// Detector groups the model is fitted to
    groups: u8,
}

impl TryFrom<DashboardFile> for Dashboard {
    type Error = MuFitError;

    fn try_from(file: DashboardFile) -> Result<Self> {
        let mut dashboard = Dashboard::from_components(file.components)?;
        dashboard.groups = file.groups.max(1);
        Ok(dashboard)
    }
}

impl From<Dashboard> for DashboardFile {
    fn from(dashboard: Dashboard) -> Self {
        DashboardFile {
            groups: dashboard.groups,
            components: dashboard.components,
        }
    }
}

impl Dashboard {
    /// Build a dashboard from a model string.
    ///
    /// Every parameter starts at 0.0, FREE, with the template step as error
    /// and the template limits.
    ///
    /// # Examples
    ///
    /// ```
    /// use mufit_rs::models::Registry;
    /// use mufit_rs::parameters::dashboard::Dashboard;
    ///
    /// let dashboard = Dashboard::from_model("blml", &Registry::builtin()).unwrap();
    /// assert_eq!(dashboard.parameter_count(), 6);
    /// assert_eq!(dashboard.find("Bb"), Some(3));
    /// ```
    pub fn from_model(model: &str, registry: &Registry) -> Result<Self> {
        let spec = parse_model(model, registry)?;
        Self::from_spec(&spec, registry)
    }

    /// Build a dashboard from an already parsed model.
    pub fn from_spec(spec: &ModelSpec, registry: &Registry) -> Result<Self> {
        let mut components = Vec::with_capacity(spec.components.len() + 1);
        if spec.externals > 0 {
            components.push(Component::externals(spec.externals));
        }
        for (k, code) in spec.components.iter().enumerate() {
            let lineshape = registry.get(code).ok_or_else(|| {
                MuFitError::Configuration(format!("unknown component '{}'", code))
            })?;
            components.push(Component::from_lineshape(
                lineshape.as_ref(),
                component_label(k)?,
            ));
        }
        let mut dashboard = Self::from_components(components)?;
        dashboard.groups = spec.groups.max(1);
        log::debug!(
            "built dashboard '{}' with {} parameters",
            spec,
            dashboard.parameter_count()
        );
        Ok(dashboard)
    }

    /// Build a dashboard from explicit components.
    ///
    /// Codes are not checked here; only binding the dashboard to lineshapes
    /// requires them to be registered.
    pub fn from_components(components: Vec<Component>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut alpha_corrections = 0;
        for component in &components {
            if component.code == "da" {
                alpha_corrections += 1;
            }
            for parameter in &component.parameters {
                if !seen.insert(parameter.name.as_str()) {
                    return Err(MuFitError::Configuration(format!(
                        "duplicate parameter name '{}'",
                        parameter.name
                    )));
                }
            }
        }
        if alpha_corrections > 1 {
            return Err(MuFitError::Configuration(
                "at most one 'da' component is allowed".to_string(),
            ));
        }

        let mut offsets = Vec::with_capacity(components.len());
        let mut running = 0;
        for component in &components {
            offsets.push(running);
            running += component.len();
        }

        Ok(Self {
            components,
            offsets,
            groups: 1,
        })
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// `nint` of the first parameter of component `k`.
    pub fn offset(&self, k: usize) -> Option<usize> {
        self.offsets.get(k).copied()
    }

    pub fn groups(&self) -> u8 {
        self.groups
    }

    /// Total number of parameters, i.e. one past the largest `nint`.
    pub fn parameter_count(&self) -> usize {
        self.components.iter().map(Component::len).sum()
    }

    /// Component index and position within it of internal index `nint`.
    fn locate(&self, nint: usize) -> Option<(usize, usize)> {
        self.offsets
            .iter()
            .zip(&self.components)
            .position(|(&offset, c)| nint >= offset && nint < offset + c.len())
            .map(|k| (k, nint - self.offsets[k]))
    }

    pub fn parameter(&self, nint: usize) -> Option<&Parameter> {
        let (k, j) = self.locate(nint)?;
        self.components[k].parameters.get(j)
    }

    /// Mutable access to a parameter; the dashboard layout cannot change.
    pub fn parameter_mut(&mut self, nint: usize) -> Option<&mut Parameter> {
        let (k, j) = self.locate(nint)?;
        self.components[k].parameters.get_mut(j)
    }

    /// Internal index of the parameter called `name`.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.iter()
            .find(|(_, p)| p.name == name)
            .map(|(nint, _)| nint)
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.find(name).and_then(|nint| self.parameter(nint))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        let nint = self.find(name)?;
        self.parameter_mut(nint)
    }

    /// Parameters with their internal index, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Parameter)> {
        self.components
            .iter()
            .flat_map(|c| c.parameters.iter())
            .enumerate()
    }

    pub fn values(&self) -> Vec<f64> {
        self.iter().map(|(_, p)| p.value).collect()
    }

    pub fn errors(&self) -> Vec<f64> {
        self.iter().map(|(_, p)| p.error).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.iter().map(|(_, p)| p.name.clone()).collect()
    }

    /// Number of parameters with the given flag.
    pub fn count_flag(&self, flag: Flag) -> usize {
        self.iter().filter(|(_, p)| p.flag == flag).count()
    }

    /// Set value and flag of a named parameter.
    pub fn set(&mut self, name: &str, value: f64, flag: Flag) -> Result<()> {
        let parameter = self
            .get_mut(name)
            .ok_or_else(|| MuFitError::ParameterNotFound(name.to_string()))?;
        parameter.value = value;
        parameter.flag = flag;
        Ok(())
    }

    /// Make a named parameter COMPUTED from `formula`.
    pub fn set_formula(&mut self, name: &str, formula: &str) -> Result<()> {
        let parameter = self
            .get_mut(name)
            .ok_or_else(|| MuFitError::ParameterNotFound(name.to_string()))?;
        parameter.flag = Flag::Computed;
        parameter.formula = formula.to_string();
        parameter.group_formulas.clear();
        Ok(())
    }

    /// Make a named parameter COMPUTED from one formula per detector group.
    pub fn set_group_formulas(&mut self, name: &str, formulas: &[&str]) -> Result<()> {
        let groups = usize::from(self.groups);
        if formulas.len() != groups {
            return Err(MuFitError::Configuration(format!(
                "'{}': {} group formulas for {} detector groups",
                name,
                formulas.len(),
                groups
            )));
        }
        let parameter = self
            .get_mut(name)
            .ok_or_else(|| MuFitError::ParameterNotFound(name.to_string()))?;
        parameter.flag = Flag::Computed;
        parameter.formula.clear();
        parameter.group_formulas = formulas.iter().map(|f| f.to_string()).collect();
        Ok(())
    }

    /// Give a named parameter its own slot per run in global suite fits.
    pub fn set_local(&mut self, name: &str, local: bool) -> Result<()> {
        let parameter = self
            .get_mut(name)
            .ok_or_else(|| MuFitError::ParameterNotFound(name.to_string()))?;
        parameter.local = local;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_json(&contents)
    }
}
