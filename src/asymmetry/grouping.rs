//! Forward/backward detector groups

use crate::error::{MuFitError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Parse a 1-based counter list such as `"1:3,5,7:9"` into 0-based indices.
///
/// A `'.'` is read as a mistyped `','`. Ranges are inclusive. Repeated
/// counters are an error.
///
/// # Examples
///
/// ```
/// use mufit_rs::asymmetry::parse_counter_list;
///
/// assert_eq!(parse_counter_list("1:3,5").unwrap(), vec![0, 1, 2, 4]);
/// assert_eq!(parse_counter_list("2.4").unwrap(), vec![1, 3]);
/// assert!(parse_counter_list("0").is_err());
/// ```
pub fn parse_counter_list(list: &str) -> Result<Vec<usize>> {
    let invalid = |item: &str, why: &str| {
        MuFitError::Configuration(format!("counter list '{}': {} '{}'", list, why, item))
    };
    let number = |item: &str, text: &str| -> Result<usize> {
        match text.trim().parse::<usize>() {
            Ok(0) => Err(invalid(item, "counters are numbered from 1, got")),
            Ok(n) => Ok(n - 1),
            Err(_) => Err(invalid(item, "cannot read")),
        }
    };

    let normalized = list.replace('.', ",");
    let mut counters = Vec::new();
    let mut seen = HashSet::new();
    for item in normalized.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let range = match item.split_once(':') {
            Some((low, high)) => {
                let (low, high) = (number(item, low)?, number(item, high)?);
                if low > high {
                    return Err(invalid(item, "decreasing range"));
                }
                low..=high
            }
            None => {
                let n = number(item, item)?;
                n..=n
            }
        };
        for counter in range {
            if !seen.insert(counter) {
                return Err(invalid(item, "repeated counter in"));
            }
            counters.push(counter);
        }
    }
    if counters.is_empty() {
        return Err(MuFitError::Configuration(format!(
            "counter list '{}' is empty",
            list
        )));
    }
    Ok(counters)
}

/// A forward/backward grouping with its balance factor α.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GroupSpec", into = "GroupSpec")]
pub struct DetectorGroup {
    forward: Vec<usize>,
    backward: Vec<usize>,
    alpha: f64,
}

/// Persisted form of a [`DetectorGroup`], in 1-based shorthand.
#[doc(hidden)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpec {
    pub forward: String,
    pub backward: String,
    #[serde(default = "unit_alpha")]
    pub alpha: f64,
}

fn unit_alpha() -> f64 {
    1.0
}

impl TryFrom<GroupSpec> for DetectorGroup {
    type Error = MuFitError;

    fn try_from(spec: GroupSpec) -> Result<Self> {
        DetectorGroup::parse(&spec.forward, &spec.backward, spec.alpha)
    }
}

impl From<DetectorGroup> for GroupSpec {
    fn from(group: DetectorGroup) -> Self {
        GroupSpec {
            forward: shorthand(&group.forward),
            backward: shorthand(&group.backward),
            alpha: group.alpha,
        }
    }
}

/// 1-based shorthand of 0-based counters, collapsing consecutive runs.
fn shorthand(counters: &[usize]) -> String {
    let mut items = Vec::new();
    let mut k = 0;
    while k < counters.len() {
        let start = counters[k];
        let mut end = start;
        while k + 1 < counters.len() && counters[k + 1] == end + 1 {
            end += 1;
            k += 1;
        }
        items.push(if end > start {
            format!("{}:{}", start + 1, end + 1)
        } else {
            format!("{}", start + 1)
        });
        k += 1;
    }
    items.join(",")
}

impl DetectorGroup {
    /// Group 0-based `forward` and `backward` counters.
    ///
    /// Both sets must be non-empty, free of repeats and disjoint, and α finite.
    pub fn new(forward: Vec<usize>, backward: Vec<usize>, alpha: f64) -> Result<Self> {
        if forward.is_empty() || backward.is_empty() {
            return Err(MuFitError::Configuration(
                "forward and backward groups must both contain counters".to_string(),
            ));
        }
        for (side, counters) in [("forward", &forward), ("backward", &backward)] {
            if let Some((k, c)) = counters
                .iter()
                .enumerate()
                .find(|&(k, c)| counters[..k].contains(c))
            {
                return Err(MuFitError::Configuration(format!(
                    "counter {} appears twice in the {} group (position {})",
                    c + 1,
                    side,
                    k + 1
                )));
            }
        }
        if let Some(shared) = forward.iter().find(|c| backward.contains(c)) {
            return Err(MuFitError::Configuration(format!(
                "counter {} is both forward and backward",
                shared + 1
            )));
        }
        if !alpha.is_finite() {
            return Err(MuFitError::Configuration(format!("alpha {} is not finite", alpha)));
        }
        if alpha <= 0.0 {
            log::warn!("alpha = {} is not positive", alpha);
        }
        Ok(Self {
            forward,
            backward,
            alpha,
        })
    }

    /// Group from 1-based shorthand lists.
    ///
    /// # Examples
    ///
    /// ```
    /// use mufit_rs::asymmetry::DetectorGroup;
    ///
    /// let group = DetectorGroup::parse("1:2", "3,4", 1.05).unwrap();
    /// assert_eq!(group.forward(), &[0, 1]);
    /// assert_eq!(group.backward(), &[2, 3]);
    /// assert!(DetectorGroup::parse("1:2", "2:3", 1.0).is_err());
    /// ```
    pub fn parse(forward: &str, backward: &str, alpha: f64) -> Result<Self> {
        Self::new(parse_counter_list(forward)?, parse_counter_list(backward)?, alpha)
    }

    pub fn forward(&self) -> &[usize] {
        &self.forward
    }

    pub fn backward(&self) -> &[usize] {
        &self.backward
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn with_alpha(self, alpha: f64) -> Result<Self> {
        Self::new(self.forward, self.backward, alpha)
    }

    /// Forward then backward counters.
    pub fn counters(&self) -> impl Iterator<Item = usize> + '_ {
        self.forward.iter().chain(self.backward.iter()).copied()
    }

    /// Fail unless every counter exists in a run with `counters` counters.
    pub fn check_counters(&self, counters: usize, run: u32) -> Result<()> {
        match self.counters().find(|&c| c >= counters) {
            Some(c) => Err(MuFitError::Configuration(format!(
                "counter {} does not exist, run {} has {} counters",
                c + 1,
                run,
                counters
            ))),
            None => Ok(()),
        }
    }
}
