//! Operator step selection
//!
//! A selection is parsed from one of:
//! - a single step, by number or name: `9`, `link-a-parents`
//! - a comma list: `4,5,6` or `populate-a,populate-b`
//! - an inclusive numeric range: `6-11`
//! - `all`
//!
//! Whatever the input order, the selected steps run in dependency order.

use std::collections::{BTreeMap, BTreeSet};

use super::catalogue::StepId;
use crate::error::{BridgeError, BridgeResult};

/// A resolved, dependency-ordered set of steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSelection {
    steps: Vec<StepId>,
}

impl StepSelection {
    pub fn all() -> Self {
        Self {
            steps: StepId::ALL.to_vec(),
        }
    }

    pub fn parse(input: &str) -> BridgeResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(BridgeError::invalid_selection(input, "no steps given"));
        }

        let mut chosen = BTreeSet::new();
        for token in trimmed.split(',').map(str::trim) {
            if token.is_empty() {
                return Err(BridgeError::invalid_selection(input, "empty entry in list"));
            }
            if token.eq_ignore_ascii_case("all") {
                chosen.extend(StepId::ALL);
                continue;
            }
            match parse_range(token) {
                Some((from, to)) => chosen.extend(
                    expand_range(from, to).map_err(|r| BridgeError::invalid_selection(input, r))?,
                ),
                None => {
                    chosen.insert(
                        token
                            .parse::<StepId>()
                            .map_err(|r| BridgeError::invalid_selection(input, r))?,
                    );
                },
            }
        }

        Self::from_steps(chosen)
    }

    /// Order an arbitrary set of steps by the catalogue's dependency graph
    pub fn from_steps(steps: impl IntoIterator<Item = StepId>) -> BridgeResult<Self> {
        let chosen: BTreeSet<StepId> = steps.into_iter().collect();
        Ok(Self {
            steps: topological_order(&chosen)?,
        })
    }

    pub fn steps(&self) -> &[StepId] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Direct dependencies of selected steps that are not themselves selected
    ///
    /// Expected when resuming a run; the orchestrator only reports them.
    pub fn unselected_dependencies(&self) -> Vec<StepId> {
        let selected: BTreeSet<StepId> = self.steps.iter().copied().collect();
        self.steps
            .iter()
            .flat_map(|step| step.dependencies().iter().copied())
            .filter(|dep| !selected.contains(dep))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// `Some((n, m))` if `token` looks like `N-M`; names such as `import-a` yield `None`
fn parse_range(token: &str) -> Option<(u8, u8)> {
    let (from, to) = token.split_once('-')?;
    Some((from.trim().parse().ok()?, to.trim().parse().ok()?))
}

fn expand_range(from: u8, to: u8) -> Result<Vec<StepId>, String> {
    let first = StepId::from_number(from).ok_or_else(|| format!("no step numbered {from}"))?;
    let last = StepId::from_number(to).ok_or_else(|| format!("no step numbered {to}"))?;
    if first > last {
        return Err(format!("range {from}-{to} is reversed"));
    }
    Ok((from..=to).filter_map(StepId::from_number).collect())
}

/// Kahn's algorithm over the selected steps, ties broken by catalogue number
///
/// Edges run through unselected steps too, so `{1, 6}` still orders 1 before 6
/// even though 4 (between them) is not selected.
fn topological_order(chosen: &BTreeSet<StepId>) -> BridgeResult<Vec<StepId>> {
    let mut indegree: BTreeMap<StepId, usize> = chosen.iter().map(|s| (*s, 0)).collect();
    let mut dependents: BTreeMap<StepId, Vec<StepId>> = BTreeMap::new();

    for step in chosen {
        for ancestor in ancestors(*step).intersection(chosen) {
            dependents.entry(*ancestor).or_default().push(*step);
            if let Some(degree) = indegree.get_mut(step) {
                *degree += 1;
            }
        }
    }

    let mut ready: BTreeSet<StepId> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(step, _)| *step)
        .collect();
    let mut order = Vec::with_capacity(chosen.len());

    while let Some(step) = ready.pop_first() {
        order.push(step);
        for dependent in dependents.get(&step).into_iter().flatten() {
            if let Some(degree) = indegree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() != chosen.len() {
        return Err(BridgeError::config("step catalogue contains a dependency cycle"));
    }

    Ok(order)
}

/// All transitive dependencies of `step`
fn ancestors(step: StepId) -> BTreeSet<StepId> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<StepId> = step.dependencies().to_vec();
    while let Some(next) = stack.pop() {
        if seen.insert(next) {
            stack.extend_from_slice(next.dependencies());
        }
    }
    seen
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn numbers(selection: &StepSelection) -> Vec<u8> {
        selection.steps().iter().map(|s| s.number()).collect()
    }

    #[test]
    fn test_catalogue_is_acyclic() {
        let full = StepSelection::all();
        let ordered = StepSelection::from_steps(StepId::ALL).unwrap();
        assert_eq!(ordered, full);
    }

    #[test]
    fn test_single_step_by_number_or_name() {
        assert_eq!(numbers(&StepSelection::parse("9").unwrap()), vec![9]);
        assert_eq!(numbers(&StepSelection::parse("import-b").unwrap()), vec![5]);
    }

    #[test]
    fn test_list_runs_in_dependency_order() {
        let selection = StepSelection::parse("15, 6, graft-roots,4").unwrap();
        assert_eq!(numbers(&selection), vec![4, 6, 11, 15]);
    }

    #[test]
    fn test_inclusive_range() {
        let selection = StepSelection::parse("6-11").unwrap();
        assert_eq!(numbers(&selection), vec![6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_all_and_duplicates() {
        assert_eq!(StepSelection::parse("ALL").unwrap().len(), 16);
        assert_eq!(numbers(&StepSelection::parse("3,3,1-3").unwrap()), vec![1, 2, 3]);
    }

    #[test]
    fn test_invalid_selections() {
        for input in ["", "  ", "17", "11-6", "4,,5", "link", "0-3"] {
            assert!(
                matches!(StepSelection::parse(input), Err(BridgeError::InvalidSelection { .. })),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_unselected_dependencies() {
        let selection = StepSelection::parse("9,10").unwrap();
        assert_eq!(selection.unselected_dependencies(), vec![StepId::BuildStructuralIndexes]);
        assert!(StepSelection::all().unselected_dependencies().is_empty());
    }

    #[test]
    fn test_ancestors_are_transitive() {
        let found = ancestors(StepId::PopulateA);
        assert!(found.contains(&StepId::ImportA));
        assert!(found.contains(&StepId::PrepareSourceA));
        assert!(found.contains(&StepId::ResetSchema));
        assert!(!found.contains(&StepId::ImportB));
    }
}
