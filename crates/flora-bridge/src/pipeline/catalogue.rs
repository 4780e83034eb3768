//! Step catalogue
//!
//! The sixteen steps of a bridging run, numbered in the order an operator reads
//! them, with the dependency edges the orchestrator orders them by.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A catalogued pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepId {
    PrepareSourceA,
    PrepareSourceB,
    ResetSchema,
    ImportA,
    ImportB,
    PopulateA,
    PopulateB,
    BuildStructuralIndexes,
    LinkAParents,
    ResolveBHierarchy,
    GraftRoots,
    DereferenceSynonyms,
    FlowLiterals,
    BuildPaths,
    ComputeCounts,
    OptimizeIndexes,
}

impl StepId {
    /// Every step in catalogue order
    pub const ALL: [StepId; 16] = [
        StepId::PrepareSourceA,
        StepId::PrepareSourceB,
        StepId::ResetSchema,
        StepId::ImportA,
        StepId::ImportB,
        StepId::PopulateA,
        StepId::PopulateB,
        StepId::BuildStructuralIndexes,
        StepId::LinkAParents,
        StepId::ResolveBHierarchy,
        StepId::GraftRoots,
        StepId::DereferenceSynonyms,
        StepId::FlowLiterals,
        StepId::BuildPaths,
        StepId::ComputeCounts,
        StepId::OptimizeIndexes,
    ];

    /// 1-based catalogue number
    pub fn number(self) -> u8 {
        self as u8 + 1
    }

    pub fn from_number(number: u8) -> Option<Self> {
        number
            .checked_sub(1)
            .and_then(|index| Self::ALL.get(usize::from(index)).copied())
    }

    pub fn name(self) -> &'static str {
        match self {
            StepId::PrepareSourceA => "prepare-source-a",
            StepId::PrepareSourceB => "prepare-source-b",
            StepId::ResetSchema => "reset-schema",
            StepId::ImportA => "import-a",
            StepId::ImportB => "import-b",
            StepId::PopulateA => "populate-a",
            StepId::PopulateB => "populate-b",
            StepId::BuildStructuralIndexes => "build-structural-indexes",
            StepId::LinkAParents => "link-a-parents",
            StepId::ResolveBHierarchy => "resolve-b-hierarchy",
            StepId::GraftRoots => "graft-roots",
            StepId::DereferenceSynonyms => "dereference-synonyms",
            StepId::FlowLiterals => "flow-literals",
            StepId::BuildPaths => "build-paths",
            StepId::ComputeCounts => "compute-counts",
            StepId::OptimizeIndexes => "optimize-indexes",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            StepId::PrepareSourceA => "Validate and fingerprint the Source A file",
            StepId::PrepareSourceB => "Validate and fingerprint the Source B file",
            StepId::ResetSchema => "Apply the canonical schema",
            StepId::ImportA => "Load Source A into staging",
            StepId::ImportB => "Load Source B into staging",
            StepId::PopulateA => "Insert Source A records into taxa",
            StepId::PopulateB => "Insert deduplicated Source B records into taxa",
            StepId::BuildStructuralIndexes => "Create lookup indexes for linking",
            StepId::LinkAParents => "Link Source A parents by name literal",
            StepId::ResolveBHierarchy => "Resolve Source B parents by id and propagate literals",
            StepId::GraftRoots => "Attach Source A roots to Source B families",
            StepId::DereferenceSynonyms => "Redirect children of synonyms to accepted names",
            StepId::FlowLiterals => "Copy higher classification onto Source A records",
            StepId::BuildPaths => "Materialize hierarchy paths",
            StepId::ComputeCounts => "Compute immediate child counts",
            StepId::OptimizeIndexes => "Swap structural indexes for read-path indexes",
        }
    }

    /// Steps that must have run before this one
    pub fn dependencies(self) -> &'static [StepId] {
        use StepId::*;
        match self {
            PrepareSourceA | PrepareSourceB | ResetSchema => &[],
            ImportA => &[PrepareSourceA, ResetSchema],
            ImportB => &[PrepareSourceB, ResetSchema],
            PopulateA => &[ImportA],
            PopulateB => &[ImportB],
            BuildStructuralIndexes => &[PopulateA, PopulateB],
            LinkAParents => &[BuildStructuralIndexes],
            ResolveBHierarchy => &[BuildStructuralIndexes],
            GraftRoots => &[LinkAParents, ResolveBHierarchy],
            DereferenceSynonyms => &[GraftRoots],
            FlowLiterals => &[DereferenceSynonyms],
            BuildPaths => &[DereferenceSynonyms],
            ComputeCounts => &[DereferenceSynonyms],
            OptimizeIndexes => &[FlowLiterals, BuildPaths, ComputeCounts],
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.name())
    }
}

impl FromStr for StepId {
    type Err = String;

    /// Accepts a catalogue number (`"9"`) or a name (`"link-a-parents"`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        if let Ok(number) = token.parse::<u8>() {
            return StepId::from_number(number)
                .ok_or_else(|| format!("no step numbered {number} (valid: 1-{})", StepId::ALL.len()));
        }

        let lowered = token.to_lowercase().replace('_', "-");
        StepId::ALL
            .into_iter()
            .find(|step| step.name() == lowered)
            .ok_or_else(|| format!("unknown step '{token}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_follow_catalogue_order() {
        for (index, step) in StepId::ALL.into_iter().enumerate() {
            assert_eq!(usize::from(step.number()), index + 1);
            assert_eq!(StepId::from_number(step.number()), Some(step));
        }
        assert_eq!(StepId::from_number(0), None);
        assert_eq!(StepId::from_number(17), None);
    }

    #[test]
    fn test_dependencies_point_backwards() {
        for step in StepId::ALL {
            for dep in step.dependencies() {
                assert!(dep.number() < step.number(), "{step} depends on later {dep}");
            }
        }
    }

    #[test]
    fn test_parse_by_number_and_name() {
        assert_eq!("9".parse(), Ok(StepId::LinkAParents));
        assert_eq!("link-a-parents".parse(), Ok(StepId::LinkAParents));
        assert_eq!(" Graft_Roots ".parse(), Ok(StepId::GraftRoots));
        assert!("0".parse::<StepId>().is_err());
        assert!("link".parse::<StepId>().is_err());
    }

    #[test]
    fn test_display_includes_number_and_name() {
        assert_eq!(StepId::ComputeCounts.to_string(), "15 (compute-counts)");
    }
}
