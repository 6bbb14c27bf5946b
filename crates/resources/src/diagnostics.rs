//! Filter usage diagnostics

use crate::filter::FilterKind;
use crate::handle::{Filter, FilterId};
use serde::Serialize;
use std::collections::BTreeMap;

/// Sampling quality above which a filter is flagged
pub const QUALITY_THRESHOLD: f64 = 4.0;

/// Why a filter was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationHint {
    /// Quality above [`QUALITY_THRESHOLD`]
    ReduceQuality,
    /// Rendering above device resolution
    LowerResolution,
    /// Disabled but still attached and rendering a pass
    RemoveDisabled,
}

/// A filter worth optimizing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationCandidate {
    pub filter_id: FilterId,
    pub kind: FilterKind,
    pub hint: OptimizationHint,
}

/// Filter counts by kind plus optimization candidates
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterDiagnostics {
    pub total: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub candidates: Vec<OptimizationCandidate>,
}

impl FilterDiagnostics {
    /// Inspect a set of filters
    pub fn collect<'a, I>(filters: I) -> Self
    where
        I: IntoIterator<Item = (FilterId, &'a dyn Filter)>,
    {
        let mut report = Self::default();
        for (filter_id, filter) in filters {
            let kind = filter.kind();
            report.total += 1;
            *report.by_kind.entry(kind.name().to_string()).or_default() += 1;

            let mut flag = |hint| {
                report.candidates.push(OptimizationCandidate {
                    filter_id,
                    kind: kind.clone(),
                    hint,
                })
            };
            if filter.quality().is_some_and(|q| q > QUALITY_THRESHOLD) {
                flag(OptimizationHint::ReduceQuality);
            }
            if filter.resolution().is_some_and(|r| r > 1.0) {
                flag(OptimizationHint::LowerResolution);
            }
            if !filter.is_enabled() {
                flag(OptimizationHint::RemoveDisabled);
            }
        }
        report
    }

    /// Count for one kind
    pub fn count(&self, kind: &FilterKind) -> usize {
        self.by_kind.get(kind.name()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Knob;
    use crate::handle::{HandleError, ProgramHandle};

    struct Probe {
        kind: FilterKind,
        quality: Option<f64>,
        resolution: Option<f64>,
        enabled: bool,
    }

    impl Filter for Probe {
        fn kind(&self) -> FilterKind {
            self.kind.clone()
        }
        fn set_knob(&self, _: Knob, _: f64) -> Result<(), HandleError> {
            Ok(())
        }
        fn program(&self) -> Result<ProgramHandle, HandleError> {
            Err(HandleError::ProgramUnavailable("probe".into()))
        }
        fn quality(&self) -> Option<f64> {
            self.quality
        }
        fn resolution(&self) -> Option<f64> {
            self.resolution
        }
        fn is_enabled(&self) -> bool {
            self.enabled
        }
        fn destroy(&self) -> Result<(), HandleError> {
            Ok(())
        }
    }

    #[test]
    fn test_counts_and_candidates() {
        let heavy_blur = Probe {
            kind: FilterKind::Blur,
            quality: Some(8.0),
            resolution: Some(2.0),
            enabled: true,
        };
        let light_blur = Probe {
            kind: FilterKind::Blur,
            quality: Some(2.0),
            resolution: None,
            enabled: true,
        };
        let off_glow = Probe {
            kind: FilterKind::Glow,
            quality: None,
            resolution: None,
            enabled: false,
        };
        let (a, b, c) = (FilterId::next(), FilterId::next(), FilterId::next());

        let report = FilterDiagnostics::collect([
            (a, &heavy_blur as &dyn Filter),
            (b, &light_blur as &dyn Filter),
            (c, &off_glow as &dyn Filter),
        ]);

        assert_eq!(report.total, 3);
        assert_eq!(report.count(&FilterKind::Blur), 2);
        assert_eq!(report.count(&FilterKind::Glow), 1);
        assert_eq!(report.count(&FilterKind::Noise), 0);

        let hints: Vec<(FilterId, OptimizationHint)> =
            report.candidates.iter().map(|c| (c.filter_id, c.hint)).collect();
        assert_eq!(
            hints,
            vec![
                (a, OptimizationHint::ReduceQuality),
                (a, OptimizationHint::LowerResolution),
                (c, OptimizationHint::RemoveDisabled),
            ]
        );
    }
}
