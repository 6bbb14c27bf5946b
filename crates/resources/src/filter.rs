//! Filter kinds and best-effort neutralization

use crate::handle::Filter;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Writable effect-strength properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Knob {
    Enabled,
    Alpha,
    Strength,
    Blur,
    /// Both axes of a 2-D scale
    Scale,
}

/// Filter families known to the runtime
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Blur,
    Grayscale,
    Emboss,
    Displacement,
    Glow,
    ColorMatrix,
    Noise,
    Alpha,
    /// Anything else; disabling it is a no-op
    Other(String),
}

impl FilterKind {
    /// Knobs this kind exposes, in write order
    pub fn knobs(&self) -> &'static [Knob] {
        match self {
            FilterKind::Blur => &[Knob::Enabled, Knob::Blur, Knob::Strength],
            FilterKind::Grayscale => &[Knob::Enabled, Knob::Strength],
            FilterKind::Emboss => &[Knob::Enabled, Knob::Strength],
            FilterKind::Displacement => &[Knob::Enabled, Knob::Scale],
            FilterKind::Glow => &[Knob::Enabled, Knob::Alpha, Knob::Strength],
            FilterKind::ColorMatrix => &[Knob::Enabled, Knob::Alpha],
            FilterKind::Noise => &[Knob::Enabled, Knob::Strength],
            FilterKind::Alpha => &[Knob::Enabled, Knob::Alpha],
            FilterKind::Other(_) => &[],
        }
    }

    /// Stable name used in reports
    pub fn name(&self) -> &str {
        match self {
            FilterKind::Blur => "blur",
            FilterKind::Grayscale => "grayscale",
            FilterKind::Emboss => "emboss",
            FilterKind::Displacement => "displacement",
            FilterKind::Glow => "glow",
            FilterKind::ColorMatrix => "color_matrix",
            FilterKind::Noise => "noise",
            FilterKind::Alpha => "alpha",
            FilterKind::Other(name) => name,
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Render a filter harmless before destruction
///
/// Every knob the kind exposes is zeroed. Knob failures are skipped.
/// Returns the number of knobs written.
pub fn disable_filter(filter: &dyn Filter) -> usize {
    let kind = filter.kind();
    let mut written = 0;
    for &knob in kind.knobs() {
        match filter.set_knob(knob, 0.0) {
            Ok(()) => written += 1,
            Err(err) => tracing::trace!(%kind, ?knob, %err, "knob not neutralized"),
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{HandleError, ProgramHandle};
    use parking_lot::Mutex;

    struct KnobFilter {
        kind: FilterKind,
        rejects: Option<Knob>,
        writes: Mutex<Vec<(Knob, f64)>>,
    }

    impl KnobFilter {
        fn new(kind: FilterKind) -> Self {
            Self {
                kind,
                rejects: None,
                writes: Mutex::new(Vec::new()),
            }
        }
    }

    impl Filter for KnobFilter {
        fn kind(&self) -> FilterKind {
            self.kind.clone()
        }

        fn set_knob(&self, knob: Knob, value: f64) -> Result<(), HandleError> {
            if self.rejects == Some(knob) {
                return Err(HandleError::UnsupportedKnob(knob));
            }
            self.writes.lock().push((knob, value));
            Ok(())
        }

        fn program(&self) -> Result<ProgramHandle, HandleError> {
            Err(HandleError::ProgramUnavailable("test".into()))
        }

        fn destroy(&self) -> Result<(), HandleError> {
            Ok(())
        }
    }

    #[test]
    fn test_disable_zeroes_every_known_knob() {
        let filter = KnobFilter::new(FilterKind::Blur);
        assert_eq!(disable_filter(&filter), 3);
        assert_eq!(
            *filter.writes.lock(),
            vec![(Knob::Enabled, 0.0), (Knob::Blur, 0.0), (Knob::Strength, 0.0)]
        );
    }

    #[test]
    fn test_displacement_zeroes_scale() {
        let filter = KnobFilter::new(FilterKind::Displacement);
        disable_filter(&filter);
        assert!(filter.writes.lock().contains(&(Knob::Scale, 0.0)));
    }

    #[test]
    fn test_rejected_knob_is_skipped() {
        let mut filter = KnobFilter::new(FilterKind::Glow);
        filter.rejects = Some(Knob::Alpha);
        assert_eq!(disable_filter(&filter), 2);
        assert_eq!(
            *filter.writes.lock(),
            vec![(Knob::Enabled, 0.0), (Knob::Strength, 0.0)]
        );
    }

    #[test]
    fn test_unknown_kind_is_noop() {
        let filter = KnobFilter::new(FilterKind::Other("crt".into()));
        assert_eq!(disable_filter(&filter), 0);
        assert!(filter.writes.lock().is_empty());
        assert_eq!(FilterKind::Other("crt".into()).to_string(), "crt");
    }
}
