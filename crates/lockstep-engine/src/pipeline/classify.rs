//! Static operator classification.
//!
//! The stream executor's fusion and streaming decisions require an
//! exhaustive, deterministic classification of every stage, so the stage
//! vocabulary is a closed set of tagged variants and classification is a
//! plain match over those tags. Identical stage chains always classify
//! identically.

use strum::Display;

use super::{Barrier, ConsumerStage, Drain, TransformStage};

/// The three execution classes of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StageKind {
    /// Element-at-a-time, streamable.
    Transformation,
    /// Consumes a stream to a scalar or side effect; fusable when pure.
    Drain,
    /// Needs the whole collection before producing output.
    Barrier,
}

impl TransformStage {
    /// Classifies this stage. Predicate filters and one-to-one transforms
    /// are always transformations.
    pub fn kind(&self) -> StageKind {
        match self {
            TransformStage::Filter(_)
            | TransformStage::Map(_)
            | TransformStage::Take(_)
            | TransformStage::Skip(_) => StageKind::Transformation,
        }
    }
}

impl Drain {
    /// Classifies this stage.
    pub fn kind(&self) -> StageKind {
        match self {
            Drain::Count
            | Drain::Sum
            | Drain::Average
            | Drain::Min
            | Drain::Max
            | Drain::First
            | Drain::Last
            | Drain::Fold { .. }
            | Drain::Each(_) => StageKind::Drain,
        }
    }
}

impl Barrier {
    /// Classifies this stage. Ordering, grouping, and uniqueness all need
    /// the complete input.
    pub fn kind(&self) -> StageKind {
        match self {
            Barrier::Sort(_) | Barrier::Distinct | Barrier::GroupBy(_) => StageKind::Barrier,
        }
    }
}

impl ConsumerStage {
    /// Classifies the terminal stage of a consumer.
    pub fn kind(&self) -> StageKind {
        match self {
            ConsumerStage::Drain(drain) => drain.kind(),
            ConsumerStage::Barrier(barrier) => barrier.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SortOrder;
    use lockstep_core::{Effect, Value};

    #[test]
    fn test_transformations_classify_as_streamable() {
        assert_eq!(
            TransformStage::filter(|_| true).kind(),
            StageKind::Transformation
        );
        assert_eq!(TransformStage::map(|v| v).kind(), StageKind::Transformation);
        assert_eq!(TransformStage::Take(3).kind(), StageKind::Transformation);
        assert_eq!(TransformStage::Skip(3).kind(), StageKind::Transformation);
    }

    #[test]
    fn test_aggregations_classify_as_drains() {
        for drain in [
            Drain::Count,
            Drain::Sum,
            Drain::Average,
            Drain::Min,
            Drain::Max,
            Drain::First,
            Drain::Last,
        ] {
            assert_eq!(drain.kind(), StageKind::Drain);
            assert!(drain.is_pure());
        }
        let each = Drain::each(|v| Effect::event("seen", v.clone()));
        assert_eq!(each.kind(), StageKind::Drain);
        assert!(!each.is_pure());
    }

    #[test]
    fn test_whole_collection_stages_classify_as_barriers() {
        assert_eq!(
            Barrier::Sort(SortOrder::Ascending).kind(),
            StageKind::Barrier
        );
        assert_eq!(Barrier::Distinct.kind(), StageKind::Barrier);
        assert_eq!(
            Barrier::group_by(|_| Value::Null).kind(),
            StageKind::Barrier
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let chain = [
            TransformStage::filter(|_| true),
            TransformStage::map(|v| v),
        ];
        let first: Vec<StageKind> = chain.iter().map(TransformStage::kind).collect();
        let second: Vec<StageKind> = chain.iter().map(TransformStage::kind).collect();
        assert_eq!(first, second);
    }
}
