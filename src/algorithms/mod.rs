pub mod optimization;

pub use optimization::{
    FixedEffects, GradientAscent, LogLikelihood, OptimizationResult, StatisticalModel,
    TerminationReason,
};
