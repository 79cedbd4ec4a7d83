/// Conflict detection, scoring, and visualization data.
///
/// Detectors (one per category) run concurrently over a shared analysis
/// context; the engine merges and de-duplicates their output by
/// content-derived conflict id. Severity carries three independent scores
/// (impact, urgency, complexity) combined into a display ordering.
pub mod detectors;
pub mod engine;
pub mod types;
pub mod visualizer;

pub use detectors::{AnalysisContext, ConflictDetector};
pub use engine::{by_category, sort_by_display_order, summarize, ConflictEngine, ConflictSummary};
pub use types::{conflict_id, Conflict, ConflictCategory, ConflictSeverity, ConflictType};
pub use visualizer::{
    distribution, heatmap, person_impact, timeline, ConflictDistribution, HeatLevel, HeatmapCell,
    PersonImpact, TimelinePoint,
};
