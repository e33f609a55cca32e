use crate::input::layout::BlockId;
use crate::railway::driver::TrainId;
use crate::railway::registry::Attribute;

/// Faults the control cycle reports without stopping.
///
/// `UnknownBlock` and `CapabilityMismatch` indicate wiring errors and
/// should never be seen in a correctly configured controller. The others
/// are expected at runtime: `StaleInput` is recovered by reusing the
/// previous snapshot, and `SafetyRejected` is the ordinary outcome of a
/// proposal the vital layer refused.
#[derive(Debug, Fail)]
pub enum EngineError {
    #[fail(display = "unknown block {} (not in managed partition)", _0)]
    UnknownBlock(BlockId),
    #[fail(display = "block {} has no {:?} capability", block, attribute)]
    CapabilityMismatch { block: BlockId, attribute: Attribute },
    #[fail(display = "invalid program: {}", _0)]
    InvalidProgram(String),
    #[fail(display = "train {} ran out of route at position {}", train, index)]
    RouteExhausted { train: TrainId, index: usize },
    #[fail(display = "stale input, reusing previous snapshot: {}", _0)]
    StaleInput(String),
    #[fail(display = "change on block {} rejected: {}", block, reason)]
    SafetyRejected { block: BlockId, reason: String },
}
