pub mod compositor;
pub mod lip_sync;
pub mod table;
pub mod trajectory;

pub use compositor::WeightCompositor;
pub use lip_sync::{LipSyncChannel, LipSyncConfig};
pub use table::{EmotionWeightTable, EmotionWeights, NEUTRAL};
pub use trajectory::{
    Trajectory, TrajectoryError, TrajectoryKeyframe, TrajectoryPlayback, TrajectorySample,
};
