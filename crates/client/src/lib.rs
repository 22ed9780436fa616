pub mod buffer;
pub mod config;
pub mod interpolation;
pub mod link;
pub mod prediction;
pub mod predictor;

pub use buffer::{BufferedSnapshot, StateBuffer};
pub use config::ClientConfig;
pub use interpolation::{InterpolatedState, Interpolator};
pub use link::{LinkError, LinkEvent, NetworkLink};
pub use prediction::{apply_input, Correction, PendingInput, Reconciler, Reconciliation};
pub use predictor::{Predictor, PredictorStats, RenderSource, RenderState};
