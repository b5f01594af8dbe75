pub mod predictions;

pub use predictions::{parse_predictions, PredictionFeedClient};
