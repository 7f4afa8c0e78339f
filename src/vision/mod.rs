pub mod claude;
pub mod resize;
pub mod response;

pub use claude::{VisionClient, VisionConfig, VisionError};
