pub mod config;
pub mod geometry;
pub mod id;
pub mod label;
pub mod measurement;
pub mod model;
pub mod store;

pub use config::{ConfigError, EngineConfig};
pub use geometry::{SampleDensity, StrokeShape, closest_point};
pub use id::{EntityId, ImageContext, StrokeKey, StrokeLabel};
pub use label::{LabelError, next_label};
pub use measurement::{MeasurementError, format_measurement, parse_measurement};
pub use model::*;
pub use store::{ContextSnapshot, StoreError, StoreEvent, StrokeRecord, StrokeStore};

// Re-export kurbo so downstream crates agree on the geometry types
pub use kurbo;
