pub mod binder;
pub mod canvas;
pub mod history;
pub mod session;
pub mod surface;

pub use binder::{BindError, BoundTag, TagBinder, TagStyle};
pub use canvas::{Canvas, Entity, EntityKind};
pub use history::{CaptureOutcome, History, HistoryError, RestoreOutcome, Snapshot};
pub use session::{LoadStatus, Session, SessionError};
pub use surface::{
    ConnectorStyle, LoadTicket, SceneData, Surface, SurfaceError, TagVisual, TransformKind,
};
