//! The listener runtime: poll loop, dispatch, retry, progress tracking,
//! cooperative/hard shutdown, and the handler registry, per spec.md §4.4,
//! §4.6, and §9's Handler Registry & Code Designation component.

pub mod designation;
pub mod dispatch;
pub mod handler;
pub mod listener;
pub mod progress;
pub mod registry;

pub use designation::CodeDesignation;
pub use dispatch::{DispatchContext, DispatchTarget};
pub use handler::{FnHandler, Handler, RuntimeFacade};
pub use listener::{ListenerRuntime, ShutdownHandle};
pub use progress::{
    progress_key, HandlerStatus, ProgressTracker, DEFAULT_KEY_LIFETIME_SECONDS,
    DEFAULT_MAX_HANDLER_ATTEMPTS,
};
pub use registry::{normalize_event_name, HandlerRegistry, MasterHandler};
