//! In-process event dispatch engine.
//!
//! Registrants declare their handlers through [`Subscriber`]; the
//! [`Dispatcher`] indexes them by event category and signature, and fans each
//! dispatched event out to every matching handler, isolating failures per
//! handler and per owner.
//!
//! Dispatchers are plain values. There is no global instance; independent
//! dispatchers never share state.

pub mod config;
pub mod descriptor;
pub mod dispatcher;
pub mod entry;
pub mod error;
pub mod event;
pub mod owner;
pub mod signature;

pub use config::{load_config, DispatchOrder, DispatcherConfig, TypeUnregistration};
pub use descriptor::{discover, Callable, HandlerDescriptor, HandlerResult, Handlers, Subscriber};
pub use dispatcher::{
    CategorySnapshot, DispatchReport, Dispatcher, HandlerSnapshot, RegistrationReport,
    RegistrySnapshot,
};
pub use entry::HandlerEntry;
pub use error::{DispatchError, SignatureError};
pub use event::{AsEvent, Event, EventCategory, Priority};
pub use owner::OwnerRef;
pub use signature::{DecodedSignature, Signature, TypeDescriptor};
