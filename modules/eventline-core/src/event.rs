//! Events, their categories, and handler priority levels.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::signature::{type_path, TypeDescriptor};

/// Type-erasure support for [`Event`]. Implemented for every `'static` type;
/// callers never implement it themselves.
pub trait AsEvent: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn category(&self) -> EventCategory;
}

impl<T: Any + Send + Sync> AsEvent for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn category(&self) -> EventCategory {
        EventCategory::of_any::<T>()
    }
}

/// A value delivered to handlers. Its concrete type is its category.
///
/// ```
/// use eventline_core::Event;
///
/// #[derive(Debug)]
/// struct Started;
///
/// impl Event for Started {}
/// ```
pub trait Event: AsEvent + fmt::Debug {}

/// The exact-match key used to route events to handlers.
///
/// Equality and hashing use the `TypeId` only; the name is carried for logs.
#[derive(Debug, Clone, Copy)]
pub struct EventCategory {
    id: TypeId,
    name: &'static str,
}

impl EventCategory {
    pub fn of<E: Event>() -> Self {
        Self::of_any::<E>()
    }

    pub(crate) fn of_any<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The parameter descriptor a handler for this category must declare.
    pub fn descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Reference(type_path(self.id, self.name))
    }
}

impl PartialEq for EventCategory {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventCategory {}

impl Hash for EventCategory {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Declared importance of a handler. Only used for ordering when the
/// dispatcher runs with [`DispatchOrder::Priority`](crate::DispatchOrder).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Lowest,
    #[default]
    Medium,
    High,
    ExtremelyHigh,
}

impl Priority {
    pub fn value(self) -> u8 {
        match self {
            Priority::Lowest => 0,
            Priority::Medium => 1,
            Priority::High => 2,
            Priority::ExtremelyHigh => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Priority::Lowest => "lowest",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::ExtremelyHigh => "extremely_high",
        };
        f.write_str(label)
    }
}
