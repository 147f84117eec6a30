//! Handler descriptors and the explicit discovery API.
//!
//! Registrants implement [`Subscriber`] and list their handlers on a
//! [`Handlers`] builder. Each entry becomes a [`HandlerDescriptor`] whose
//! callable is a type-erased closure, so dispatch is a plain function call.

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use typed_builder::TypedBuilder;

use crate::event::{AsEvent, Event, EventCategory, Priority};
use crate::owner::OwnerRef;
use crate::signature::{method_descriptor, type_path_of, Signature, TypeDescriptor};

/// What a handler returns. Errors are logged by the dispatcher, never
/// returned to the dispatching caller.
pub type HandlerResult = anyhow::Result<()>;

pub type StaticFn = Arc<dyn Fn(&dyn Event) -> HandlerResult + Send + Sync>;
pub type BoundFn = Arc<dyn Fn(&OwnerRef, &dyn Event) -> HandlerResult + Send + Sync>;

/// A handler body, either free-standing or bound to an owner at call time.
#[derive(Clone)]
pub enum Callable {
    Static(StaticFn),
    Bound(BoundFn),
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Static(_) => f.write_str("Callable::Static"),
            Callable::Bound(_) => f.write_str("Callable::Bound"),
        }
    }
}

/// One discovered handler, ready to be registered.
#[derive(Debug, Clone, TypedBuilder)]
pub struct HandlerDescriptor {
    #[builder(setter(into))]
    pub declaring_type: String,
    #[builder(setter(into))]
    pub name: String,
    pub params: Vec<TypeDescriptor>,
    pub returns: TypeDescriptor,
    pub category: EventCategory,
    #[builder(default)]
    pub priority: Priority,
    pub callable: Callable,
}

impl HandlerDescriptor {
    pub fn is_static(&self) -> bool {
        matches!(self.callable, Callable::Static(_))
    }

    pub fn signature(&self) -> Signature {
        Signature::encode(&self.declaring_type, &self.name, &self.params, &self.returns)
    }

    /// `(params)returns`, for log lines.
    pub fn method_descriptor(&self) -> String {
        method_descriptor(&self.params, &self.returns)
    }

    /// A handler must take exactly one parameter: the event of its category.
    pub fn accepts_event(&self) -> bool {
        matches!(self.params.as_slice(), [param] if *param == self.category.descriptor())
    }
}

/// A registrant that declares its own handlers.
///
/// ```
/// use eventline_core::{Event, Handlers, Priority, Subscriber};
///
/// #[derive(Debug)]
/// struct Tick;
/// impl Event for Tick {}
///
/// struct Counter;
///
/// impl Subscriber for Counter {
///     fn subscribe(handlers: &mut Handlers<Self>) {
///         handlers.on("on_tick", Priority::Medium, |_counter: &Counter, _tick: &Tick| Ok(()));
///     }
/// }
/// ```
pub trait Subscriber: Sized + Send + Sync + 'static {
    fn subscribe(handlers: &mut Handlers<Self>);
}

/// Builder handed to [`Subscriber::subscribe`].
pub struct Handlers<S> {
    descriptors: Vec<HandlerDescriptor>,
    _subscriber: PhantomData<fn(&S)>,
}

impl<S: Subscriber> Handlers<S> {
    fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            _subscriber: PhantomData,
        }
    }

    /// Declare a handler invoked once per registered instance of `S`.
    pub fn on<E, F>(&mut self, name: &str, priority: Priority, handler: F) -> &mut Self
    where
        E: Event,
        F: Fn(&S, &E) -> HandlerResult + Send + Sync + 'static,
    {
        let bound: BoundFn = Arc::new(move |owner: &OwnerRef, event: &dyn Event| -> HandlerResult {
            let this = owner.downcast_ref::<S>().ok_or_else(|| {
                anyhow!("owner {owner} is not a {}", type_name::<S>())
            })?;
            handler(this, downcast_event::<E>(event)?)
        });
        self.push::<E>(name, priority, Callable::Bound(bound))
    }

    /// Declare a handler that needs no instance of `S`.
    pub fn on_static<E, F>(&mut self, name: &str, priority: Priority, handler: F) -> &mut Self
    where
        E: Event,
        F: Fn(&E) -> HandlerResult + Send + Sync + 'static,
    {
        let free: StaticFn = Arc::new(move |event: &dyn Event| -> HandlerResult {
            handler(downcast_event::<E>(event)?)
        });
        self.push::<E>(name, priority, Callable::Static(free))
    }

    fn push<E: Event>(&mut self, name: &str, priority: Priority, callable: Callable) -> &mut Self {
        self.descriptors.push(
            HandlerDescriptor::builder()
                .declaring_type(type_path_of::<S>())
                .name(name)
                .params(vec![TypeDescriptor::of::<E>()])
                .returns(TypeDescriptor::of::<HandlerResult>())
                .category(EventCategory::of::<E>())
                .priority(priority)
                .callable(callable)
                .build(),
        );
        self
    }

    pub fn into_descriptors(self) -> Vec<HandlerDescriptor> {
        self.descriptors
    }
}

fn downcast_event<E: Event>(event: &dyn Event) -> anyhow::Result<&E> {
    event
        .as_any()
        .downcast_ref::<E>()
        .ok_or_else(|| anyhow!("event {event:?} is not a {}", type_name::<E>()))
}

/// Enumerate the handlers a subscriber type declares.
pub fn discover<S: Subscriber>() -> Vec<HandlerDescriptor> {
    let mut handlers = Handlers::<S>::new();
    S::subscribe(&mut handlers);
    handlers.into_descriptors()
}
