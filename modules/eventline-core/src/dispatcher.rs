//! The registration and dispatch engine.
//!
//! Three indexes live behind one lock: category → signatures in
//! first-registration order, signature → entry, and each entry's owner list.
//! Dispatch snapshots the calls it will make and releases the lock before
//! invoking anything, so handlers may register, unregister or dispatch
//! re-entrantly.

use std::any::{type_name, Any, TypeId};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::anyhow;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{DispatchOrder, DispatcherConfig, TypeUnregistration};
use crate::descriptor::{discover, HandlerDescriptor, Subscriber};
use crate::entry::{HandlerEntry, Invocation};
use crate::error::{DispatchError, DispatchResult};
use crate::event::{AsEvent, Event, EventCategory, Priority};
use crate::owner::OwnerRef;
use crate::signature::{type_path_of, Signature};

/// Outcome of one registration call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationReport {
    /// New entries created.
    pub registered: usize,
    /// Owners attached to entries that already existed.
    pub attached: usize,
    /// Duplicates ignored.
    pub skipped: usize,
}

/// Outcome of one dispatch. Handler results themselves are never returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandlerSnapshot {
    pub signature: Signature,
    pub priority: Priority,
    pub is_static: bool,
    pub owners: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorySnapshot {
    pub category: &'static str,
    pub handlers: Vec<HandlerSnapshot>,
}

/// Serializable view of a dispatcher's registry, categories sorted by name.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub dispatcher: String,
    pub categories: Vec<CategorySnapshot>,
}

#[derive(Default)]
struct Registry {
    by_category: HashMap<TypeId, (EventCategory, Vec<Signature>)>,
    entries: HashMap<Signature, HandlerEntry>,
}

impl Registry {
    fn insert(&mut self, entry: HandlerEntry) {
        let category = entry.category();
        self.by_category
            .entry(category.id())
            .or_insert_with(|| (category, Vec::new()))
            .1
            .push(entry.signature().clone());
        self.entries.insert(entry.signature().clone(), entry);
    }

    fn entries_for(&self, category: TypeId, order: DispatchOrder) -> Vec<&HandlerEntry> {
        let Some((_, signatures)) = self.by_category.get(&category) else {
            return Vec::new();
        };
        let mut entries: Vec<&HandlerEntry> = signatures
            .iter()
            .filter_map(|signature| self.entries.get(signature))
            .collect();
        if order == DispatchOrder::Priority {
            // Stable: equal priorities keep registration order.
            entries.sort_by_key(|entry| Reverse(entry.priority()));
        }
        entries
    }
}

/// Routes events to the handlers registered for their exact category.
pub struct Dispatcher {
    config: DispatcherConfig,
    registry: RwLock<Registry>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            registry: RwLock::new(Registry::default()),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    // A panicking handler never runs under the lock, so a poisoned lock
    // still guards consistent indexes.
    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register every handler `S` declares, binding instance handlers to
    /// `registrant`.
    pub fn register<S: Subscriber>(&self, registrant: &Arc<S>) -> DispatchResult<RegistrationReport> {
        self.register_descriptors(Some(OwnerRef::new(registrant)), discover::<S>())
    }

    /// Register only the static handlers of `S`; there is no instance to bind.
    pub fn register_type<S: Subscriber>(&self) -> DispatchResult<RegistrationReport> {
        let (statics, bound): (Vec<_>, Vec<_>) =
            discover::<S>().into_iter().partition(HandlerDescriptor::is_static);
        for descriptor in &bound {
            debug!(
                dispatcher = %self.config.name,
                signature = %descriptor.signature(),
                "Skipping instance handler: no instance of {} to bind",
                type_name::<S>()
            );
        }
        self.register_descriptors(None, statics)
    }

    /// Register descriptors produced by any discovery adapter.
    ///
    /// Descriptors that do not take exactly one event parameter are dropped.
    /// Duplicates are logged and skipped. Adding an owner to a static entry
    /// aborts the call; descriptors processed before it stay registered.
    pub fn register_descriptors(
        &self,
        owner: Option<OwnerRef>,
        descriptors: Vec<HandlerDescriptor>,
    ) -> DispatchResult<RegistrationReport> {
        // `descriptors` and `owner` outlive the guard, so skipped closures and
        // owners are released after the lock.
        let mut report = RegistrationReport::default();
        let mut registry = self.write();

        for descriptor in &descriptors {
            let signature = descriptor.signature();
            let category = descriptor.category;

            if !descriptor.accepts_event() {
                debug!(
                    dispatcher = %self.config.name,
                    signature = %signature,
                    "Ignoring handler that does not take exactly one {category}"
                );
                continue;
            }

            if descriptor.is_static() {
                if registry.entries.contains_key(&signature) {
                    warn!(
                        dispatcher = %self.config.name,
                        signature = %signature,
                        "Handler {}{} in {} is already registered to event {category}",
                        descriptor.name,
                        descriptor.method_descriptor(),
                        descriptor.declaring_type
                    );
                    report.skipped += 1;
                    continue;
                }
                registry.insert(HandlerEntry::create(descriptor.clone(), signature.clone(), None)?);
                report.registered += 1;
            } else {
                let owner = owner.as_ref();
                match registry.entries.get_mut(&signature) {
                    Some(entry) => {
                        let Some(owner) = owner else {
                            return Err(DispatchError::MissingOwner { signature });
                        };
                        if !entry.add_owner(owner.clone())? {
                            warn!(
                                dispatcher = %self.config.name,
                                signature = %signature,
                                owner = %owner,
                                "Handler {}{} in {} is already registered to this object",
                                descriptor.name,
                                descriptor.method_descriptor(),
                                descriptor.declaring_type
                            );
                            report.skipped += 1;
                            continue;
                        }
                        report.attached += 1;
                    }
                    None => {
                        registry.insert(HandlerEntry::create(descriptor.clone(), signature.clone(), owner)?);
                        report.registered += 1;
                    }
                }
            }

            debug!(
                dispatcher = %self.config.name,
                signature = %signature,
                "Registered handler to event {category}"
            );
        }

        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Unregistration
    // -----------------------------------------------------------------------

    /// Detach `registrant` from every entry it owns. Entries left without
    /// owners stay indexed. Returns how many entries it was removed from.
    pub fn unregister<S: Any + Send + Sync>(&self, registrant: &Arc<S>) -> usize {
        self.unregister_owner(&OwnerRef::new(registrant))
    }

    pub fn unregister_owner(&self, owner: &OwnerRef) -> usize {
        // Released owners are dropped after the guard.
        let released: Vec<OwnerRef> = self
            .write()
            .entries
            .values_mut()
            .filter_map(|entry| entry.remove_owner(owner))
            .collect();
        let removed = released.len();

        if removed == 0 {
            warn!(
                dispatcher = %self.config.name,
                owner = %owner,
                "Unregistered an object that owned no handlers"
            );
        } else {
            debug!(dispatcher = %self.config.name, owner = %owner, removed, "Unregistered object");
        }
        removed
    }

    /// Unregister the handlers declared by `S`.
    ///
    /// With [`TypeUnregistration::Inspect`] this only reports handlers that
    /// are missing and changes nothing. With [`TypeUnregistration::Remove`]
    /// every entry declared by `S` is dropped, owners included. Returns the
    /// number of entries removed.
    pub fn unregister_type<S: Subscriber>(&self) -> usize {
        match self.config.type_unregistration {
            TypeUnregistration::Inspect => {
                self.inspect_type::<S>();
                0
            }
            TypeUnregistration::Remove => self.remove_type(&type_path_of::<S>()),
        }
    }

    fn inspect_type<S: Subscriber>(&self) {
        let registry = self.read();
        for descriptor in discover::<S>().into_iter().filter(HandlerDescriptor::accepts_event) {
            let category = descriptor.category;
            if !registry.by_category.contains_key(&category.id()) {
                warn!(
                    dispatcher = %self.config.name,
                    "No handlers for event {category} when unregistering {}",
                    type_name::<S>()
                );
                continue;
            }
            let signature = descriptor.signature();
            if !registry.entries.contains_key(&signature) {
                warn!(
                    dispatcher = %self.config.name,
                    signature = %signature,
                    "No entry for handler {}{} in {} for event {category}",
                    descriptor.name,
                    descriptor.method_descriptor(),
                    descriptor.declaring_type
                );
            }
        }
    }

    fn remove_type(&self, declaring_type: &str) -> usize {
        // Removed entries may hold the last reference to an owner or a
        // captured value, so they are dropped only after the guard is gone.
        let removed: Vec<HandlerEntry> = {
            let mut registry = self.write();
            let doomed: Vec<Signature> = registry
                .entries
                .values()
                .filter(|entry| entry.declaring_type() == declaring_type)
                .map(|entry| entry.signature().clone())
                .collect();

            let removed: Vec<HandlerEntry> = doomed
                .iter()
                .filter_map(|signature| registry.entries.remove(signature))
                .collect();
            registry.by_category.retain(|_, (_, signatures)| {
                signatures.retain(|signature| !doomed.contains(signature));
                !signatures.is_empty()
            });
            removed
        };

        if removed.is_empty() {
            warn!(
                dispatcher = %self.config.name,
                "No handlers registered for {declaring_type}"
            );
            return 0;
        }

        debug!(
            dispatcher = %self.config.name,
            removed = removed.len(),
            "Unregistered type {declaring_type}"
        );
        removed.len()
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Deliver `event` to every handler of its category.
    pub fn dispatch<E: Event>(&self, event: &E) -> DispatchReport {
        self.dispatch_dyn(event)
    }

    /// Deliver a type-erased event. Handler failures are logged and counted,
    /// never propagated; one failure never stops the rest of the fan-out.
    pub fn dispatch_dyn(&self, event: &dyn Event) -> DispatchReport {
        let category = event.category();
        let invocations: Vec<Invocation> = self
            .read()
            .entries_for(category.id(), self.config.order)
            .into_iter()
            .flat_map(HandlerEntry::invocations)
            .collect();

        let mut report = DispatchReport::default();
        for invocation in &invocations {
            match self.invoke(invocation, event) {
                Ok(()) => report.invoked += 1,
                Err(err) => {
                    report.failed += 1;
                    match invocation.owner() {
                        None => warn!(
                            dispatcher = %self.config.name,
                            category = %category,
                            signature = %invocation.signature,
                            error = %err,
                            "Failed to call event {event:?} on handler"
                        ),
                        Some(owner) => warn!(
                            dispatcher = %self.config.name,
                            category = %category,
                            signature = %invocation.signature,
                            owner = %owner,
                            error = %err,
                            "Failed to call instance handler"
                        ),
                    }
                }
            }
        }
        report
    }

    fn invoke(&self, invocation: &Invocation, event: &dyn Event) -> anyhow::Result<()> {
        if !self.config.catch_panics {
            return invocation.call(event);
        }
        panic::catch_unwind(AssertUnwindSafe(|| invocation.call(event)))
            .unwrap_or_else(|payload| Err(anyhow!("handler panicked: {}", panic_message(&*payload))))
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Number of entries indexed for `E`, including entries with no owners.
    pub fn handler_count<E: Event>(&self) -> usize {
        self.read()
            .by_category
            .get(&TypeId::of::<E>())
            .map_or(0, |(_, signatures)| signatures.len())
    }

    /// The entries for `E`, in the order dispatch would invoke them.
    pub fn entries_for<E: Event>(&self) -> Vec<HandlerEntry> {
        self.read()
            .entries_for(TypeId::of::<E>(), self.config.order)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn contains(&self, signature: &Signature) -> bool {
        self.read().entries.contains_key(signature)
    }

    /// `None` when the signature is unknown or static.
    pub fn owner_count(&self, signature: &Signature) -> Option<usize> {
        self.read().entries.get(signature).and_then(HandlerEntry::owner_count)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let registry = self.read();
        let mut categories: Vec<CategorySnapshot> = registry
            .by_category
            .iter()
            .map(|(id, (category, _))| CategorySnapshot {
                category: category.name(),
                handlers: registry
                    .entries_for(*id, self.config.order)
                    .into_iter()
                    .map(|entry| HandlerSnapshot {
                        signature: entry.signature().clone(),
                        priority: entry.priority(),
                        is_static: entry.is_static(),
                        owners: entry.owner_count(),
                    })
                    .collect(),
            })
            .collect();
        categories.sort_by_key(|c| c.category);

        RegistrySnapshot {
            dispatcher: self.config.name.clone(),
            categories,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
