//! Registry entries: one per distinct handler signature.

use crate::descriptor::{BoundFn, Callable, HandlerDescriptor, StaticFn};
use crate::error::{DispatchError, DispatchResult};
use crate::event::{Event, EventCategory, Priority};
use crate::owner::OwnerRef;
use crate::signature::Signature;

/// How an entry's callable is invoked. Fixed when the entry is created.
#[derive(Clone)]
enum Binding {
    Static(StaticFn),
    Bound { callable: BoundFn, owners: Vec<OwnerRef> },
}

/// A registered handler and the owners currently bound to it.
///
/// Entries are never removed when their owner set empties; an entry with no
/// owners simply invokes nothing.
#[derive(Clone)]
pub struct HandlerEntry {
    signature: Signature,
    declaring_type: String,
    name: String,
    category: EventCategory,
    priority: Priority,
    binding: Binding,
}

impl HandlerEntry {
    /// Build the entry for a first registration. Instance-bound descriptors
    /// start with `owner` as their only owner.
    pub(crate) fn create(
        descriptor: HandlerDescriptor,
        signature: Signature,
        owner: Option<&OwnerRef>,
    ) -> DispatchResult<Self> {
        let binding = match descriptor.callable {
            Callable::Static(callable) => Binding::Static(callable),
            Callable::Bound(callable) => {
                let owner = owner.ok_or_else(|| DispatchError::MissingOwner {
                    signature: signature.clone(),
                })?;
                Binding::Bound {
                    callable,
                    owners: vec![owner.clone()],
                }
            }
        };

        Ok(Self {
            signature,
            declaring_type: descriptor.declaring_type,
            name: descriptor.name,
            category: descriptor.category,
            priority: descriptor.priority,
            binding,
        })
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> EventCategory {
        self.category
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn is_static(&self) -> bool {
        matches!(self.binding, Binding::Static(_))
    }

    /// `None` for static entries.
    pub fn owner_count(&self) -> Option<usize> {
        match &self.binding {
            Binding::Static(_) => None,
            Binding::Bound { owners, .. } => Some(owners.len()),
        }
    }

    pub fn has_owner(&self, owner: &OwnerRef) -> bool {
        match &self.binding {
            Binding::Static(_) => false,
            Binding::Bound { owners, .. } => owners.iter().any(|o| o.same_instance(owner)),
        }
    }

    /// Attach another owner. Returns `false` when it is already attached.
    ///
    /// Fails for static entries: they can never carry owners.
    pub(crate) fn add_owner(&mut self, owner: OwnerRef) -> DispatchResult<bool> {
        match &mut self.binding {
            Binding::Static(_) => Err(DispatchError::StaticOwner {
                signature: self.signature.clone(),
            }),
            Binding::Bound { owners, .. } => {
                if owners.iter().any(|o| o.same_instance(&owner)) {
                    return Ok(false);
                }
                owners.push(owner);
                Ok(true)
            }
        }
    }

    /// Detach `owner`, handing it back so the caller decides when it drops.
    pub(crate) fn remove_owner(&mut self, owner: &OwnerRef) -> Option<OwnerRef> {
        match &mut self.binding {
            Binding::Static(_) => None,
            Binding::Bound { owners, .. } => {
                let index = owners.iter().position(|o| o.same_instance(owner))?;
                Some(owners.remove(index))
            }
        }
    }

    /// The calls this entry contributes to one dispatch, in owner order.
    pub(crate) fn invocations(&self) -> Vec<Invocation> {
        match &self.binding {
            Binding::Static(callable) => vec![Invocation {
                signature: self.signature.clone(),
                target: Target::Static(callable.clone()),
            }],
            Binding::Bound { callable, owners } => owners
                .iter()
                .map(|owner| Invocation {
                    signature: self.signature.clone(),
                    target: Target::Bound(callable.clone(), owner.clone()),
                })
                .collect(),
        }
    }
}

/// A single handler call captured from the registry. Holds no lock.
pub(crate) struct Invocation {
    pub(crate) signature: Signature,
    target: Target,
}

enum Target {
    Static(StaticFn),
    Bound(BoundFn, OwnerRef),
}

impl Invocation {
    pub(crate) fn owner(&self) -> Option<&OwnerRef> {
        match &self.target {
            Target::Static(_) => None,
            Target::Bound(_, owner) => Some(owner),
        }
    }

    pub(crate) fn call(&self, event: &dyn Event) -> anyhow::Result<()> {
        match &self.target {
            Target::Static(callable) => callable(event),
            Target::Bound(callable, owner) => callable(owner, event),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::descriptor::{discover, Handlers, Subscriber};

    #[derive(Debug)]
    struct Ping;
    impl Event for Ping {}

    struct Node;

    impl Subscriber for Node {
        fn subscribe(handlers: &mut Handlers<Self>) {
            handlers
                .on("on_ping", Priority::Medium, |_: &Node, _: &Ping| Ok(()))
                .on_static("on_ping_static", Priority::Medium, |_: &Ping| Ok(()));
        }
    }

    fn descriptors() -> (HandlerDescriptor, HandlerDescriptor) {
        let mut all = discover::<Node>();
        let static_one = all.remove(1);
        (all.remove(0), static_one)
    }

    fn create(descriptor: HandlerDescriptor, owner: Option<&OwnerRef>) -> DispatchResult<HandlerEntry> {
        let signature = descriptor.signature();
        HandlerEntry::create(descriptor, signature, owner)
    }

    #[test]
    fn static_entry_has_no_owners_and_refuses_them() {
        let (_, static_one) = descriptors();
        let mut entry = create(static_one, None).unwrap();
        assert!(entry.is_static());
        assert_eq!(entry.owner_count(), None);

        let owner = OwnerRef::new(&Arc::new(Node));
        assert!(matches!(
            entry.add_owner(owner),
            Err(DispatchError::StaticOwner { .. })
        ));
        assert_eq!(entry.invocations().len(), 1);
    }

    #[test]
    fn bound_entry_requires_an_owner() {
        let (bound, _) = descriptors();
        assert!(matches!(
            create(bound, None),
            Err(DispatchError::MissingOwner { .. })
        ));
    }

    #[test]
    fn owners_are_deduplicated_by_instance() {
        let (bound, _) = descriptors();
        let first = OwnerRef::new(&Arc::new(Node));
        let second = OwnerRef::new(&Arc::new(Node));
        let mut entry = create(bound, Some(&first)).unwrap();

        assert!(!entry.add_owner(first.clone()).unwrap());
        assert!(entry.add_owner(second.clone()).unwrap());
        assert_eq!(entry.owner_count(), Some(2));

        let order: Vec<usize> = entry
            .invocations()
            .iter()
            .filter_map(|i| i.owner().map(OwnerRef::addr))
            .collect();
        assert_eq!(order, vec![first.addr(), second.addr()]);
    }

    #[test]
    fn emptied_entry_stays_bound_and_invokes_nothing() {
        let (bound, _) = descriptors();
        let owner = OwnerRef::new(&Arc::new(Node));
        let mut entry = create(bound, Some(&owner)).unwrap();

        let released = entry.remove_owner(&owner).unwrap();
        assert!(released.same_instance(&owner));
        assert!(entry.remove_owner(&owner).is_none());
        assert_eq!(entry.owner_count(), Some(0));
        assert!(!entry.is_static());
        assert!(entry.invocations().is_empty());
    }
}
