//! Owner instances bound to instance handlers.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

/// A registrant instance held by the dispatcher.
///
/// Identity is the allocation, not the value: two equal-looking instances
/// behind different `Arc`s are different owners.
#[derive(Clone)]
pub struct OwnerRef {
    instance: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl OwnerRef {
    pub fn new<S: Any + Send + Sync>(instance: &Arc<S>) -> Self {
        let instance: Arc<dyn Any + Send + Sync> = instance.clone();
        Self {
            instance,
            type_name: type_name::<S>(),
        }
    }

    pub fn same_instance(&self, other: &OwnerRef) -> bool {
        self.addr() == other.addr()
    }

    pub fn downcast_ref<S: Any>(&self) -> Option<&S> {
        (*self.instance).downcast_ref::<S>()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Address of the owned allocation. Stable while the owner is alive.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.instance) as *const () as usize
    }
}

impl fmt::Debug for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.type_name, self.addr())
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Widget(u32);

    #[test]
    fn identity_is_per_allocation() {
        let a = Arc::new(Widget(1));
        let b = Arc::new(Widget(1));

        assert!(OwnerRef::new(&a).same_instance(&OwnerRef::new(&a)));
        assert!(!OwnerRef::new(&a).same_instance(&OwnerRef::new(&b)));
    }

    #[test]
    fn downcast_to_registrant_type() {
        let a = Arc::new(Widget(7));
        let owner = OwnerRef::new(&a);

        assert_eq!(owner.downcast_ref::<Widget>(), Some(&Widget(7)));
        assert!(owner.downcast_ref::<String>().is_none());
        assert!(owner.type_name().ends_with("Widget"));
    }
}
