//! Creation/release accounting for software device resources.
//!
//! Every resource carries a [`ResourceHandle`] that registers on creation and
//! unregisters on drop, so leaks and double releases show up in [`ResourceStats`].

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    Surface,
    Effect,
    VertexLayout,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Texture,
        ResourceKind::Surface,
        ResourceKind::Effect,
        ResourceKind::VertexLayout,
    ];

    fn index(self) -> usize {
        match self {
            ResourceKind::Texture => 0,
            ResourceKind::Surface => 1,
            ResourceKind::Effect => 2,
            ResourceKind::VertexLayout => 3,
        }
    }
}

/// Per-device counters shared by every handle the device hands out
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    created: [Cell<u32>; 4],
    released: [Cell<u32>; 4],
}

impl ResourceRegistry {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn snapshot(&self) -> ResourceStats {
        let mut stats = ResourceStats::default();
        for kind in ResourceKind::ALL {
            stats.created[kind.index()] = self.created[kind.index()].get();
            stats.released[kind.index()] = self.released[kind.index()].get();
        }
        stats
    }
}

/// Registers one resource and unregisters it on drop
pub struct ResourceHandle {
    kind: ResourceKind,
    registry: Rc<ResourceRegistry>,
}

impl ResourceHandle {
    pub fn register(registry: &Rc<ResourceRegistry>, kind: ResourceKind) -> Self {
        let counter = &registry.created[kind.index()];
        counter.set(counter.get() + 1);
        Self {
            kind,
            registry: Rc::clone(registry),
        }
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        let counter = &self.registry.released[self.kind.index()];
        counter.set(counter.get() + 1);
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle").field("kind", &self.kind).finish()
    }
}

/// Point-in-time copy of the registry counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceStats {
    created: [u32; 4],
    released: [u32; 4],
}

impl ResourceStats {
    pub fn created(&self, kind: ResourceKind) -> u32 {
        self.created[kind.index()]
    }

    pub fn released(&self, kind: ResourceKind) -> u32 {
        self.released[kind.index()]
    }

    pub fn live(&self, kind: ResourceKind) -> u32 {
        self.created(kind) - self.released(kind)
    }

    /// Every resource ever created has been released
    pub fn balanced(&self) -> bool {
        self.created == self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_counts_create_and_release() {
        let registry = ResourceRegistry::new();
        let a = ResourceHandle::register(&registry, ResourceKind::Texture);
        let b = ResourceHandle::register(&registry, ResourceKind::Surface);

        let stats = registry.snapshot();
        assert_eq!(stats.created(ResourceKind::Texture), 1);
        assert_eq!(stats.live(ResourceKind::Surface), 1);
        assert!(!stats.balanced());

        drop(a);
        drop(b);
        let stats = registry.snapshot();
        assert_eq!(stats.released(ResourceKind::Texture), 1);
        assert!(stats.balanced());
    }
}
