//! Per-build ID allocation for generated device names.

use std::collections::HashMap;

/// Hands out monotonically increasing indices per category.
///
/// A fresh allocator is created for every command-line build, so two devices
/// of the same category never share an index within one QEMU invocation.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: HashMap<String, u32>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unused index for `category`, starting at 0.
    pub fn next(&mut self, category: &str) -> u32 {
        let slot = self.next.entry(category.to_string()).or_insert(0);
        let id = *slot;
        *slot += 1;
        id
    }

    /// Next unused name for `category`, e.g. `drive0`, `drive1`.
    pub fn id(&mut self, category: &str) -> String {
        let n = self.next(category);
        format!("{category}{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_zero() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.next("drive"), 0);
        assert_eq!(ids.next("drive"), 1);
        assert_eq!(ids.next("drive"), 2);
    }

    #[test]
    fn test_categories_independent() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.id("drive"), "drive0");
        assert_eq!(ids.id("ahci"), "ahci0");
        assert_eq!(ids.id("drive"), "drive1");
        assert_eq!(ids.id("fsdev"), "fsdev0");
        assert_eq!(ids.id("ahci"), "ahci1");
    }

    #[test]
    fn test_fresh_allocator_restarts() {
        let mut a = IdAllocator::new();
        a.next("net");
        a.next("net");
        let mut b = IdAllocator::new();
        assert_eq!(b.next("net"), 0);
    }
}
