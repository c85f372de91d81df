//! Fixed-width element record shared by both cache variants.

/// Element index reserved as the null sentinel (no element / no link).
pub const NULL: u32 = 0xFFFF_FFFF;

/// One slot of the cache's element arena: a key/value pair plus the
/// doubly-linked list pointers that thread it through either the active
/// LRU list or the free list, never both.
///
/// Invariant: `prev == NULL` iff this element is the list head, `next ==
/// NULL` iff it is the tail, and linkage is always symmetric.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Element {
    pub ip: u32,
    pub value: u32,
    pub prev: u32,
    pub next: u32,
}

impl Element {
    pub const EMPTY: Element = Element {
        ip: 0,
        value: 0,
        prev: NULL,
        next: NULL,
    };
}

const _: () = assert!(std::mem::size_of::<Element>() == 16);
