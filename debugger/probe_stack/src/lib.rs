//! Stack growth guard for the debugger's recursive walks.
//!
//! Loading a value from the target follows pointers, struct fields and
//! array elements recursively. The depth is bounded by `LoadConfig`, but
//! debug info for a large program can still describe linked structures
//! and nested types deep enough to exhaust the host thread's stack when
//! the walk, the equality check, or the type identity check recurses.
//!
//! Every such recursion point wraps its body in [`ensure_sufficient_stack`].
//! On native targets this grows the stack on demand with `stacker`; on
//! `wasm32` it calls the closure directly.
//!
//! ```text
//! fn load(&mut self, depth: usize, cfg: &LoadConfig) {
//!     ensure_sufficient_stack(|| {
//!         for child in &mut self.children {
//!             child.load(depth + 1, cfg);
//!         }
//!     });
//! }
//! ```

/// Remaining stack below which a new segment is allocated.
const RED_ZONE: usize = 100 * 1024;

/// Size of each newly allocated stack segment.
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Run `f`, first growing the stack if less than the red zone remains.
#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

/// `wasm32` manages its own stack.
#[inline]
#[cfg(target_arch = "wasm32")]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A singly linked chain, the shape a runtime list takes once loaded.
    struct Node {
        value: u64,
        next: Option<Box<Node>>,
    }

    fn chain(len: u64) -> Option<Box<Node>> {
        let mut head = None;
        for value in (0..len).rev() {
            head = Some(Box::new(Node { value, next: head }));
        }
        head
    }

    fn sum(node: Option<&Node>) -> u64 {
        ensure_sufficient_stack(|| match node {
            None => 0,
            Some(n) => n.value + sum(n.next.as_deref()),
        })
    }

    #[test]
    fn test_short_chain() {
        assert_eq!(sum(chain(5).as_deref()), 10);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let mut list = chain(100_000);
        assert_eq!(sum(list.as_deref()), 4_999_950_000);

        // Iterative drop keeps the test itself from overflowing.
        while let Some(mut node) = list {
            list = node.next.take();
        }
    }

    #[test]
    fn test_propagates_result() {
        let r: Result<u8, String> = ensure_sufficient_stack(|| Err("unreadable".to_string()));
        assert_eq!(r, Err("unreadable".to_string()));
    }
}
