//! Request-scoped context values.
//!
//! A [`Context`] is an immutable, layered key-value association scoped to one
//! logical operation. Deriving a child never changes the parent: every
//! `with_*` call returns a new context sharing the parent's layers.
//!
//! Keys are types, not strings. A module that keeps its key type private owns
//! its slot exclusively; nobody else can read, overwrite, or spoof it.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct Layer {
    key: TypeId,
    value: Box<dyn Any + Send + Sync>,
    parent: Option<Arc<Layer>>,
}

#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Layer>>,
}

/// Key for the deadline layer.
struct DeadlineKey;

impl Context {
    /// An empty context with no values and no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a child context holding `value` under the key type `K`.
    ///
    /// Lookups through the child see the new value first; the parent is untouched.
    pub fn with_value<K: 'static, V: Any + Send + Sync>(&self, value: V) -> Self {
        Self {
            head: Some(Arc::new(Layer {
                key: TypeId::of::<K>(),
                value: Box::new(value),
                parent: self.head.clone(),
            })),
        }
    }

    /// Look up the nearest value stored under `K`.
    ///
    /// Returns `None` when no layer uses `K`, or when the nearest one holds a
    /// value of another type.
    pub fn value<K: 'static, V: Any>(&self) -> Option<&V> {
        let key = TypeId::of::<K>();
        let mut layer = self.head.as_deref();
        while let Some(current) = layer {
            if current.key == key {
                return current.value.downcast_ref::<V>();
            }
            layer = current.parent.as_deref();
        }
        None
    }

    /// True if any layer uses the key `K`, whatever its value type.
    pub fn contains<K: 'static>(&self) -> bool {
        let key = TypeId::of::<K>();
        let mut layer = self.head.as_deref();
        while let Some(current) = layer {
            if current.key == key {
                return true;
            }
            layer = current.parent.as_deref();
        }
        false
    }

    /// Derive a child context that expires at `deadline`.
    ///
    /// A child can only shorten its parent's deadline, never extend it.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        match self.deadline() {
            Some(current) if current <= deadline => self.clone(),
            _ => self.with_value::<DeadlineKey, Instant>(deadline),
        }
    }

    /// Derive a child context that expires `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.value::<DeadlineKey, Instant>().copied()
    }

    /// Time left before the deadline, saturating at zero.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    fn depth(&self) -> usize {
        let mut depth = 0;
        let mut layer = self.head.as_deref();
        while let Some(current) = layer {
            depth += 1;
            layer = current.parent.as_deref();
        }
        depth
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("layers", &self.depth())
            .field("deadline", &self.deadline())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NameKey;
    struct OtherKey;

    #[test]
    fn test_background_is_empty() {
        let ctx = Context::background();
        assert!(ctx.value::<NameKey, String>().is_none());
        assert!(ctx.deadline().is_none());
        assert!(!ctx.is_expired());
    }

    #[test]
    fn test_with_value_does_not_touch_parent() {
        let parent = Context::background();
        let child = parent.with_value::<NameKey, String>("alice".to_string());

        assert_eq!(child.value::<NameKey, String>().map(String::as_str), Some("alice"));
        assert!(parent.value::<NameKey, String>().is_none());
    }

    #[test]
    fn test_keys_do_not_collide() {
        let ctx = Context::background()
            .with_value::<NameKey, u32>(1)
            .with_value::<OtherKey, u32>(2);

        assert_eq!(ctx.value::<NameKey, u32>(), Some(&1));
        assert_eq!(ctx.value::<OtherKey, u32>(), Some(&2));
    }

    #[test]
    fn test_nearest_layer_wins() {
        let outer = Context::background().with_value::<NameKey, u32>(1);
        let inner = outer.with_value::<NameKey, u32>(2);

        assert_eq!(inner.value::<NameKey, u32>(), Some(&2));
        assert_eq!(outer.value::<NameKey, u32>(), Some(&1));
    }

    #[test]
    fn test_wrong_value_type_is_absent() {
        let ctx = Context::background().with_value::<NameKey, u32>(7);
        assert!(ctx.value::<NameKey, String>().is_none());
    }

    #[tokio::test]
    async fn test_child_cannot_extend_deadline() {
        let short = Context::background().with_timeout(Duration::from_secs(1));
        let longer = short.with_timeout(Duration::from_secs(60));
        assert_eq!(short.deadline(), longer.deadline());

        let shorter = short.with_timeout(Duration::from_millis(10));
        assert!(shorter.deadline() < short.deadline());
    }

    #[tokio::test]
    async fn test_expired_deadline() {
        let ctx = Context::background().with_deadline(Instant::now());
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_debug_reports_depth() {
        let ctx = Context::background()
            .with_value::<NameKey, u32>(1)
            .with_value::<OtherKey, u32>(2);
        assert!(format!("{:?}", ctx).contains("layers: 2"));
    }
}
