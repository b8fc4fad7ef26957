//! Event listener registry.
//!
//! Listeners live in an [`IndexMap`] for O(1) removal with stable insertion
//! order, and are unregistered by dropping the [`Subscription`] returned at
//! registration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

/// Unique identifier for listeners.
pub type HandlerId = u64;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a new globally-unique handler ID.
pub fn next_handler_id() -> HandlerId {
	NEXT_HANDLER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Synchronous listener callback. Must not block.
pub type HandlerFn<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Listener storage shared between a publisher and its subscriptions.
pub struct HandlerMap<E> {
	inner: Arc<Mutex<IndexMap<HandlerId, HandlerFn<E>>>>,
}

impl<E> Clone for HandlerMap<E> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<E> Default for HandlerMap<E> {
	fn default() -> Self {
		Self {
			inner: Arc::new(Mutex::new(IndexMap::new())),
		}
	}
}

impl<E: 'static> HandlerMap<E> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `handler` until the returned subscription is dropped.
	pub fn subscribe<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&E) + Send + Sync + 'static,
	{
		let id = next_handler_id();
		self.inner.lock().insert(id, Arc::new(handler));
		Subscription::from_handler_map(id, self)
	}

	/// Calls every listener with `event` in registration order.
	///
	/// Listeners are snapshotted first, so a listener may subscribe or
	/// unsubscribe without deadlocking.
	pub fn publish(&self, event: &E) {
		let handlers: Vec<HandlerFn<E>> = self.inner.lock().values().cloned().collect();
		for handler in handlers {
			handler(event);
		}
	}

	pub fn len(&self) -> usize {
		self.inner.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.lock().is_empty()
	}
}

/// RAII handle that unregisters a listener on drop.
///
/// Holds a weak reference to the handler map, so dropping after the
/// publisher is gone is a no-op.
pub struct Subscription {
	id: HandlerId,
	dropper: Option<Arc<dyn Fn(HandlerId) + Send + Sync>>,
}

impl Subscription {
	/// Creates a subscription with a custom dropper function.
	pub fn new(id: HandlerId, dropper: Arc<dyn Fn(HandlerId) + Send + Sync>) -> Self {
		Self {
			id,
			dropper: Some(dropper),
		}
	}

	/// Creates a subscription from a handler map using a weak reference.
	pub fn from_handler_map<E: 'static>(id: HandlerId, handlers: &HandlerMap<E>) -> Self {
		let weak: Weak<Mutex<IndexMap<HandlerId, HandlerFn<E>>>> = Arc::downgrade(&handlers.inner);
		let dropper = Arc::new(move |id: HandlerId| {
			if let Some(map) = weak.upgrade() {
				map.lock().shift_remove(&id);
			}
		});
		Self::new(id, dropper)
	}

	pub fn id(&self) -> HandlerId {
		self.id
	}

	/// Explicitly unsubscribes. Equivalent to dropping.
	pub fn unsubscribe(mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("active", &self.dropper.is_some())
			.finish()
	}
}
