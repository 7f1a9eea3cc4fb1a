//! Objects that live on one execution context.
//!
//! A [`ContextBound<T>`] is a sendable handle to a `T` that is constructed,
//! used and destroyed only by jobs running on its owning context. `T` itself
//! never crosses threads, so it may be `!Send` (the deadline scheduler is).
//!
//! The objects are kept in a per-thread registry keyed by a process-unique
//! id. That is why a [`TaskRunner`] must run all of its jobs on one thread.

use std::any::{Any, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{trace, warn};

use crate::context::TaskRunner;

static NEXT_BOUND_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static BOUND_OBJECTS: RefCell<HashMap<u64, Rc<dyn Any>>> = RefCell::new(HashMap::new());
}

fn register<T: 'static>(id: u64, object: T) {
    let object: Rc<dyn Any> = Rc::new(RefCell::new(object));
    BOUND_OBJECTS.with(|objects| objects.borrow_mut().insert(id, object));
    trace!(bound_id = id, object = type_name::<T>(), "context-bound object created");
}

fn lookup<T: 'static>(id: u64) -> Option<Rc<RefCell<T>>> {
    let object = BOUND_OBJECTS.with(|objects| objects.borrow().get(&id).cloned())?;
    Rc::downcast::<RefCell<T>>(object).ok()
}

fn unregister(id: u64) {
    let removed = BOUND_OBJECTS.with(|objects| objects.borrow_mut().remove(&id));
    if removed.is_some() {
        trace!(bound_id = id, "context-bound object destroyed");
    }
    drop(removed);
}

/// Sendable handle to a `T` owned by another execution context.
pub struct ContextBound<T: 'static> {
    id: u64,
    runner: Arc<dyn TaskRunner>,
    _owned: PhantomData<fn() -> T>,
}

impl<T: 'static> ContextBound<T> {
    /// Construct `T` on `runner`'s context by running `make` there.
    pub fn new<M>(runner: Arc<dyn TaskRunner>, make: M) -> Self
    where
        M: FnOnce() -> T + Send + 'static,
    {
        let id = NEXT_BOUND_ID.fetch_add(1, Ordering::Relaxed);
        runner.post(Box::new(move || register(id, make())));
        Self {
            id,
            runner,
            _owned: PhantomData,
        }
    }

    /// Take ownership of an object that already lives on `runner`'s context.
    ///
    /// Must be called on the thread that runs `runner`'s jobs.
    pub fn adopt(runner: Arc<dyn TaskRunner>, object: T) -> Self {
        let id = NEXT_BOUND_ID.fetch_add(1, Ordering::Relaxed);
        register(id, object);
        Self {
            id,
            runner,
            _owned: PhantomData,
        }
    }

    /// Post `call` to the owning context, where it receives the object.
    ///
    /// Calls run in posting order. A call that arrives after the object was
    /// destroyed is discarded.
    pub fn post<C>(&self, call: C)
    where
        C: FnOnce(&mut T) + Send + 'static,
    {
        let id = self.id;
        self.runner.post(Box::new(move || {
            let Some(object) = lookup::<T>(id) else {
                warn!(
                    bound_id = id,
                    object = type_name::<T>(),
                    "call to a destroyed context-bound object ignored"
                );
                return;
            };
            call(&mut object.borrow_mut());
        }));
    }

    #[must_use]
    pub fn runner(&self) -> &Arc<dyn TaskRunner> {
        &self.runner
    }
}

impl<T: 'static> Drop for ContextBound<T> {
    fn drop(&mut self) {
        let id = self.id;
        self.runner.post(Box::new(move || unregister(id)));
    }
}

impl<T: 'static> fmt::Debug for ContextBound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextBound")
            .field("id", &self.id)
            .field("object", &type_name::<T>())
            .finish()
    }
}
