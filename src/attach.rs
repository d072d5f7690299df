//! Per-thread attachment to the managed host runtime.
//!
//! The host requires every thread that calls into it to carry a valid
//! execution context. Engine threads (render, decode workers, network
//! callbacks) are unknown to the host, so attachment happens lazily the first
//! time a thread asks for its context, and is undone when the thread exits or
//! when the process state is released.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::error::Result;

/// Reference to an object living inside the managed host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostObject(u64);

impl HostObject {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn into_raw(self) -> u64 {
        self.0
    }
}

/// Result of asking the host to attach the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// The thread was already known to the host (e.g. it is a host thread).
    AlreadyAttached,
    /// The thread was attached by this call and must be detached later.
    Attached,
}

/// Entry points of the managed runtime the bridge depends on.
pub trait HostRuntime: Send + Sync {
    fn attach_current_thread(&self) -> Result<Attachment>;

    fn detach_current_thread(&self);

    /// Promotes a call-local reference to one that survives across calls and
    /// threads.
    fn new_global_ref(&self, object: HostObject) -> Result<HostObject>;

    fn delete_global_ref(&self, object: HostObject);
}

/// Capability to call into the host from the current thread.
///
/// Not `Send`: a context belongs to the thread that obtained it.
#[derive(Clone)]
pub struct ExecutionContext {
    runtime: Arc<dyn HostRuntime>,
    thread: ThreadId,
    _thread_bound: PhantomData<*const ()>,
}

impl ExecutionContext {
    pub fn runtime(&self) -> &Arc<dyn HostRuntime> {
        &self.runtime
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("thread", &self.thread)
            .finish()
    }
}

/// Host global reference released when dropped.
pub struct GlobalRef {
    runtime: Arc<dyn HostRuntime>,
    object: HostObject,
}

impl GlobalRef {
    pub fn new(context: &ExecutionContext, local: HostObject) -> Result<Self> {
        let object = context.runtime.new_global_ref(local)?;
        Ok(Self {
            runtime: Arc::clone(&context.runtime),
            object,
        })
    }

    pub fn object(&self) -> HostObject {
        self.object
    }
}

impl Drop for GlobalRef {
    fn drop(&mut self) {
        self.runtime.delete_global_ref(self.object);
    }
}

impl fmt::Debug for GlobalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobalRef").field(&self.object).finish()
    }
}

static NEXT_ATTACHER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ATTACHMENTS: RefCell<HashMap<u64, ThreadAttachment>> = RefCell::new(HashMap::new());
}

/// Per-thread record; detaches the thread from the host when dropped.
struct ThreadAttachment {
    runtime: Arc<dyn HostRuntime>,
    shared: Weak<AttachShared>,
    thread: ThreadId,
    detach_on_drop: bool,
}

impl Drop for ThreadAttachment {
    fn drop(&mut self) {
        if self.detach_on_drop {
            self.runtime.detach_current_thread();
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.attached.lock().remove(&self.thread);
        }
    }
}

struct AttachShared {
    torn_down: AtomicBool,
    attached: Mutex<HashSet<ThreadId>>,
    globals: Mutex<Vec<GlobalRef>>,
}

/// Hands out execution contexts and owns the process-wide host references.
pub struct ThreadAttacher {
    id: u64,
    runtime: Arc<dyn HostRuntime>,
    shared: Arc<AttachShared>,
}

impl ThreadAttacher {
    pub fn new(runtime: Arc<dyn HostRuntime>) -> Self {
        Self {
            id: NEXT_ATTACHER_ID.fetch_add(1, Ordering::Relaxed),
            runtime,
            shared: Arc::new(AttachShared {
                torn_down: AtomicBool::new(false),
                attached: Mutex::new(HashSet::new()),
                globals: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the calling thread's context, attaching the thread first if
    /// this attacher has not seen it yet.
    ///
    /// # Panics
    ///
    /// Panics if [`ThreadAttacher::release_process_state`] has already run.
    pub fn current_context(&self) -> Result<ExecutionContext> {
        if self.is_torn_down() {
            panic!("execution context requested after process state was released");
        }
        let thread = thread::current().id();
        ATTACHMENTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            if !slots.contains_key(&self.id) {
                let attachment = self.runtime.attach_current_thread()?;
                debug!("thread {thread:?} attached to host ({attachment:?})");
                self.shared.attached.lock().insert(thread);
                slots.insert(
                    self.id,
                    ThreadAttachment {
                        runtime: Arc::clone(&self.runtime),
                        shared: Arc::downgrade(&self.shared),
                        thread,
                        detach_on_drop: attachment == Attachment::Attached,
                    },
                );
            }
            Ok(ExecutionContext {
                runtime: Arc::clone(&self.runtime),
                thread,
                _thread_bound: PhantomData,
            })
        })
    }

    /// Keeps `local` alive as a global reference until process teardown.
    pub fn pin_global(&self, context: &ExecutionContext, local: HostObject) -> Result<HostObject> {
        let global = GlobalRef::new(context, local)?;
        let object = global.object();
        self.shared.globals.lock().push(global);
        Ok(object)
    }

    /// Number of threads currently holding a context from this attacher.
    pub fn attached_threads(&self) -> usize {
        self.shared.attached.lock().len()
    }

    pub fn is_torn_down(&self) -> bool {
        self.shared.torn_down.load(Ordering::Acquire)
    }

    /// Drops every pinned global reference and invalidates all contexts.
    ///
    /// The calling thread is detached immediately; other threads detach when
    /// they exit.
    ///
    /// # Panics
    ///
    /// Panics when called more than once.
    pub fn release_process_state(&self) {
        if self.shared.torn_down.swap(true, Ordering::AcqRel) {
            panic!("process state released twice");
        }
        let globals = std::mem::take(&mut *self.shared.globals.lock());
        let pinned = globals.len();
        drop(globals);

        let current = ATTACHMENTS.with(|slots| slots.borrow_mut().remove(&self.id));
        drop(current);

        let remaining = std::mem::take(&mut *self.shared.attached.lock());
        if !remaining.is_empty() {
            warn!(
                "{} thread(s) still attached at teardown; they detach on exit",
                remaining.len()
            );
        }
        info!("released host process state ({pinned} global reference(s))");
    }
}

impl fmt::Debug for ThreadAttacher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadAttacher")
            .field("id", &self.id)
            .field("attached", &self.attached_threads())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingRuntime {
        attaches: AtomicUsize,
        detaches: AtomicUsize,
        globals: Mutex<HashSet<u64>>,
        next_global: AtomicU64,
    }

    impl HostRuntime for CountingRuntime {
        fn attach_current_thread(&self) -> Result<Attachment> {
            self.attaches.fetch_add(1, Ordering::SeqCst);
            Ok(Attachment::Attached)
        }

        fn detach_current_thread(&self) {
            self.detaches.fetch_add(1, Ordering::SeqCst);
        }

        fn new_global_ref(&self, _object: HostObject) -> Result<HostObject> {
            let raw = 1000 + self.next_global.fetch_add(1, Ordering::SeqCst);
            self.globals.lock().insert(raw);
            Ok(HostObject::from_raw(raw))
        }

        fn delete_global_ref(&self, object: HostObject) {
            self.globals.lock().remove(&object.into_raw());
        }
    }

    fn attacher() -> (Arc<CountingRuntime>, ThreadAttacher) {
        let runtime = Arc::new(CountingRuntime::default());
        let attacher = ThreadAttacher::new(runtime.clone());
        (runtime, attacher)
    }

    #[test]
    fn attaches_once_per_thread() {
        let (runtime, attacher) = attacher();
        attacher.current_context().unwrap();
        attacher.current_context().unwrap();
        assert_eq!(runtime.attaches.load(Ordering::SeqCst), 1);
        assert_eq!(attacher.attached_threads(), 1);
    }

    #[test]
    fn worker_threads_attach_and_detach_on_exit() {
        let (runtime, attacher) = attacher();
        let attacher = Arc::new(attacher);
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let attacher = Arc::clone(&attacher);
                thread::spawn(move || {
                    let context = attacher.current_context().unwrap();
                    assert_eq!(context.thread(), thread::current().id());
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(runtime.attaches.load(Ordering::SeqCst), 3);
        assert_eq!(runtime.detaches.load(Ordering::SeqCst), 3);
        assert_eq!(attacher.attached_threads(), 0);
    }

    #[test]
    fn teardown_releases_pinned_globals_and_detaches_caller() {
        let (runtime, attacher) = attacher();
        let context = attacher.current_context().unwrap();
        attacher
            .pin_global(&context, HostObject::from_raw(7))
            .unwrap();
        assert_eq!(runtime.globals.lock().len(), 1);

        attacher.release_process_state();
        assert!(runtime.globals.lock().is_empty());
        assert_eq!(runtime.detaches.load(Ordering::SeqCst), 1);
        assert_eq!(attacher.attached_threads(), 0);
    }

    #[test]
    fn global_ref_is_released_on_drop() {
        let (runtime, attacher) = attacher();
        let context = attacher.current_context().unwrap();
        let global = GlobalRef::new(&context, HostObject::from_raw(1)).unwrap();
        assert!(runtime.globals.lock().contains(&global.object().into_raw()));
        drop(global);
        assert!(runtime.globals.lock().is_empty());
    }

    #[test]
    #[should_panic(expected = "after process state was released")]
    fn context_after_teardown_is_fatal() {
        let (_runtime, attacher) = attacher();
        attacher.release_process_state();
        let _ = attacher.current_context();
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn double_teardown_is_fatal() {
        let (_runtime, attacher) = attacher();
        attacher.release_process_state();
        attacher.release_process_state();
    }
}
