// Deferred destruction in reverse order of creation
//
// Every long-lived Vulkan object registers its destructor here right
// after it is created. Flushing runs them last-in-first-out, so an
// object is always destroyed before anything it was created from.

/// A deferred destructor; receives the context it needs to destroy with
pub type Deleter<C> = Box<dyn FnOnce(&C)>;

/// LIFO list of deferred destructors.
///
/// Generic over the context so the ordering can be exercised without a GPU;
/// the renderer uses `DeletionQueue<VulkanDevice>` so destructors can also
/// return memory to the allocator.
pub struct DeletionQueue<C> {
    deleters: Vec<(&'static str, Deleter<C>)>,
}

impl<C> Default for DeletionQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> DeletionQueue<C> {
    pub fn new() -> Self {
        Self {
            deleters: Vec::new(),
        }
    }

    /// Register a destructor. `label` is only used for trace logging.
    pub fn push<F>(&mut self, label: &'static str, deleter: F)
    where
        F: FnOnce(&C) + 'static,
    {
        self.deleters.push((label, Box::new(deleter)));
    }

    /// Run every destructor, newest first, and leave the queue empty
    pub fn flush(&mut self, context: &C) {
        while let Some((label, deleter)) = self.deleters.pop() {
            log::trace!("Destroying {}", label);
            deleter(context);
        }
    }

    /// Forget every destructor without running it, once the objects have
    /// been handed to an owner that destroys them itself
    pub fn dismiss(&mut self) {
        self.deleters.clear();
    }

    pub fn len(&self) -> usize {
        self.deleters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deleters.is_empty()
    }
}

impl<C> Drop for DeletionQueue<C> {
    fn drop(&mut self) {
        if !self.deleters.is_empty() {
            log::warn!(
                "Deletion queue dropped with {} pending destructors; resources leaked",
                self.deleters.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    type Log = RefCell<Vec<&'static str>>;

    #[test]
    fn flush_runs_in_reverse_push_order() {
        let mut queue: DeletionQueue<Log> = DeletionQueue::new();
        for name in ["instance", "surface", "device", "swapchain"] {
            queue.push(name, move |log: &Log| log.borrow_mut().push(name));
        }
        assert_eq!(queue.len(), 4);

        let log = Log::default();
        queue.flush(&log);

        assert_eq!(
            *log.borrow(),
            vec!["swapchain", "device", "surface", "instance"]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn each_destructor_runs_once() {
        let mut queue: DeletionQueue<RefCell<u32>> = DeletionQueue::new();
        queue.push("counter", |count: &RefCell<u32>| *count.borrow_mut() += 1);

        let count = RefCell::new(0);
        queue.flush(&count);
        queue.flush(&count);

        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn flushing_empty_queue_is_noop() {
        let mut queue: DeletionQueue<Log> = DeletionQueue::default();
        let log = Log::default();
        queue.flush(&log);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn pushes_after_flush_start_a_new_batch() {
        let mut queue: DeletionQueue<Log> = DeletionQueue::new();
        let log = Log::default();

        queue.push("a", |log: &Log| log.borrow_mut().push("a"));
        queue.flush(&log);
        queue.push("b", |log: &Log| log.borrow_mut().push("b"));
        queue.push("c", |log: &Log| log.borrow_mut().push("c"));
        queue.flush(&log);

        assert_eq!(*log.borrow(), vec!["a", "c", "b"]);
    }

    #[test]
    fn dropping_a_pending_queue_runs_nothing() {
        use std::rc::Rc;

        let ran = Rc::new(RefCell::new(false));
        let mut queue: DeletionQueue<()> = DeletionQueue::new();
        let flag = Rc::clone(&ran);
        queue.push("leaked", move |_: &()| *flag.borrow_mut() = true);

        drop(queue);

        assert!(!*ran.borrow());
        // The boxed destructor and its captured clone were dropped too
        assert_eq!(Rc::strong_count(&ran), 1);
    }

    #[test]
    fn dismiss_empties_without_running() {
        let mut queue: DeletionQueue<Log> = DeletionQueue::new();
        queue.push("handed off", |log: &Log| log.borrow_mut().push("handed off"));
        queue.dismiss();
        assert!(queue.is_empty());

        let log = Log::default();
        queue.flush(&log);
        assert!(log.borrow().is_empty());
    }
}
