//! Counting semaphore used to join parallel allocation tasks.

use parking_lot::{Condvar, Mutex};

/// Blocks `wait` until `incr` has been called `height` times.
#[derive(Debug)]
pub struct CountingSemaphore {
    height: usize,
    count: Mutex<usize>,
    reached: Condvar,
}

impl CountingSemaphore {
    pub fn new(height: usize) -> Self {
        Self {
            height,
            count: Mutex::new(0),
            reached: Condvar::new(),
        }
    }

    pub fn incr(&self) {
        let mut c = self.count.lock();
        *c += 1;
        if *c >= self.height {
            self.reached.notify_all();
        }
    }

    pub fn wait(&self) {
        let mut c = self.count.lock();
        while *c < self.height {
            self.reached.wait(&mut c);
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }
}
