//! A scheduler that records every resumption it is handed.

use std::sync::{Arc, Mutex};

use inference_bridge::{Resumption, Scheduler};

#[derive(Clone, Default)]
pub struct RecordingScheduler {
    resumed: Arc<Mutex<Vec<Resumption>>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resumed(&self) -> Vec<Resumption> {
        self.resumed.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.resumed.lock().unwrap().len()
    }
}

impl Scheduler for RecordingScheduler {
    fn resume(&mut self, resumption: Resumption) {
        self.resumed.lock().unwrap().push(resumption);
    }
}
