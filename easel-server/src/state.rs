//! Shared application state

use std::sync::Arc;

use easel_core::{Generator, Loader};

/// Handle to the generator shared by every request handler.
pub struct AppState<L: Loader> {
    pub generator: Arc<Generator<L>>,
}

impl<L: Loader> AppState<L> {
    pub fn new(generator: Generator<L>) -> Self {
        Self {
            generator: Arc::new(generator),
        }
    }
}

// Manual impl: deriving would require `L: Clone`.
impl<L: Loader> Clone for AppState<L> {
    fn clone(&self) -> Self {
        Self {
            generator: self.generator.clone(),
        }
    }
}
