use std::future::Future;

use anyhow::Result;

use crate::ModelLike;

/// Builds a model handle on demand.
pub trait Loader: Send + Sync + 'static {
    type Model: ModelLike + 'static;

    fn load(&self) -> impl Future<Output = Result<Self::Model>> + Send;
}
