use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::info;

use ibtikar_core::Result;

use crate::config::RetrievalConfig;
use crate::retriever::Retriever;

type Loader = Box<dyn Fn() -> Result<Retriever> + Send + Sync>;

/// Loads the retriever on first use, at most once per instance even under
/// concurrent first calls. A failed load is not cached.
pub struct LazyRetriever {
    loader: Loader,
    cell: OnceCell<Arc<Retriever>>,
}

impl LazyRetriever {
    pub fn new(config: RetrievalConfig) -> Self {
        Self::with_loader(move || Retriever::open(&config))
    }

    pub fn with_loader<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Retriever> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            cell: OnceCell::new(),
        }
    }

    pub fn get(&self) -> Result<Arc<Retriever>> {
        self.cell
            .get_or_try_init(|| {
                info!("loading retrieval models and corpus");
                (self.loader)().map(Arc::new)
            })
            .map(Arc::clone)
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }
}
