//! Handler serving a dataset held in memory.

use crate::error::DapError;
use crate::handlers::DatasetHandler;
use crate::model::Dataset;

/// Serves a dataset built by the application, with its data attached.
#[derive(Debug)]
pub struct MemoryHandler {
    dataset: Dataset,
}

impl MemoryHandler {
    pub fn new(dataset: Dataset) -> Self {
        MemoryHandler { dataset }
    }
}

impl DatasetHandler for MemoryHandler {
    fn dataset(&self) -> Result<Dataset, DapError> {
        // Array buffers are shared until written to.
        Ok(self.dataset.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DapNode;
    use crate::models::Slice;
    use crate::test_utils;

    #[test]
    fn each_call_returns_independent_tree() {
        let handler = MemoryHandler::new(test_utils::simple_dataset());
        let mut first = handler.dataset().unwrap();
        if let Some(DapNode::Base(var)) = first.get_mut("a") {
            *var = var.slice(&[Slice::index(1)]).unwrap();
        }
        first.remove("b");
        let second = handler.dataset().unwrap();
        assert!(second.get("b").is_some());
        match second.get("a").unwrap() {
            DapNode::Base(var) => assert_eq!(vec![5], var.shape),
            node => panic!("unexpected node {:?}", node),
        }
    }
}
