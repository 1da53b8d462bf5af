//! Handler serving a stored `.dods` response.

use crate::codec::decode_dods;
use crate::codec::stream::StreamReader;
use crate::error::DapError;
use crate::handlers::DatasetHandler;
use crate::model::Dataset;
use crate::parsers::{add_attributes, parse_das};

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Serves a dataset from a file holding a DODS response.
///
/// Attributes are read from a `.das` file next to it, when present.
#[derive(Debug)]
pub struct DodsFileHandler {
    path: PathBuf,
}

impl DodsFileHandler {
    /// Return a new DodsFileHandler.
    ///
    /// # Arguments
    ///
    /// * `path`: Path to the `.dods` file
    pub fn new(path: &Path) -> Result<Self, DapError> {
        if !path.is_file() {
            return Err(DapError::DatasetNotFound(path.display().to_string()));
        }
        Ok(DodsFileHandler {
            path: path.to_path_buf(),
        })
    }

    pub(crate) fn factory(path: &Path) -> Result<Arc<dyn DatasetHandler>, DapError> {
        Ok(Arc::new(Self::new(path)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DatasetHandler for DodsFileHandler {
    #[tracing::instrument(level = "DEBUG", skip(self), fields(path = %self.path.display()))]
    fn dataset(&self) -> Result<Dataset, DapError> {
        let body = Bytes::from(std::fs::read(&self.path)?);
        let mut dataset = decode_dods(&mut StreamReader::from_bytes(body))?;
        let das = self.path.with_extension("das");
        if das.is_file() {
            add_attributes(&mut dataset, parse_das(&std::fs::read_to_string(das)?)?);
        }
        Ok(dataset)
    }
}
