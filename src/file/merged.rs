//! Several files presented as one, e.g. a primary file plus a companion file that adds
//! derived objects. Earlier files take precedence.
use std::sync::Arc;

use async_trait::async_trait;

use super::{DataOptions, H5Source};
use crate::data::DataBuffer;
use crate::model::{Dataset, Group, Subgroup};
use crate::{Error, Result};

pub struct MergedRemoteFile {
    files: Vec<Arc<dyn H5Source>>,
}

impl MergedRemoteFile {
    pub fn new(files: Vec<Arc<dyn H5Source>>) -> Result<MergedRemoteFile> {
        if files.is_empty() {
            return Err(Error::Config("a merged file needs at least one file".into()));
        }
        Ok(MergedRemoteFile { files })
    }

    pub fn files(&self) -> &[Arc<dyn H5Source>] {
        &self.files
    }
}

#[async_trait]
impl H5Source for MergedRemoteFile {
    async fn get_group(&self, path: &str) -> Result<Arc<Group>> {
        let mut groups = Vec::new();
        let mut last_err = None;

        for f in &self.files {
            match f.get_group(path).await {
                Ok(g) => groups.push(g),
                Err(e) => {
                    debug!("merged: {:?} has no group {}: {}", f.urls(), path, e);
                    last_err = Some(e);
                }
            }
        }

        match groups.len() {
            0 => Err(last_err.unwrap_or_else(|| Error::Decode(format!("no such group: {path}")))),
            1 => Ok(groups.remove(0)),
            _ => Ok(Arc::new(merge_groups(&groups))),
        }
    }

    async fn get_dataset(&self, path: &str) -> Result<Arc<Dataset>> {
        let mut last_err = None;

        for f in &self.files {
            match f.get_dataset(path).await {
                Ok(d) => return Ok(d),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Decode(format!("no such dataset: {path}"))))
    }

    async fn get_dataset_data(&self, path: &str, options: DataOptions) -> Result<DataBuffer> {
        let mut last_err = None;

        for f in &self.files {
            match f.get_dataset_data(path, options.clone()).await {
                Ok(d) => return Ok(d),
                Err(e) if e.is_canceled() => return Err(e),
                Err(e) => last_err = Some(e),
            }

            if let Some(c) = &options.canceler {
                c.check()?;
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Decode(format!("no such dataset: {path}"))))
    }

    fn urls(&self) -> Vec<String> {
        self.files.iter().flat_map(|f| f.urls()).collect()
    }
}

/// Union of groups by member name. The first occurrence of a dataset or attribute wins,
/// subgroups of the same name have their attributes merged.
fn merge_groups(groups: &[Arc<Group>]) -> Group {
    let mut merged = Group {
        path: groups[0].path.clone(),
        subgroups: Vec::new(),
        datasets: Vec::new(),
        attrs: Default::default(),
    };

    for g in groups {
        for sg in &g.subgroups {
            match merged.subgroups.iter_mut().find(|m| m.name == sg.name) {
                Some(m) => merge_attrs(m, sg),
                None => merged.subgroups.push(sg.clone()),
            }
        }

        for ds in &g.datasets {
            if merged.dataset(&ds.name).is_none() {
                merged.datasets.push(ds.clone());
            }
        }

        for (k, v) in &g.attrs {
            merged.attrs.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    merged
}

fn merge_attrs(into: &mut Subgroup, from: &Subgroup) {
    for (k, v) in &from.attrs {
        into.attrs.entry(k.clone()).or_insert_with(|| v.clone());
    }
}
