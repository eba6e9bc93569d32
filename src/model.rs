use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::Dtype;

pub type Attributes = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub path: String,
    #[serde(default)]
    pub subgroups: Vec<Subgroup>,
    #[serde(default)]
    pub datasets: Vec<Subdataset>,
    #[serde(default)]
    pub attrs: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subgroup {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub attrs: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subdataset {
    pub name: String,
    pub path: String,
    pub shape: Vec<u64>,
    pub dtype: String,
    #[serde(default)]
    pub attrs: Attributes,
}

/// Dataset metadata. An empty `shape` is a scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub path: String,
    pub shape: Vec<u64>,
    pub dtype: String,
    #[serde(default)]
    pub attrs: Attributes,
}

impl Group {
    pub fn dataset(&self, name: &str) -> Option<&Subdataset> {
        self.datasets.iter().find(|d| d.name == name)
    }

    pub fn subgroup(&self, name: &str) -> Option<&Subgroup> {
        self.subgroups.iter().find(|g| g.name == name)
    }
}

impl Dataset {
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    pub fn size(&self) -> u64 {
        self.shape.iter().product()
    }

    pub fn dtype(&self) -> Result<Dtype, anyhow::Error> {
        self.dtype.parse()
    }

    /// Numeric attribute, `None` when missing, not a number or NaN.
    pub fn attr_f64(&self, name: &str) -> Option<f64> {
        self.attrs
            .get(name)
            .and_then(Value::as_f64)
            .filter(|v| !v.is_nan())
    }
}

impl From<&Subdataset> for Dataset {
    fn from(d: &Subdataset) -> Self {
        Dataset {
            name: d.name.clone(),
            path: d.path.clone(),
            shape: d.shape.clone(),
            dtype: d.dtype.clone(),
            attrs: d.attrs.clone(),
        }
    }
}

/// Last component of an absolute object path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Join a group path and a member name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn paths() {
        assert_eq!(basename("/acquisition/ts/data"), "data");
        assert_eq!(basename("/"), "");
        assert_eq!(join("/", "acquisition"), "/acquisition");
        assert_eq!(join("/acquisition", "ts"), "/acquisition/ts");
    }

    #[test]
    fn deserialize_group() {
        let g: Group = serde_json::from_value(json!({
            "path": "/acquisition/ts",
            "datasets": [
                { "name": "data", "path": "/acquisition/ts/data", "shape": [100, 4], "dtype": "<i2" }
            ],
            "attrs": { "neurodata_type": "ElectricalSeries" }
        }))
        .unwrap();

        assert!(g.subgroups.is_empty());
        assert_eq!(g.dataset("data").unwrap().shape, vec![100, 4]);
        assert!(g.dataset("timestamps").is_none());

        let d = Dataset::from(g.dataset("data").unwrap());
        assert_eq!(d.size(), 400);
        assert_eq!(d.dtype().unwrap(), Dtype::I16);
    }

    #[test]
    fn numeric_attrs() {
        let mut d = Dataset {
            name: "data".into(),
            path: "/data".into(),
            shape: vec![],
            dtype: "<f8".into(),
            attrs: Attributes::new(),
        };
        d.attrs.insert("conversion".into(), json!(0.5));
        d.attrs.insert("unit".into(), json!("volts"));

        assert!(d.is_scalar());
        assert_eq!(d.size(), 1);
        assert_eq!(d.attr_f64("conversion"), Some(0.5));
        assert_eq!(d.attr_f64("unit"), None);
        assert_eq!(d.attr_f64("offset"), None);
    }
}
