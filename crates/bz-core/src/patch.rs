use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BzError, BzResult};
use crate::{now_timestamp, Document};

/// Fields no patch may touch.
const IMMUTABLE_PATHS: &[&str] = &["/id", "/created_at"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Replace,
    Add,
    Remove,
}

/// One partial-update instruction, shaped like an RFC 6902 operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOp {
    pub fn replace(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            op: PatchKind::Replace,
            path: path.into(),
            value: Some(value.into()),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchKind::Remove,
            path: path.into(),
            value: None,
        }
    }
}

/// Turn `(path, value)` pairs into replace operations, skipping absent
/// values, and stamp `/updated_at`.
pub fn prepare_updates(fields: Vec<(&str, Option<Value>)>) -> Vec<PatchOp> {
    let mut updates: Vec<PatchOp> = fields
        .into_iter()
        .filter_map(|(path, value)| value.map(|value| PatchOp::replace(path, value)))
        .collect();
    updates.push(PatchOp::replace("/updated_at", now_timestamp()));
    updates
}

/// Apply operations to a document in order.
pub fn apply_patch(doc: &mut Document, ops: &[PatchOp]) -> BzResult<()> {
    for op in ops {
        if IMMUTABLE_PATHS.contains(&op.path.as_str()) {
            return Err(BzError::InvalidInput(format!("{} cannot be patched", op.path)));
        }
        let segments = split_path(&op.path)?;
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| BzError::InvalidInput("empty patch path".into()))?;

        let mut target = &mut *doc;
        for segment in parents {
            let next = target
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Document::new()));
            target = next.as_object_mut().ok_or_else(|| {
                BzError::InvalidInput(format!("{} does not address an object", op.path))
            })?;
        }

        match op.op {
            PatchKind::Replace | PatchKind::Add => {
                let value = op.value.clone().ok_or_else(|| {
                    BzError::InvalidInput(format!("{} requires a value", op.path))
                })?;
                target.insert(last.clone(), value);
            }
            PatchKind::Remove => {
                if target.remove(last).is_none() {
                    return Err(BzError::InvalidInput(format!("{} does not exist", op.path)));
                }
            }
        }
    }
    Ok(())
}

fn split_path(path: &str) -> BzResult<Vec<String>> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| BzError::InvalidInput(format!("patch path must start with '/': {path}")))?;
    if rest.is_empty() {
        return Err(BzError::InvalidInput("empty patch path".into()));
    }
    Ok(rest
        .split('/')
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn prepare_updates_skips_absent_fields_and_stamps_updated_at() {
        let ops = prepare_updates(vec![
            ("/title", Some(json!("New"))),
            ("/slug", None),
            ("/tags", Some(json!([]))),
        ]);
        let paths: Vec<&str> = ops.iter().map(|op| op.path.as_str()).collect();
        assert_eq!(paths, vec!["/title", "/tags", "/updated_at"]);
        assert!(ops.iter().all(|op| op.op == PatchKind::Replace));
    }

    #[test]
    fn replace_inserts_missing_and_overwrites_existing() {
        let mut d = doc(json!({"title": "Old"}));
        apply_patch(
            &mut d,
            &[
                PatchOp::replace("/title", "New"),
                PatchOp::replace("/slug", "new"),
            ],
        )
        .unwrap();
        assert_eq!(d["title"], "New");
        assert_eq!(d["slug"], "new");
    }

    #[test]
    fn nested_paths_create_intermediate_objects() {
        let mut d = doc(json!({}));
        apply_patch(&mut d, &[PatchOp::replace("/metadata/color", "red")]).unwrap();
        assert_eq!(d["metadata"]["color"], "red");
    }

    #[test]
    fn remove_of_missing_field_fails() {
        let mut d = doc(json!({"a": 1}));
        assert!(apply_patch(&mut d, &[PatchOp::remove("/b")]).is_err());
        apply_patch(&mut d, &[PatchOp::remove("/a")]).unwrap();
        assert!(d.is_empty());
    }

    #[test]
    fn immutable_fields_are_rejected() {
        let mut d = doc(json!({"id": "BlogPost:a"}));
        let err = apply_patch(&mut d, &[PatchOp::replace("/id", "BlogPost:b")]).unwrap_err();
        assert!(err.to_string().contains("cannot be patched"));
    }

    #[test]
    fn ops_serialize_like_json_patch() {
        let op = PatchOp::replace("/title", "x");
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"op": "replace", "path": "/title", "value": "x"})
        );
    }
}
