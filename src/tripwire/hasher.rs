//! BLAKE3 hashing of resources, templates, and synthesized files.
//!
//! Every hash is rendered as `"blake3:{hex}"`.

use crate::core::error::{InfraError, Result};
use crate::core::template::{CfnResource, Template};
use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<String> {
    let read_err = |e: std::io::Error| InfraError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    };
    let mut file = std::fs::File::open(path).map_err(read_err)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(read_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash of a resource's canonical JSON (declaration order preserved).
pub fn hash_resource(resource: &CfnResource) -> Result<String> {
    Ok(hash_string(&serde_json::to_string(resource)?))
}

/// Hash of the whole template, as the engine would receive it.
pub fn hash_template(template: &Template) -> Result<String> {
    Ok(hash_string(&serde_json::to_string(template)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CodeRefactorInfra.template.json");
        std::fs::write(&path, "{}").unwrap();
        let h = hash_file(&path).unwrap();
        assert!(h.starts_with("blake3:"));
        assert_eq!(h.len(), 7 + 64);
        assert_eq!(h, hash_string("{}"));
    }

    #[test]
    fn test_hash_file_not_found() {
        let err = hash_file(Path::new("/nonexistent/out.json")).unwrap_err();
        assert!(matches!(err, InfraError::Read { .. }));
    }

    #[test]
    fn test_resource_hash_tracks_properties() {
        let a = CfnResource::new("AWS::S3::Bucket").prop("BucketName", "a");
        let b = CfnResource::new("AWS::S3::Bucket").prop("BucketName", "b");
        assert_eq!(hash_resource(&a).unwrap(), hash_resource(&a.clone()).unwrap());
        assert_ne!(hash_resource(&a).unwrap(), hash_resource(&b).unwrap());
    }

    proptest! {
        #[test]
        fn prop_hash_string_stable(s in ".*") {
            prop_assert_eq!(hash_string(&s), hash_string(&s));
            prop_assert_eq!(hash_string(&s).len(), 71);
        }
    }
}
