//! BLAKE3 content hashing of snapshot bodies.
//!
//! The hash is computed over the canonical JSON serialization of the
//! body value. serde_json's object maps are key-sorted, so structurally
//! equal bodies hash identically regardless of how they were built.

use netdrift_core::HostResult;

/// Compute the BLAKE3 hex digest of a JSON body value.
pub fn body_hash(body: &serde_json::Value) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(body)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Canonical body string and its hash for a host result.
pub fn canonical_body(result: &HostResult) -> Result<(String, String), serde_json::Error> {
    let value = result.to_body()?;
    let body = serde_json::to_string(&value)?;
    let hash = body_hash(&value)?;
    Ok((body, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_bodies_hash_equal() {
        let a = json!({"host": "10.0.0.1", "status": "up", "ports": []});
        let b = json!({"status": "up", "ports": [], "host": "10.0.0.1"});
        assert_eq!(body_hash(&a).unwrap(), body_hash(&b).unwrap());
    }

    #[test]
    fn different_bodies_hash_differently() {
        let a = json!({"host": "10.0.0.1", "status": "up"});
        let b = json!({"host": "10.0.0.1", "status": "down"});
        assert_ne!(body_hash(&a).unwrap(), body_hash(&b).unwrap());
    }

    #[test]
    fn canonical_body_matches_hash() {
        let result = HostResult {
            host: "10.0.0.1".into(),
            status: "up".into(),
            ports: vec![],
            os: vec![],
            osfingerprint: None,
            last_boot: None,
            hops: vec![],
        };
        let (body, hash) = canonical_body(&result).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body_hash(&reparsed).unwrap(), hash);
    }
}
