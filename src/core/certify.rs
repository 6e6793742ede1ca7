use crate::core::time;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Keys owned by the payload itself; oracle output may not set them.
pub const RESERVED_FIELDS: [&str; 5] = [
    "synthesisId",
    "logicId",
    "bpsVerified",
    "certificationHash",
    "timestamp",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertifiedPayload {
    pub synthesis_id: Uuid,
    pub logic_id: String,
    pub bps_verified: u32,
    #[serde(default)]
    pub certification_hash: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub custom_fields: Map<String, Value>,
}

impl CertifiedPayload {
    /// Build a payload for `logic_id` and seal it. Reserved keys in `custom_fields`,
    /// including any oracle-supplied `certificationHash`, are dropped.
    pub fn certify(
        logic_id: &str,
        bps_verified: u32,
        custom_fields: Map<String, Value>,
    ) -> Result<Self, serde_json::Error> {
        let custom_fields = custom_fields
            .into_iter()
            .filter(|(k, _)| !RESERVED_FIELDS.contains(&k.as_str()))
            .collect();
        let payload = Self {
            synthesis_id: Uuid::new_v4(),
            logic_id: logic_id.to_string(),
            bps_verified,
            certification_hash: String::new(),
            timestamp: time::now_iso8601(),
            custom_fields,
        };
        payload.with_recomputed_hash()
    }

    fn canonicalized_without_hash(&self) -> CanonicalPayload<'_> {
        CanonicalPayload {
            synthesis_id: &self.synthesis_id,
            logic_id: &self.logic_id,
            bps_verified: self.bps_verified,
            timestamp: &self.timestamp,
            custom_fields: &self.custom_fields,
        }
    }

    pub fn canonical_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.canonicalized_without_hash())
    }

    pub fn computed_hash_hex(&self) -> Result<String, serde_json::Error> {
        let bytes = self.canonical_json_bytes()?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    pub fn with_recomputed_hash(&self) -> Result<Self, serde_json::Error> {
        let mut out = self.clone();
        out.certification_hash = out.computed_hash_hex()?;
        Ok(out)
    }

    pub fn hash_matches(&self) -> bool {
        self.computed_hash_hex()
            .map(|h| h == self.certification_hash)
            .unwrap_or(false)
    }

    /// The hash as the 32-byte value anchored on the ledger.
    pub fn certification_hash_bytes(&self) -> Option<[u8; 32]> {
        decode_hash(&self.certification_hash)
    }
}

/// Decode a hex SHA-256 digest, with or without a `0x` prefix.
pub fn decode_hash(hex_digest: &str) -> Option<[u8; 32]> {
    let digits = hex_digest.strip_prefix("0x").unwrap_or(hex_digest);
    hex::decode(digits).ok()?.try_into().ok()
}

// Field order is part of the hash; `Map` is key-sorted without `preserve_order`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalPayload<'a> {
    synthesis_id: &'a Uuid,
    logic_id: &'a str,
    bps_verified: u32,
    timestamp: &'a str,
    #[serde(flatten)]
    custom_fields: &'a Map<String, Value>,
}
