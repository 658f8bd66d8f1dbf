//! CacheKey: `{analysis_type}_{hash}` where the hash is BLAKE3 over the
//! whole score, the analysis type and the parameters, truncated to 128 bits.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use score_model::ScoreModel;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for one analysis of `score` with `params`.
    ///
    /// Every note, dynamic and marking is hashed, so any content change
    /// gives a new key. Object keys serialize in sorted order, so equal
    /// inputs give equal keys regardless of how `params` was assembled.
    pub fn derive(
        score: &ScoreModel,
        analysis_type: &str,
        params: &Value,
    ) -> serde_json::Result<Self> {
        let mut hasher = blake3::Hasher::new();
        serde_json::to_writer(&mut hasher, &(analysis_type, params, score))?;

        let hash_bytes = hasher.finalize();
        let hash_hex = hex::encode(&hash_bytes.as_bytes()[..16]);
        Ok(Self(format!("{analysis_type}_{hash_hex}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The analysis type prefix.
    pub fn analysis_type(&self) -> &str {
        self.0
            .rsplit_once('_')
            .map(|(prefix, _)| prefix)
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
