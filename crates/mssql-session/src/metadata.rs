//! Per-session protocol context threaded through the token decoders.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tds_protocol::{
    CodePageEncoding, Collation, ColumnMetadataSet, FeatureId, ProtocolError, TdsVersion,
};

/// State learned from the server during one session.
///
/// Owned by the session and passed by reference into every decoder that
/// needs it; never shared between sessions.
#[derive(Debug, Clone, Default)]
pub struct ProtocolMetadata {
    /// Session collation from the last SQL collation ENVCHANGE.
    pub collation: Option<Collation>,
    /// Encoding resolved from [`Self::collation`], when it has a code page.
    pub default_encoding: Option<CodePageEncoding>,
    /// Current column metadata for ROW decoding.
    pub columns: Option<Arc<ColumnMetadataSet>>,
    /// MARS, as reported in PRELOGIN.
    pub mars: bool,
    /// FEDAUTHREQUIRED, as reported in PRELOGIN.
    pub fed_auth_required: bool,
    /// Version from LOGINACK.
    pub tds_version: Option<TdsVersion>,
    /// Current database.
    pub database: Option<String>,
    /// Descriptor of the open transaction, zero outside one.
    pub transaction_descriptor: u64,
    features: BTreeMap<FeatureId, Bytes>,
}

impl ProtocolMetadata {
    /// Empty metadata for a new session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one FEATUREEXTACK entry.
    pub fn add_feature(&mut self, id: u8, data: Bytes) -> Result<FeatureId, ProtocolError> {
        let feature = FeatureId::from_u8(id)?;
        if feature == FeatureId::Terminator || self.features.contains_key(&feature) {
            return Err(ProtocolError::DuplicateFeature(id));
        }
        tracing::debug!(?feature, len = data.len(), "feature acknowledged");
        self.features.insert(feature, data);
        Ok(feature)
    }

    /// Acknowledgement data for a feature.
    #[must_use]
    pub fn feature(&self, id: FeatureId) -> Option<&Bytes> {
        self.features.get(&id)
    }

    /// Whether the server acknowledged a feature.
    #[must_use]
    pub fn is_feature_enabled(&self, id: FeatureId) -> bool {
        self.features.contains_key(&id)
    }

    /// Whether COLMETADATA carries a CEK table and crypto metadata.
    #[must_use]
    pub fn is_column_encryption_enabled(&self) -> bool {
        self.feature(FeatureId::ColumnEncryption)
            .and_then(|data| data.first())
            .is_some_and(|version| *version >= 1)
    }

    /// Apply a session collation change.
    ///
    /// A collation without a usable code page still updates the session; the
    /// error surfaces only if a column relies on it.
    pub fn set_collation(&mut self, collation: Option<Collation>) {
        self.collation = collation;
        self.default_encoding = collation.and_then(|c| CodePageEncoding::resolve(c).ok());
        tracing::debug!(
            ?collation,
            code_page = self.default_encoding.map(|e| e.code_page),
            "session collation changed"
        );
    }

    /// Encoding for a column collation, reusing the session encoding when
    /// the collations match.
    pub fn encoding_for(&self, collation: Collation) -> Result<CodePageEncoding, ProtocolError> {
        match self.default_encoding {
            Some(encoding) if encoding.collation == collation => Ok(encoding),
            _ => CodePageEncoding::resolve(collation),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_registration() {
        let mut md = ProtocolMetadata::new();
        assert!(!md.is_column_encryption_enabled());

        let id = md.add_feature(0x04, Bytes::from_static(&[1])).unwrap();
        assert_eq!(id, FeatureId::ColumnEncryption);
        assert!(md.is_column_encryption_enabled());

        assert_eq!(
            md.add_feature(0x04, Bytes::from_static(&[2])),
            Err(ProtocolError::DuplicateFeature(0x04))
        );
        assert_eq!(
            md.add_feature(0x42, Bytes::new()),
            Err(ProtocolError::UnknownFeature(0x42))
        );
        md.add_feature(0x0A, Bytes::from_static(&[1])).unwrap();
        assert!(md.is_feature_enabled(FeatureId::Utf8Support));
    }

    #[test]
    fn test_column_encryption_version_zero() {
        let mut md = ProtocolMetadata::new();
        md.add_feature(0x04, Bytes::from_static(&[0])).unwrap();
        assert!(!md.is_column_encryption_enabled());
    }

    #[test]
    fn test_collation_fast_path() {
        let mut md = ProtocolMetadata::new();
        let latin = Collation {
            info: 0x0409,
            sort_id: 0,
        };
        md.set_collation(Some(latin));
        assert_eq!(md.default_encoding.unwrap().code_page, 1252);
        assert_eq!(md.encoding_for(latin).unwrap().code_page, 1252);

        let cyrillic = Collation {
            info: 0x0419,
            sort_id: 0,
        };
        assert_eq!(md.encoding_for(cyrillic).unwrap().code_page, 1251);
    }

    #[test]
    fn test_unresolvable_session_collation_is_kept() {
        let mut md = ProtocolMetadata::new();
        let odd = Collation {
            info: 0x000F_FFFF,
            sort_id: 0,
        };
        md.set_collation(Some(odd));
        assert_eq!(md.collation, Some(odd));
        assert!(md.default_encoding.is_none());
        assert!(matches!(
            md.encoding_for(odd),
            Err(ProtocolError::UnsupportedCollation { .. })
        ));
    }
}
