//! LOGIN7 feature extensions and their acknowledgements.

use bytes::{BufMut, Bytes};

use crate::error::ProtocolError;

/// Feature extension identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum FeatureId {
    /// Session recovery.
    SessionRecovery = 0x01,
    /// Federated authentication.
    FedAuth = 0x02,
    /// Column encryption.
    ColumnEncryption = 0x04,
    /// Global transactions.
    GlobalTransactions = 0x05,
    /// Azure SQL Support for DB.
    AzureSqlSupport = 0x08,
    /// Data classification.
    DataClassification = 0x09,
    /// UTF-8 support.
    Utf8Support = 0x0A,
    /// Azure SQL DNS Caching.
    AzureSqlDnsCaching = 0x0B,
    /// Terminator.
    Terminator = 0xFF,
}

impl FeatureId {
    /// Map an acknowledged id; unknown ids are an error.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::SessionRecovery),
            0x02 => Ok(Self::FedAuth),
            0x04 => Ok(Self::ColumnEncryption),
            0x05 => Ok(Self::GlobalTransactions),
            0x08 => Ok(Self::AzureSqlSupport),
            0x09 => Ok(Self::DataClassification),
            0x0A => Ok(Self::Utf8Support),
            0x0B => Ok(Self::AzureSqlDnsCaching),
            0xFF => Ok(Self::Terminator),
            _ => Err(ProtocolError::UnknownFeature(value)),
        }
    }
}

/// One requested feature in the LOGIN7 extension block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureExtension {
    /// Feature ID.
    pub feature_id: FeatureId,
    /// Feature data, without the length prefix.
    pub data: Bytes,
}

impl FeatureExtension {
    /// Create a feature with the given data.
    #[must_use]
    pub fn new(feature_id: FeatureId, data: impl Into<Bytes>) -> Self {
        Self {
            feature_id,
            data: data.into(),
        }
    }

    /// Write `id`, a 4-byte little-endian length and the data.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.feature_id as u8);
        dst.put_u32_le(self.data.len() as u32);
        dst.put_slice(&self.data);
    }
}

/// The features a client asks for at login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureRequests {
    /// Column encryption version to request, if any.
    pub column_encryption: Option<u8>,
    /// Request global transactions.
    pub global_transactions: bool,
    /// Data classification version to request, if any.
    pub data_classification: Option<u8>,
    /// Request UTF-8 collation support.
    pub utf8_support: bool,
    /// Request Azure SQL DNS caching.
    pub dns_caching: bool,
}

impl Default for FeatureRequests {
    fn default() -> Self {
        Self {
            column_encryption: Some(1),
            global_transactions: true,
            data_classification: Some(1),
            utf8_support: true,
            dns_caching: true,
        }
    }
}

impl FeatureRequests {
    /// Request nothing; LOGIN7 is sent without an extension block.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            column_encryption: None,
            global_transactions: false,
            data_classification: None,
            utf8_support: false,
            dns_caching: false,
        }
    }

    /// Build the extension list in wire order.
    #[must_use]
    pub fn extensions(&self) -> Vec<FeatureExtension> {
        let mut out = Vec::with_capacity(5);
        if let Some(version) = self.column_encryption {
            out.push(FeatureExtension::new(FeatureId::ColumnEncryption, vec![version]));
        }
        if self.global_transactions {
            out.push(FeatureExtension::new(FeatureId::GlobalTransactions, Bytes::new()));
        }
        if let Some(version) = self.data_classification {
            out.push(FeatureExtension::new(FeatureId::DataClassification, vec![version]));
        }
        if self.utf8_support {
            out.push(FeatureExtension::new(FeatureId::Utf8Support, Bytes::new()));
        }
        if self.dns_caching {
            out.push(FeatureExtension::new(FeatureId::AzureSqlDnsCaching, Bytes::new()));
        }
        out
    }
}

/// A single entry of a FEATUREEXTACK token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureAck {
    /// Acknowledged feature.
    pub feature_id: FeatureId,
    /// Opaque acknowledgement data.
    pub data: Bytes,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_encoding() {
        let mut buf = Vec::new();
        FeatureExtension::new(FeatureId::ColumnEncryption, vec![1u8]).encode(&mut buf);
        assert_eq!(buf, [0x04, 0x01, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_default_request_order() {
        let ids: Vec<FeatureId> = FeatureRequests::default()
            .extensions()
            .into_iter()
            .map(|f| f.feature_id)
            .collect();
        assert_eq!(
            ids,
            [
                FeatureId::ColumnEncryption,
                FeatureId::GlobalTransactions,
                FeatureId::DataClassification,
                FeatureId::Utf8Support,
                FeatureId::AzureSqlDnsCaching,
            ]
        );
        assert!(FeatureRequests::none().extensions().is_empty());
    }

    #[test]
    fn test_unknown_feature_id() {
        assert_eq!(FeatureId::from_u8(0x03), Err(ProtocolError::UnknownFeature(0x03)));
        assert_eq!(FeatureId::from_u8(0x0A).unwrap(), FeatureId::Utf8Support);
    }
}
