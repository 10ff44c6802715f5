use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Handle of a network participant (consumer or provider).
///
/// Identities are compared case-insensitively: the inner string is always
/// stored lower-cased so that `0xABC` and `0xabc` key the same state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Create an identity, rejecting empty or whitespace-only handles.
    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidIdentity("identity must not be empty".into()));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    /// Create an identity from an address-like string without validation.
    pub fn from_address(address: &str) -> Self {
        Self(address.trim().to_lowercase())
    }

    /// The normalised handle.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Identity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.0
    }
}

/// A 20-byte on-chain address, used for the settlement counterparty (hermes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    pub const LEN: usize = 20;

    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = CoreError;

    /// Parse a hex address, with or without the `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(digits)
            .map_err(|e| CoreError::InvalidAddress(format!("{}: {}", s, e)))?;
        let bytes: [u8; 20] = bytes.try_into().map_err(|v: Vec<u8>| {
            CoreError::InvalidAddress(format!(
                "{}: expected {} bytes, got {}",
                s,
                Self::LEN,
                v.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Address {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// On-chain channel state of one identity against the hermes.
///
/// Fetched as a whole and replaced as a whole on resync; never patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    /// Balance still lent by the hermes to the channel.
    pub balance: u128,
    /// Cumulative amount already settled out of the channel.
    pub settled: u128,
    /// Stake the identity locked in the channel.
    pub stake: u128,
}

impl ChannelSnapshot {
    pub fn new(balance: u128, settled: u128, stake: u128) -> Self {
        Self {
            balance,
            settled,
            stake,
        }
    }
}

/// The latest cumulative promise issued to the hermes for an identity.
///
/// Only `amount` carries meaning here; the remaining fields are opaque and
/// travel untouched to the settlement submitter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Promise {
    /// Cumulative promised amount.
    pub amount: u128,
    /// Channel the promise was issued on.
    #[serde(default)]
    pub channel_id: String,
    /// Transactor fee embedded in the promise.
    #[serde(default)]
    pub fee: u128,
    /// Hashlock of the exchange, hex encoded.
    #[serde(default)]
    pub hashlock: String,
    /// Signature over the promise, hex encoded.
    #[serde(default)]
    pub signature: String,
}

impl Promise {
    /// A promise carrying only an amount.
    pub fn with_amount(amount: u128) -> Self {
        Self {
            amount,
            ..Default::default()
        }
    }
}

/// On-chain registration status of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Registered,
    Unregistered,
    InProgress,
    RegistrationError,
}

impl RegistrationStatus {
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered)
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered => write!(f, "Registered"),
            Self::Unregistered => write!(f, "Unregistered"),
            Self::InProgress => write!(f, "InProgress"),
            Self::RegistrationError => write!(f, "RegistrationError"),
        }
    }
}
