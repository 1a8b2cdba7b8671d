//! Outbound server certificate verification settings.

use std::fmt;
use std::str::FromStr;

use log::warn;
use thiserror::Error;

/// What to do when an origin certificate fails verification.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum VerifyServerPolicy {
    /// Skip verification entirely.
    Disabled,
    /// Verify, log failures, and accept the connection anyway.
    #[default]
    Permissive,
    /// Verify and reject on failure.
    Enforced,
}

/// Which checks verification performs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum VerifyServerProperties {
    None,
    /// Chain and signature only.
    Signature,
    /// Hostname only.
    Name,
    #[default]
    All,
}

impl VerifyServerProperties {
    pub fn check_signature(self) -> bool {
        matches!(self, Self::Signature | Self::All)
    }

    pub fn check_name(self) -> bool {
        matches!(self, Self::Name | Self::All)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid value {value:?}, expected one of {expected}")]
pub struct InvalidSetting {
    value: String,
    expected: &'static str,
}

impl FromStr for VerifyServerPolicy {
    type Err = InvalidSetting;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DISABLED" => Ok(Self::Disabled),
            "PERMISSIVE" => Ok(Self::Permissive),
            "ENFORCED" => Ok(Self::Enforced),
            _ => Err(InvalidSetting {
                value: s.to_string(),
                expected: "DISABLED, PERMISSIVE, ENFORCED",
            }),
        }
    }
}

impl FromStr for VerifyServerProperties {
    type Err = InvalidSetting;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Self::None),
            "SIGNATURE" => Ok(Self::Signature),
            "NAME" => Ok(Self::Name),
            "ALL" => Ok(Self::All),
            _ => Err(InvalidSetting {
                value: s.to_string(),
                expected: "ALL, SIGNATURE, NAME, NONE",
            }),
        }
    }
}

impl VerifyServerPolicy {
    /// Parses a configured value. An unknown value is logged and disables
    /// verification.
    pub fn from_setting(s: &str) -> Self {
        s.parse().unwrap_or_else(|e| {
            warn!("verify server policy: {}, using DISABLED", e);
            Self::Disabled
        })
    }
}

impl VerifyServerProperties {
    /// Parses a configured value. An unknown value is logged and turns every
    /// check off.
    pub fn from_setting(s: &str) -> Self {
        s.parse().unwrap_or_else(|e| {
            warn!("verify server properties: {}, using NONE", e);
            Self::None
        })
    }
}

impl fmt::Display for VerifyServerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "DISABLED",
            Self::Permissive => "PERMISSIVE",
            Self::Enforced => "ENFORCED",
        })
    }
}

impl fmt::Display for VerifyServerProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "NONE",
            Self::Signature => "SIGNATURE",
            Self::Name => "NAME",
            Self::All => "ALL",
        })
    }
}

impl<'de> serde::Deserialize<'de> for VerifyServerPolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_setting(&s))
    }
}

impl<'de> serde::Deserialize<'de> for VerifyServerProperties {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_setting(&s))
    }
}

/// Why an origin certificate was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("certificate is not valid for {0}")]
    NameMismatch(String),

    #[error("could not read certificate names: {0}")]
    UnreadableCertificate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_policies() {
        assert_eq!("DISABLED".parse(), Ok(VerifyServerPolicy::Disabled));
        assert_eq!("PERMISSIVE".parse(), Ok(VerifyServerPolicy::Permissive));
        assert_eq!("ENFORCED".parse(), Ok(VerifyServerPolicy::Enforced));
        assert!("enforced".parse::<VerifyServerPolicy>().is_err());
    }

    #[test]
    fn parses_properties() {
        assert_eq!("NONE".parse(), Ok(VerifyServerProperties::None));
        assert_eq!("SIGNATURE".parse(), Ok(VerifyServerProperties::Signature));
        assert_eq!("NAME".parse(), Ok(VerifyServerProperties::Name));
        assert_eq!("ALL".parse(), Ok(VerifyServerProperties::All));
    }

    #[test]
    fn invalid_settings_fall_back() {
        assert_eq!(VerifyServerPolicy::from_setting("STRICT"), VerifyServerPolicy::Disabled);
        assert_eq!(VerifyServerProperties::from_setting("BOTH"), VerifyServerProperties::None);
    }

    #[test]
    fn defaults() {
        assert_eq!(VerifyServerPolicy::default(), VerifyServerPolicy::Permissive);
        assert_eq!(VerifyServerProperties::default(), VerifyServerProperties::All);
    }

    #[test]
    fn property_masks() {
        assert!(VerifyServerProperties::All.check_name());
        assert!(VerifyServerProperties::All.check_signature());
        assert!(VerifyServerProperties::Name.check_name());
        assert!(!VerifyServerProperties::Name.check_signature());
        assert!(!VerifyServerProperties::Signature.check_name());
        assert!(!VerifyServerProperties::None.check_name());
    }

    #[test]
    fn display_round_trips() {
        for policy in [
            VerifyServerPolicy::Disabled,
            VerifyServerPolicy::Permissive,
            VerifyServerPolicy::Enforced,
        ] {
            assert_eq!(policy.to_string().parse(), Ok(policy));
        }
    }

    #[test]
    fn deserializes_leniently() {
        let policy: VerifyServerPolicy = serde_yaml::from_str("ENFORCED").unwrap();
        assert_eq!(policy, VerifyServerPolicy::Enforced);
        let policy: VerifyServerPolicy = serde_yaml::from_str("bogus").unwrap();
        assert_eq!(policy, VerifyServerPolicy::Disabled);
    }

    #[test]
    fn error_message() {
        let err = "x".parse::<VerifyServerProperties>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value \"x\", expected one of ALL, SIGNATURE, NAME, NONE"
        );
    }
}
