use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// Chat platforms hand us their own channel ids; `new()` is only for tests.
branded_id!(ChannelId, "chan");
// Issued by the agent process; we never mint these outside tests.
branded_id!(AgentSessionId, "sess");
branded_id!(ToolCallId, "toolu");
branded_id!(ApprovalId, "perm");
branded_id!(UnitId, "unit");
// One delivered approval notification, e.g. the chat message carrying the buttons.
branded_id!(NoticeKey, "notice");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_id_has_prefix() {
        let id = ApprovalId::new();
        assert!(id.as_str().starts_with("perm_"), "got: {id}");
    }

    #[test]
    fn unit_id_has_prefix() {
        let id = UnitId::new();
        assert!(id.as_str().starts_with("unit_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = ApprovalId::new();
        let b = ApprovalId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_raw_preserves_platform_value() {
        let id = ChannelId::from_raw("1187263450012");
        assert_eq!(id.as_str(), "1187263450012");
        assert_eq!(id.to_string(), "1187263450012");
    }

    #[test]
    fn serde_is_transparent() {
        let id = AgentSessionId::from_raw("5f0c-a1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""5f0c-a1""#);
        let parsed: AgentSessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn monotonic_ordering() {
        let ids: Vec<ApprovalId> = (0..100).map(|_| ApprovalId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
