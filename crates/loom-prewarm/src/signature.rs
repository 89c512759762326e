//! Permission signatures.
//!
//! A [`Signature`] is a canonical encoding of the configuration a thread was
//! started under. Two signatures computed from equal configurations compare
//! equal no matter when they were computed.

use std::fmt;

use serde::Serialize;
use tracing::warn;

/// Literal used when a configuration cannot be encoded.
///
/// Every configuration that fails to encode shares this value, so entries
/// built under it only match other failed encodings.
pub const FALLBACK_SIGNATURE: &str = "__PREWARM_PERMISSION_SIGNATURE__";

/// Opaque, comparable fingerprint of a thread configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    /// Compute the signature of a configuration.
    ///
    /// The configuration is first converted to a JSON value, whose objects
    /// are keyed in sorted order, and then encoded. Equal configurations
    /// therefore encode identically even when they contain unordered maps
    /// such as `HashMap`. If encoding fails the [`FALLBACK_SIGNATURE`] is
    /// returned and a warning is logged.
    pub fn of<T: Serialize + ?Sized>(config: &T) -> Self {
        match serde_json::to_value(config).and_then(|value| serde_json::to_string(&value)) {
            Ok(encoded) => Self(encoded),
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to compute permission signature, falling back to shared marker"
                );
                Self::fallback()
            }
        }
    }

    /// Wrap an already computed signature value.
    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The shared signature used when encoding fails.
    pub fn fallback() -> Self {
        Self(FALLBACK_SIGNATURE.to_string())
    }

    /// Whether this is the degraded fallback signature.
    pub fn is_fallback(&self) -> bool {
        self.0 == FALLBACK_SIGNATURE
    }

    /// The encoded signature value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::io;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Permissions {
        mode: &'static str,
        workspace_roots: Vec<&'static str>,
    }

    #[test]
    fn test_equal_configs_have_equal_signatures() {
        let a = Permissions {
            mode: "auto",
            workspace_roots: vec!["/proj"],
        };
        let b = Permissions {
            mode: "auto",
            workspace_roots: vec!["/proj"],
        };

        assert_eq!(Signature::of(&a), Signature::of(&b));
        assert!(!Signature::of(&a).is_fallback());
    }

    #[test]
    fn test_mode_change_changes_signature() {
        let auto = Permissions {
            mode: "auto",
            workspace_roots: vec!["/proj"],
        };
        let full = Permissions {
            mode: "full-access",
            workspace_roots: vec!["/proj"],
        };

        assert_ne!(Signature::of(&auto), Signature::of(&full));
    }

    #[test]
    fn test_workspace_roots_change_signature() {
        let one = Permissions {
            mode: "auto",
            workspace_roots: vec!["/proj"],
        };
        let two = Permissions {
            mode: "auto",
            workspace_roots: vec!["/proj", "/other"],
        };

        assert_ne!(Signature::of(&one), Signature::of(&two));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unencodable_config_falls_back() {
        // JSON object keys must be strings
        let mut bad = HashMap::new();
        bad.insert(vec![1u8], "x");

        let sig = Signature::of(&bad);
        assert!(sig.is_fallback());
        assert_eq!(sig, Signature::fallback());
        assert_eq!(sig.as_str(), FALLBACK_SIGNATURE);
        assert_eq!(FALLBACK_SIGNATURE, "__PREWARM_PERMISSION_SIGNATURE__");
    }

    #[test]
    fn test_fallback_is_logged() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .with_ansi(false)
            .finish();

        let mut bad = HashMap::new();
        bad.insert(vec![1u8], "x");
        let sig = tracing::subscriber::with_default(subscriber, || Signature::of(&bad));
        assert!(sig.is_fallback());

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert!(output.contains("WARN"));
        assert!(output.contains("falling back to shared marker"));
    }

    #[test]
    fn test_encodable_config_logs_nothing() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .finish();

        let sig = tracing::subscriber::with_default(subscriber, || {
            Signature::of(&Permissions {
                mode: "auto",
                workspace_roots: vec!["/proj"],
            })
        });
        assert!(!sig.is_fallback());
        assert!(logs.0.lock().is_empty());
    }

    #[test]
    fn test_equal_hash_maps_have_equal_signatures() {
        let entries: Vec<(String, String)> = (0..8)
            .map(|i| (format!("key-{i}"), format!("value-{i}")))
            .collect();

        for _ in 0..20 {
            let a: HashMap<String, String> = entries.iter().cloned().collect();
            let b: HashMap<String, String> = entries.iter().rev().cloned().collect();
            assert_eq!(a, b);
            assert_eq!(Signature::of(&a), Signature::of(&b));
        }
    }

    #[test]
    fn test_ordered_maps_are_deterministic() {
        let mut first = BTreeMap::new();
        first.insert("sandbox", "workspace-write");
        first.insert("approval", "on-request");

        let mut second = BTreeMap::new();
        second.insert("approval", "on-request");
        second.insert("sandbox", "workspace-write");

        assert_eq!(Signature::of(&first), Signature::of(&second));
    }

    #[test]
    fn test_raw_signature_display() {
        let sig = Signature::from_raw("perm:auto");
        assert_eq!(sig.to_string(), "perm:auto");
        assert_eq!(sig, Signature::from_raw("perm:auto"));
    }
}
