// ═══════════════════════════════════════════════════════════════════
// Error Tests — CoreError variants, Display formatting, From impls
// ═══════════════════════════════════════════════════════════════════

use invest_tracker_core::errors::CoreError;

// ── Display formatting ──────────────────────────────────────────────

mod display {
    use super::*;

    #[test]
    fn csv() {
        let err = CoreError::Csv("no header row".into());
        assert_eq!(err.to_string(), "CSV parse error: no header row");
    }

    #[test]
    fn storage() {
        let err = CoreError::Storage("write refused".into());
        assert_eq!(err.to_string(), "Storage error: write refused");
    }

    #[test]
    fn conflict() {
        let err = CoreError::Conflict("alert already exists".into());
        assert_eq!(err.to_string(), "Conflict: alert already exists");
    }

    #[test]
    fn not_found() {
        let err = CoreError::NotFound("position ZZZZ".into());
        assert_eq!(err.to_string(), "Not found: position ZZZZ");
    }

    #[test]
    fn api() {
        let err = CoreError::Api {
            provider: "FMP".into(),
            message: "rate limited".into(),
        };
        assert_eq!(err.to_string(), "API error (FMP): rate limited");
    }

    #[test]
    fn network() {
        let err = CoreError::Network("connection reset".into());
        assert_eq!(err.to_string(), "Network error: connection reset");
    }

    #[test]
    fn validation() {
        let err = CoreError::ValidationError("target must be positive".into());
        assert_eq!(err.to_string(), "Validation failed: target must be positive");
    }

    #[test]
    fn serialization_and_deserialization() {
        assert_eq!(
            CoreError::Serialization("boom".into()).to_string(),
            "Serialization error: boom"
        );
        assert_eq!(
            CoreError::Deserialization("boom".into()).to_string(),
            "Deserialization error: boom"
        );
    }
}

// ── From impls ──────────────────────────────────────────────────────

mod conversions {
    use super::*;

    #[test]
    fn serde_json_maps_to_deserialization() {
        let parse_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: CoreError = parse_error.into();
        assert!(matches!(err, CoreError::Deserialization(_)));
    }

    #[test]
    fn error_trait_object_compatible() {
        // thiserror derives std::error::Error; callers box these freely.
        let err: Box<dyn std::error::Error> = Box::new(CoreError::Network("x".into()));
        assert!(err.to_string().starts_with("Network error"));
    }
}
