//! Supported-feature metadata for external tooling.
//!
//! `wdmuxd --features` prints a single `Features: name=version ...` line so
//! that scripts can detect what this build supports without parsing logs.
//! The program reports its package version; every other capability is
//! versioned as a [`FormatVersion`].

use wdmux_protocol::FormatVersion;

/// Name under which the program reports its own version.
pub const PROGRAM_NAME: &str = "wdmuxd";

/// The program version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Capabilities other than the program itself.
pub const CAPABILITIES: &[(&str, FormatVersion)] = &[
    ("config-format", FormatVersion::CURRENT),
    ("liveness", FormatVersion::new(0, 1)),
    ("noop-device", FormatVersion::new(0, 1)),
    ("run", FormatVersion::new(0, 1)),
    ("show-config", FormatVersion::new(0, 1)),
];

/// Returns every feature name with its version, the program itself first.
pub fn features() -> Vec<(&'static str, String)> {
    std::iter::once((PROGRAM_NAME, VERSION.to_string()))
        .chain(
            CAPABILITIES
                .iter()
                .map(|(name, version)| (*name, version.to_string())),
        )
        .collect()
}

/// Renders the line printed by `--features`.
pub fn format_features() -> String {
    let pairs: Vec<String> = features()
        .into_iter()
        .map(|(name, version)| format!("{name}={version}"))
        .collect();
    format!("Features: {}", pairs.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_reports_its_version() {
        let features = features();
        assert_eq!(
            features.first(),
            Some(&(PROGRAM_NAME, VERSION.to_string()))
        );
    }

    #[test]
    fn test_capability_versions_parse() {
        for (name, version) in features().into_iter().skip(1) {
            let parsed = FormatVersion::parse(&version)
                .unwrap_or_else(|e| panic!("{name}={version}: {e}"));
            assert!(CAPABILITIES.contains(&(name, parsed)));
        }
    }

    #[test]
    fn test_config_format_matches_document_version() {
        let config_format = CAPABILITIES
            .iter()
            .find(|(name, _)| *name == "config-format")
            .map(|(_, version)| *version);
        assert_eq!(config_format, Some(FormatVersion::CURRENT));
    }

    #[test]
    fn test_format_features_line() {
        let line = format_features();
        assert!(line.starts_with("Features: wdmuxd="));
        assert!(line.contains(" run=0.1"));
        assert!(line.contains(" show-config=0.1"));
        assert!(!line.contains('\n'));
    }
}
