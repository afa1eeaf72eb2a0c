use once_cell::sync;
use std::fmt::{Display, Formatter};

/// Version of this crate, reported in status lines.
pub const IDE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the command/event vocabulary spoken on the control channel.
pub const PROTOCOL_VERSION: Version = Version((1, 0, 0));

/// SemVer version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub (u32, u32, u32));

impl Version {
    /// Parse strings like "1.2.3" or "1.2.3-beta.1". Pre-release and build suffixes are ignored.
    pub fn parse(s: &str) -> Option<Self> {
        let core = s.trim().split(['-', '+']).next()?;
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Version((major, minor, patch)))
    }

    pub fn current() -> Self {
        Self::parse(IDE_VERSION).unwrap_or_default()
    }
}

impl Default for Version {
    fn default() -> Self {
        Version((0, 0, 0))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.0;
        write!(f, "{major}.{minor}.{patch}")
    }
}

/// Prefix of every connection status line written to the diagnostic stream.
pub fn banner() -> &'static str {
    static BANNER: sync::Lazy<String> = sync::Lazy::new(|| {
        format!(
            "Fast Debugger (debug-ide {}, protocol {})",
            Version::current(),
            PROTOCOL_VERSION
        )
    });
    &BANNER
}

#[cfg(test)]
mod test {
    use crate::version::Version;

    #[test]
    fn test_version_parse() {
        struct TestCase {
            input: &'static str,
            expected: Option<Version>,
        }

        let cases = [
            TestCase {
                input: "0.2.3",
                expected: Some(Version((0, 2, 3))),
            },
            TestCase {
                input: "1.10.0-beta.1",
                expected: Some(Version((1, 10, 0))),
            },
            TestCase {
                input: "1.2",
                expected: None,
            },
            TestCase {
                input: "1.2.3.4",
                expected: None,
            },
            TestCase {
                input: "a.b.c",
                expected: None,
            },
        ];

        for tc in cases {
            assert_eq!(Version::parse(tc.input), tc.expected, "input: {}", tc.input);
        }
    }

    #[test]
    fn test_version_order() {
        assert!(Version((1, 75, 0)) < Version((1, 76, 0)));
        assert_eq!(Version((1, 2, 3)).to_string(), "1.2.3");
    }
}
