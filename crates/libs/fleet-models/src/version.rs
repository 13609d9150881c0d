use std::sync::LazyLock;

use regex::Regex;

static SEMANTIC_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    compile_regex(
        r"^v(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(?:-[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*)?(?:\+[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*)?$",
    )
});

fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        // Covered by the tests below.
        Err(err) => panic!("invalid regex pattern `{pattern}`: {err}"),
    }
}

/// Whether `value` (ignoring surrounding whitespace) is a `v`-prefixed semantic version.
pub fn is_semantic_version(value: &str) -> bool {
    SEMANTIC_VERSION.is_match(value.trim())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accepts_semantic_versions() {
        for version in ["v1.2.0", "v0.0.1", "v10.20.30-rc.1", "v1.0.0+build.5", " v1.1.0 "] {
            assert!(is_semantic_version(version), "{version} should be accepted");
        }
    }

    #[test]
    fn rejects_other_labels() {
        for version in ["1.2.0", "v1.2", "v01.2.3", "v1.2.3-", "latest", ""] {
            assert!(!is_semantic_version(version), "{version} should be rejected");
        }
    }
}
