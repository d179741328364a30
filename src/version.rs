// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

/// Build information, for logging only
///
/// `CEB_VERSION_METADATA` and `CEB_GIT_REVISION` are read from the build
/// environment if they are set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub prerelease: &'static str,
    pub metadata: &'static str,
    pub revision: &'static str,
}

impl VersionInfo {
    pub fn get() -> Self {
        let full = env!("CARGO_PKG_VERSION");
        let (version, prerelease) = match full.find('-') {
            Some(idx) => (&full[..idx], &full[idx + 1..]),
            None => (full, ""),
        };

        Self {
            name: env!("CARGO_PKG_NAME"),
            version,
            prerelease,
            metadata: option_env!("CEB_VERSION_METADATA").unwrap_or(""),
            revision: option_env!("CEB_GIT_REVISION").unwrap_or(""),
        }
    }

    /// e.g. `v0.1.0-dev+meta (abc123)`
    pub fn full_version_number(&self, with_revision: bool) -> String {
        let mut full = format!("v{}", self.version);
        if !self.prerelease.is_empty() {
            full.push('-');
            full.push_str(self.prerelease);
        }
        if !self.metadata.is_empty() {
            full.push('+');
            full.push_str(self.metadata);
        }
        if with_revision && !self.revision.is_empty() {
            full.push_str(&format!(" ({})", self.revision));
        }

        full
    }
}
