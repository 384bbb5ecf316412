use crate::types::CanonicalName;
use serde::{Deserialize, Serialize};

/// ARM64 host running the 32-bit ARM subsystem (`sysarm32`).
pub const ARCH_ARM64_ON_ARM: &str = "arm64.arm";
/// ARM64 host running the x86 subsystem (`syswow64`).
pub const ARCH_ARM64_ON_X86: &str = "arm64.x86";

/// Test-signing public key token that packages are renamed away from.
const TEST_PUBLIC_KEY_TOKEN: &str = "628844477771337a";
const PRODUCTION_PUBLIC_KEY_TOKEN: &str = "31bf3856ad364e35";

/// `assemblyIdentity` of a package or component manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComponentIdentity {
    pub name: String,
    pub public_key_token: String,
    pub processor_architecture: String,
    pub language: String,
    pub version: String,
}

impl ComponentIdentity {
    /// Language as it appears in identity strings: `neutral` composes as empty.
    pub fn display_language(&self) -> &str {
        if self.language == "neutral" {
            ""
        } else {
            &self.language
        }
    }

    pub fn canonical_name(&self) -> CanonicalName {
        CanonicalName::new(format!(
            "{}~{}~{}~{}~{}",
            self.name,
            self.public_key_token,
            self.processor_architecture,
            self.display_language(),
            self.version
        ))
    }

    /// Version-less package stem used when no update history names the package.
    ///
    /// The language suffix is removed from the name, and the test-signing
    /// token is mapped to the production token. Inbox CompDB packages keep
    /// their bare name.
    pub fn fallback_package_stem(&self) -> String {
        let name = replace_ignore_case(&self.name, &format!("_{}", self.language), "");
        if name.contains("InboxCompDB") {
            return name;
        }
        let token = replace_ignore_case(
            &self.public_key_token,
            TEST_PUBLIC_KEY_TOKEN,
            PRODUCTION_PUBLIC_KEY_TOKEN,
        );
        format!(
            "{name}~{token}~{}~{}~",
            self.processor_architecture,
            self.display_language()
        )
    }

    pub fn is_architecture(&self, arch: &str) -> bool {
        self.processor_architecture.eq_ignore_ascii_case(arch)
    }
}

/// Case-insensitive (ASCII) replacement of every occurrence of `from`.
pub fn replace_ignore_case(haystack: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return haystack.to_owned();
    }
    let lower_hay = haystack.to_ascii_lowercase();
    let lower_from = from.to_ascii_lowercase();
    let mut out = String::with_capacity(haystack.len());
    let mut cursor = 0;
    while let Some(pos) = lower_hay[cursor..].find(&lower_from) {
        let start = cursor + pos;
        out.push_str(&haystack[cursor..start]);
        out.push_str(to);
        cursor = start + from.len();
    }
    out.push_str(&haystack[cursor..]);
    out
}
