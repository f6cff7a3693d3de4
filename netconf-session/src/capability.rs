//! Parsing of the capability URIs announced in a `<hello>` message.
//!
//! Two independent grammars are applied to every URI:
//!
//! - capability tags, `urn:ietf:params:netconf:capability:<tag>:<major>.<minor>`
//! - YANG modules, `<namespace>?module=<name>&revision=<YYYY-MM-DD>[&features=<csv>]`
//!
//! A URI may match either, both or neither. Nothing here fails on malformed
//! input; servers routinely advertise vendor URIs that fit no grammar.

use bitflags::bitflags;
use regex::Regex;
use serde_derive::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use crate::{NETCONF_BASE_10_CAP, NETCONF_BASE_11_CAP};

const CAPABILITY_PATTERN: &str = r"^urn:ietf:params:netconf:capability:(\S+):(\d+)\.(\d+)";
const MODULE_PATTERN: &str = r"(\S+)\?module=(\S+)&revision=(\d{4}-\d{2}-\d{2})(&features=(\S+))?";

fn capability_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(CAPABILITY_PATTERN).expect("capability pattern compiles"))
}

fn module_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(MODULE_PATTERN).expect("module pattern compiles"))
}

bitflags! {
    /// The well-known capabilities operations are gated on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capability: u16 {
        const CANDIDATE = 1 << 0;
        const CONFIRMED_COMMIT = 1 << 1;
        const INTERLEAVE = 1 << 2;
        const NOTIFICATION = 1 << 3;
        const PARTIAL_LOCK = 1 << 4;
        const ROLLBACK_ON_ERROR = 1 << 5;
        const STARTUP = 1 << 6;
        const URL = 1 << 7;
        const VALIDATE = 1 << 8;
        const WRITABLE_RUNNING = 1 << 9;
        const XPATH = 1 << 10;
        const WITH_DEFAULTS = 1 << 11;
    }
}

const KNOWN_TAGS: [(&str, Capability); 12] = [
    ("candidate", Capability::CANDIDATE),
    ("confirmed-commit", Capability::CONFIRMED_COMMIT),
    ("interleave", Capability::INTERLEAVE),
    ("notification", Capability::NOTIFICATION),
    ("partial-lock", Capability::PARTIAL_LOCK),
    ("rollback-on-error", Capability::ROLLBACK_ON_ERROR),
    ("startup", Capability::STARTUP),
    ("url", Capability::URL),
    ("validate", Capability::VALIDATE),
    ("writable-running", Capability::WRITABLE_RUNNING),
    ("xpath", Capability::XPATH),
    ("with-defaults", Capability::WITH_DEFAULTS),
];

impl Capability {
    /// Looks up a single well-known capability by its tag.
    pub fn from_tag(tag: &str) -> Option<Capability> {
        KNOWN_TAGS
            .iter()
            .find(|(name, _)| *name == tag)
            .map(|(_, capability)| *capability)
    }

    /// Tag of a single capability flag, e.g. `candidate`.
    pub fn tag(self) -> &'static str {
        KNOWN_TAGS
            .iter()
            .find(|(_, capability)| *capability == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }
}

/// A capability URI matched by the tag grammar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapabilityTag {
    pub tag: String,
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}:{}.{}", self.tag, self.major, self.minor)
    }
}

/// A YANG module announced as a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YangModule {
    pub name: String,
    pub revision: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
}

/// Parses a capability tag out of `uri`.
pub fn parse(uri: &str) -> Option<CapabilityTag> {
    let captures = capability_regex().captures(uri)?;
    Some(CapabilityTag {
        tag: captures[1].to_string(),
        major: captures[2].parse().ok()?,
        minor: captures[3].parse().ok()?,
    })
}

/// Parses a YANG module announcement out of `uri`.
pub fn parse_module(uri: &str) -> Option<YangModule> {
    let captures = module_regex().captures(uri)?;
    Some(YangModule {
        namespace: captures[1].to_string(),
        name: captures[2].to_string(),
        revision: captures[3].to_string(),
        features: captures
            .get(5)
            .map(|features| features.as_str().split(',').map(str::to_string).collect()),
    })
}

/// Everything a peer announced in its `<hello>`.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    uris: BTreeSet<String>,
    known: Capability,
    vendor: BTreeSet<String>,
    modules: Vec<YangModule>,
}

impl Capabilities {
    pub fn parse<I, S>(uris: I) -> Capabilities
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut capabilities = Capabilities::default();
        for uri in uris {
            let uri = uri.as_ref().trim();
            if uri.is_empty() || !capabilities.uris.insert(uri.to_string()) {
                continue;
            }
            if let Some(tag) = parse(uri) {
                match Capability::from_tag(&tag.tag) {
                    Some(capability) => capabilities.known |= capability,
                    None => {
                        capabilities.vendor.insert(tag.tag);
                    }
                }
            }
            if let Some(module) = parse_module(uri) {
                capabilities.modules.push(module);
            }
        }
        capabilities
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.known.contains(capability)
    }

    pub fn has_uri(&self, uri: &str) -> bool {
        self.uris.contains(uri)
    }

    /// Whether the peer speaks base:1.0 or base:1.1.
    pub fn has_base(&self) -> bool {
        self.has_uri(NETCONF_BASE_10_CAP) || self.has_uri(NETCONF_BASE_11_CAP)
    }

    pub fn known(&self) -> Capability {
        self.known
    }

    /// Capability tags that are not in the well-known set.
    pub fn vendor_tags(&self) -> impl Iterator<Item = &str> {
        self.vendor.iter().map(String::as_str)
    }

    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.uris.iter().map(String::as_str)
    }

    pub fn modules(&self) -> &[YangModule] {
        &self.modules
    }

    /// The well-known capabilities as a name to presence table.
    pub fn standard_table(&self) -> BTreeMap<&'static str, bool> {
        KNOWN_TAGS
            .iter()
            .map(|(name, capability)| (*name, self.has(*capability)))
            .collect()
    }
}
