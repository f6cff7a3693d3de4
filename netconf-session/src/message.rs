use crate::capability::Capability;
use crate::config::RaiseMode;
use crate::error::{NetconfClientError, NetconfClientResult};
use crate::{NETCONF_BASE_10_CAP, NETCONF_BASE_11_CAP, NETCONF_URN};
use core::fmt;
use core::fmt::Display;
use core::ops::Add;
use core::str::FromStr;
use core::time::Duration;
use quick_xml::de::from_str;
use quick_xml::events::{BytesStart, Event};
use quick_xml::se::{to_string_with_root, Serializer};
use quick_xml::Reader;
use serde_derive::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Stand-in written by the serializer wherever caller supplied XML goes.
/// Replaced verbatim after serialization so the payload is not escaped.
const RAW_PAYLOAD_MARKER: &str = "{{netconf-raw-payload}}";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename(serialize = "hello"))]
pub struct Hello {
    #[serde(rename = "@xmlns", default)]
    xmlns: String,
    #[serde(default)]
    capabilities: CapabilityList,
    #[serde(rename = "session-id", skip_serializing_if = "Option::is_none")]
    session_id: Option<u64>,
}

impl Hello {
    pub fn new() -> Hello {
        Hello::with_capabilities(vec![
            NETCONF_BASE_10_CAP.to_string(),
            NETCONF_BASE_11_CAP.to_string(),
        ])
    }

    pub fn with_capabilities(capability: Vec<String>) -> Hello {
        Hello {
            xmlns: NETCONF_URN.to_string(),
            session_id: None,
            capabilities: CapabilityList { capability },
        }
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.capabilities
            .capability
            .iter()
            .map(|capability| capability.trim().to_string())
            .collect()
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .capability
            .iter()
            .any(|cap| cap.trim() == capability)
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    pub fn to_xml(&self) -> NetconfClientResult<String> {
        let mut buffer = String::with_capacity(206);
        let ser = Serializer::new(&mut buffer);
        serde::Serialize::serialize(self, ser)?;
        Ok(buffer)
    }
}

impl Display for Hello {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let xml = self.to_xml().map_err(|_| fmt::Error)?;
        write!(f, "{}", xml)
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct CapabilityList {
    #[serde(default)]
    capability: Vec<String>,
}

/// Caller supplied XML, inserted into the envelope without escaping.
///
/// When the caller hands over a complete root element, its content is kept
/// along with its namespace declarations, which move to the generated
/// element so prefixes used inside stay bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawXml {
    namespaces: String,
    content: String,
}

impl RawXml {
    /// Wraps `xml`, dropping an outer `<root>` element if it is already there.
    fn content_of(xml: &str, root: &str) -> RawXml {
        let xml = xml.trim();
        match strip_root(xml, root) {
            Some((start, content)) => RawXml {
                namespaces: namespace_declarations(start),
                content: content.to_string(),
            },
            None => RawXml {
                namespaces: String::new(),
                content: xml.to_string(),
            },
        }
    }

    pub fn as_str(&self) -> &str {
        &self.content
    }

    /// `xmlns` attributes carried over from the caller's root element.
    pub fn namespaces(&self) -> &str {
        &self.namespaces
    }

    /// Replaces the placeholder in `xml`, declaring the carried namespaces
    /// on the element that encloses it.
    fn splice_into(&self, xml: &str) -> String {
        xml.replacen(
            &format!(">{}", RAW_PAYLOAD_MARKER),
            &format!("{}>{}", self.namespaces, self.content),
            1,
        )
    }
}

impl serde::Serialize for RawXml {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(RAW_PAYLOAD_MARKER)
    }
}

/// Splits `xml` into the start tag body and the content when its root
/// element is named `root`, with or without a namespace prefix.
fn strip_root<'a>(xml: &'a str, root: &str) -> Option<(&'a str, &'a str)> {
    let rest = xml.trim().strip_prefix('<')?;
    let tag_end = rest.find('>')?;
    let open = &rest[..tag_end];
    let qname = open
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()?;
    if qname.rsplit(':').next()? != root {
        return None;
    }
    if let Some(open) = open.strip_suffix('/') {
        return Some((open.trim_end(), ""));
    }
    let close = format!("</{}>", qname);
    rest[tag_end + 1..]
        .trim_end()
        .strip_suffix(close.as_str())
        .map(|content| (open, content.trim()))
}

/// The `xmlns` and `xmlns:*` attributes of a start tag, ready to append to
/// another start tag.
fn namespace_declarations(start: &str) -> String {
    let name_len = start
        .find(|c: char| c.is_whitespace())
        .unwrap_or(start.len());
    BytesStart::from_content(start, name_len)
        .attributes()
        .flatten()
        .filter(|attribute| {
            let key = attribute.key.into_inner();
            key == b"xmlns" || key.starts_with(b"xmlns:")
        })
        .map(|attribute| {
            format!(
                " {}=\"{}\"",
                String::from_utf8_lossy(attribute.key.into_inner()),
                String::from_utf8_lossy(&attribute.value).replace('"', "&quot;")
            )
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct Rpc {
    #[serde(rename = "@message-id")]
    message_id: u64,
    #[serde(rename = "@xmlns")]
    xmlns: String,
    #[serde(rename = "$value")]
    operation: RpcOperation,
}

impl Rpc {
    pub fn new(message_id: u64, operation: RpcOperation) -> Rpc {
        Rpc {
            xmlns: NETCONF_URN.to_string(),
            message_id,
            operation,
        }
    }

    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    pub fn operation(&self) -> &RpcOperation {
        &self.operation
    }

    pub fn to_xml(&self) -> NetconfClientResult<String> {
        if let RpcOperation::Dispatch(dispatch) = &self.operation {
            return Ok(format!(
                "<rpc message-id=\"{}\" xmlns=\"{}\">\n  {}\n</rpc>",
                self.message_id, self.xmlns, dispatch.xml
            ));
        }
        let mut buffer = String::with_capacity(256);
        let mut ser = Serializer::with_root(&mut buffer, Some("rpc"))?;
        ser.indent(' ', 2);
        serde::Serialize::serialize(self, ser)?;
        Ok(match self.operation.raw_payload() {
            Some(payload) => payload.splice_into(&buffer),
            None => buffer,
        })
    }
}

impl Display for Rpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let xml = self.to_xml().map_err(|_| fmt::Error)?;
        write!(f, "{}", xml)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RpcOperation {
    Get(Get),
    GetConfig(GetConfig),
    EditConfig(EditConfig),
    CopyConfig(CopyConfig),
    DeleteConfig {
        target: Target,
    },
    Lock {
        target: Target,
    },
    Unlock {
        target: Target,
    },
    Commit(Commit),
    DiscardChanges,
    Validate {
        source: Source,
    },
    CloseSession,
    KillSession {
        #[serde(rename = "session-id")]
        session_id: u64,
    },
    CreateSubscription(CreateSubscription),
    #[serde(skip)]
    Dispatch(Dispatch),
}

impl RpcOperation {
    pub fn new_get(filter: Option<Filter>, defaults: Option<WithDefaultsValue>) -> RpcOperation {
        RpcOperation::Get(Get {
            filter,
            with_defaults: defaults.map(WithDefaults::new),
        })
    }

    pub fn new_get_config(
        source: impl Into<ConfigSource>,
        filter: Option<Filter>,
        defaults: Option<WithDefaultsValue>,
    ) -> RpcOperation {
        RpcOperation::GetConfig(GetConfig {
            source: Source::new(source),
            filter,
            with_defaults: defaults.map(WithDefaults::new),
        })
    }

    pub fn new_edit_config(
        target: Datastore,
        config: &str,
        default_operation: Option<DefaultOperation>,
        test_option: Option<TestOption>,
        error_option: Option<ErrorOption>,
    ) -> RpcOperation {
        RpcOperation::EditConfig(EditConfig {
            target: Target { datastore: target },
            default_operation,
            test_option,
            error_option,
            config: RawXml::content_of(config, "config"),
        })
    }

    pub fn new_copy_config(source: impl Into<ConfigSource>, target: Datastore) -> RpcOperation {
        RpcOperation::CopyConfig(CopyConfig {
            target: Target { datastore: target },
            source: Source::new(source),
        })
    }

    pub fn new_validate(source: impl Into<ConfigSource>) -> RpcOperation {
        RpcOperation::Validate {
            source: Source::new(source),
        }
    }

    pub fn new_lock(target: Datastore) -> RpcOperation {
        RpcOperation::Lock {
            target: Target { datastore: target },
        }
    }

    pub fn new_unlock(target: Datastore) -> RpcOperation {
        RpcOperation::Unlock {
            target: Target { datastore: target },
        }
    }

    pub fn new_delete_config(target: Datastore) -> RpcOperation {
        RpcOperation::DeleteConfig {
            target: Target { datastore: target },
        }
    }

    pub fn new_commit(
        confirmed: Option<()>,
        confirm_timeout: Option<u32>,
        persist: Option<String>,
        persist_id: Option<String>,
    ) -> RpcOperation {
        RpcOperation::Commit(Commit {
            confirmed,
            confirm_timeout,
            persist,
            persist_id,
        })
    }

    pub fn new_create_subscription(
        stream: Option<&str>,
        filter: Option<Filter>,
        duration: Option<Duration>,
    ) -> RpcOperation {
        let (start_time, stop_time) = if let Some(duration) = duration {
            let now = OffsetDateTime::now_utc();
            (Some(now), Some(now.add(duration)))
        } else {
            (None, None)
        };
        RpcOperation::CreateSubscription(CreateSubscription {
            xmlns: "urn:ietf:params:xml:ns:netconf:notification:1.0".to_string(),
            stream: stream.map(|s| s.to_string()),
            filter,
            start_time,
            stop_time,
        })
    }

    /// Protocol name of the operation, as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            RpcOperation::Get(_) => "get",
            RpcOperation::GetConfig(_) => "get-config",
            RpcOperation::EditConfig(_) => "edit-config",
            RpcOperation::CopyConfig(_) => "copy-config",
            RpcOperation::DeleteConfig { .. } => "delete-config",
            RpcOperation::Lock { .. } => "lock",
            RpcOperation::Unlock { .. } => "unlock",
            RpcOperation::Commit(_) => "commit",
            RpcOperation::DiscardChanges => "discard-changes",
            RpcOperation::Validate { .. } => "validate",
            RpcOperation::CloseSession => "close-session",
            RpcOperation::KillSession { .. } => "kill-session",
            RpcOperation::CreateSubscription(_) => "create-subscription",
            RpcOperation::Dispatch(_) => "dispatch",
        }
    }

    /// Server capabilities this request cannot be served without.
    pub fn required_capabilities(&self) -> Capability {
        let mut required = Capability::empty();
        match self {
            RpcOperation::Get(get) => {
                required |= Filter::requirements(&get.filter);
                if get.with_defaults.is_some() {
                    required |= Capability::WITH_DEFAULTS;
                }
            }
            RpcOperation::GetConfig(get_config) => {
                required |= get_config.source.source.requirements();
                required |= Filter::requirements(&get_config.filter);
                if get_config.with_defaults.is_some() {
                    required |= Capability::WITH_DEFAULTS;
                }
            }
            RpcOperation::EditConfig(edit) => {
                required |= edit.target.datastore.requirements();
                if edit.test_option.is_some() {
                    required |= Capability::VALIDATE;
                }
                if edit.error_option == Some(ErrorOption::RollbackOnError) {
                    required |= Capability::ROLLBACK_ON_ERROR;
                }
            }
            RpcOperation::CopyConfig(copy) => {
                required |= copy.source.source.requirements();
                required |= copy.target.datastore.requirements();
            }
            RpcOperation::DeleteConfig { target } => {
                required |= target.datastore.requirements();
            }
            RpcOperation::Commit(commit) => {
                required |= Capability::CANDIDATE;
                if commit.confirmed.is_some() || commit.persist_id.is_some() {
                    required |= Capability::CONFIRMED_COMMIT;
                }
            }
            RpcOperation::DiscardChanges => required |= Capability::CANDIDATE,
            RpcOperation::Validate { source } => {
                required |= Capability::VALIDATE;
                required |= source.source.requirements();
            }
            RpcOperation::CreateSubscription(subscription) => {
                required |= Capability::NOTIFICATION;
                required |= Filter::requirements(&subscription.filter);
            }
            RpcOperation::Dispatch(dispatch) => {
                if dispatch.uses_xpath() {
                    required |= Capability::XPATH;
                }
            }
            RpcOperation::Lock { .. }
            | RpcOperation::Unlock { .. }
            | RpcOperation::CloseSession
            | RpcOperation::KillSession { .. } => {}
        }
        required
    }

    fn raw_payload(&self) -> Option<&RawXml> {
        match self {
            RpcOperation::Get(get) => get.filter.as_ref().and_then(Filter::payload),
            RpcOperation::GetConfig(get_config) => {
                get_config.filter.as_ref().and_then(Filter::payload)
            }
            RpcOperation::EditConfig(edit) => Some(&edit.config),
            RpcOperation::CopyConfig(copy) => copy.source.source.payload(),
            RpcOperation::Validate { source } => source.source.payload(),
            RpcOperation::CreateSubscription(subscription) => {
                subscription.filter.as_ref().and_then(Filter::payload)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Commit {
    #[serde(skip_serializing_if = "Option::is_none")]
    confirmed: Option<()>,
    #[serde(rename = "confirm-timeout", skip_serializing_if = "Option::is_none")]
    confirm_timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    persist: Option<String>,
    #[serde(rename = "persist-id", skip_serializing_if = "Option::is_none")]
    persist_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Get {
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    with_defaults: Option<WithDefaults>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GetConfig {
    source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    with_defaults: Option<WithDefaults>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EditConfig {
    target: Target,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_option_str"
    )]
    default_operation: Option<DefaultOperation>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_option_str"
    )]
    test_option: Option<TestOption>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_option_str"
    )]
    error_option: Option<ErrorOption>,
    config: RawXml,
}

fn serialize_option_str<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    T: AsRef<str>,
    S: serde::Serializer,
{
    match value {
        Some(value) => serializer.serialize_str(value.as_ref()),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CopyConfig {
    target: Target,
    source: Source,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WithDefaults {
    #[serde(rename = "@xmlns")]
    xmlns: String,
    #[serde(rename = "$text")]
    value: WithDefaultsValue,
}

impl WithDefaults {
    fn new(value: WithDefaultsValue) -> WithDefaults {
        WithDefaults {
            xmlns: "urn:ietf:params:xml:ns:yang:ietf-netconf-with-defaults".to_string(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WithDefaultsValue {
    ReportAll,
    ReportAllTagged,
    Trim,
    Explicit,
}

impl FromStr for WithDefaultsValue {
    type Err = NetconfClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let defaults = s.to_lowercase();
        match defaults.as_str() {
            "report-all" => Ok(WithDefaultsValue::ReportAll),
            "report-all-tagged" => Ok(WithDefaultsValue::ReportAllTagged),
            "trim" => Ok(WithDefaultsValue::Trim),
            "explicit" => Ok(WithDefaultsValue::Explicit),
            _ => Err(NetconfClientError::invalid_argument(format!(
                "unknown with-defaults value: {}",
                s
            ))),
        }
    }
}

/// Parses a kebab-case option, accepting `_` in place of `-`.
macro_rules! option_enum {
    ($name:ident, $what:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = NetconfClientError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().replace('_', "-").as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(NetconfClientError::invalid_argument(format!(
                        concat!("unknown ", $what, ": {}"),
                        s
                    ))),
                }
            }
        }
    };
}

option_enum!(DefaultOperation, "default-operation", {
    Merge => "merge",
    Replace => "replace",
    None => "none",
});

option_enum!(TestOption, "test-option", {
    TestThenSet => "test-then-set",
    Set => "set",
});

option_enum!(ErrorOption, "error-option", {
    StopOnError => "stop-on-error",
    ContinueOnError => "continue-on-error",
    RollbackOnError => "rollback-on-error",
});

#[derive(Debug, Serialize)]
pub struct Source {
    #[serde(rename = "$value")]
    source: ConfigSource,
}

impl Source {
    fn new(source: impl Into<ConfigSource>) -> Source {
        Source {
            source: source.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Target {
    #[serde(rename = "$value")]
    datastore: Datastore,
}

/// A configuration datastore, or the URL of one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Datastore {
    Candidate,
    Running,
    Startup,
    Url(String),
}

impl Datastore {
    fn requirements(&self) -> Capability {
        match self {
            Datastore::Url(_) => Capability::URL,
            _ => Capability::empty(),
        }
    }
}

impl Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datastore::Candidate => write!(f, "candidate"),
            Datastore::Running => write!(f, "running"),
            Datastore::Startup => write!(f, "startup"),
            Datastore::Url(url) => write!(f, "{}", url),
        }
    }
}

impl FromStr for Datastore {
    type Err = NetconfClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let datastore = s.trim().to_lowercase();
        match datastore.as_str() {
            "running" => Ok(Datastore::Running),
            "candidate" => Ok(Datastore::Candidate),
            "startup" => Ok(Datastore::Startup),
            _ => {
                if datastore.starts_with("http")
                    || datastore.starts_with("file")
                    || datastore.starts_with("ftp")
                    || datastore.starts_with("scp")
                    || datastore.starts_with("sftp")
                {
                    Ok(Datastore::Url(s.trim().to_string()))
                } else {
                    Err(NetconfClientError::UnknownDatastore {
                        expected: vec![
                            "running".to_string(),
                            "candidate".to_string(),
                            "startup".to_string(),
                            "ftp|http|file|scp|sftp".to_string(),
                        ],
                        unknown: datastore,
                    })
                }
            }
        }
    }
}

/// Where configuration is read from: a datastore or an inline `<config>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Candidate,
    Running,
    Startup,
    Url(String),
    Config(RawXml),
}

impl ConfigSource {
    pub fn config(xml: &str) -> ConfigSource {
        ConfigSource::Config(RawXml::content_of(xml, "config"))
    }

    fn requirements(&self) -> Capability {
        match self {
            ConfigSource::Url(_) => Capability::URL,
            _ => Capability::empty(),
        }
    }

    fn payload(&self) -> Option<&RawXml> {
        match self {
            ConfigSource::Config(config) => Some(config),
            _ => None,
        }
    }
}

impl From<Datastore> for ConfigSource {
    fn from(datastore: Datastore) -> Self {
        match datastore {
            Datastore::Candidate => ConfigSource::Candidate,
            Datastore::Running => ConfigSource::Running,
            Datastore::Startup => ConfigSource::Startup,
            Datastore::Url(url) => ConfigSource::Url(url),
        }
    }
}

impl FromStr for ConfigSource {
    type Err = NetconfClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim_start().starts_with('<') {
            Ok(ConfigSource::config(s))
        } else {
            Ok(Datastore::from_str(s)?.into())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Subtree,
    Xpath,
}

impl FromStr for FilterType {
    type Err = NetconfClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "subtree" => Ok(FilterType::Subtree),
            "xpath" => Ok(FilterType::Xpath),
            _ => Err(NetconfClientError::invalid_argument(format!(
                "unknown filter type: {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filter {
    #[serde(rename = "@type")]
    filter_type: FilterType,
    #[serde(rename = "@select", skip_serializing_if = "Option::is_none")]
    select: Option<String>,
    #[serde(rename = "$value", skip_serializing_if = "Option::is_none")]
    filter: Option<RawXml>,
}

impl Filter {
    /// Subtree filter. `filter` may be the bare criteria or a complete
    /// `<filter>` element.
    pub fn subtree(filter: &str) -> Filter {
        Filter {
            filter_type: FilterType::Subtree,
            select: None,
            filter: Some(RawXml::content_of(filter, "filter")),
        }
    }

    pub fn xpath(select: &str) -> Filter {
        Filter {
            filter_type: FilterType::Xpath,
            select: Some(select.trim().to_string()),
            filter: None,
        }
    }

    /// Builds a filter from a `(type, criteria)` pair.
    pub fn from_parts(filter_type: &str, criteria: &str) -> NetconfClientResult<Filter> {
        Ok(match FilterType::from_str(filter_type)? {
            FilterType::Subtree => Filter::subtree(criteria),
            FilterType::Xpath => Filter::xpath(criteria),
        })
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    fn payload(&self) -> Option<&RawXml> {
        self.filter.as_ref()
    }

    fn requirements(filter: &Option<Filter>) -> Capability {
        match filter {
            Some(filter) if filter.filter_type == FilterType::Xpath => Capability::XPATH,
            _ => Capability::empty(),
        }
    }
}

/// An arbitrary rpc, either an operation name or a complete element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    xml: String,
    filter_type: Option<FilterType>,
}

impl Dispatch {
    pub fn new(
        rpc: &str,
        source: Option<ConfigSource>,
        filter: Option<Filter>,
    ) -> NetconfClientResult<Dispatch> {
        let rpc = rpc.trim();
        if rpc.is_empty() {
            return Err(NetconfClientError::invalid_argument("empty rpc"));
        }
        let filter_type = filter.as_ref().map(Filter::filter_type);
        let mut children = String::new();
        if let Some(source) = source {
            let source = Source::new(source);
            children.push_str(&serialize_fragment("source", &source, source.source.payload())?);
        }
        if let Some(filter) = filter {
            children.push_str(&serialize_fragment("filter", &filter, filter.payload())?);
        }

        let xml = if !rpc.starts_with('<') {
            if rpc.contains(|c: char| c.is_whitespace() || "<>/\"'&".contains(c)) {
                return Err(NetconfClientError::invalid_argument(format!(
                    "not an rpc name: {}",
                    rpc
                )));
            }
            if children.is_empty() {
                format!("<{}/>", rpc)
            } else {
                format!("<{rpc}>{children}</{rpc}>")
            }
        } else if children.is_empty() {
            rpc.to_string()
        } else if let Some(open) = rpc.strip_suffix("/>") {
            let qname = open[1..]
                .split(char::is_whitespace)
                .next()
                .unwrap_or_default();
            format!("{}>{}</{}>", open.trim_end(), children, qname)
        } else {
            let close = rpc.rfind("</").ok_or_else(|| {
                NetconfClientError::invalid_argument(format!("unterminated rpc element: {}", rpc))
            })?;
            format!("{}{}{}", &rpc[..close], children, &rpc[close..])
        };
        Ok(Dispatch { xml, filter_type })
    }

    pub fn as_str(&self) -> &str {
        &self.xml
    }

    pub(crate) fn uses_xpath(&self) -> bool {
        self.filter_type == Some(FilterType::Xpath)
    }
}

fn serialize_fragment<T: serde::Serialize>(
    root: &str,
    value: &T,
    payload: Option<&RawXml>,
) -> NetconfClientResult<String> {
    let xml = to_string_with_root(root, value)?;
    Ok(match payload {
        Some(payload) => payload.splice_into(&xml),
        None => xml,
    })
}

#[derive(Debug, Serialize)]
pub struct CreateSubscription {
    #[serde(rename = "@xmlns")]
    xmlns: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Filter>,
    #[serde(
        rename = "startTime",
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    start_time: Option<OffsetDateTime>,
    #[serde(
        rename = "stopTime",
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    stop_time: Option<OffsetDateTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RpcReplyEnvelope {
    rpc_error: Option<Vec<RpcError>>,
    ok: Option<()>,
}

/// A successfully decoded `<rpc-reply>`.
#[derive(Debug, Clone)]
pub struct RpcReply {
    message_id: u64,
    ok: bool,
    data: Option<String>,
    warnings: Vec<RpcError>,
    raw: String,
}

impl RpcReply {
    /// Decodes `frame` as the reply to `message_id`. Whether `<rpc-error>`
    /// elements turn into an error is decided by `raise_mode`.
    pub fn decode(message_id: u64, frame: &str, raise_mode: RaiseMode) -> NetconfClientResult<RpcReply> {
        let envelope: RpcReplyEnvelope = from_str(frame)?;
        let errors = envelope.rpc_error.unwrap_or_default();
        let raise = match raise_mode {
            RaiseMode::None => false,
            RaiseMode::Errors => errors
                .iter()
                .any(|error| error.severity() == ErrorSeverity::Error),
            RaiseMode::All => !errors.is_empty(),
        };
        if raise {
            return Err(RpcFailure { message_id, errors }.into());
        }
        Ok(RpcReply {
            message_id,
            ok: envelope.ok.is_some(),
            data: extract_data(frame)?,
            warnings: errors,
            raw: frame.to_string(),
        })
    }

    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    pub fn is_ok(&self) -> bool {
        self.ok && self.warnings.is_empty()
    }

    /// Content of the `<data>` element, for retrieval operations.
    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// `<rpc-error>` elements that were not raised.
    pub fn warnings(&self) -> &[RpcError] {
        &self.warnings
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl Display for RpcReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// The `<rpc-error>` elements of a reply that was raised as an error.
#[derive(Debug)]
pub struct RpcFailure {
    message_id: u64,
    errors: Vec<RpcError>,
}

impl RpcFailure {
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    pub fn errors(&self) -> &[RpcError] {
        &self.errors
    }
}

impl Display for RpcFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for error in &self.errors {
            writeln!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcFailure {}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename = "rpc-error", rename_all = "kebab-case")]
pub struct RpcError {
    error_severity: ErrorSeverity,
    error_type: ErrorType,
    error_tag: ErrorTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_app_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_info: Option<ErrorInfo>,
}

impl RpcError {
    pub fn severity(&self) -> ErrorSeverity {
        self.error_severity
    }

    pub fn error_type(&self) -> ErrorType {
        self.error_type
    }

    pub fn tag(&self) -> ErrorTag {
        self.error_tag
    }

    pub fn app_tag(&self) -> Option<&str> {
        self.error_app_tag.as_deref().map(str::trim)
    }

    pub fn path(&self) -> Option<&str> {
        self.error_path.as_deref().map(str::trim)
    }

    pub fn message(&self) -> Option<&str> {
        self.error_message.as_deref().map(str::trim)
    }

    pub fn info(&self) -> Option<&ErrorInfo> {
        self.error_info.as_ref()
    }
}

impl Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?} error {:?}",
            self.error_severity, self.error_type, self.error_tag
        )?;
        if let Some(path) = self.path() {
            write!(f, " at {}", path)?;
        }
        if let Some(message) = self.message() {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
    App,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    TooBig,
    MissingAttribute,
    BadAttribute,
    UnknownAttribute,
    MissingElement,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    ResourceDenied,
    RollbackFailed,
    DataExists,
    DataMissing,
    OperationNotSupported,
    OperationFailed,
    PartialOperation,
    MalformedMessage,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ErrorInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bad_element: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bad_attribute: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bad_namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok_element: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err_element: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noop_element: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,
}

/// What kind of message an inbound frame carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Reply(Option<u64>),
    Notification,
    Unknown(String),
}

/// Looks at the root element of `frame` only; the body is left to the
/// decoder of whoever the frame is routed to.
pub fn classify(frame: &str) -> Inbound {
    let mut reader = Reader::from_str(frame);
    loop {
        match reader.read_event() {
            Ok(Event::Start(root)) | Ok(Event::Empty(root)) => {
                return match root.local_name().as_ref() {
                    b"rpc-reply" => Inbound::Reply(message_id_of(&root)),
                    b"notification" => Inbound::Notification,
                    other => Inbound::Unknown(String::from_utf8_lossy(other).into_owned()),
                };
            }
            Ok(Event::Eof) => return Inbound::Unknown(String::new()),
            Err(err) => return Inbound::Unknown(err.to_string()),
            Ok(_) => continue,
        }
    }
}

fn message_id_of(root: &BytesStart) -> Option<u64> {
    root.attributes()
        .flatten()
        .find(|attribute| attribute.key.local_name().as_ref() == b"message-id")
        .and_then(|attribute| {
            std::str::from_utf8(&attribute.value)
                .ok()?
                .trim()
                .parse()
                .ok()
        })
}

/// Returns the inner XML of the reply's top level `<data>` element.
fn extract_data(frame: &str) -> NetconfClientResult<Option<String>> {
    let mut reader = Reader::from_str(frame);
    let mut depth = 0usize;
    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                depth += 1;
                if depth == 2 && element.local_name().as_ref() == b"data" {
                    let end = element.to_end().into_owned();
                    let data = reader.read_text(end.name())?;
                    return Ok(Some(data.trim().to_string()));
                }
            }
            Event::Empty(element) if depth == 1 && element.local_name().as_ref() == b"data" => {
                return Ok(Some(String::new()));
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quick_xml::name::ResolveResult;
    use quick_xml::NsReader;
    use time::format_description::well_known::Rfc3339;

    const ERROR_REPLY: &str = r#"
<rpc-reply message-id="3" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <rpc-error>
    <error-type>protocol</error-type>
    <error-tag>lock-denied</error-tag>
    <error-severity>error</error-severity>
    <error-path>/rpc/lock</error-path>
    <error-message>Lock failed, lock is already held</error-message>
    <error-info>
      <session-id>454</session-id>
    </error-info>
  </rpc-error>
  <rpc-error>
    <error-type>application</error-type>
    <error-tag>operation-failed</error-tag>
    <error-severity>warning</error-severity>
  </rpc-error>
</rpc-reply>
"#;

    #[test]
    fn test_decode_rpc_error() {
        let err = RpcReply::decode(3, ERROR_REPLY, RaiseMode::All).unwrap_err();
        let errors = err.rpc_errors().expect("structured rpc errors");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].tag(), ErrorTag::LockDenied);
        assert_eq!(errors[0].severity(), ErrorSeverity::Error);
        assert_eq!(errors[0].path(), Some("/rpc/lock"));
        assert_eq!(errors[0].message(), Some("Lock failed, lock is already held"));
        assert_eq!(errors[0].info().and_then(|info| info.session_id), Some(454));
        assert_eq!(errors[1].error_type(), ErrorType::Application);
    }

    #[test]
    fn test_decode_respects_raise_mode() {
        let warning_only = r#"
<rpc-reply message-id="4" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <rpc-error>
    <error-type>application</error-type>
    <error-tag>operation-failed</error-tag>
    <error-severity>warning</error-severity>
  </rpc-error>
  <ok/>
</rpc-reply>
"#;
        assert!(RpcReply::decode(4, warning_only, RaiseMode::All).is_err());
        let reply = RpcReply::decode(4, warning_only, RaiseMode::Errors).unwrap();
        assert_eq!(reply.warnings().len(), 1);
        assert!(!reply.is_ok());

        assert!(RpcReply::decode(3, ERROR_REPLY, RaiseMode::Errors).is_err());
        let reply = RpcReply::decode(3, ERROR_REPLY, RaiseMode::None).unwrap();
        assert_eq!(reply.warnings().len(), 2);
    }

    #[test]
    fn test_decode_data_reply() {
        let reply = r#"
<rpc-reply message-id="9" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <data>
    <configure xmlns="urn:nokia.com:sros:ns:yang:sr:conf">
      <port>
        <port-id>1/1/2</port-id>
      </port>
    </configure>
  </data>
</rpc-reply>
"#;
        let reply = RpcReply::decode(9, reply, RaiseMode::All).unwrap();
        assert_eq!(reply.message_id(), 9);
        assert!(reply.data().unwrap().starts_with("<configure"));
        assert!(reply.data().unwrap().ends_with("</configure>"));

        let ok = r#"<?xml version="1.0" encoding="UTF-8"?>
<rpc-reply message-id="10" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <ok/>
</rpc-reply>"#;
        let reply = RpcReply::decode(10, ok, RaiseMode::All).unwrap();
        assert!(reply.is_ok());
        assert!(reply.data().is_none());
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(r#"<?xml version="1.0"?><rpc-reply message-id="12"><ok/></rpc-reply>"#),
            Inbound::Reply(Some(12))
        );
        assert_eq!(classify("<nc:rpc-reply><ok/></nc:rpc-reply>"), Inbound::Reply(None));
        assert_eq!(
            classify(r#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0"/>"#),
            Inbound::Notification
        );
        assert_eq!(classify("<hello/>"), Inbound::Unknown("hello".to_string()));
    }

    #[test]
    fn test_serialize_hello() {
        let expected = r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><capabilities><capability>urn:ietf:params:netconf:base:1.0</capability><capability>urn:ietf:params:netconf:base:1.1</capability></capabilities></hello>"#;
        assert_eq!(Hello::new().to_string(), expected);
    }

    #[test]
    fn test_deserialize_hello() {
        let hello = r#"
<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <capabilities>
    <capability>urn:ietf:params:netconf:base:1.1</capability>
    <capability>
      urn:ietf:params:netconf:capability:candidate:1.0
    </capability>
  </capabilities>
  <session-id>4</session-id>
</hello>"#;
        let hello: Hello = from_str(hello).unwrap();
        assert_eq!(hello.session_id(), Some(4));
        assert!(hello.has_capability("urn:ietf:params:netconf:capability:candidate:1.0"));
        assert_eq!(hello.capabilities().len(), 2);
    }

    #[test]
    fn test_serialize_close_session() {
        let expected = r#"
<rpc message-id="1" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <close-session/>
</rpc>
"#;
        let close_session = Rpc::new(1, RpcOperation::CloseSession);
        assert_eq!(close_session.to_string(), expected.trim());
    }

    #[test]
    fn test_serialize_kill_session() {
        let expected = r#"
<rpc message-id="2" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <kill-session>
    <session-id>69</session-id>
  </kill-session>
</rpc>
"#;
        let kill_session = Rpc::new(2, RpcOperation::KillSession { session_id: 69 });
        assert_eq!(kill_session.to_string(), expected.trim());
    }

    #[test]
    fn test_serialize_lock() {
        let expected = r#"
<rpc message-id="5" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <lock>
    <target>
      <candidate/>
    </target>
  </lock>
</rpc>
"#;
        let lock = Rpc::new(5, RpcOperation::new_lock(Datastore::Candidate));
        assert_eq!(lock.to_string(), expected.trim());
    }

    #[test]
    fn test_serialize_get_with_subtree() {
        let filter = r#"<top xmlns="https://example.com/schema/1.2/config"><users><user><name>fred</name></user></users></top>"#;
        let get = Rpc::new(3, RpcOperation::new_get(Some(Filter::subtree(filter)), None));
        let xml = get.to_string();
        assert!(xml.starts_with(r#"<rpc message-id="3" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">"#));
        assert!(xml.contains(r#"<filter type="subtree">"#));
        assert!(xml.contains(filter));
        assert!(!xml.contains(RAW_PAYLOAD_MARKER));

        let wrapped = Filter::subtree(&format!(r#"<filter type="subtree">{}</filter>"#, filter));
        assert_eq!(wrapped, Filter::subtree(filter));
    }

    #[test]
    fn test_serialize_get_config_with_xpath() {
        let get_config = Rpc::new(
            4,
            RpcOperation::new_get_config(
                Datastore::Running,
                Some(Filter::xpath("/interfaces/interface[name='eth0']")),
                Some(WithDefaultsValue::ReportAll),
            ),
        );
        let xml = get_config.to_string();
        assert!(xml.contains("<running/>"));
        assert!(xml.contains(r#"<filter type="xpath" select="/interfaces/interface[name="#));
        assert!(xml.contains("report-all"));
        assert_eq!(
            get_config.operation().required_capabilities(),
            Capability::XPATH | Capability::WITH_DEFAULTS
        );
    }

    #[test]
    fn test_serialize_edit_config() {
        let config = r#"<config><top xmlns="http://example.com/schema/1.2/config"><interface><name>Ethernet0/0</name></interface></top></config>"#;
        let edit = Rpc::new(
            6,
            RpcOperation::new_edit_config(
                Datastore::Candidate,
                config,
                Some(DefaultOperation::Merge),
                None,
                Some(ErrorOption::RollbackOnError),
            ),
        );
        let xml = edit.to_string();
        assert!(xml.contains("<default-operation>merge</default-operation>"));
        assert!(xml.contains("<error-option>rollback-on-error</error-option>"));
        assert!(!xml.contains("<test-option>"));
        assert!(xml.contains(
            r#"<config><top xmlns="http://example.com/schema/1.2/config"><interface><name>Ethernet0/0</name></interface></top></config>"#
        ));
        assert_eq!(
            edit.operation().required_capabilities(),
            Capability::ROLLBACK_ON_ERROR
        );
    }

    #[test]
    fn test_serialize_commit() {
        let expected = r#"
<rpc message-id="7" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <commit/>
</rpc>
"#;
        let commit = Rpc::new(7, RpcOperation::new_commit(None, None, None, None));
        assert_eq!(commit.to_string(), expected.trim());
        assert_eq!(commit.operation().required_capabilities(), Capability::CANDIDATE);

        let expected = r#"
<rpc message-id="8" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <commit>
    <confirmed/>
    <confirm-timeout>120</confirm-timeout>
    <persist>persis,qqSADD</persist>
  </commit>
</rpc>
"#;
        let commit = Rpc::new(
            8,
            RpcOperation::new_commit(
                Some(()),
                Some(120),
                Some("persis,qqSADD".to_string()),
                None,
            ),
        );
        assert_eq!(commit.to_string(), expected.trim());
        assert_eq!(
            commit.operation().required_capabilities(),
            Capability::CANDIDATE | Capability::CONFIRMED_COMMIT
        );
    }

    #[test]
    fn test_serialize_validate() {
        let expected = r#"
<rpc message-id="9" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <validate>
    <source>
      <candidate/>
    </source>
  </validate>
</rpc>
"#;
        let validate = Rpc::new(9, RpcOperation::new_validate(Datastore::Candidate));
        assert_eq!(validate.to_string(), expected.trim());

        let inline = Rpc::new(10, RpcOperation::new_validate(ConfigSource::config("<top/>")));
        let xml = inline.to_string();
        assert!(xml.contains("<config>"));
        assert!(xml.contains("<top/>"));
    }

    #[test]
    fn test_copy_config_url_requires_url() {
        let copy = RpcOperation::new_copy_config(
            Datastore::Running,
            Datastore::from_str("ftp://example.com/backup.xml").unwrap(),
        );
        assert_eq!(copy.required_capabilities(), Capability::URL);
        let xml = Rpc::new(11, copy).to_string();
        assert!(xml.contains("<url>"));
        assert!(xml.contains("ftp://example.com/backup.xml"));
        assert!(xml.contains("<running/>"));
    }

    #[test]
    fn test_dispatch() {
        let dispatch = Dispatch::new("get-schema", None, None).unwrap();
        assert_eq!(dispatch.as_str(), "<get-schema/>");

        let dispatch = Dispatch::new(
            r#"<get-schema xmlns="urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring"><identifier>foo</identifier></get-schema>"#,
            None,
            None,
        )
        .unwrap();
        let xml = Rpc::new(12, RpcOperation::Dispatch(dispatch)).to_string();
        assert!(xml.starts_with(r#"<rpc message-id="12""#));
        assert!(xml.contains("<identifier>foo</identifier></get-schema>"));

        let dispatch = Dispatch::new(
            r#"<my-rpc xmlns="urn:example"/>"#,
            Some(ConfigSource::Running),
            None,
        )
        .unwrap();
        assert_eq!(
            dispatch.as_str(),
            r#"<my-rpc xmlns="urn:example"><source><running/></source></my-rpc>"#
        );

        assert!(matches!(
            Dispatch::new("  ", None, None),
            Err(NetconfClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            Dispatch::new("not a name", None, None),
            Err(NetconfClientError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_parse_options() {
        assert_eq!(
            TestOption::from_str("test_then_set").unwrap(),
            TestOption::TestThenSet
        );
        assert_eq!(
            ErrorOption::from_str("rollback-on-error").unwrap(),
            ErrorOption::RollbackOnError
        );
        assert_eq!(DefaultOperation::from_str("NONE").unwrap(), DefaultOperation::None);
        assert!(matches!(
            DefaultOperation::from_str("delete"),
            Err(NetconfClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            Filter::from_parts("regex", ".*"),
            Err(NetconfClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            Datastore::from_str("scratch"),
            Err(NetconfClientError::UnknownDatastore { .. })
        ));
    }

    #[test]
    fn test_serialize_create_subscription() {
        let expected = r#"
<rpc message-id="13" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <create-subscription xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0">
    <stream>NETCONF</stream>
    <startTime>|start|</startTime>
    <stopTime>|stop|</stopTime>
  </create-subscription>
</rpc>
"#;
        let start_time = OffsetDateTime::now_utc();
        let stop_time = start_time + time::Duration::seconds(60);
        let subscription = Rpc::new(
            13,
            RpcOperation::CreateSubscription(CreateSubscription {
                xmlns: "urn:ietf:params:xml:ns:netconf:notification:1.0".to_string(),
                stream: Some("NETCONF".to_string()),
                filter: None,
                start_time: Some(start_time),
                stop_time: Some(stop_time),
            }),
        );
        let expected = expected
            .trim()
            .replace("|start|", start_time.format(&Rfc3339).unwrap().as_str())
            .replace("|stop|", stop_time.format(&Rfc3339).unwrap().as_str());
        assert_eq!(subscription.to_string(), expected);
        assert_eq!(
            subscription.operation().required_capabilities(),
            Capability::NOTIFICATION
        );
    }

    #[test]
    fn test_strip_root() {
        assert_eq!(strip_root("<config><a/></config>", "config"), Some(("config", "<a/>")));
        assert_eq!(
            strip_root(r#"<nc:config xmlns:nc="x"> <a/> </nc:config>"#, "config"),
            Some((r#"nc:config xmlns:nc="x""#, "<a/>"))
        );
        assert_eq!(strip_root("<config/>", "config"), Some(("config", "")));
        assert_eq!(strip_root("<configure/>", "config"), None);
        assert_eq!(strip_root("<a/>", "config"), None);
    }

    /// Fails on any element or attribute prefix without a declaration in scope.
    fn assert_prefixes_bound(xml: &str) {
        let mut reader = NsReader::from_str(xml);
        loop {
            let event = match reader.read_resolved_event().unwrap() {
                (ResolveResult::Unknown(prefix), _) => {
                    panic!("unbound prefix {:?} in\n{}", String::from_utf8_lossy(&prefix), xml)
                }
                (_, Event::Eof) => break,
                (_, event) => event,
            };
            if let Event::Start(element) | Event::Empty(element) = event {
                for attribute in element.attributes() {
                    let attribute = attribute.unwrap();
                    if attribute.key.into_inner().starts_with(b"xmlns") {
                        continue;
                    }
                    if let (ResolveResult::Unknown(prefix), _) =
                        reader.resolve_attribute(attribute.key)
                    {
                        panic!("unbound prefix {:?} in\n{}", String::from_utf8_lossy(&prefix), xml);
                    }
                }
            }
        }
    }

    #[test]
    fn test_edit_config_keeps_root_namespaces() {
        let config = r#"<config xmlns:xc="urn:ietf:params:xml:ns:netconf:base:1.0">
  <top xmlns="http://example.com/schema/1.2/config">
    <interface xc:operation="delete"><name>Ethernet0/0</name></interface>
  </top>
</config>"#;
        let edit = Rpc::new(
            14,
            RpcOperation::new_edit_config(Datastore::Running, config, None, None, None),
        );
        let xml = edit.to_string();
        assert!(xml.contains(
            r#"<config xmlns:xc="urn:ietf:params:xml:ns:netconf:base:1.0"><top xmlns="http://example.com/schema/1.2/config">"#
        ));
        assert_eq!(xml.matches("<config").count(), 1);
        assert!(!xml.contains(RAW_PAYLOAD_MARKER));
        assert_prefixes_bound(&xml);
    }

    #[test]
    fn test_subtree_filter_keeps_root_namespaces() {
        let filter = Filter::subtree(
            r#"<nc:filter xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0" xmlns:if="urn:ietf:params:xml:ns:yang:ietf-interfaces" nc:type="subtree"><if:interfaces/></nc:filter>"#,
        );
        assert_eq!(
            filter.payload().map(RawXml::namespaces),
            Some(
                r#" xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0" xmlns:if="urn:ietf:params:xml:ns:yang:ietf-interfaces""#
            )
        );
        let xml = Rpc::new(15, RpcOperation::new_get(Some(filter), None)).to_string();
        assert!(xml.contains(r#"<filter type="subtree" xmlns:nc="#));
        assert!(xml.contains("<if:interfaces/></filter>"));
        assert_prefixes_bound(&xml);
    }
}
