//! Service descriptor: what this worker tells engines about itself.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize, Serializer};

/// Content types a field can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "image/png")]
    ImagePng,
    #[serde(rename = "image/jpeg")]
    ImageJpeg,
    #[serde(rename = "application/json")]
    ApplicationJson,
    #[serde(rename = "text/plain")]
    TextPlain,
    #[serde(rename = "text/csv")]
    TextCsv,
    #[serde(rename = "application/pdf")]
    ApplicationPdf,
    #[serde(rename = "audio/mpeg")]
    AudioMpeg,
    #[serde(rename = "audio/ogg")]
    AudioOgg,
    #[serde(rename = "application/octet-stream")]
    OctetStream,
    #[serde(rename = "application/zip")]
    ApplicationZip,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImagePng => "image/png",
            Self::ImageJpeg => "image/jpeg",
            Self::ApplicationJson => "application/json",
            Self::TextPlain => "text/plain",
            Self::TextCsv => "text/csv",
            Self::ApplicationPdf => "application/pdf",
            Self::AudioMpeg => "audio/mpeg",
            Self::AudioOgg => "audio/ogg",
            Self::OctetStream => "application/octet-stream",
            Self::ApplicationZip => "application/zip",
        }
    }

    /// Whether payloads of this type are JSON documents.
    pub fn is_json(&self) -> bool {
        matches!(self, Self::ApplicationJson)
    }

    /// Whether payloads of this type are UTF-8 text.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::TextPlain | Self::TextCsv)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        [
            Self::ImagePng,
            Self::ImageJpeg,
            Self::ApplicationJson,
            Self::TextPlain,
            Self::TextCsv,
            Self::ApplicationPdf,
            Self::AudioMpeg,
            Self::AudioOgg,
            Self::OctetStream,
            Self::ApplicationZip,
        ]
        .into_iter()
        .find(|t| t.as_str() == normalized)
        .ok_or_else(|| format!("unknown content type: {s}"))
    }
}

/// A named input or output field and the content types it accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub types: Vec<FieldType>,
}

impl FieldDescription {
    pub fn new(name: impl Into<String>, types: Vec<FieldType>) -> Self {
        Self {
            name: name.into(),
            types,
        }
    }

    /// Check a declared content type string against this field.
    pub fn accepts(&self, content_type: &str) -> bool {
        content_type
            .parse::<FieldType>()
            .map(|t| self.types.contains(&t))
            .unwrap_or(false)
    }

    /// Comma-separated list of accepted types, for error messages.
    pub fn accepted_list(&self) -> String {
        self.types
            .iter()
            .map(FieldType::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Capability tag advertised to engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionUnitTag {
    pub name: String,
    pub acronym: String,
}

impl ExecutionUnitTag {
    pub fn image_processing() -> Self {
        Self {
            name: "Image Processing".to_string(),
            acronym: "IP".to_string(),
        }
    }
}

/// Availability of the worker as seen by engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Available,
    Busy,
    Unavailable,
}

impl ServiceStatus {
    fn to_u8(self) -> u8 {
        match self {
            Self::Available => 0,
            Self::Busy => 1,
            Self::Unavailable => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Available,
            1 => Self::Busy,
            _ => Self::Unavailable,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Available => "available",
            Self::Busy => "busy",
            Self::Unavailable => "unavailable",
        };
        write!(f, "{s}")
    }
}

/// Lock-free holder for the descriptor status.
///
/// Reads never observe a torn value. `Unavailable` is sticky: once the node is
/// going away, busy/idle transitions from a finishing task cannot revive it.
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new(status: ServiceStatus) -> Self {
        Self(AtomicU8::new(status.to_u8()))
    }

    pub fn get(&self) -> ServiceStatus {
        ServiceStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Available -> Busy`. Returns whether the transition happened.
    pub fn mark_busy(&self) -> bool {
        self.swap_if(ServiceStatus::Available, ServiceStatus::Busy)
    }

    /// `Busy -> Available`. Returns whether the transition happened.
    pub fn mark_idle(&self) -> bool {
        self.swap_if(ServiceStatus::Busy, ServiceStatus::Available)
    }

    pub fn mark_unavailable(&self) {
        self.0
            .store(ServiceStatus::Unavailable.to_u8(), Ordering::Release);
    }

    fn swap_if(&self, from: ServiceStatus, to: ServiceStatus) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Serialize for StatusCell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

/// What a processing unit declares about itself.
#[derive(Debug, Clone)]
pub struct UnitManifest {
    pub name: String,
    pub slug: String,
    pub summary: String,
    pub description: String,
    pub data_in_fields: Vec<FieldDescription>,
    pub data_out_fields: Vec<FieldDescription>,
    pub tags: Vec<ExecutionUnitTag>,
    pub docs_url: Option<String>,
    pub has_ai: bool,
}

/// Identity of this worker as announced to engines.
///
/// Built once at startup. Only `status` changes afterwards.
#[derive(Debug, Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub slug: String,
    pub url: String,
    pub summary: String,
    pub description: String,
    pub status: StatusCell,
    pub data_in_fields: Vec<FieldDescription>,
    pub data_out_fields: Vec<FieldDescription>,
    pub tags: Vec<ExecutionUnitTag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_url: Option<String>,
    pub has_ai: bool,
}

impl ServiceDescriptor {
    pub fn from_manifest(manifest: UnitManifest, url: impl Into<String>) -> Self {
        Self {
            name: manifest.name,
            slug: manifest.slug,
            url: url.into(),
            summary: manifest.summary,
            description: manifest.description,
            status: StatusCell::new(ServiceStatus::Available),
            data_in_fields: manifest.data_in_fields,
            data_out_fields: manifest.data_out_fields,
            tags: manifest.tags,
            docs_url: manifest.docs_url,
            has_ai: manifest.has_ai,
        }
    }

    pub fn status(&self) -> ServiceStatus {
        self.status.get()
    }

    pub fn input_field(&self, name: &str) -> Option<&FieldDescription> {
        self.data_in_fields.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> UnitManifest {
        UnitManifest {
            name: "Test Unit".into(),
            slug: "test-unit".into(),
            summary: "summary".into(),
            description: "description".into(),
            data_in_fields: vec![FieldDescription::new(
                "image",
                vec![FieldType::ImagePng, FieldType::ImageJpeg],
            )],
            data_out_fields: vec![FieldDescription::new(
                "result",
                vec![FieldType::ApplicationJson],
            )],
            tags: vec![ExecutionUnitTag::image_processing()],
            docs_url: None,
            has_ai: false,
        }
    }

    #[test]
    fn field_type_round_trips_through_str() {
        for t in [FieldType::ImagePng, FieldType::ApplicationJson, FieldType::OctetStream] {
            assert_eq!(t.as_str().parse::<FieldType>().unwrap(), t);
        }
        assert_eq!("IMAGE/JPEG".parse::<FieldType>().unwrap(), FieldType::ImageJpeg);
        assert!("image/gif".parse::<FieldType>().is_err());
    }

    #[test]
    fn field_accepts_only_declared_types() {
        let field = FieldDescription::new("image", vec![FieldType::ImagePng, FieldType::ImageJpeg]);
        assert!(field.accepts("image/jpeg"));
        assert!(field.accepts("image/png"));
        assert!(!field.accepts("application/json"));
        assert!(!field.accepts("image/gif"));
        assert_eq!(field.accepted_list(), "image/png, image/jpeg");
    }

    #[test]
    fn status_transitions() {
        let cell = StatusCell::new(ServiceStatus::Available);
        assert!(cell.mark_busy());
        assert!(!cell.mark_busy());
        assert_eq!(cell.get(), ServiceStatus::Busy);
        assert!(cell.mark_idle());
        assert_eq!(cell.get(), ServiceStatus::Available);
    }

    #[test]
    fn unavailable_is_sticky() {
        let cell = StatusCell::new(ServiceStatus::Available);
        cell.mark_busy();
        cell.mark_unavailable();
        assert!(!cell.mark_idle());
        assert!(!cell.mark_busy());
        assert_eq!(cell.get(), ServiceStatus::Unavailable);
    }

    #[test]
    fn descriptor_serializes_current_status() {
        let descriptor = ServiceDescriptor::from_manifest(manifest(), "http://worker:9090");
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["slug"], "test-unit");
        assert_eq!(json["url"], "http://worker:9090");
        assert_eq!(json["status"], "available");
        assert_eq!(json["data_in_fields"][0]["type"][1], "image/jpeg");
        assert_eq!(json["tags"][0]["acronym"], "IP");
        assert!(json.get("docs_url").is_none());

        descriptor.status.mark_busy();
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["status"], "busy");
    }
}
