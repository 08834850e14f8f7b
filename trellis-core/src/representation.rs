//! Representations and content negotiation.
//!
//! A [`Representation`] renders resource [`Data`] for one content type.
//! The main stage picks one per request from the `Accept` header (or the
//! tweaker's override), falling back to `tangled.app.default_content_type`.
//!
//! ```
//! use trellis_core::representation::{negotiate_media_type, Accept};
//!
//! let accept = Accept::parse("text/plain;q=0.5, application/json");
//! let best = negotiate_media_type(&accept, &["text/plain", "application/json"]);
//! assert_eq!(best, Some("application/json"));
//! ```

use crate::application::Application;
use crate::error::{DispatchError, Error, Result};
use crate::resource::Data;
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Converts objects the JSON encoder does not know into JSON values
pub type EncoderDefault = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Option<Value> + Send + Sync>;

/// Serializes resource data to bytes
pub trait Encoder: Send + Sync {
    fn encode(&self, data: &Data, args: &Map<String, Value>, default: Option<&EncoderDefault>) -> Result<Vec<u8>>;
}

/// The default JSON encoder.
///
/// Honours a boolean `pretty` representation argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, data: &Data, args: &Map<String, Value>, default: Option<&EncoderDefault>) -> Result<Vec<u8>> {
        let value = match data {
            Data::None => Value::Null,
            Data::Json(value) => value.clone(),
            Data::Text(text) => Value::String(text.clone()),
            Data::Object(object) => default
                .and_then(|hook| hook(object.as_ref()))
                .ok_or_else(|| Error::Serialization("Object is not JSON serializable".to_string()))?,
            Data::Response(_) => {
                return Err(Error::Internal("Responses are not encoded".to_string()));
            }
        };

        let pretty = args.get("pretty").and_then(Value::as_bool).unwrap_or(false);
        let encoded = if pretty {
            serde_json::to_vec_pretty(&value)
        } else {
            serde_json::to_vec(&value)
        };
        encoded.map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Renders data for a content type
pub trait Renderer: Send + Sync {
    fn render(&self, app: &Application, data: &Data, args: &Map<String, Value>) -> Result<Vec<u8>>;
}

/// Renders through the application's configured JSON encoder
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, app: &Application, data: &Data, args: &Map<String, Value>) -> Result<Vec<u8>> {
        app.json_encoder().encode(data, args, app.encoder_default())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextRenderer;

impl Renderer for TextRenderer {
    fn render(&self, _app: &Application, data: &Data, _args: &Map<String, Value>) -> Result<Vec<u8>> {
        match data {
            Data::None => Ok(Vec::new()),
            Data::Text(text) => Ok(text.clone().into_bytes()),
            Data::Json(Value::String(text)) => Ok(text.clone().into_bytes()),
            Data::Json(value) => Ok(value.to_string().into_bytes()),
            Data::Object(_) | Data::Response(_) => Err(Error::Dispatch(DispatchError::NotAcceptable(
                "text/plain".to_string(),
            ))),
        }
    }
}

/// A content type, its URL extension and renderer
#[derive(Clone)]
pub struct Representation {
    pub content_type: String,
    pub extension: Option<String>,
    renderer: Arc<dyn Renderer>,
}

impl Representation {
    pub fn new(content_type: impl Into<String>, extension: Option<&str>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            content_type: content_type.into(),
            extension: extension.map(|ext| ext.trim_start_matches('.').to_string()),
            renderer,
        }
    }

    pub fn json() -> Self {
        Self::new("application/json", Some("json"), Arc::new(JsonRenderer))
    }

    pub fn text() -> Self {
        Self::new("text/plain", Some("txt"), Arc::new(TextRenderer))
    }

    pub fn render(&self, app: &Application, data: &Data, args: &Map<String, Value>) -> Result<Vec<u8>> {
        self.renderer.render(app, data, args)
    }

    /// Value for the Content-Type header
    pub fn header_value(&self) -> String {
        if self.content_type.starts_with("text/") && !self.content_type.contains("charset") {
            format!("{}; charset=utf-8", self.content_type)
        } else {
            self.content_type.clone()
        }
    }
}

impl fmt::Debug for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Representation")
            .field("content_type", &self.content_type)
            .field("extension", &self.extension)
            .finish()
    }
}

/// Registered representations, in registration order
#[derive(Debug, Clone)]
pub struct Representations {
    entries: Vec<Representation>,
}

impl Default for Representations {
    fn default() -> Self {
        Self {
            entries: vec![Representation::json(), Representation::text()],
        }
    }
}

impl Representations {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Register a representation, replacing one with the same content type
    pub fn add(&mut self, representation: Representation) {
        match self
            .entries
            .iter_mut()
            .find(|r| r.content_type == representation.content_type)
        {
            Some(existing) => *existing = representation,
            None => self.entries.push(representation),
        }
    }

    pub fn get(&self, content_type: &str) -> Option<&Representation> {
        self.entries.iter().find(|r| r.content_type == content_type)
    }

    pub fn by_extension(&self, extension: &str) -> Option<&Representation> {
        self.entries
            .iter()
            .find(|r| r.extension.as_deref() == Some(extension))
    }

    pub fn content_types(&self) -> Vec<&str> {
        self.entries.iter().map(|r| r.content_type.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick the representation for a request.
    ///
    /// `accept` is the effective Accept value; with no match the default
    /// content type is used, which must itself be registered.
    pub fn negotiate(&self, accept: Option<&str>, default_content_type: &str) -> Result<&Representation> {
        let offers = self.content_types();
        let chosen = accept
            .map(Accept::parse)
            .and_then(|accept| negotiate_media_type(&accept, &offers))
            .unwrap_or(default_content_type);

        self.get(chosen)
            .ok_or_else(|| Error::Dispatch(DispatchError::NotAcceptable(chosen.to_string())))
    }
}

/// A media type without parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    pub type_: String,
    pub subtype: String,
}

impl MediaType {
    pub fn parse(s: &str) -> Option<Self> {
        let essence = s.split(';').next()?.trim();
        let (type_, subtype) = essence.split_once('/')?;
        let (type_, subtype) = (type_.trim(), subtype.trim());
        if type_.is_empty() || subtype.is_empty() {
            return None;
        }
        Some(Self {
            type_: type_.to_lowercase(),
            subtype: subtype.to_lowercase(),
        })
    }

    /// Check if this media range covers `other`
    pub fn matches(&self, other: &MediaType) -> bool {
        let type_matches = self.type_ == "*" || self.type_ == other.type_;
        let subtype_matches = self.subtype == "*" || self.subtype == other.subtype;
        type_matches && subtype_matches
    }

    fn specificity(&self) -> u8 {
        let mut score = 0u8;
        if self.type_ != "*" {
            score += 2;
        }
        if self.subtype != "*" {
            score += 1;
        }
        score
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_, self.subtype)
    }
}

/// A parsed Accept header
#[derive(Debug, Clone, Default)]
pub struct Accept {
    pub media_ranges: Vec<(MediaType, f32)>,
}

impl Accept {
    pub fn parse(header: &str) -> Self {
        let media_ranges = header
            .split(',')
            .filter_map(|part| {
                let part = part.trim();
                if part.is_empty() {
                    return None;
                }
                let quality = part
                    .split(';')
                    .skip(1)
                    .filter_map(|param| param.split_once('='))
                    .find(|(key, _)| key.trim().eq_ignore_ascii_case("q"))
                    .and_then(|(_, q)| q.trim().parse::<f32>().ok())
                    .unwrap_or(1.0)
                    .clamp(0.0, 1.0);
                MediaType::parse(part).map(|mt| (mt, quality))
            })
            .collect();

        Self { media_ranges }
    }

    /// Quality of the most specific range covering `media_type`
    pub fn quality_for(&self, media_type: &MediaType) -> f32 {
        self.media_ranges
            .iter()
            .filter(|(range, _)| range.matches(media_type))
            .max_by_key(|(range, _)| range.specificity())
            .map(|(_, quality)| *quality)
            .unwrap_or(0.0)
    }
}

/// Pick the offer the client prefers; ties keep offer order
pub fn negotiate_media_type<'a>(accept: &Accept, offers: &[&'a str]) -> Option<&'a str> {
    let mut best: Option<(&'a str, f32)> = None;

    for offer in offers {
        let Some(media_type) = MediaType::parse(offer) else {
            continue;
        };
        let quality = accept.quality_for(&media_type);
        if quality <= 0.0 {
            continue;
        }
        match best {
            Some((_, best_q)) if quality <= best_q => {}
            _ => best = Some((offer, quality)),
        }
    }

    best.map(|(offer, _)| offer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accept_quality_uses_most_specific_range() {
        let accept = Accept::parse("*/*;q=1, text/plain;q=0");
        assert_eq!(accept.quality_for(&MediaType::parse("text/plain").unwrap()), 0.0);
        assert_eq!(accept.quality_for(&MediaType::parse("application/json").unwrap()), 1.0);
    }

    #[test]
    fn test_negotiate_prefers_quality_then_order() {
        let offers = ["application/json", "text/plain"];
        assert_eq!(
            negotiate_media_type(&Accept::parse("text/plain, application/json;q=0.8"), &offers),
            Some("text/plain")
        );
        assert_eq!(negotiate_media_type(&Accept::parse("*/*"), &offers), Some("application/json"));
        assert_eq!(negotiate_media_type(&Accept::parse("image/png"), &offers), None);
    }

    #[test]
    fn test_registry_negotiation_falls_back_to_default() {
        let reprs = Representations::default();
        assert_eq!(
            reprs.negotiate(Some("image/png"), "application/json").unwrap().content_type,
            "application/json"
        );
        assert_eq!(reprs.negotiate(Some("text/*"), "application/json").unwrap().content_type, "text/plain");
        assert_eq!(reprs.negotiate(None, "text/plain").unwrap().content_type, "text/plain");

        let err = reprs.negotiate(None, "text/html").unwrap_err();
        assert_eq!(err.status_code(), 406);
    }

    #[test]
    fn test_registry_lookup_and_replace() {
        let mut reprs = Representations::default();
        assert_eq!(reprs.by_extension("txt").unwrap().content_type, "text/plain");
        reprs.add(Representation::new("text/plain", Some("text"), Arc::new(TextRenderer)));
        assert_eq!(reprs.len(), 2);
        assert!(reprs.by_extension("txt").is_none());
        assert!(reprs.by_extension("text").is_some());
    }

    #[test]
    fn test_json_encoder() {
        let encoder = JsonEncoder;
        let mut args = Map::new();
        assert_eq!(encoder.encode(&Data::Json(json!({"a": 1})), &args, None).unwrap(), br#"{"a":1}"#);

        args.insert("pretty".into(), Value::Bool(true));
        let pretty = encoder.encode(&Data::Json(json!({"a": 1})), &args, None).unwrap();
        assert!(String::from_utf8(pretty).unwrap().contains('\n'));
    }

    #[test]
    fn test_json_encoder_default_hook() {
        struct Point(i32, i32);

        let hook: EncoderDefault = Arc::new(|object: &(dyn Any + Send + Sync)| {
            object.downcast_ref::<Point>().map(|p| json!([p.0, p.1]))
        });
        let data = Data::object(Point(1, 2));

        assert!(JsonEncoder.encode(&data, &Map::new(), None).is_err());
        assert_eq!(JsonEncoder.encode(&data, &Map::new(), Some(&hook)).unwrap(), b"[1,2]");
    }

    #[test]
    fn test_header_value_adds_charset_for_text() {
        assert_eq!(Representation::text().header_value(), "text/plain; charset=utf-8");
        assert_eq!(Representation::json().header_value(), "application/json");
    }
}
