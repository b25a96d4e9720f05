//! Resources (audio, images) attached to an alert, and signature blocks.

use base64::{Engine, engine::general_purpose::STANDARD};
use log::{error, info, warn};
use roxmltree::Node;
use sha1::{Digest, Sha1};

use crate::{cap::xml, http::HttpFetcher};

/// Where the payload of a resource comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceContent {
    /// Base64 payload embedded in the message, already integrity-checked
    Inline(Vec<u8>),
    /// Payload to download from this URI
    Remote(String),
    /// Corrupted, undecodable or missing payload
    Unavailable,
}

/// A `<resource>` block of an info.
#[derive(Debug, Clone)]
pub struct Resource {
    pub description: Option<String>,
    pub mime_type: String,
    pub size: Option<String>,
    pub uri: Option<String>,
    pub content: ResourceContent,
}

impl Resource {
    pub(crate) fn parse(node: Node) -> Self {
        let uri = xml::first_value(node, "uri");
        let content = match xml::first_value(node, "derefUri") {
            Some(encoded) => decode_inline(&encoded, xml::first_value(node, "digest"), &uri),
            None => match &uri {
                Some(uri) => ResourceContent::Remote(uri.trim().to_owned()),
                None => ResourceContent::Unavailable,
            },
        };

        Resource {
            description: xml::first_value(node, "resourceDesc"),
            mime_type: xml::first_value(node, "mimeType").unwrap_or_default(),
            size: xml::first_value(node, "size"),
            uri,
            content,
        }
    }

    /// Returns `true` if the MIME type belongs to `top_level` (`audio`, `image`...).
    pub fn is_type(&self, top_level: &str) -> bool {
        match self.mime_type.trim().parse::<mime::Mime>() {
            Ok(mime) => mime.type_().as_str().eq_ignore_ascii_case(top_level),
            Err(_) => self.mime_type.contains(top_level),
        }
    }

    /// File extension matching the MIME type, `bin` when it names no known format.
    pub fn file_extension(&self) -> &'static str {
        let subtype = match self.mime_type.trim().parse::<mime::Mime>() {
            Ok(mime) => mime.subtype().as_str().to_ascii_lowercase(),
            Err(_) => return "bin",
        };
        match subtype.as_str() {
            "wav" | "wave" | "x-wav" | "vnd.wave" => "wav",
            "ogg" | "vorbis" => "ogg",
            "flac" | "x-flac" => "flac",
            "jpeg" | "jpg" | "pjpeg" => "jpg",
            "png" => "png",
            "gif" => "gif",
            subtype if subtype == "mpeg" || subtype.ends_with("mp3") => "mp3",
            _ => "bin",
        }
    }

    /// Resolves the payload, downloading remote resources with `fetcher`.
    ///
    /// Returns `None` when the resource is unavailable; the cause is logged.
    pub async fn resolve<H: HttpFetcher>(&self, fetcher: &H) -> Option<Vec<u8>> {
        match &self.content {
            ResourceContent::Inline(data) => Some(data.clone()),
            ResourceContent::Unavailable => None,
            ResourceContent::Remote(uri) => {
                info!("fetching alert resource {}", uri);
                match fetcher.fetch(uri).await {
                    Ok(Some(data)) if !data.is_empty() => Some(data),
                    Ok(_) => {
                        warn!("error fetching alert resource {}: no content", uri);
                        None
                    }
                    Err(e) => {
                        warn!("connection error while fetching alert resource: {}", e);
                        None
                    }
                }
            }
        }
    }
}

/// Decodes an embedded base64 payload after checking its SHA-1 digest.
///
/// The digest is accepted when it matches either the decoded bytes or the
/// encoded text as transmitted, feeds in the wild use both conventions.
fn decode_inline(encoded: &str, digest: Option<String>, uri: &Option<String>) -> ResourceContent {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let data = match STANDARD.decode(compact.as_bytes()) {
        Ok(data) => data,
        Err(e) => {
            error!("error parsing base64 resource from emergency alert: {}", e);
            return ResourceContent::Unavailable;
        }
    };

    let digest = digest.unwrap_or_default().trim().to_ascii_lowercase();
    let matches = [hex::encode(Sha1::digest(&data)), hex::encode(Sha1::digest(encoded.as_bytes()))]
        .iter()
        .any(|calculated| *calculated == digest);

    if !matches {
        error!(
            "emergency alert resource corrupted: {}",
            uri.as_deref().unwrap_or("<embedded>")
        );
        return ResourceContent::Unavailable;
    }

    ResourceContent::Inline(data)
}

/// A `<Signature>` block. It is kept for reference and never verified.
#[derive(Debug, Clone)]
pub struct Signature {
    /// Raw XML of the `SignedInfo` element
    pub signed_info: Option<String>,
}

impl Signature {
    pub(crate) fn parse(node: Node, source: &str) -> Self {
        let signed_info = xml::children(node, "SignedInfo")
            .next()
            .and_then(|signed| source.get(signed.range()))
            .map(str::to_owned);
        Signature { signed_info }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockHttpFetcher;

    fn parse(xml: &str) -> Resource {
        let doc = roxmltree::Document::parse(xml).unwrap();
        Resource::parse(doc.root_element())
    }

    fn inline_resource(payload: &[u8], digest: &str) -> String {
        format!(
            "<resource><resourceDesc>tone</resourceDesc><mimeType>audio/x-ipaws-audio-mp3</mimeType>\
             <uri>tone.mp3</uri><derefUri>{}</derefUri><digest>{}</digest></resource>",
            STANDARD.encode(payload),
            digest
        )
    }

    #[test]
    fn test_inline_resource_with_matching_digest() {
        let payload = b"RIFF fake audio";
        let resource = parse(&inline_resource(payload, &hex::encode(Sha1::digest(payload))));

        assert_eq!(resource.content, ResourceContent::Inline(payload.to_vec()));
        assert!(resource.is_type("audio"));
        assert!(!resource.is_type("image"));
    }

    #[test]
    fn test_inline_resource_digest_of_encoded_text() {
        let payload = b"image bytes";
        let encoded = STANDARD.encode(payload);
        let resource = parse(&inline_resource(payload, &hex::encode(Sha1::digest(encoded.as_bytes()))));

        assert_eq!(resource.content, ResourceContent::Inline(payload.to_vec()));
    }

    #[test]
    fn test_inline_resource_with_mismatched_digest_is_unavailable() {
        let resource = parse(&inline_resource(b"audio", "0000000000000000000000000000000000000000"));
        assert_eq!(resource.content, ResourceContent::Unavailable);
    }

    #[test]
    fn test_inline_resource_without_digest_is_unavailable() {
        let resource = parse(&format!(
            "<resource><mimeType>image/jpeg</mimeType><derefUri>{}</derefUri></resource>",
            STANDARD.encode(b"jpeg")
        ));
        assert_eq!(resource.content, ResourceContent::Unavailable);
    }

    #[test]
    fn test_remote_resource() {
        let resource = parse(
            "<resource><mimeType>image/jpeg</mimeType><uri> http://example.com/a.jpg </uri></resource>",
        );

        assert!(resource.is_type("image"));
        assert_eq!(
            resource.content,
            ResourceContent::Remote("http://example.com/a.jpg".to_owned())
        );
    }

    #[tokio::test]
    async fn test_resolve_remote_resource() {
        let resource = parse("<resource><mimeType>audio/mpeg</mimeType><uri>http://x/a.mp3</uri></resource>");

        let mut fetcher = MockHttpFetcher::new();
        fetcher
            .expect_fetch()
            .with(mockall::predicate::eq("http://x/a.mp3"))
            .times(1)
            .returning(|_| Ok(Some(b"mp3".to_vec())));

        assert_eq!(resource.resolve(&fetcher).await, Some(b"mp3".to_vec()));
    }

    #[tokio::test]
    async fn test_resolve_remote_resource_not_found() {
        let resource = parse("<resource><mimeType>audio/mpeg</mimeType><uri>http://x/a.mp3</uri></resource>");

        let mut fetcher = MockHttpFetcher::new();
        fetcher.expect_fetch().times(1).returning(|_| Ok(None));

        assert_eq!(resource.resolve(&fetcher).await, None);
    }

    #[tokio::test]
    async fn test_resolve_unavailable_never_fetches() {
        let resource = parse(&inline_resource(b"audio", "bad"));
        let fetcher = MockHttpFetcher::new();

        assert_eq!(resource.resolve(&fetcher).await, None);
    }

    #[test]
    fn test_file_extension_follows_mime_type() {
        let extension = |mime: &str| {
            parse(&format!("<resource><mimeType>{}</mimeType><uri>http://x/a</uri></resource>", mime))
                .file_extension()
        };

        assert_eq!(extension("audio/mpeg"), "mp3");
        assert_eq!(extension("audio/x-ipaws-audio-mp3"), "mp3");
        assert_eq!(extension("audio/x-wav"), "wav");
        assert_eq!(extension("AUDIO/OGG"), "ogg");
        assert_eq!(extension("image/jpeg"), "jpg");
        assert_eq!(extension("image/png"), "png");
        assert_eq!(extension("audio/x-unknown"), "bin");
        assert_eq!(extension("not a mime"), "bin");
    }

    #[test]
    fn test_signature_keeps_signed_info() {
        let doc = roxmltree::Document::parse(
            "<Signature><SignedInfo><Reference URI=\"\"/></SignedInfo></Signature>",
        )
        .unwrap();
        let signature = Signature::parse(doc.root_element(), doc.input_text());

        assert_eq!(
            signature.signed_info.as_deref(),
            Some("<SignedInfo><Reference URI=\"\"/></SignedInfo>")
        );
    }
}
