//! Image generation with graceful degradation.
//!
//! [`ImageGenerationClient::generate`] issues exactly one request per
//! description and always returns an [`ImageResult`]. Any failure (non-200,
//! timeout, undecodable bytes, unwritable file) yields a tagged placeholder
//! so the story can still be formatted.

use crate::config::{ImageParams, StorybookConfig, HUGGINGFACE_API_KEY_VAR};
use crate::error::StorybookError;
use crate::prompts::image_prompt;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Tag that marks a placeholder reference.
pub const PLACEHOLDER_PREFIX: &str = "PLACEHOLDER:";

/// Characters of the description kept in a placeholder.
const PLACEHOLDER_CHARS: usize = 100;

/// Words of the description used for the file name.
const FILENAME_WORDS: usize = 5;

/// A saved image or a textual stand-in for one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ImageResult {
    Saved(PathBuf),
    /// The (truncated, sanitised) description, without the tag.
    Placeholder(String),
}

impl ImageResult {
    /// Build a placeholder from a raw description.
    pub fn placeholder(description: &str) -> Self {
        ImageResult::Placeholder(placeholder_text(description))
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, ImageResult::Placeholder(_))
    }

    /// The string embedded as an image source: a path or `PLACEHOLDER: …`.
    pub fn reference(&self) -> String {
        match self {
            ImageResult::Saved(path) => path.display().to_string(),
            ImageResult::Placeholder(text) => format!("{PLACEHOLDER_PREFIX} {text}"),
        }
    }
}

/// Truncate to 100 characters and drop characters that would break a
/// Markdown image link.
fn placeholder_text(description: &str) -> String {
    let cleaned: String = description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '[' | ']'))
        .collect();
    if cleaned.chars().count() > PLACEHOLDER_CHARS {
        let head: String = cleaned.chars().take(PLACEHOLDER_CHARS).collect();
        format!("{}...", head.trim_end())
    } else {
        cleaned
    }
}

/// Deterministic file name from the first words of a description.
pub fn image_filename(description: &str) -> String {
    let stem = description
        .split_whitespace()
        .take(FILENAME_WORDS)
        .map(|w| {
            w.chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase();
    if stem.trim_matches('_').is_empty() {
        "illustration.png".to_string()
    } else {
        format!("{stem}.png")
    }
}

/// Anything that can illustrate a scene description.
///
/// Implementations must not fail: degrade to [`ImageResult::Placeholder`].
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn illustrate(&self, description: &str) -> ImageResult;
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: &'a ImageParams,
}

/// Calls a text-to-image inference endpoint.
pub struct ImageGenerationClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    params: ImageParams,
    output_dir: PathBuf,
}

impl ImageGenerationClient {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        params: ImageParams,
        timeout_secs: u64,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, StorybookError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StorybookError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: url.into(),
            api_key: api_key.into(),
            params,
            output_dir: output_dir.into(),
        })
    }

    pub fn from_config(config: &StorybookConfig) -> Result<Self, StorybookError> {
        let key = config.huggingface_api_key.as_deref().ok_or_else(|| {
            StorybookError::InvalidConfig(format!("{HUGGINGFACE_API_KEY_VAR} is not set"))
        })?;
        Self::new(
            &config.image_api_url,
            key,
            config.image,
            config.image_timeout_secs,
            &config.output_dir,
        )
    }

    /// Generate and save one illustration, or fall back to a placeholder.
    pub async fn generate(&self, description: &str) -> ImageResult {
        let preview: String = description.chars().take(50).collect();
        info!("Generating image for: {preview}...");

        match self.try_generate(description).await {
            Ok(path) => {
                info!("Image saved: {}", path.display());
                ImageResult::Saved(path)
            }
            Err(reason) => {
                warn!("Image generation failed ({reason}); using placeholder");
                ImageResult::placeholder(description)
            }
        }
    }

    async fn try_generate(&self, description: &str) -> Result<PathBuf, String> {
        let prompt = image_prompt(description);
        let body = InferenceRequest {
            inputs: &prompt,
            parameters: &self.params,
        };

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    e.to_string()
                }
            })?;

        let status = response.status();
        if status.as_u16() != 200 {
            return Err(match status.as_u16() {
                429 => "rate limit exceeded".to_string(),
                503 => "service temporarily unavailable".to_string(),
                code => format!("HTTP {code}"),
            });
        }

        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        let path = self.output_dir.join(image_filename(description));
        save_image(bytes.to_vec(), path).await
    }
}

#[async_trait]
impl ImageBackend for ImageGenerationClient {
    async fn illustrate(&self, description: &str) -> ImageResult {
        self.generate(description).await
    }
}

/// Decode `bytes` and re-encode as PNG at `path`, off the async runtime.
async fn save_image(bytes: Vec<u8>, path: PathBuf) -> Result<PathBuf, String> {
    tokio::task::spawn_blocking(move || {
        let img = image::load_from_memory(&bytes).map_err(|e| format!("decode: {e}"))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| format!("create dir: {e}"))?;
        }
        img.save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| format!("save {}: {e}", path.display()))?;
        Ok(path)
    })
    .await
    .map_err(|e| format!("image task panicked: {e}"))?
}

/// `true` when `reference` is a placeholder rather than a path.
pub fn is_placeholder_reference(reference: &str) -> bool {
    reference.trim_start().starts_with(PLACEHOLDER_PREFIX)
}

/// Strip the tag from a placeholder reference.
pub fn placeholder_description(reference: &str) -> Option<&str> {
    reference
        .trim_start()
        .strip_prefix(PLACEHOLDER_PREFIX)
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_server::{self, Canned};
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;
    use std::path::Path;

    fn png_bytes() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 128, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn client(url: &str, dir: &Path, timeout_secs: u64) -> ImageGenerationClient {
        ImageGenerationClient::new(url, "hf_test", ImageParams::default(), timeout_secs, dir).unwrap()
    }

    #[test]
    fn filename_from_first_five_words() {
        assert_eq!(
            image_filename("The Brave Little Fox's Journey Home Tonight"),
            "the_brave_little_foxs_journey.png"
        );
        assert_eq!(image_filename("  !!! ??? "), "illustration.png");
        assert_eq!(image_filename(""), "illustration.png");
    }

    #[test]
    fn placeholder_truncates_long_descriptions() {
        let long = "a".repeat(150);
        let ImageResult::Placeholder(text) = ImageResult::placeholder(&long) else {
            unreachable!()
        };
        assert_eq!(text.chars().count(), 103);
        assert!(text.ends_with("..."));
    }

    #[test]
    fn short_placeholder_has_no_ellipsis() {
        let r = ImageResult::placeholder("a fox in a meadow");
        assert_eq!(r.reference(), "PLACEHOLDER: a fox in a meadow");
    }

    #[test]
    fn placeholder_strips_link_breaking_chars() {
        let r = ImageResult::placeholder("a fox (red) in [tall] grass");
        assert_eq!(r.reference(), "PLACEHOLDER: a fox red in tall grass");
    }

    #[test]
    fn reference_helpers() {
        assert!(is_placeholder_reference("PLACEHOLDER: a fox"));
        assert!(!is_placeholder_reference("images/fox.png"));
        assert_eq!(placeholder_description("PLACEHOLDER:  a fox "), Some("a fox"));
    }

    #[tokio::test]
    async fn non_200_yields_placeholder_with_description_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server::spawn(vec![Canned::json(503, r#"{"error":"loading"}"#)]).await;
        let c = client(&server.url, dir.path(), 5);

        let result = c.generate("a fox in a meadow at sunset").await;
        assert!(result.is_placeholder());
        assert!(result.reference().contains("a fox in a meadow"));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn success_saves_png_named_from_description() {
        let dir = tempfile::tempdir().unwrap();
        let server =
            test_server::spawn(vec![Canned::bytes(200, "image/png", png_bytes())]).await;
        let c = client(&server.url, dir.path(), 5);

        let result = c.generate("Milo the Dragon flies high").await;
        let expected = dir.path().join("milo_the_dragon_flies_high.png");
        assert_eq!(result, ImageResult::Saved(expected.clone()));
        assert!(expected.is_file());

        let request = server.requests.lock().unwrap()[0].clone();
        assert!(request.to_lowercase().contains("authorization: bearer hf_test"));
        assert!(request.contains("\"guidance_scale\":7.5"));
        assert!(request.contains("No text in the image."));
    }

    #[tokio::test]
    async fn undecodable_body_yields_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let server =
            test_server::spawn(vec![Canned::bytes(200, "image/png", b"not an image".to_vec())]).await;
        let c = client(&server.url, dir.path(), 5);
        assert!(c.generate("a fox").await.is_placeholder());
    }

    #[tokio::test]
    async fn timeout_yields_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server::spawn(vec![Canned::Hang]).await;
        let c = client(&server.url, dir.path(), 1);
        assert!(c.generate("a slow fox").await.is_placeholder());
    }

    #[tokio::test]
    async fn unreachable_backend_yields_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        // Bind then drop so the port refuses connections.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let c = client(&format!("http://{addr}"), dir.path(), 2);
        assert!(c.generate("a lost fox").await.is_placeholder());
    }
}
