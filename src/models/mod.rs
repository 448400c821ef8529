use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    #[serde(default)]
    pub chapters: Vec<OutlineChapter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlineChapter {
    #[serde(default)]
    pub chapter: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl Outline {
    /// Fills in names the model left blank and makes every name unique, so
    /// each chapter can key its own document.
    pub fn normalized(mut self) -> Self {
        let mut seen: HashSet<String> = HashSet::new();
        for (idx, chapter) in self.chapters.iter_mut().enumerate() {
            let trimmed = chapter.chapter.trim();
            let base = if trimmed.is_empty() {
                format!("Chapter {}", idx + 1)
            } else {
                trimmed.to_string()
            };
            let mut name = base.clone();
            let mut n = 2;
            while !seen.insert(name.clone()) {
                name = format!("{} ({})", base, n);
                n += 1;
            }
            chapter.chapter = name;
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Material {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduction: Option<String>,
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub references: Vec<Reference>,
}

impl Material {
    pub fn display_title<'a>(&'a self, chapter_name: &'a str) -> &'a str {
        if self.title.trim().is_empty() {
            chapter_name
        } else {
            &self.title
        }
    }

    /// Topics carrying an image prompt, in document order.
    pub fn image_topics(&self) -> impl Iterator<Item = (usize, &Topic)> {
        self.topics
            .iter()
            .enumerate()
            .filter(|(_, topic)| topic.image_request().is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    #[serde(default = "default_topic_name")]
    pub topic: String,
    #[serde(default)]
    pub content: TopicContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

fn default_topic_name() -> String {
    "Topic".to_string()
}

impl Topic {
    pub fn paragraphs(&self) -> Vec<&str> {
        match &self.content {
            TopicContent::Single(text) => vec![text.as_str()],
            TopicContent::Paragraphs(items) => items.iter().map(String::as_str).collect(),
        }
    }

    pub fn image_request(&self) -> Option<ImageRequest> {
        let prompt = self.image_prompt.as_deref()?.trim();
        if prompt.is_empty() {
            return None;
        }
        Some(ImageRequest {
            prompt: prompt.to_string(),
            ratio: self
                .ratio
                .as_deref()
                .and_then(AspectRatio::parse)
                .unwrap_or_default(),
            size: self
                .size
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_IMAGE_SIZE.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicContent {
    Paragraphs(Vec<String>),
    Single(String),
}

impl Default for TopicContent {
    fn default() -> Self {
        TopicContent::Single(String::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default)]
    pub author: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub year: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub url: String,
}

impl Reference {
    /// `Author. (Year). <i>Title</i>. Publisher. URL`, still carrying markup.
    pub fn citation(&self) -> String {
        format!(
            "{}. ({}). <i>{}</i>. {}. {}",
            self.author, self.year, self.title, self.publisher, self.url
        )
        .trim_end()
        .to_string()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

pub const DEFAULT_IMAGE_SIZE: &str = "1K";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Wide,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
}

const EMU_PER_INCH: f64 = 914_400.0;

impl AspectRatio {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "16:9" => Some(AspectRatio::Wide),
            "4:3" => Some(AspectRatio::Standard),
            "3:4" => Some(AspectRatio::Portrait),
            "1:1" => Some(AspectRatio::Square),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Wide => "16:9",
            AspectRatio::Standard => "4:3",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Square => "1:1",
        }
    }

    /// Nominal pixel size of a picture at this ratio. Pictures are embedded
    /// with these dimensions and scaled to [`AspectRatio::display_extent`].
    pub fn pixels(self) -> (u32, u32) {
        match self {
            AspectRatio::Wide => (1344, 768),
            AspectRatio::Standard => (1184, 864),
            AspectRatio::Portrait => (864, 1184),
            AspectRatio::Square => (1024, 1024),
        }
    }

    /// Width and height in EMU when placed in a document.
    pub fn display_extent(self) -> (u32, u32) {
        let width_in = match self {
            AspectRatio::Wide => 4.0,
            AspectRatio::Standard => 3.5,
            AspectRatio::Portrait => 2.5,
            AspectRatio::Square => 3.0,
        };
        let (w, h) = self.pixels();
        let height_in = width_in * f64::from(h) / f64::from(w);
        (
            (width_in * EMU_PER_INCH).round() as u32,
            (height_in * EMU_PER_INCH).round() as u32,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub ratio: AspectRatio,
    pub size: String,
}

/// Image encodings a document can embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
}

impl ImageFormat {
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let essence = mime_type.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/png" => Some(ImageFormat::Png),
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            "image/gif" => Some(ImageFormat::Gif),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Gif => "gif",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

impl GeneratedImage {
    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locality {
    Philippines,
    International,
    #[default]
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub images_enabled: bool,
    pub images_per_chapter: usize,
    pub locality: Locality,
    pub export_image_prompts: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            images_enabled: false,
            images_per_chapter: 1,
            locality: Locality::Both,
            export_image_prompts: false,
        }
    }
}

impl GenerationSettings {
    pub fn clamped(mut self) -> Self {
        self.temperature = self.temperature.clamp(0.0, 1.0);
        self
    }
}
