//! One user's working state and the commands that change it.
//!
//! Every command is an explicit method call; reading state through
//! [`Session::view`] or the download accessors never reaches an external API.
//! Rendered documents and generated images live as files in the session's
//! work directory and are deleted by [`Session::invalidate`], which runs at
//! the start of every generation cycle.

use crate::config::{ApiKeys, KeyStatus};
use crate::error::{SessionError, SessionResult};
use crate::models::{GenerationSettings, ImageRequest, Material, Outline, OutlineChapter};
use crate::services::assemble::{TopicImage, assemble};
use crate::services::docx::Side;
use crate::services::extract::{SourceUpload, classify_upload};
use crate::services::llm::{ContentApi, ImageApi, OutlineApi, Providers};
use crate::services::markup::strip_markup;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Message shown to the user after a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChapterMaterial {
    pub chapter: String,
    pub material: Material,
}

#[derive(Debug)]
struct SourceDocument {
    file_name: String,
    text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UploadOutcome {
    Source { file_name: String, characters: usize },
    Outline { chapters: usize },
    Material { chapter: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationReport {
    pub generated: Vec<String>,
    pub failed: Vec<String>,
    pub images_generated: usize,
    pub images_reused: usize,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Serialize)]
pub struct SessionView<'a> {
    pub id: Uuid,
    pub keys: KeyStatus,
    pub settings: &'a GenerationSettings,
    pub source: Option<SourceView<'a>>,
    pub outline: Option<&'a Outline>,
    pub selection: &'a [usize],
    pub chapters: Vec<GeneratedView<'a>>,
    pub cached_images: usize,
    pub generation_complete: bool,
    pub notices: &'a [Notice],
}

#[derive(Debug, Serialize)]
pub struct SourceView<'a> {
    pub file_name: &'a str,
    pub characters: usize,
}

#[derive(Debug, Serialize)]
pub struct GeneratedView<'a> {
    pub chapter: &'a str,
    pub title: &'a str,
    pub file_name: String,
    pub ready: bool,
}

pub struct Session {
    id: Uuid,
    work_dir: PathBuf,
    keys: ApiKeys,
    settings: GenerationSettings,
    source: Option<SourceDocument>,
    outline: Option<Outline>,
    selection: Vec<usize>,
    materials: Vec<ChapterMaterial>,
    documents: HashMap<String, PathBuf>,
    /// Keyed by [`image_cache_key`]; files are named per cycle.
    images: HashMap<String, PathBuf>,
    generation_complete: bool,
    notices: Vec<Notice>,
}

impl Session {
    pub fn new(id: Uuid, work_dir: PathBuf, keys: ApiKeys) -> Self {
        Session {
            id,
            work_dir,
            keys,
            settings: GenerationSettings::default(),
            source: None,
            outline: None,
            selection: Vec::new(),
            materials: Vec::new(),
            documents: HashMap::new(),
            images: HashMap::new(),
            generation_complete: false,
            notices: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.generation_complete
    }

    pub fn set_keys(&mut self, keys: ApiKeys) -> KeyStatus {
        self.keys.merge(keys);
        self.keys.status()
    }

    pub fn load_keys_file(&mut self, bytes: &[u8]) -> SessionResult<KeyStatus> {
        let keys = ApiKeys::from_keys_file(bytes)
            .map_err(|e| SessionError::KeysFile(e.to_string()))?;
        info!("Session {}: API keys loaded from file", self.id);
        Ok(self.set_keys(keys))
    }

    pub fn set_settings(&mut self, settings: GenerationSettings) -> &GenerationSettings {
        self.settings = settings.clamped();
        &self.settings
    }

    pub fn upload(&mut self, file_name: &str, bytes: &[u8]) -> SessionResult<UploadOutcome> {
        self.notices.clear();
        let upload = classify_upload(file_name, bytes)
            .map_err(|e| SessionError::Upload(format!("{:#}", e)))?
            .ok_or_else(|| SessionError::UnsupportedUpload(file_name.to_string()))?;

        let outcome = match upload {
            SourceUpload::Text(text) => {
                let characters = text.chars().count();
                self.source = Some(SourceDocument {
                    file_name: file_name.to_string(),
                    text,
                });
                self.outline = None;
                self.selection.clear();
                UploadOutcome::Source {
                    file_name: file_name.to_string(),
                    characters,
                }
            }
            SourceUpload::Outline(outline) => {
                let chapters = outline.chapters.len();
                self.outline = Some(outline);
                self.selection.clear();
                UploadOutcome::Outline { chapters }
            }
            SourceUpload::Material(material) => {
                self.invalidate();
                self.materials.clear();
                let chapter = material.display_title("Imported chapter").to_string();
                fs::create_dir_all(&self.work_dir)?;
                let path = self.render(&chapter, &material, &HashMap::new())?;
                self.store_document(&chapter, path);
                self.materials.push(ChapterMaterial {
                    chapter: chapter.clone(),
                    material,
                });
                self.generation_complete = true;
                UploadOutcome::Material { chapter }
            }
        };

        info!("Session {}: uploaded '{}' as {:?}", self.id, file_name, outcome);
        self.notice(NoticeLevel::Info, format!("File '{}' uploaded successfully!", file_name));
        Ok(outcome)
    }

    pub async fn process_outline<P: Providers>(
        &mut self,
        providers: &P,
    ) -> SessionResult<&Outline> {
        self.notices.clear();
        let key = self.keys.gemini.clone().ok_or(SessionError::MissingKey("Gemini"))?;
        let source = self.source.as_ref().ok_or(SessionError::NoSource)?;

        info!("Session {}: extracting outline from '{}'", self.id, source.file_name);
        let outline = providers.outline_api(&key).extract_outline(&source.text).await?;

        self.selection.clear();
        self.notice(NoticeLevel::Info, "Course outline processed successfully!".to_string());
        Ok(self.outline.insert(outline))
    }

    pub fn select(&mut self, chapters: &[usize]) -> SessionResult<&[usize]> {
        let outline = self.outline.as_ref().ok_or(SessionError::NoOutline)?;
        let len = outline.chapters.len();
        let mut selection = Vec::with_capacity(chapters.len());
        for &index in chapters {
            if index >= len {
                return Err(SessionError::InvalidSelection { index, len });
            }
            if !selection.contains(&index) {
                selection.push(index);
            }
        }
        self.selection = selection;
        Ok(&self.selection)
    }

    fn selected_chapters(&self) -> Vec<OutlineChapter> {
        let Some(outline) = &self.outline else {
            return Vec::new();
        };
        self.selection
            .iter()
            .filter_map(|&i| outline.chapters.get(i).cloned())
            .collect()
    }

    /// Releases every cached document and image and deletes their files.
    pub fn invalidate(&mut self) {
        for path in self.documents.values() {
            let _ = fs::remove_file(path);
        }
        for path in self.images.values() {
            let _ = fs::remove_file(path);
        }
        self.documents.clear();
        self.images.clear();
        self.generation_complete = false;
    }

    /// Runs one generation cycle over the selected chapters.
    ///
    /// A failing chapter or image only produces a notice; the rest of the
    /// batch continues.
    pub async fn generate<P: Providers>(
        &mut self,
        providers: &P,
    ) -> SessionResult<GenerationReport> {
        self.notices.clear();
        if self.outline.is_none() {
            return Err(SessionError::NoOutline);
        }
        let chapters = self.selected_chapters();
        if chapters.is_empty() {
            return Err(SessionError::NoSelection);
        }
        let content_key = self.keys.deepseek.clone().ok_or(SessionError::MissingKey("DeepSeek"))?;
        let image_api = if self.settings.images_enabled && self.settings.images_per_chapter > 0 {
            let image_key = self
                .keys
                .image_key()
                .ok_or(SessionError::MissingKey("image generation"))?;
            Some(providers.image_api(image_key))
        } else {
            None
        };
        let content_api = providers.content_api(&content_key);

        self.invalidate();
        self.materials.clear();
        fs::create_dir_all(&self.work_dir)?;

        let settings = self.settings.clone();
        let mut report = GenerationReport::default();
        let total = chapters.len();

        for (idx, chapter) in chapters.iter().enumerate() {
            let name = chapter.chapter.as_str();
            info!("Session {}: processing {} ({}/{})", self.id, name, idx + 1, total);

            let material = match content_api.generate_material(chapter, &settings).await {
                Ok(material) => material,
                Err(e) => {
                    warn!("Content generation failed for {}: {}", name, e);
                    self.notice(
                        NoticeLevel::Error,
                        format!("Could not generate material for {}: {}", name, e),
                    );
                    report.failed.push(name.to_string());
                    continue;
                }
            };

            let images = match &image_api {
                Some(api) => self.images_for(name, &material, api, &mut report).await,
                None => HashMap::new(),
            };

            match self.render(name, &material, &images) {
                Ok(path) => {
                    self.store_document(name, path);
                    self.notice(NoticeLevel::Info, format!("✓ Generated material for: {}", name));
                    report.generated.push(name.to_string());
                }
                Err(e) => {
                    warn!("Rendering failed for {}: {}", name, e);
                    self.notice(
                        NoticeLevel::Error,
                        format!("Could not build document for {}: {}", name, e),
                    );
                    report.failed.push(name.to_string());
                }
            }
            self.materials.push(ChapterMaterial {
                chapter: name.to_string(),
                material,
            });
        }

        if report.generated.is_empty() {
            self.notice(
                NoticeLevel::Warning,
                "No materials were generated. Please check the API responses.".to_string(),
            );
        }
        self.generation_complete = true;
        info!(
            "Session {}: generation finished, {} ok, {} failed",
            self.id,
            report.generated.len(),
            report.failed.len()
        );

        report.notices = self.notices.clone();
        Ok(report)
    }

    async fn images_for<I: ImageApi>(
        &mut self,
        chapter: &str,
        material: &Material,
        api: &I,
        report: &mut GenerationReport,
    ) -> HashMap<usize, TopicImage> {
        let mut placed = HashMap::new();
        let requests: Vec<(usize, String, ImageRequest)> = material
            .image_topics()
            .take(self.settings.images_per_chapter)
            .filter_map(|(idx, topic)| topic.image_request().map(|r| (idx, topic.topic.clone(), r)))
            .collect();

        for (idx, topic, request) in requests {
            let key = image_cache_key(&request);

            if let Some(cached) = self.images.get(&key) {
                match fs::read(cached) {
                    Ok(bytes) => {
                        debug!("Reusing cached image for {} / {}", chapter, topic);
                        report.images_reused += 1;
                        placed.insert(
                            idx,
                            TopicImage {
                                bytes,
                                ratio: request.ratio,
                            },
                        );
                        continue;
                    }
                    Err(e) => warn!("Cached image {} unreadable: {}", cached.display(), e),
                }
            }

            let image = match api.generate_image(&request).await {
                Ok(image) => image,
                Err(e) => {
                    warn!("Image generation failed for {} / {}: {}", chapter, topic, e);
                    self.notice(
                        NoticeLevel::Warning,
                        format!("Could not generate image for {} / {}: {}", chapter, topic, e),
                    );
                    continue;
                }
            };

            let file_name = format!("{}-{}.{}", key, Uuid::new_v4(), image.extension());
            let path = self.work_dir.join(file_name);
            if let Err(e) = fs::write(&path, &image.bytes) {
                warn!("Could not store image {}: {}", path.display(), e);
            } else if let Some(replaced) = self.images.insert(key, path) {
                let _ = fs::remove_file(replaced);
            }
            report.images_generated += 1;
            placed.insert(
                idx,
                TopicImage {
                    bytes: image.bytes,
                    ratio: request.ratio,
                },
            );
        }

        placed
    }

    fn render(
        &self,
        chapter: &str,
        material: &Material,
        images: &HashMap<usize, TopicImage>,
    ) -> SessionResult<PathBuf> {
        let doc = assemble(chapter, material, images, Side::random());
        let path = self.work_dir.join(format!("{}.docx", Uuid::new_v4()));
        doc.save(&path)?;
        debug!(
            "Rendered {} with {} picture(s) to {}",
            chapter,
            doc.picture_count(),
            path.display()
        );
        Ok(path)
    }

    fn store_document(&mut self, chapter: &str, path: PathBuf) {
        if let Some(replaced) = self.documents.insert(chapter.to_string(), path) {
            let _ = fs::remove_file(replaced);
        }
    }

    fn notice(&mut self, level: NoticeLevel, message: String) {
        self.notices.push(Notice { level, message });
    }

    pub fn view(&self) -> SessionView<'_> {
        SessionView {
            id: self.id,
            keys: self.keys.status(),
            settings: &self.settings,
            source: self.source.as_ref().map(|s| SourceView {
                file_name: &s.file_name,
                characters: s.text.chars().count(),
            }),
            outline: self.outline.as_ref(),
            selection: &self.selection,
            chapters: self
                .materials
                .iter()
                .map(|m| {
                    let title = m.material.display_title(&m.chapter);
                    GeneratedView {
                        chapter: &m.chapter,
                        title,
                        file_name: document_file_name(title),
                        ready: self.documents.contains_key(&m.chapter),
                    }
                })
                .collect(),
            cached_images: self.images.len(),
            generation_complete: self.is_complete(),
            notices: &self.notices,
        }
    }

    /// File name and bytes of a chapter's rendered document.
    pub fn document(&self, chapter: &str) -> SessionResult<(String, Vec<u8>)> {
        if self.materials.is_empty() {
            return Err(SessionError::NothingGenerated);
        }
        if !self.generation_complete {
            return Err(SessionError::GenerationIncomplete);
        }
        let entry = self
            .materials
            .iter()
            .find(|m| m.chapter == chapter)
            .ok_or_else(|| SessionError::DocumentNotFound(chapter.to_string()))?;
        let path = self
            .documents
            .get(chapter)
            .ok_or_else(|| SessionError::DocumentNotFound(chapter.to_string()))?;
        let bytes = fs::read(path)?;
        Ok((document_file_name(entry.material.display_title(chapter)), bytes))
    }

    pub fn outline_json(&self) -> SessionResult<Vec<u8>> {
        let outline = self.outline.as_ref().ok_or(SessionError::NoOutline)?;
        Ok(serde_json::to_vec_pretty(outline)?)
    }

    /// All materials keyed by chapter name.
    pub fn materials_json(&self) -> SessionResult<Vec<u8>> {
        if self.materials.is_empty() {
            return Err(SessionError::NothingGenerated);
        }
        let mut map = serde_json::Map::new();
        for entry in &self.materials {
            map.insert(entry.chapter.clone(), serde_json::to_value(&entry.material)?);
        }
        Ok(serde_json::to_vec_pretty(&map)?)
    }

    /// Every image prompt of the current materials, grouped by chapter and topic.
    pub fn image_prompts_text(&self) -> SessionResult<String> {
        if !self.settings.export_image_prompts {
            return Err(SessionError::PromptExportDisabled);
        }
        if self.materials.is_empty() {
            return Err(SessionError::NothingGenerated);
        }

        let mut out = String::from("Image prompts\n=============\n");
        let mut count = 0;
        for entry in &self.materials {
            let topics: Vec<_> = entry
                .material
                .image_topics()
                .filter_map(|(_, t)| t.image_request().map(|r| (t, r)))
                .collect();
            if topics.is_empty() {
                continue;
            }
            out.push_str(&format!("\nChapter: {}\n", entry.chapter));
            for (topic, request) in topics {
                count += 1;
                out.push_str(&format!("  Topic: {}\n", strip_markup(&topic.topic)));
                out.push_str(&format!(
                    "    Ratio: {} | Size: {}\n",
                    request.ratio.as_str(),
                    request.size
                ));
                out.push_str(&format!("    Prompt: {}\n", request.prompt));
            }
        }
        if count == 0 {
            out.push_str("\nNo image prompts were generated.\n");
        }
        Ok(out)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.invalidate();
        let _ = fs::remove_dir(&self.work_dir);
    }
}

/// Cache key for a generated image; the same prompt at the same ratio and
/// size is only generated once per cycle.
pub fn image_cache_key(request: &ImageRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.prompt.as_bytes());
    hasher.update(b"\0");
    hasher.update(request.ratio.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(request.size.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `Chapter 1: Cells` becomes `Chapter_1__Cells.docx`.
pub fn document_file_name(title: &str) -> String {
    let plain = strip_markup(title);
    let name: String = plain
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if name.is_empty() {
        "chapter.docx".to_string()
    } else {
        format!("{}.docx", name)
    }
}
