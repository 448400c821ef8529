use crate::models::{AspectRatio, Material};
use crate::services::docx::{DocxDocument, Side, Spacing};
use std::collections::HashMap;

const SECTION_SPACING: Spacing = Spacing::points(10, 6);
const TOPIC_SPACING: Spacing = Spacing::points(10, 0);

/// Image ready to be placed under a topic.
#[derive(Debug, Clone)]
pub struct TopicImage {
    pub bytes: Vec<u8>,
    pub ratio: AspectRatio,
}

/// Lays a chapter's material out as a document.
///
/// `images` is keyed by topic index. The first picture goes on `first_side`
/// and each following one switches sides.
pub fn assemble(
    chapter_name: &str,
    material: &Material,
    images: &HashMap<usize, TopicImage>,
    first_side: Side,
) -> DocxDocument {
    let title = material.display_title(chapter_name);
    let mut doc = DocxDocument::new();
    doc.add_heading(title, 0, SECTION_SPACING);

    if let Some(introduction) = non_empty(material.introduction.as_deref()) {
        doc.add_heading("Chapter Introduction", 1, SECTION_SPACING);
        doc.add_body(introduction);
    }

    let mut side = first_side;
    for (idx, topic) in material.topics.iter().enumerate() {
        doc.add_heading(&topic.topic, 1, TOPIC_SPACING);

        let paragraphs = topic.paragraphs();
        let image = images.get(&idx);
        // After the second paragraph, or after the only one there is.
        let image_after = paragraphs.len().min(2);

        if image_after == 0 {
            if let Some(image) = image {
                place(&mut doc, image, &mut side);
            }
        }
        for (n, paragraph) in paragraphs.iter().enumerate() {
            doc.add_body(paragraph);
            if n + 1 == image_after {
                if let Some(image) = image {
                    place(&mut doc, image, &mut side);
                }
            }
        }
    }

    if let Some(summary) = non_empty(material.summary.as_deref()) {
        doc.add_heading("Summary", 1, SECTION_SPACING);
        doc.add_body(summary);
    }

    if !material.references.is_empty() {
        doc.add_heading("References", 1, SECTION_SPACING);
        for reference in &material.references {
            doc.add_reference(&reference.citation());
        }
    }

    doc
}

fn place(doc: &mut DocxDocument, image: &TopicImage, side: &mut Side) {
    doc.add_picture(
        image.bytes.clone(),
        image.ratio.pixels(),
        image.ratio.display_extent(),
        *side,
    );
    *side = side.flipped();
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Reference, Topic, TopicContent};
    use crate::services::docx::describe;

    fn topic(name: &str, content: TopicContent) -> Topic {
        Topic {
            topic: name.into(),
            content,
            image_prompt: None,
            ratio: None,
            size: None,
        }
    }

    fn image() -> TopicImage {
        TopicImage {
            bytes: vec![0xFF, 0xD8],
            ratio: AspectRatio::Wide,
        }
    }

    fn material() -> Material {
        Material {
            title: "Cell Biology".into(),
            introduction: Some("Cells are <b>small</b>.".into()),
            topics: vec![
                topic(
                    "Membranes",
                    TopicContent::Paragraphs(vec!["P1".into(), "P2".into(), "P3".into()]),
                ),
                topic("Organelles", TopicContent::Single("Only one".into())),
            ],
            summary: Some("All done.".into()),
            references: vec![Reference {
                author: "Smith, J.".into(),
                year: "2020".into(),
                title: "A Study".into(),
                publisher: "Acme Press".into(),
                url: "http://x".into(),
            }],
        }
    }

    #[test]
    fn sections_appear_in_order() {
        let doc = assemble("Ch 1", &material(), &HashMap::new(), Side::Left);
        assert_eq!(
            describe(&doc),
            vec![
                "h0:Cell Biology",
                "h1:Chapter Introduction",
                "body:Cells are small.",
                "h1:Membranes",
                "body:P1",
                "body:P2",
                "body:P3",
                "h1:Organelles",
                "body:Only one",
                "h1:Summary",
                "body:All done.",
                "h1:References",
                "ref:Smith, J.. (2020). A Study. Acme Press. http://x",
            ]
        );
    }

    #[test]
    fn empty_sections_are_left_out() {
        let material = Material {
            title: String::new(),
            introduction: Some("  ".into()),
            topics: vec![],
            summary: None,
            references: vec![],
        };
        let doc = assemble("Fallback Name", &material, &HashMap::new(), Side::Left);
        assert_eq!(describe(&doc), vec!["h0:Fallback Name"]);
    }

    #[test]
    fn images_follow_second_or_sole_paragraph_and_alternate() {
        let images = HashMap::from([(0, image()), (1, image())]);
        let doc = assemble("Ch", &material(), &images, Side::Right);
        let lines = describe(&doc);
        let at = |needle: &str| lines.iter().position(|l| l == needle).unwrap();

        assert_eq!(at("picture:right"), at("body:P2") + 1);
        assert_eq!(at("picture:left"), at("body:Only one") + 1);
        assert_eq!(doc.picture_count(), 2);
    }

    #[test]
    fn image_without_paragraphs_follows_heading() {
        let material = Material {
            title: "T".into(),
            topics: vec![topic("Empty", TopicContent::Paragraphs(vec![]))],
            ..Material::default()
        };
        let images = HashMap::from([(0, image())]);
        let doc = assemble("T", &material, &images, Side::Left);
        assert_eq!(describe(&doc), vec!["h0:T", "h1:Empty", "picture:left"]);
    }
}
