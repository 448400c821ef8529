use crate::models::{GenerationSettings, Locality, OutlineChapter};

pub fn outline_prompt(course_outline_text: &str) -> String {
    format!(
        r#"Analyze the following course outline and extract chapters and topics in JSON format.
The JSON should have a structure like this:
{{
    "chapters": [
        {{
            "chapter": "Chapter Name",
            "topics": ["Topic 1", "Topic 2", "Topic 3"]
        }}
    ]
}}

Ensure that topics are specific and detailed enough to generate comprehensive reading materials.
Course Outline:
{}"#,
        course_outline_text
    )
}

fn locality_instruction(locality: Locality) -> &'static str {
    match locality {
        Locality::Philippines => {
            "Ground explanations, examples, and case studies in the Philippine context, and prefer Philippine sources in the references."
        }
        Locality::International => {
            "Use examples, case studies, and references drawn from an international, global context."
        }
        Locality::Both => {
            "Balance Philippine examples and case studies with international perspectives, and cite both local and international sources."
        }
    }
}

fn image_instruction(settings: &GenerationSettings) -> String {
    if !settings.images_enabled || settings.images_per_chapter == 0 {
        return "Do not include image_prompt, ratio, or size fields.".to_string();
    }
    format!(
        r#"Choose up to {} topic(s) that benefit most from an illustration. For each chosen topic add:
- "image_prompt": a detailed description of an educational illustration for that topic
- "ratio": one of "16:9", "4:3", "3:4", "1:1"
- "size": "1K" or "2K"
Leave those fields out for every other topic."#,
        settings.images_per_chapter
    )
}

pub fn content_prompt(chapter: &OutlineChapter, settings: &GenerationSettings) -> String {
    format!(
        r#"You are an expert educator. Generate detailed, well-structured reading material for the following chapter and topics.
Use your reasoning capabilities to provide comprehensive explanations, examples, and connections between concepts.
Return the response in JSON format with the following structure:
{{
    "title": "Chapter Title",
    "introduction": "Brief introduction to the chapter",
    "topics": [
        {{
            "topic": "Topic Name",
            "content": [
                "Content paragraph 1",
                "Content paragraph 2",
                "Content paragraph 3"
            ]
        }}
    ],
    "summary": "Summary of the chapter",
    "references": [
        {{
            "author": "Author, A.",
            "year": "2020",
            "title": "Title of the work",
            "publisher": "Publisher",
            "url": "https://example.org"
        }}
    ]
}}

When generating content, use HTML-like tags to emphasize important words or concepts:
- Use <b> and </b> for bold formatting (for key terms, definitions, important concepts)
- Use <i> and </i> for italic formatting (for examples, clarifications, or special notes)

Chapter: {}
Topics: {}

- For each topic, generate 3-5 paragraphs depending on the complexity and length of explanation needed.
- Ensure the content is comprehensive, well-structured, and suitable for college-level students.
- {}
- Add a summary at the end and 3-5 real, verifiable references.
- {}"#,
        chapter.chapter,
        chapter.topics.join(", "),
        locality_instruction(settings.locality),
        image_instruction(settings)
    )
}
