//! Prompt text for the outline, write and illustrate stages.
//!
//! Every prompt lives here so wording changes never touch the retry or
//! orchestration code, and tests can inspect prompts without a backend.

/// Fixed art direction appended to every image prompt.
pub const IMAGE_STYLE: &str = "Style: Children's storybook illustration with vivid colors, \
especially azure and emerald tones with gold accents. The illustration should have the \
whimsical quality of early 20th-century storybook art, blending realism with fantasy \
elements. Rich textures, soft luminous lighting, magical atmosphere with depth and \
dimensionality. No text in the image.";

/// Characters of chapter text carried into an illustration description.
const SCENE_EXCERPT_CHARS: usize = 400;

const OUTLINER_PREAMBLE: &str = "You are an imaginative story outliner who lays the \
foundation of captivating stories for children aged 4-8. You create engaging narratives \
that teach valuable lessons while entertaining young readers.";

const WRITER_PREAMBLE: &str = "You are a talented children's storyteller. You bring an \
outline to life with age-appropriate language, dialogue and vivid description, keeping \
character voices consistent.";

/// Prompt for the outline stage.
pub fn outline_prompt(topic: &str, chapters: usize) -> String {
    format!(
        r#"{OUTLINER_PREAMBLE}

Create a comprehensive outline for a children's storybook about {topic}.

The outline must include:
1. A compelling story title related to {topic}
2. {chapters} chapter titles that flow logically, each with a brief summary
3. Character profiles: names, appearance, personality and role
4. The main plot points and story arc
5. Setting descriptions appropriate for {topic}
6. Age-appropriate themes and lessons

Output plain Markdown. Do not add commentary before or after the outline."#
    )
}

/// Prompt for the write stage; the outline is passed as context.
pub fn write_prompt(topic: &str, outline: &str, chapters: usize) -> String {
    format!(
        r#"{WRITER_PREAMBLE}

Using the outline below, write the complete story about {topic}.

Requirements:
- Start with the story title as a level-1 heading: `# <Title>`
- Write exactly {chapters} chapters, each introduced by a level-2 heading
  of the form `## Chapter <number>: <Chapter Title>`
- Each chapter should be approximately 100 words
- Include dialogue and descriptive elements
- Give each chapter a clear beginning, middle and conclusion
- Do not include images, image links or notes to the illustrator
- Do not wrap the output in code fences

OUTLINE:
"""
{outline}
""""#
    )
}

/// Scene description for one chapter's illustration.
///
/// Built from the chapter itself rather than asking the text backend, so
/// illustrating costs no text quota.
pub fn illustration_description(title: &str, content: &str) -> String {
    let excerpt: String = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(SCENE_EXCERPT_CHARS)
        .collect();
    if excerpt.is_empty() {
        title.trim().to_string()
    } else {
        format!("{}. {}", title.trim(), excerpt)
    }
}

/// Full image prompt: scene description followed by [`IMAGE_STYLE`].
pub fn image_prompt(description: &str) -> String {
    format!("{}\n\n{IMAGE_STYLE}", description.trim())
}
