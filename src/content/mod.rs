use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod client;

pub use client::ChatClient;

use crate::store::Topic;
use crate::Result;

/// Number of slides in every lesson
pub const SLIDE_COUNT: usize = 4;

/// Four ordered slides plus the narration derived from them.
///
/// Built fresh for each run and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonContent {
    slides: [String; SLIDE_COUNT],
    narration: String,
}

impl LessonContent {
    /// Validate the slides and derive the narration transcript
    pub fn new(slides: [String; SLIDE_COUNT]) -> Result<Self> {
        let slides = slides.map(|s| s.trim().to_string());
        if let Some(blank) = slides.iter().position(|s| s.is_empty()) {
            anyhow::bail!("slide{} is empty", blank + 1);
        }

        let narration = narration_for(&slides);
        Ok(Self { slides, narration })
    }

    /// Read `slide1`..`slide4` from a model reply. Missing or non-string slides are an error.
    pub fn from_json(value: &Value) -> Result<Self> {
        let mut slides: [String; SLIDE_COUNT] = Default::default();
        for (i, slot) in slides.iter_mut().enumerate() {
            let key = format!("slide{}", i + 1);
            *slot = value
                .get(&key)
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("reply is missing '{}'", key))?
                .to_string();
        }
        Self::new(slides)
    }

    pub fn slides(&self) -> &[String; SLIDE_COUNT] {
        &self.slides
    }

    pub fn title(&self) -> &str {
        &self.slides[0]
    }

    /// Text to synthesize for the whole lesson
    pub fn narration(&self) -> &str {
        &self.narration
    }
}

fn narration_for(slides: &[String; SLIDE_COUNT]) -> String {
    let examples = slides[2]
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(". ");

    format!("{}. {}. {}. {}", slides[0], slides[1], examples, slides[3])
}

/// Turns a topic into lesson text
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LessonGenerator: Send + Sync {
    async fn generate_lesson(&self, topic: &Topic) -> Result<LessonContent>;
}

const DRAFT_SYSTEM: &str = "You are an expert in early-childhood education. You speak in very few, simple words. Return only valid JSON.";

const POLISH_SYSTEM: &str = "You are a kid-friendly editor specialised in extreme simplicity and engagement. Return only valid JSON.";

/// Lesson generator backed by a chat completion model
pub struct LessonWriter {
    client: ChatClient,
    polish: bool,
}

impl LessonWriter {
    pub fn new(client: ChatClient, polish: bool) -> Self {
        Self { client, polish }
    }

    fn draft_prompt(topic: &Topic) -> String {
        format!(
            r#"Create a 4-slide educational lesson for young children (ages 2-5).

TOPIC: {subtopic} ({main_topic}, {category})

RULES:
1. Use as few words as possible.
2. No animals, people or living creatures.
3. slide1 (title): 1-2 words.
4. slide2 (what is it?): one short sentence, at most 5 words.
5. slide3 (examples): 3 simple objects, one word each, separated by newlines.
6. slide4 (action): one short instruction, at most 4 words.

Return ONLY JSON:
{{"slide1": "Title", "slide2": "Simple sentence.", "slide3": "Word1\nWord2\nWord3", "slide4": "Action!"}}"#,
            subtopic = topic.subtopic,
            main_topic = topic.main_topic,
            category = topic.category,
        )
    }

    fn polish_prompt(draft: &LessonContent) -> String {
        let s = draft.slides();
        format!(
            r#"Make these 4 slides happier, simpler and shorter for a 3-year-old. Keep the same meaning and the same structure (slide3 stays three words on separate lines). No animals or people.

1: {}
2: {}
3: {}
4: {}

Return ONLY JSON with keys slide1, slide2, slide3, slide4."#,
            s[0], s[1], s[2], s[3]
        )
    }

    async fn polish(&self, draft: LessonContent) -> LessonContent {
        let reply = self.client
            .complete_json(POLISH_SYSTEM, &Self::polish_prompt(&draft))
            .await
            .and_then(|value| LessonContent::from_json(&value));

        match reply {
            Ok(polished) => {
                tracing::debug!("Lesson polished");
                polished
            }
            Err(e) => {
                tracing::warn!("Polish pass failed, keeping draft: {:#}", e);
                draft
            }
        }
    }
}

#[async_trait]
impl LessonGenerator for LessonWriter {
    async fn generate_lesson(&self, topic: &Topic) -> Result<LessonContent> {
        tracing::info!(topic_id = topic.id, model = %self.client.model(), "Generating lesson for: {}", topic.label());

        let value = self.client
            .complete_json(DRAFT_SYSTEM, &Self::draft_prompt(topic))
            .await?;
        let draft = LessonContent::from_json(&value)?;

        if self.polish {
            Ok(self.polish(draft).await)
        } else {
            Ok(draft)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slides(a: &str, b: &str, c: &str, d: &str) -> [String; SLIDE_COUNT] {
        [a.to_string(), b.to_string(), c.to_string(), d.to_string()]
    }

    #[test]
    fn test_narration_joins_examples() {
        let lesson = LessonContent::new(slides("Letter A", "A says Ah!", "Apple\nAnt\nAxe", "Say Ah!")).unwrap();
        assert_eq!(lesson.narration(), "Letter A. A says Ah!. Apple. Ant. Axe. Say Ah!");
        assert_eq!(lesson.title(), "Letter A");
    }

    #[test]
    fn test_blank_slide_is_rejected() {
        let err = LessonContent::new(slides("Title", "  ", "x", "y")).unwrap_err();
        assert!(err.to_string().contains("slide2"));
    }

    #[test]
    fn test_from_json_requires_every_slide() {
        let ok = json!({"slide1": "Red", "slide2": "Red is bright.", "slide3": "Ball\nCar\nCup", "slide4": "Find red!"});
        assert_eq!(LessonContent::from_json(&ok).unwrap().slides()[2], "Ball\nCar\nCup");

        let missing = json!({"slide1": "Red", "slide2": "Red is bright.", "slide4": "Find red!"});
        assert!(LessonContent::from_json(&missing).is_err());

        let wrong_type = json!({"slide1": 1, "slide2": "a", "slide3": "b", "slide4": "c"});
        assert!(LessonContent::from_json(&wrong_type).is_err());
    }
}
