use async_trait::async_trait;
use serde_json::Value;

use super::TopicGenerator;
use crate::content::ChatClient;
use crate::store::TopicCandidate;
use crate::Result;

const SYSTEM: &str = "You are an expert educator creating safe, kid-friendly educational content. Return only valid JSON.";

/// Topic generator backed by a chat completion model
pub struct TopicWriter {
    client: ChatClient,
    categories: Vec<String>,
}

impl TopicWriter {
    pub fn new(client: ChatClient, categories: Vec<String>) -> Self {
        Self { client, categories }
    }

    fn prompt(&self, count: usize) -> String {
        format!(
            r#"Generate {count} unique, educational topics for young children (ages 4-10).

RULES:
- Content must be safe and age-appropriate
- No topics about people, faces, animals or other living creatures
- Focus on concepts, manners, skills and knowledge
- Each topic should be simple, positive and easy to understand

CATEGORIES: {categories}

For each topic give a category (from the list above), a main_topic (broad concept) and a subtopic (specific lesson).

Return ONLY a JSON object:
{{"topics": [{{"category": "Good Manners", "main_topic": "Politeness", "subtopic": "Saying Thank You"}}]}}

Generate {count} diverse topics covering all categories."#,
            count = count,
            categories = self.categories.join(", "),
        )
    }
}

#[async_trait]
impl TopicGenerator for TopicWriter {
    async fn generate_topics(&self, count: usize) -> Result<Vec<TopicCandidate>> {
        tracing::info!(model = %self.client.model(), "Requesting {} topics", count);

        let reply = self.client.complete_json(SYSTEM, &self.prompt(count)).await?;
        let topics = extract_topics(&reply)?;

        tracing::info!("Model returned {} valid topics", topics.len());
        Ok(topics)
    }
}

/// Pull topic candidates out of a model reply.
///
/// Accepts `{"topics": [...]}`, a bare array, or the first array-valued field.
/// Entries missing any of the three fields are discarded.
pub fn extract_topics(reply: &Value) -> Result<Vec<TopicCandidate>> {
    let list = match reply {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("topics").and_then(Value::as_array) {
            Some(items) => items,
            None => map
                .values()
                .find_map(Value::as_array)
                .ok_or_else(|| anyhow::anyhow!("No topic list found in model reply"))?,
        },
        _ => anyhow::bail!("Unexpected model reply shape"),
    };

    let field = |item: &Value, key: &str| item.get(key).and_then(Value::as_str).map(str::to_string);

    let topics = list
        .iter()
        .filter_map(|item| {
            let category = field(item, "category")?;
            let main_topic = field(item, "main_topic")?;
            let subtopic = field(item, "subtopic")?;
            TopicCandidate::new(&category, &main_topic, &subtopic)
        })
        .collect();

    Ok(topics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_from_topics_key() {
        let reply = json!({"topics": [
            {"category": "Math Basics", "main_topic": "Counting", "subtopic": "Numbers 1 to 5"},
            {"category": "Math Basics", "main_topic": "Counting"},
            {"category": "", "main_topic": "Shapes", "subtopic": "Circle"}
        ]});
        let topics = extract_topics(&reply).unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].subtopic, "Numbers 1 to 5");
    }

    #[test]
    fn test_extract_from_bare_array_and_other_key() {
        let item = json!({"category": "Self-Care", "main_topic": "Hygiene", "subtopic": "Washing Hands"});
        assert_eq!(extract_topics(&json!([item.clone()])).unwrap().len(), 1);
        assert_eq!(extract_topics(&json!({"items": [item]})).unwrap().len(), 1);
    }

    #[test]
    fn test_extract_without_list_fails() {
        assert!(extract_topics(&json!({"message": "sorry"})).is_err());
        assert!(extract_topics(&json!("text")).is_err());
    }
}
