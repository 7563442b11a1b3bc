use super::{
    ChatCompletionChoice, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    ChunkChoice, Delta, MessageContent, ResponseMessage, Usage,
};
use crate::estimator;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Tunables for the synthetic response content, mirroring
/// `original_source/mock_generator.py::MockResponseConfig`.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorConfig {
    pub min_output_tokens: u32,
    pub max_output_tokens: u32,
    pub avg_output_tokens: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            min_output_tokens: 50,
            max_output_tokens: 500,
            avg_output_tokens: 150,
        }
    }
}

const RESPONSE_TEMPLATES: &[&str] = &[
    "I understand you're asking about: {topic}. Let me provide a comprehensive response.",
    "Based on your question regarding {topic}, here's my analysis.",
    "Regarding {topic}, I can share the following insights.",
    "Let me help you with your question about {topic}.",
];

const FILLER_SENTENCES: &[&str] = &[
    "This is an important consideration in modern applications.",
    "The implications are significant for system design.",
    "Multiple factors should be taken into account.",
    "This approach offers several advantages.",
    "Let me elaborate on this point further.",
    "The technical details are quite fascinating.",
    "This represents a common challenge in the field.",
    "Understanding these concepts is crucial for success.",
];

const FALLBACK_RESPONSE: &str = "Hello! I'm a mock AI assistant. How can I help you today?";

pub struct CompletionGenerator {
    config: GeneratorConfig,
}

impl Default for CompletionGenerator {
    fn default() -> Self {
        Self::new(GeneratorConfig::default())
    }
}

impl CompletionGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// One-shot mode: builds the full response in one call.
    pub fn generate(
        &self,
        request: &ChatCompletionRequest,
        charged_output_tokens: u64,
    ) -> ChatCompletionResponse {
        let prompt_tokens = estimator::estimate_input(&request.messages);
        let completion_tokens = self.sample_output_tokens(charged_output_tokens);
        let content = self.render_content(request, completion_tokens);

        ChatCompletionResponse {
            id: new_request_id(),
            object: "chat.completion".to_string(),
            created: unix_now(),
            model: request.model.clone(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason: "stop".to_string(),
            }],
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        }
    }

    /// Streaming mode: role-delta, N content-deltas, terminal usage event.
    /// The literal `[DONE]` sentinel is appended by the ingress handler,
    /// not here — this returns only the JSON-bearing events.
    pub fn generate_stream(
        &self,
        request: &ChatCompletionRequest,
        charged_output_tokens: u64,
    ) -> Vec<ChatCompletionChunk> {
        let id = new_request_id();
        let created = unix_now();
        let prompt_tokens = estimator::estimate_input(&request.messages);
        let completion_tokens = self.sample_output_tokens(charged_output_tokens);
        let content = self.render_content(request, completion_tokens);
        let chunks = split_into_chunks(&content);

        let mut events = Vec::with_capacity(chunks.len() + 2);

        events.push(ChatCompletionChunk {
            id: id.clone(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: request.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    role: Some("assistant".to_string()),
                    content: None,
                },
                finish_reason: None,
            }],
            usage: None,
        });

        for chunk in chunks {
            events.push(ChatCompletionChunk {
                id: id.clone(),
                object: "chat.completion.chunk".to_string(),
                created,
                model: request.model.clone(),
                choices: vec![ChunkChoice {
                    index: 0,
                    delta: Delta {
                        role: None,
                        content: Some(chunk),
                    },
                    finish_reason: None,
                }],
                usage: None,
            });
        }

        events.push(ChatCompletionChunk {
            id,
            object: "chat.completion.chunk".to_string(),
            created,
            model: request.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta::default(),
                finish_reason: Some("stop".to_string()),
            }],
            usage: Some(Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        });

        events
    }

    /// Sample a realistic output token count: a Gaussian around the
    /// configured average, clamped to `[min_output_tokens,
    /// max_output_tokens]` and to the charged worst-case ceiling (the
    /// charge is never exceeded by what's actually produced — §9 Open
    /// Questions resolves this as: charge worst-case, produce at-or-under).
    fn sample_output_tokens(&self, ceiling: u64) -> u64 {
        let mean = self.config.avg_output_tokens as f64;
        let std_dev = ((self.config.max_output_tokens - self.config.min_output_tokens) / 6).max(1) as f64;

        let sample = gaussian_sample(mean, std_dev);
        let clamped = sample
            .max(self.config.min_output_tokens as f64)
            .min(self.config.max_output_tokens as f64) as u64;

        clamped.min(ceiling).max(1)
    }

    fn render_content(&self, request: &ChatCompletionRequest, target_tokens: u64) -> String {
        let Some(last) = request.messages.last() else {
            return FALLBACK_RESPONSE.to_string();
        };
        let user_content = message_text(&last.content);
        if user_content.is_empty() && request.messages.is_empty() {
            return FALLBACK_RESPONSE.to_string();
        }

        let mut rng = rand::thread_rng();
        let template = RESPONSE_TEMPLATES[rng.gen_range(0..RESPONSE_TEMPLATES.len())];
        let topic: String = if user_content.chars().count() > 50 {
            format!("{}...", user_content.chars().take(50).collect::<String>())
        } else {
            user_content
        };
        let base_response = template.replace("{topic}", &topic);

        // Words-per-token approximation, matching the original's 0.75 ratio.
        let target_words = ((target_tokens as f64) * 0.75) as usize;
        let mut words: Vec<&str> = base_response.split_whitespace().collect();
        let mut word_count = words.len();

        let mut filler_words: Vec<&str> = Vec::new();
        while word_count + filler_words.len() < target_words {
            let sentence = FILLER_SENTENCES[rng.gen_range(0..FILLER_SENTENCES.len())];
            filler_words.extend(sentence.split_whitespace());
        }
        words.extend(filler_words);
        word_count = words.len();

        if word_count > target_words {
            words.truncate(target_words);
        }

        words.join(" ")
    }
}

fn message_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(s) => s.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Split content into 5-10 roughly-equal chunks by word count, matching
/// `mock_generator.py::_split_into_chunks`.
fn split_into_chunks(content: &str) -> Vec<String> {
    let words: Vec<&str> = content.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let mut rng = rand::thread_rng();
    let num_chunks = rng.gen_range(5..=10).min(words.len()).max(1);
    let words_per_chunk = (words.len() / num_chunks).max(1);

    words
        .chunks(words_per_chunk)
        .map(|c| c.join(" "))
        .filter(|c| !c.trim().is_empty())
        .collect()
}

/// Sample from a normal distribution via the Box-Muller transform — avoids
/// pulling in `rand_distr` (absent from the corpus) for a single
/// distribution.
fn gaussian_sample(mean: f64, std_dev: f64) -> f64 {
    let mut rng = rand::thread_rng();
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let z0 = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    mean + z0 * std_dev
}

fn new_request_id() -> String {
    format!("mock_req_{}", uuid::Uuid::new_v4().simple())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ChatMessage;

    fn request(max_tokens: Option<u32>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "gpt-3.5-turbo".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: MessageContent::Text("Explain sliding windows".to_string()),
            }],
            max_tokens,
            temperature: None,
            stream: None,
        }
    }

    #[test]
    fn one_shot_usage_is_consistent() {
        let gen = CompletionGenerator::default();
        let req = request(Some(50));
        let resp = gen.generate(&req, 50);
        assert_eq!(
            resp.usage.total_tokens,
            resp.usage.prompt_tokens + resp.usage.completion_tokens
        );
        assert!(resp.usage.completion_tokens <= 50);
        assert_eq!(resp.choices[0].finish_reason, "stop");
        assert_eq!(resp.choices[0].message.role, "assistant");
    }

    #[test]
    fn stream_shape_matches_contract() {
        let gen = CompletionGenerator::default();
        let req = request(Some(80));
        let events = gen.generate_stream(&req, 80);

        assert!(events.len() >= 3);
        let first = &events[0];
        assert_eq!(first.choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(first.choices[0].finish_reason, None);

        let last = events.last().unwrap();
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(last.usage.is_some());
        assert!(last.choices[0].delta.content.is_none());

        for mid in &events[1..events.len() - 1] {
            assert!(mid.choices[0].delta.content.is_some());
            assert_eq!(mid.choices[0].finish_reason, None);
        }

        let ids: std::collections::HashSet<_> = events.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids.len(), 1, "every event shares the same id");
    }

    #[test]
    fn never_exceeds_charged_ceiling() {
        let gen = CompletionGenerator::default();
        let req = request(Some(5));
        for _ in 0..20 {
            let resp = gen.generate(&req, 5);
            assert!(resp.usage.completion_tokens <= 5);
        }
    }
}
