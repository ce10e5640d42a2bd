//! Answer composition: prompt assembly, structured-output parsing, and fallbacks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::generation::LanguageModel;
use crate::retrieval::RetrievedChunk;

/// One data point for a chart the model extracted from the documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    /// Axis label.
    pub category: String,
    /// Numeric value for the category.
    pub value: f64,
}

/// The JSON shape the model is asked to reply with.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StructuredAnswer {
    /// Prose answer to the question.
    pub answer: String,
    /// Bullet-point takeaways.
    #[serde(default)]
    pub key_points: Vec<String>,
    /// Chartable numeric data, when the documents contain any.
    #[serde(default)]
    pub chart_data: Option<Vec<ChartPoint>>,
    /// 1-based indices of the `[Sn]` passages the answer drew on.
    #[serde(default)]
    pub cited_sources: Vec<usize>,
}

/// What the model actually returned, after parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// Reply matched the requested JSON shape.
    Structured(StructuredAnswer),
    /// Reply did not parse; kept verbatim.
    FreeText(String),
}

/// Citation pointing at a passage the answer was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    /// Citation marker number, matching `[Sn]` in the prompt.
    pub marker: usize,
    /// Document the passage came from.
    pub document_id: Uuid,
    /// Stored filename.
    pub filename: String,
    /// First chunk of the passage within its document.
    pub sequence_no: u32,
}

/// How the answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// The model answered from retrieved passages.
    Answered,
    /// Retrieval found nothing to ground an answer on.
    NoRelevantContent,
    /// The model failed after retries; sources are still reported.
    GenerationFailed,
}

/// Composed answer returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// Prose answer, empty when generation failed or nothing was retrieved.
    pub text: String,
    /// Bullet-point takeaways, empty unless the model supplied them.
    pub key_points: Vec<String>,
    /// Chartable data, when the model supplied any.
    pub chart_data: Option<Vec<ChartPoint>>,
    /// Passages the answer cites, or everything retrieved when uncited.
    pub sources: Vec<SourceRef>,
    /// How this answer came to be.
    pub outcome: AnswerOutcome,
}

/// Builds prompts and turns model replies into [`Answer`]s.
///
/// Never fails a request on model trouble: a generation error degrades to an
/// empty answer that still carries the retrieved sources so the caller can
/// point the user at the material.
pub struct AnswerComposer {
    model: Arc<dyn LanguageModel>,
}

impl AnswerComposer {
    /// Build a composer over a language model client.
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Answer a question from retrieved passages.
    pub async fn compose(&self, question: &str, retrieved: &[RetrievedChunk]) -> Answer {
        if retrieved.is_empty() {
            return Answer {
                text: String::new(),
                key_points: Vec::new(),
                chart_data: None,
                sources: Vec::new(),
                outcome: AnswerOutcome::NoRelevantContent,
            };
        }

        let prompt = build_prompt(question, retrieved);
        let reply = match self.model.generate(&prompt).await {
            Ok(reply) => reply,
            Err(error) => {
                tracing::error!(error = %error, "Generation failed; returning degraded answer");
                return Answer {
                    text: String::new(),
                    key_points: Vec::new(),
                    chart_data: None,
                    sources: all_sources(retrieved),
                    outcome: AnswerOutcome::GenerationFailed,
                };
            }
        };

        match parse_model_output(&reply) {
            ModelOutput::Structured(structured) => {
                let sources = if structured.cited_sources.is_empty() {
                    all_sources(retrieved)
                } else {
                    cited_sources(&structured.cited_sources, retrieved)
                };
                Answer {
                    text: structured.answer,
                    key_points: structured.key_points,
                    chart_data: structured.chart_data,
                    sources,
                    outcome: AnswerOutcome::Answered,
                }
            }
            ModelOutput::FreeText(text) => {
                tracing::warn!("Model reply was not structured; keeping raw text");
                Answer {
                    text,
                    key_points: Vec::new(),
                    chart_data: None,
                    sources: all_sources(retrieved),
                    outcome: AnswerOutcome::Answered,
                }
            }
        }
    }
}

/// Parse a model reply, stripping Markdown code fences first.
pub fn parse_model_output(reply: &str) -> ModelOutput {
    let stripped = reply.replace("```json", "").replace("```", "");
    let stripped = stripped.trim();
    match serde_json::from_str::<StructuredAnswer>(stripped) {
        Ok(structured) => ModelOutput::Structured(structured),
        Err(_) => ModelOutput::FreeText(reply.trim().to_string()),
    }
}

fn build_prompt(question: &str, retrieved: &[RetrievedChunk]) -> String {
    let mut context = String::new();
    for (index, chunk) in retrieved.iter().enumerate() {
        context.push_str(&format!(
            "[S{}] {} (chunk {})\n{}\n\n",
            index + 1,
            chunk.filename,
            chunk.sequence_no + 1,
            chunk.text
        ));
    }
    format!(
        "You are a helpful assistant answering questions from document excerpts. \
Each excerpt is labeled with a citation marker.\n\n\
Excerpts:\n{context}\
Question: {question}\n\n\
Reply with JSON only, in this shape:\n\
{{\n\
    \"answer\": \"your answer grounded in the excerpts\",\n\
    \"key_points\": [\"short takeaways\"],\n\
    \"chart_data\": [{{\"category\": \"label\", \"value\": 0}}],\n\
    \"cited_sources\": [1]\n\
}}\n\
Omit chart_data unless the excerpts contain numeric data worth charting. \
cited_sources lists the marker numbers you actually used."
    )
}

fn all_sources(retrieved: &[RetrievedChunk]) -> Vec<SourceRef> {
    retrieved
        .iter()
        .enumerate()
        .map(|(index, chunk)| SourceRef {
            marker: index + 1,
            document_id: chunk.document_id,
            filename: chunk.filename.clone(),
            sequence_no: chunk.sequence_no,
        })
        .collect()
}

/// Resolve 1-based citation markers, dropping out-of-range ones.
fn cited_sources(markers: &[usize], retrieved: &[RetrievedChunk]) -> Vec<SourceRef> {
    let mut sources = Vec::new();
    for &marker in markers {
        let Some(chunk) = marker.checked_sub(1).and_then(|idx| retrieved.get(idx)) else {
            tracing::warn!(marker, "Model cited a source that was not provided");
            continue;
        };
        if sources.iter().any(|existing: &SourceRef| existing.marker == marker) {
            continue;
        }
        sources.push(SourceRef {
            marker,
            document_id: chunk.document_id,
            filename: chunk.filename.clone(),
            sequence_no: chunk.sequence_no,
        });
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationError;
    use crate::processing::chunking::ByteSpan;
    use async_trait::async_trait;

    struct CannedModel {
        reply: Result<String, ()>,
    }

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            self.reply
                .clone()
                .map_err(|_| GenerationError::RateLimited)
        }
    }

    fn passage(filename: &str, sequence_no: u32, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            document_id: Uuid::new_v4(),
            filename: filename.to_string(),
            sequence_no,
            text: text.to_string(),
            span: ByteSpan {
                start: 0,
                end: text.len(),
            },
            score: 0.8,
        }
    }

    #[test]
    fn fenced_json_parses_as_structured() {
        let reply = "```json\n{\"answer\": \"Paris.\", \"cited_sources\": [1]}\n```";
        let output = parse_model_output(reply);
        match output {
            ModelOutput::Structured(structured) => {
                assert_eq!(structured.answer, "Paris.");
                assert_eq!(structured.cited_sources, vec![1]);
                assert!(structured.key_points.is_empty());
                assert!(structured.chart_data.is_none());
            }
            other => panic!("expected structured output, got {other:?}"),
        }
    }

    #[test]
    fn prose_reply_falls_back_to_free_text() {
        let output = parse_model_output("The capital is Paris.");
        assert_eq!(
            output,
            ModelOutput::FreeText("The capital is Paris.".to_string())
        );
    }

    #[tokio::test]
    async fn structured_reply_resolves_cited_sources() {
        let composer = AnswerComposer::new(Arc::new(CannedModel {
            reply: Ok(
                "{\"answer\": \"See the report.\", \"key_points\": [\"one\"], \
\"cited_sources\": [2, 2, 9]}"
                    .to_string(),
            ),
        }));
        let retrieved = vec![passage("a.txt", 0, "alpha"), passage("b.txt", 3, "beta")];

        let answer = composer.compose("what?", &retrieved).await;
        assert_eq!(answer.outcome, AnswerOutcome::Answered);
        assert_eq!(answer.text, "See the report.");
        assert_eq!(answer.key_points, vec!["one".to_string()]);
        // Marker 9 has no passage and the duplicate 2 collapses.
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].marker, 2);
        assert_eq!(answer.sources[0].filename, "b.txt");
    }

    #[tokio::test]
    async fn free_text_reply_keeps_all_sources() {
        let composer = AnswerComposer::new(Arc::new(CannedModel {
            reply: Ok("It depends.".to_string()),
        }));
        let retrieved = vec![passage("a.txt", 0, "alpha"), passage("b.txt", 1, "beta")];

        let answer = composer.compose("what?", &retrieved).await;
        assert_eq!(answer.outcome, AnswerOutcome::Answered);
        assert_eq!(answer.text, "It depends.");
        assert_eq!(answer.sources.len(), 2);
    }

    #[tokio::test]
    async fn generation_failure_degrades_with_sources() {
        let composer = AnswerComposer::new(Arc::new(CannedModel { reply: Err(()) }));
        let retrieved = vec![passage("a.txt", 0, "alpha")];

        let answer = composer.compose("what?", &retrieved).await;
        assert_eq!(answer.outcome, AnswerOutcome::GenerationFailed);
        assert!(answer.text.is_empty());
        assert_eq!(answer.sources.len(), 1);
    }

    #[tokio::test]
    async fn empty_retrieval_yields_no_relevant_content() {
        let composer = AnswerComposer::new(Arc::new(CannedModel {
            reply: Ok("unused".to_string()),
        }));

        let answer = composer.compose("what?", &[]).await;
        assert_eq!(answer.outcome, AnswerOutcome::NoRelevantContent);
        assert!(answer.sources.is_empty());
        assert!(answer.text.is_empty());
    }
}
