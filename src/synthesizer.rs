//! Síntesis de la respuesta: ensamblado del prompt fundamentado y
//! guardarraíles de dominio.
//!
//! Fases por petición:
//!   AwaitingRetrieval → Grounded → Generating → Done
//!   AwaitingRetrieval → Ungrounded → RefusalOrCaveat → Done
//! La segunda rama se toma cuando ningún chunk supera el umbral de similitud
//! (o el índice no devolvió nada) y decide entre rechazo explícito o
//! respuesta con aviso según `require_grounding`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::GuardrailConfig;
use crate::error::{RagError, Result};
use crate::models::{Answer, Citation, RetrievalResult, ScoredEntry};
use crate::retry::RetryPolicy;

/// Contrato con el modelo generativo: prompt de sistema + prompt de usuario
/// dentro, texto generado fuera.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, system_prompt: &str, prompt: &str, max_tokens: u64) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SynthesisPhase {
    AwaitingRetrieval,
    Grounded,
    Ungrounded,
    Generating,
    RefusalOrCaveat,
    Done,
}

pub struct Synthesizer {
    backend: Arc<dyn GenerationBackend>,
    guardrails: GuardrailConfig,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Synthesizer {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        guardrails: GuardrailConfig,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self { backend, guardrails, timeout, retry }
    }

    /// Genera una respuesta fundamentada en los chunks recuperados. La capa
    /// de presentación siempre recibe una `Answer` (quizá con aviso) o un
    /// error tipado, nunca contenido inventado sin contexto que lo respalde.
    pub async fn answer(&self, question: &str, retrieval: &RetrievalResult) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::Input("la pregunta está vacía".into()));
        }

        let mut phase = SynthesisPhase::AwaitingRetrieval;
        debug!("Fase de síntesis: {phase:?}");

        if self.guardrails.refuse_out_of_domain && !self.question_in_domain(question) {
            debug!("Pregunta fuera de dominio rechazada sin llamar al modelo");
            return Ok(self.refusal_out_of_domain());
        }

        // Sólo fundamentan la respuesta los chunks que superan el umbral.
        let usable: Vec<&ScoredEntry> = retrieval
            .chunks
            .iter()
            .filter(|c| c.score >= self.guardrails.score_threshold)
            .collect();

        phase = if usable.is_empty() { SynthesisPhase::Ungrounded } else { SynthesisPhase::Grounded };
        debug!("Fase de síntesis: {phase:?} ({} chunks útiles)", usable.len());

        if usable.is_empty() {
            phase = SynthesisPhase::RefusalOrCaveat;
            debug!("Fase de síntesis: {phase:?}");
            if self.guardrails.require_grounding {
                return Ok(self.refusal_no_grounding());
            }
            // Sin fundamento pero con permiso para contestar: se genera sin
            // contexto y se marca la respuesta con un aviso.
            let text = self
                .generate(&format!("Question: {question}\n\nContext:\n(no supporting documents)"))
                .await?;
            return Ok(Answer {
                text,
                grounding: Vec::new(),
                caveat: Some(
                    "No supporting documents were found for this answer; treat it with caution."
                        .to_string(),
                ),
            });
        }

        let assembled = build_context(&usable, self.guardrails.context_budget_chars);

        phase = SynthesisPhase::Generating;
        debug!("Fase de síntesis: {phase:?} ({} chunks en el prompt)", assembled.used.len());
        let text = self
            .generate(&format!("Question: {question}\n\nContext:\n{}", assembled.context))
            .await?;

        phase = SynthesisPhase::Done;
        debug!("Fase de síntesis: {phase:?}");

        let grounding = assembled
            .used
            .iter()
            .map(|c| Citation {
                chunk_id: c.entry.chunk_id.clone(),
                title: c.entry.title.clone(),
                source: c.entry.source.clone(),
                score: c.score,
            })
            .collect();

        Ok(Answer {
            text,
            grounding,
            caveat: assembled.truncated.then(|| {
                "Note: the supporting context was truncated to fit the configured limit."
                    .to_string()
            }),
        })
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let system_prompt = self.system_prompt();
        let max_tokens = self.guardrails.max_answer_tokens;
        self.retry
            .run("generate", || {
                let system_prompt = system_prompt.clone();
                async move {
                    match tokio::time::timeout(
                        self.timeout,
                        self.backend.generate(&system_prompt, prompt, max_tokens),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(RagError::GenerationProvider {
                            message: format!(
                                "timeout tras {:?} esperando al modelo generativo",
                                self.timeout
                            ),
                            transient: true,
                        }),
                    }
                }
            })
            .await
    }

    fn question_in_domain(&self, question: &str) -> bool {
        if self.guardrails.domain_terms.is_empty() {
            return true;
        }
        let q = question.to_lowercase();
        q.contains(&self.guardrails.domain_name.to_lowercase())
            || self.guardrails.domain_terms.iter().any(|t| q.contains(t.as_str()))
    }

    fn refusal_out_of_domain(&self) -> Answer {
        let domain = &self.guardrails.domain_name;
        Answer {
            text: format!(
                "Sorry, I can only help with {domain}-related questions. If you meant something \
                 else, can you tell me how it relates to the {domain}?"
            ),
            grounding: Vec::new(),
            caveat: Some("The question was outside the assistant's domain.".to_string()),
        }
    }

    fn refusal_no_grounding(&self) -> Answer {
        let domain = &self.guardrails.domain_name;
        Answer {
            text: format!(
                "Sorry, I do not know the answer to that question. It might help to check the \
                 official {domain} website or speak directly with their helpline."
            ),
            grounding: Vec::new(),
            caveat: Some(
                "No document in the index supports an answer to this question.".to_string(),
            ),
        }
    }

    fn system_prompt(&self) -> String {
        let domain = &self.guardrails.domain_name;
        format!(
            r#"You are the {domain} Assistant, a helpful guide that explains {domain} information in plain English.

Use only what is provided in the numbered context. Never invent names, links or numbers; if the context does not contain the answer, say so clearly instead of guessing.

If someone asks you to assess or decide eligibility, explain that you cannot, and describe what the documents say about how eligibility works.

If someone sounds like they are in danger or mentions self-harm, stop and reply with care: tell them to call 000 right now if they are in danger, and that Lifeline is available at 13 11 14, anytime.

Answer directly, cite the context number right after each fact, keep the language simple, and use bullets for steps. Be warm, concise and professional."#
        )
    }
}

struct AssembledContext<'a> {
    context: String,
    used: Vec<&'a ScoredEntry>,
    truncated: bool,
}

/// Construye los bloques numerados `[i] texto (Source: ...)` del prompt,
/// del más al menos relevante, recortando al presupuesto de caracteres:
/// primero se descartan los chunks peor ranqueados; si ni el mejor cabe
/// entero, se recorta su texto y la respuesta lleva aviso de truncado.
fn build_context<'a>(chunks: &[&'a ScoredEntry], budget_chars: usize) -> AssembledContext<'a> {
    let mut context = String::new();
    let mut used = Vec::new();
    let mut truncated = false;

    for (i, scored) in chunks.iter().enumerate() {
        let reference = if scored.entry.source.to_lowercase().starts_with("http") {
            format!("{} - {}", scored.entry.title, scored.entry.source)
        } else {
            scored.entry.title.clone()
        };
        let body: String = scored.entry.text.split_whitespace().collect::<Vec<_>>().join(" ");
        let block = format!("[{}] {}\n(Source: {})", i + 1, body, reference);

        let separator = if context.is_empty() { 0 } else { 2 };
        if context.chars().count() + separator + block.chars().count() > budget_chars {
            if used.is_empty() {
                // Ni el chunk mejor ranqueado cabe entero: se recorta en vez
                // de descartar la consulta.
                let suffix = format!("\n(Source: {reference})");
                let room = budget_chars
                    .saturating_sub(suffix.chars().count())
                    .saturating_sub("[1] ".chars().count());
                let cut: String = body.chars().take(room).collect();
                context = format!("[1] {cut}{suffix}");
                used.push(*scored);
                truncated = true;
            }
            break;
        }

        if separator > 0 {
            context.push_str("\n\n");
        }
        context.push_str(&block);
        used.push(*scored);
    }

    AssembledContext { context, used, truncated }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IndexEntry, SourceType};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Doble que registra el último prompt recibido.
    #[derive(Default)]
    struct RecordingBackend {
        llamadas: AtomicU32,
        fallos_iniciales: AtomicU32,
        ultimo_prompt: Mutex<Option<String>>,
    }

    #[async_trait]
    impl GenerationBackend for RecordingBackend {
        async fn generate(&self, _system: &str, prompt: &str, _max_tokens: u64) -> Result<String> {
            self.llamadas.fetch_add(1, Ordering::SeqCst);
            let pendientes = self.fallos_iniciales.load(Ordering::SeqCst);
            if pendientes > 0 {
                self.fallos_iniciales.store(pendientes - 1, Ordering::SeqCst);
                return Err(RagError::GenerationProvider {
                    message: "reset de conexión".into(),
                    transient: true,
                });
            }
            *self.ultimo_prompt.lock().unwrap() = Some(prompt.to_string());
            Ok("respuesta generada".to_string())
        }
    }

    fn scored(chunk_id: &str, score: f64, text: &str) -> ScoredEntry {
        ScoredEntry {
            score,
            entry: IndexEntry {
                chunk_id: chunk_id.into(),
                doc_id: "doc".into(),
                title: "Guía NDIS".into(),
                source: "guia.pdf".into(),
                source_type: SourceType::Pdf,
                text: text.into(),
                content_sha: format!("sha-{chunk_id}"),
                vector: vec![],
            },
        }
    }

    fn synthesizer(backend: Arc<RecordingBackend>, guardrails: GuardrailConfig) -> Synthesizer {
        Synthesizer::new(
            backend,
            guardrails,
            Duration::from_secs(5),
            RetryPolicy::new(3, Duration::from_millis(1), 0.0).unwrap(),
        )
    }

    #[tokio::test]
    async fn solo_los_chunks_sobre_el_umbral_entran_en_el_prompt() {
        let backend = Arc::new(RecordingBackend::default());
        let s = synthesizer(backend.clone(), GuardrailConfig::default());

        let retrieval = RetrievalResult {
            chunks: vec![
                scored("alto", 0.92, "NDIS funding covers approved supports"),
                scored("bajo", 0.4, "unrelated boilerplate text"),
            ],
        };

        let answer = s.answer("What is NDIS funding?", &retrieval).await.unwrap();
        assert_eq!(answer.grounding.len(), 1);
        assert_eq!(answer.grounding[0].chunk_id, "alto");

        let prompt = backend.ultimo_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("NDIS funding covers approved supports"));
        assert!(!prompt.contains("unrelated boilerplate"));
    }

    #[tokio::test]
    async fn sin_contexto_y_con_grounding_obligatorio_rechaza_sin_llamar_al_modelo() {
        let backend = Arc::new(RecordingBackend::default());
        let s = synthesizer(backend.clone(), GuardrailConfig::default());

        let answer = s.answer("What is NDIS funding?", &RetrievalResult::default()).await.unwrap();
        assert!(answer.text.contains("I do not know"));
        assert!(answer.caveat.is_some());
        assert!(answer.grounding.is_empty());
        assert_eq!(backend.llamadas.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sin_grounding_obligatorio_contesta_con_aviso() {
        let backend = Arc::new(RecordingBackend::default());
        let guardrails = GuardrailConfig { require_grounding: false, ..Default::default() };
        let s = synthesizer(backend.clone(), guardrails);

        let answer = s.answer("What is NDIS funding?", &RetrievalResult::default()).await.unwrap();
        assert_eq!(answer.text, "respuesta generada");
        assert!(answer.caveat.unwrap().contains("treat it with caution"));
        assert_eq!(backend.llamadas.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fuera_de_dominio_rechaza_antes_de_generar() {
        let backend = Arc::new(RecordingBackend::default());
        let guardrails = GuardrailConfig { refuse_out_of_domain: true, ..Default::default() };
        let s = synthesizer(backend.clone(), guardrails);

        let retrieval = RetrievalResult { chunks: vec![scored("a", 0.9, "texto")] };
        let answer = s.answer("What's a good lasagna recipe?", &retrieval).await.unwrap();
        assert!(answer.text.contains("NDIS-related questions"));
        assert_eq!(backend.llamadas.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn presupuesto_minimo_recorta_el_mejor_chunk_con_aviso() {
        let backend = Arc::new(RecordingBackend::default());
        let guardrails = GuardrailConfig { context_budget_chars: 80, ..Default::default() };
        let s = synthesizer(backend.clone(), guardrails);

        let retrieval = RetrievalResult {
            chunks: vec![scored("grande", 0.9, &"palabra ".repeat(100))],
        };

        let answer = s.answer("What is NDIS funding?", &retrieval).await.unwrap();
        assert!(answer.caveat.unwrap().contains("truncated"));
        assert_eq!(answer.grounding.len(), 1);

        let prompt = backend.ultimo_prompt.lock().unwrap().clone().unwrap();
        // El contexto respeta el presupuesto configurado.
        let context = prompt.split("Context:\n").nth(1).unwrap();
        assert!(context.chars().count() <= 80);
    }

    #[tokio::test]
    async fn el_presupuesto_descarta_primero_los_chunks_peor_ranqueados() {
        let backend = Arc::new(RecordingBackend::default());
        let guardrails = GuardrailConfig { context_budget_chars: 120, ..Default::default() };
        let s = synthesizer(backend.clone(), guardrails);

        let retrieval = RetrievalResult {
            chunks: vec![
                scored("primero", 0.9, "respuesta principal sobre el NDIS"),
                scored("segundo", 0.8, &"relleno ".repeat(50)),
            ],
        };

        let answer = s.answer("What is NDIS funding?", &retrieval).await.unwrap();
        // El mejor cabe entero; el peor se descarta sin aviso de truncado.
        assert_eq!(answer.grounding.len(), 1);
        assert_eq!(answer.grounding[0].chunk_id, "primero");
        assert!(answer.caveat.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dos_fallos_transitorios_del_modelo_se_reintentan() {
        let backend = Arc::new(RecordingBackend {
            fallos_iniciales: AtomicU32::new(2),
            ..Default::default()
        });
        let s = synthesizer(backend.clone(), GuardrailConfig::default());

        let retrieval = RetrievalResult { chunks: vec![scored("a", 0.9, "texto útil")] };
        let answer = s.answer("What is NDIS funding?", &retrieval).await.unwrap();
        assert_eq!(answer.text, "respuesta generada");
        assert_eq!(backend.llamadas.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn pregunta_vacia_es_error_de_entrada() {
        let backend = Arc::new(RecordingBackend::default());
        let s = synthesizer(backend, GuardrailConfig::default());
        let err = s.answer("  ", &RetrievalResult::default()).await.unwrap_err();
        assert!(matches!(err, RagError::Input(_)));
    }
}
