//! Troceado de documentos en segmentos acotados con solape.
//!
//! Función pura: mismo documento + misma configuración = mismos chunks.
//! Garantías:
//!   - cada carácter del texto origen queda cubierto por al menos un chunk;
//!   - ningún chunk supera `max_chunk_size` caracteres;
//!   - chunks consecutivos comparten `overlap` caracteres de texto crudo;
//!   - un documento vacío produce cero chunks (no es un error).

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Document};

/// Trocea el texto de un documento según la configuración dada.
pub fn chunk_document(doc: &Document, cfg: &ChunkingConfig) -> Vec<Chunk> {
    chunk_text(&doc.text, &doc.doc_id, cfg)
}

/// El id de cada chunk es función determinista de `doc_id` + offset inicial,
/// de modo que re-ingerir un documento re-emplaza sus entradas en el índice.
pub fn chunk_id_for(doc_id: &str, start_offset: usize) -> String {
    format!("{doc_id}_{start_offset}")
}

fn chunk_text(text: &str, doc_id: &str, cfg: &ChunkingConfig) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    // Offsets en caracteres; los cortes caen siempre en límite de carácter.
    let chars: Vec<char> = text.chars().collect();
    let byte_offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let n = chars.len();
    let byte_at = |ci: usize| if ci >= n { text.len() } else { byte_offsets[ci] };

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let hard_end = (start + cfg.max_chunk_size).min(n);
        let end = if hard_end < n {
            preferred_cut(&chars, start, hard_end, cfg.boundary_window)
        } else {
            hard_end
        };

        chunks.push(Chunk {
            chunk_id: chunk_id_for(doc_id, start),
            doc_id: doc_id.to_string(),
            text: text[byte_at(start)..byte_at(end)].to_string(),
            start_offset: start,
            end_offset: end,
        });

        if end >= n {
            break;
        }

        // El solape se mide sobre el texto crudo retrocediendo desde el final
        // del chunk anterior; si el chunk fue más corto que el solape, se
        // avanza igualmente para no ciclar.
        let next = end.saturating_sub(cfg.overlap);
        start = if next > start { next } else { end };
    }

    chunks
}

/// Busca hacia atrás desde `hard_end`, dentro de la ventana configurada, un
/// corte en límite de párrafo o de frase. Si no hay ninguno, corta en seco:
/// una unidad mayor que el tamaño máximo se parte, nunca se descarta.
fn preferred_cut(chars: &[char], start: usize, hard_end: usize, window: usize) -> usize {
    if window == 0 {
        return hard_end;
    }
    let lo = hard_end.saturating_sub(window).max(start + 1);

    // 1) Límite de párrafo/línea: cortar justo después de un salto.
    for end in (lo..=hard_end).rev() {
        if chars[end - 1] == '\n' {
            return end;
        }
    }
    // 2) Fin de frase: puntuación seguida de espacio.
    for end in (lo..=hard_end).rev() {
        if end >= 2 && matches!(chars[end - 2], '.' | '!' | '?') && chars[end - 1].is_whitespace()
        {
            return end;
        }
    }
    hard_end
}
