//! Rastreador web acotado: convierte páginas HTML del mismo dominio en
//! `Document`s listos para la ingesta.
//!
//! Límites duros para no desbordar cuotas: presupuesto de páginas (no de
//! chunks), tope de bytes por página, recorte del texto limpio y pausa de
//! cortesía entre peticiones. Las páginas con texto idéntico se deduplican
//! por hash de contenido antes de indexar.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::Utc;
use scraper::{Html, Selector};
use tracing::{info, warn};
use url::Url;

use crate::app_state::Status;
use crate::config::CrawlConfig;
use crate::ingest::{content_sha, sanitize_doc_id};
use crate::models::{Document, SourceType};

/// Extensiones que nunca son HTML útil (los ficheros descargables entran por
/// la ingesta de directorio, no por el rastreador).
const SKIP_EXT: &[&str] = &[
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".zip", ".jpg", ".jpeg", ".png",
    ".gif", ".svg", ".webp", ".mp4", ".webm", ".json", ".xml", ".rss", ".ics", ".apk", ".csv",
    ".txt",
];

/// Etiquetas de maquetación cuyo texto se descarta.
const SKIP_TAGS: &[&str] = &["script", "style", "nav", "footer", "header", "noscript"];

#[derive(Debug, Default)]
pub struct CrawlSummary {
    pub pages_fetched: u32,
    pub pages_skipped: u32,
    pub duplicates: u32,
}

/// ¿Es un enlace HTML del mismo host, sin ancla y sin extensión binaria?
fn is_crawlable(link: &Url, start: &Url) -> bool {
    if link.host_str() != start.host_str() {
        return false;
    }
    if link.fragment().is_some() {
        return false;
    }
    let path = link.path().to_lowercase();
    !SKIP_EXT.iter().any(|ext| path.ends_with(ext))
}

/// Reduce el HTML a texto legible saltando las etiquetas de maquetación.
fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    collect_text(*document.root_element(), &mut out);
    // Normalización ligera por línea; la limpieza completa la hace la ingesta.
    let lines: Vec<&str> = out.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines.join("\n")
}

fn collect_text(node: ego_tree::NodeRef<'_, scraper::Node>, out: &mut String) {
    match node.value() {
        scraper::Node::Element(element) => {
            if SKIP_TAGS.contains(&element.name()) {
                return;
            }
        }
        scraper::Node::Text(text) => {
            out.push_str(&text);
            out.push('\n');
            return;
        }
        _ => return,
    }
    for child in node.children() {
        collect_text(child, out);
    }
}

/// Extrae los enlaces del mismo dominio de una página ya descargada.
fn extract_links(html: &str, base: &Url, start: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("selector");
    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else { continue };
        if let Ok(mut url) = base.join(href) {
            url.set_fragment(None);
            if is_crawlable(&url, start) {
                links.push(url);
            }
        }
    }
    links
}

/// Rastrea páginas del mismo dominio en anchura hasta agotar el presupuesto
/// y devuelve un `Document` por página útil. Los fallos de red se registran
/// por página y no detienen el rastreo.
pub async fn crawl_site(
    cfg: &CrawlConfig,
    status_arc: Arc<Mutex<Status>>,
) -> Result<(Vec<Document>, CrawlSummary)> {
    let start = Url::parse(&cfg.start_url)
        .map_err(|e| anyhow!("URL de inicio inválida '{}': {e}", cfg.start_url))?;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let mut visited: HashSet<String> = HashSet::new();
    let mut seen_content: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<Url> = VecDeque::from([start.clone()]);
    let mut documents = Vec::new();
    let mut summary = CrawlSummary::default();

    while let Some(url) = queue.pop_front() {
        if summary.pages_fetched as usize >= cfg.max_pages {
            break;
        }
        if !visited.insert(url.to_string()) {
            continue;
        }

        {
            let mut status = status_arc.lock().unwrap();
            status.message = format!(
                "Rastreando [{}/{}]: {url}",
                summary.pages_fetched + 1,
                cfg.max_pages
            );
        }

        let response = match client.get(url.clone()).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Fallo descargando {url}: {e}");
                summary.pages_skipped += 1;
                continue;
            }
        };

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("text/html") {
            summary.pages_skipped += 1;
            continue;
        }
        if let Some(len) = response.content_length() {
            if len > cfg.max_bytes {
                warn!("Página {url} descartada: {len} bytes supera el tope de {}", cfg.max_bytes);
                summary.pages_skipped += 1;
                continue;
            }
        }

        let html = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Fallo leyendo el cuerpo de {url}: {e}");
                summary.pages_skipped += 1;
                continue;
            }
        };

        let mut text = html_to_text(&html);
        if text.chars().count() > cfg.max_text_chars {
            text = text.chars().take(cfg.max_text_chars).collect();
        }
        if text.is_empty() {
            summary.pages_skipped += 1;
            continue;
        }

        // La cola crece con los enlaces aunque la página esté duplicada.
        for link in extract_links(&html, &url, &start) {
            if !visited.contains(link.as_str()) {
                queue.push_back(link);
            }
        }

        summary.pages_fetched += 1;

        if !seen_content.insert(content_sha(&text)) {
            summary.duplicates += 1;
            continue;
        }

        let path_part = if url.path() == "/" { "index.html" } else { url.path() };
        documents.push(Document {
            doc_id: sanitize_doc_id(&format!("{}{}", url.host_str().unwrap_or("web"), url.path())),
            source_type: SourceType::Web,
            title: path_part.trim_matches('/').replace(['/', '_', '-'], " "),
            source: url.to_string(),
            text,
            mime_type: Some(content_type),
            ingested_at: Utc::now().to_rfc3339(),
        });

        tokio::time::sleep(cfg.delay).await;
    }

    info!(
        "Rastreo terminado: {} páginas útiles, {} omitidas, {} duplicadas.",
        summary.pages_fetched, summary.pages_skipped, summary.duplicates
    );
    Ok((documents, summary))
}
