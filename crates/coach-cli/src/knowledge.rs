//! Local knowledge base: Markdown/text files ranked with BM25

use async_trait::async_trait;
use coach_workflow::{ContextType, Passage, RetrievalError, Retriever};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

const DEFAULT_TOP_K: usize = 4;
const MIN_CHUNK_CHARS: usize = 40;
const K1: f32 = 1.2;
const B: f32 = 0.75;

const STOPWORDS: &[&str] = &[
    "and", "are", "can", "for", "from", "has", "have", "how", "into", "not", "our", "should",
    "that", "the", "their", "this", "what", "when", "where", "which", "who", "why", "will",
    "with", "you", "your",
];

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|part| part.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|token| !STOPWORDS.contains(&token.as_str()))
        .collect()
}

struct Chunk {
    text: String,
    source: String,
    tokens: Vec<String>,
}

/// Paragraph chunks from every `*.md` / `*.txt` file under a directory
pub struct KnowledgeBase {
    chunks: Vec<Chunk>,
    doc_freq: HashMap<String, usize>,
    avg_len: f32,
    top_k: usize,
}

impl KnowledgeBase {
    /// Index a directory; a missing directory gives an empty knowledge base.
    /// Unreadable files are skipped and undecodable bytes replaced.
    pub fn load(dir: &Path) -> std::io::Result<Self> {
        let mut chunks = Vec::new();
        if dir.is_dir() {
            for ext in ["md", "txt"] {
                let pattern = format!("{}/**/*.{}", dir.display(), ext);
                let paths = glob::glob(&pattern)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
                for path in paths.flatten() {
                    let bytes = match fs::read(&path) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            tracing::warn!("Skipping {}: {}", path.display(), e);
                            continue;
                        }
                    };
                    let content = String::from_utf8_lossy(&bytes);
                    let source = path
                        .strip_prefix(dir)
                        .unwrap_or(&path)
                        .display()
                        .to_string();
                    chunks.extend(split_paragraphs(&content, &source));
                }
            }
        }
        tracing::info!("Knowledge base: {} chunks from {}", chunks.len(), dir.display());
        Ok(Self::from_chunks(chunks))
    }

    fn from_chunks(chunks: Vec<Chunk>) -> Self {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut total_len = 0;
        for chunk in &chunks {
            total_len += chunk.tokens.len();
            let unique: HashSet<&String> = chunk.tokens.iter().collect();
            for token in unique {
                *doc_freq.entry(token.clone()).or_insert(0) += 1;
            }
        }
        let avg_len = total_len as f32 / chunks.len().max(1) as f32;
        Self {
            chunks,
            doc_freq,
            avg_len,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn score(&self, chunk: &Chunk, query: &HashSet<String>) -> f32 {
        let total_docs = self.chunks.len() as f32;
        let dl = chunk.tokens.len() as f32;
        query
            .iter()
            .map(|term| {
                let freq = chunk.tokens.iter().filter(|t| *t == term).count() as f32;
                if freq == 0.0 {
                    return 0.0;
                }
                let df = *self.doc_freq.get(term).unwrap_or(&0) as f32;
                let idf = ((total_docs - df + 0.5) / (df + 0.5) + 1.0).ln();
                let denom = freq + K1 * (1.0 - B + B * dl / self.avg_len.max(1e-3));
                idf * (freq * (K1 + 1.0)) / denom
            })
            .sum()
    }

    /// The best-matching chunks for `query`, highest score first
    pub fn search(&self, query: &str) -> Vec<Passage> {
        let terms: HashSet<String> = tokenize(query).into_iter().collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(f32, usize)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (self.score(chunk, &terms), i))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        scored
            .into_iter()
            .take(self.top_k)
            .map(|(_, i)| {
                let chunk = &self.chunks[i];
                Passage::new(chunk.text.clone()).with_source(chunk.source.clone())
            })
            .collect()
    }
}

/// Split on blank lines, folding short paragraphs (headings) into the next one
fn split_paragraphs(content: &str, source: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut pending = String::new();
    for paragraph in content.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if !pending.is_empty() {
            pending.push_str("\n\n");
        }
        pending.push_str(paragraph);
        if pending.chars().count() >= MIN_CHUNK_CHARS {
            chunks.push(std::mem::take(&mut pending));
        }
    }
    if !pending.is_empty() {
        chunks.push(pending);
    }

    chunks
        .into_iter()
        .map(|text| Chunk {
            tokens: tokenize(&text),
            text,
            source: source.to_string(),
        })
        .collect()
}

#[async_trait]
impl Retriever for KnowledgeBase {
    async fn retrieve(&self, query: &str, _context_type: ContextType) -> Result<Vec<Passage>, RetrievalError> {
        Ok(self.search(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let kb = KnowledgeBase::load(&dir.path().join("nowhere")).unwrap();
        assert!(kb.is_empty());
        assert!(kb.search("epic hypothesis").is_empty());
    }

    #[test]
    fn test_ranks_matching_chunk_first() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "epic.md",
            "# Epic template\n\nEPIC HYPOTHESIS STATEMENT: For customers who struggle, the epic \
             hypothesis describes the expected outcome.\n\nLeading indicators show early whether \
             the hypothesis holds.",
        );
        write(
            dir.path(),
            "guides/wsjf.txt",
            "WSJF divides the cost of delay by job size to sequence backlog items.",
        );
        write(dir.path(), "ignored.json", "{\"epic\": \"hypothesis\"}");

        let kb = KnowledgeBase::load(dir.path()).unwrap();
        assert_eq!(kb.len(), 3);

        let hits = kb.search("What is an epic hypothesis statement?");
        assert!(!hits.is_empty());
        assert!(hits[0].content.starts_with("# Epic template"));
        assert_eq!(hits[0].source.as_deref(), Some("epic.md"));

        let hits = kb.search("how do I compute WSJF");
        assert_eq!(hits.len(), 1);
        assert!(hits[0].source.as_deref().unwrap().ends_with("wsjf.txt"));
    }

    #[test]
    fn test_latin1_file_does_not_block_loading() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "good.md", "Epic hypothesis statements describe the expected outcome.");
        fs::write(
            dir.path().join("legacy.txt"),
            b"Caf\xe9 roadmap notes: the feature backlog is ordered by WSJF.",
        )
        .unwrap();

        let kb = KnowledgeBase::load(dir.path()).unwrap();
        assert_eq!(kb.len(), 2);
        let hits = kb.search("feature backlog WSJF");
        assert_eq!(hits[0].source.as_deref(), Some("legacy.txt"));
        assert!(hits[0].content.contains('\u{FFFD}'));
    }

    #[test]
    fn test_top_k_limits_results() {
        let dir = tempfile::tempdir().unwrap();
        let body = (0..6)
            .map(|i| format!("Feature acceptance criteria example number {} for the team.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        write(dir.path(), "features.md", &body);

        let kb = KnowledgeBase::load(dir.path()).unwrap();
        assert_eq!(kb.search("acceptance criteria").len(), DEFAULT_TOP_K);
        assert_eq!(kb.with_top_k(2).search("acceptance criteria").len(), 2);
    }

    #[test]
    fn test_stopword_only_query_matches_nothing() {
        let chunks = split_paragraphs("The feature and the story are linked through the backlog.", "a.md");
        let kb = KnowledgeBase::from_chunks(chunks);
        assert!(kb.search("what is the").is_empty());
    }

    #[tokio::test]
    async fn test_retriever_capability() {
        let chunks = split_paragraphs("PI objectives summarize the business value a team plans to deliver.", "pi.md");
        let kb = KnowledgeBase::from_chunks(chunks);
        let passages = kb
            .retrieve("PI Objectives business value", ContextType::PiObjective)
            .await
            .unwrap();
        assert_eq!(passages.len(), 1);
    }
}
