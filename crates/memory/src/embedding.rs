//! Embedding I/O: the `Embedder` seam, the HTTP adapter, the deterministic
//! hash fallback, and the quantised representations kept alongside every
//! stored vector.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use mimo_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Embedder seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Abstract embedding provider. The memory core depends only on this trait;
/// concrete backends are an HTTP service or the deterministic fallback.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text into a vector of the deployment dimension.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch. Default implementation loops; HTTP backends override
    /// with a single round trip.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP embedder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedder backed by an HTTP embedding endpoint (`POST {url}` with
/// `{"input": [...]}`, responding `{"embeddings": [[...]]}`).
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(url: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let batch = [text.to_string()];
        let mut vecs = self.embed_batch(&batch).await?;
        vecs.pop()
            .ok_or_else(|| Error::DependencyUnavailable("embedding service returned no vectors".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let resp = self
            .client
            .post(&self.url)
            .json(&EmbedRequest { input: texts })
            .send()
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("embedding service: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::DependencyUnavailable(format!(
                "embedding service returned {}",
                resp.status()
            )));
        }

        let body: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("embedding response: {e}")))?;

        for vec in &body.embeddings {
            if vec.len() != self.dimension {
                return Err(Error::DependencyUnavailable(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    vec.len()
                )));
            }
        }
        Ok(body.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deterministic hash fallback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deterministic embedding of the correct dimension: the normalized sum of
/// per-token hash vectors. Identical text always maps to the identical
/// vector, and token overlap yields proportional cosine similarity, so
/// duplicate detection and coarse recall keep working without a model.
pub fn hash_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let tokens: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect();

    let mut out = vec![0.0f32; dimension];
    if tokens.is_empty() {
        expand_into(text.as_bytes(), &mut out);
    } else {
        let mut token_vec = vec![0.0f32; dimension];
        for token in &tokens {
            token_vec.iter_mut().for_each(|v| *v = 0.0);
            expand_into(token.as_bytes(), &mut token_vec);
            for (acc, v) in out.iter_mut().zip(token_vec.iter()) {
                *acc += v;
            }
        }
    }

    normalize(&mut out);
    out
}

/// Fill `out` with a unit-ish pseudo-random expansion of `seed_bytes`.
fn expand_into(seed_bytes: &[u8], out: &mut [f32]) {
    let seed = Sha256::digest(seed_bytes);
    let mut filled = 0usize;
    let mut counter: u32 = 0;

    while filled < out.len() {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(counter.to_le_bytes());
        let block = hasher.finalize();
        for byte in block.iter() {
            // Map 0..=255 onto [-1, 1].
            out[filled] = (*byte as f32 / 127.5) - 1.0;
            filled += 1;
            if filled == out.len() {
                break;
            }
        }
        counter += 1;
    }
}

/// Embedder wrapper applying the hash fallback on any backend error.
/// Embedding-service failures are locally recovered and never surfaced.
pub struct EmbeddingService {
    backend: Option<Box<dyn Embedder>>,
    dimension: usize,
}

impl EmbeddingService {
    pub fn new(backend: Option<Box<dyn Embedder>>, dimension: usize) -> Self {
        Self { backend, dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn embed(&self, text: &str) -> Vec<f32> {
        if let Some(backend) = &self.backend {
            match backend.embed(text).await {
                Ok(vec) => return vec,
                Err(e) => {
                    tracing::warn!(error = %e, "embedding backend failed, using hash fallback");
                }
            }
        }
        hash_embedding(text, self.dimension)
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        if let Some(backend) = &self.backend {
            match backend.embed_batch(texts).await {
                Ok(vecs) => return vecs,
                Err(e) => {
                    tracing::warn!(error = %e, "embedding backend failed, using hash fallback");
                }
            }
        }
        texts
            .iter()
            .map(|t| hash_embedding(t, self.dimension))
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vector math & quantisation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalize to unit length in place. Zero vectors are left unchanged.
pub fn normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity clamped to [0, 1] (1.0 = identical direction;
/// orthogonal and opposed vectors both read as 0).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return 0.0;
    }
    let cos = dot / (norm_a.sqrt() * norm_b.sqrt());
    cos.clamp(0.0, 1.0)
}

/// Int8 quantisation: symmetric scale over the max magnitude (~16× smaller
/// than f32 at dimension 256 once stored).
pub fn quantize_i8(vec: &[f32]) -> (Vec<i8>, f32) {
    let max_abs = vec.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
    if max_abs <= f32::EPSILON {
        return (vec![0; vec.len()], 1.0);
    }
    let scale = max_abs / 127.0;
    let q = vec
        .iter()
        .map(|v| (v / scale).round().clamp(-127.0, 127.0) as i8)
        .collect();
    (q, scale)
}

pub fn dequantize_i8(q: &[i8], scale: f32) -> Vec<f32> {
    q.iter().map(|v| *v as f32 * scale).collect()
}

/// 1-bit-per-dimension sign binarisation, packed 8 dims per byte.
pub fn binarize(vec: &[f32]) -> Vec<u8> {
    let mut out = vec![0u8; vec.len().div_ceil(8)];
    for (i, v) in vec.iter().enumerate() {
        if *v >= 0.0 {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    out
}

/// Hamming distance between two packed binary embeddings.
pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embedding_is_deterministic() {
        let a = hash_embedding("the cat sat", 256);
        let b = hash_embedding("the cat sat", 256);
        assert_eq!(a, b);
        assert_eq!(a.len(), 256);
    }

    #[test]
    fn hash_embedding_differs_by_content() {
        let a = hash_embedding("alpha", 64);
        let b = hash_embedding("beta", 64);
        assert_ne!(a, b);
    }

    #[test]
    fn hash_embedding_is_unit_length() {
        let v = hash_embedding("normalize me", 128);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn token_overlap_yields_partial_similarity() {
        let a = hash_embedding("user prefers dark mode", 256);
        let b = hash_embedding("dark mode", 256);
        let sim = cosine_similarity(&a, &b);
        assert!(sim > 0.5, "shared tokens should correlate, got {sim}");
        assert!(sim < 0.99, "distinct texts must not read as duplicates, got {sim}");
    }

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = hash_embedding("same", 256);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn quantize_roundtrip_is_close() {
        let v = hash_embedding("roundtrip", 256);
        let (q, scale) = quantize_i8(&v);
        let back = dequantize_i8(&q, scale);
        let sim = cosine_similarity(&v, &back);
        assert!(sim > 0.99, "quantisation lost too much: {sim}");
    }

    #[test]
    fn binarize_packs_bits() {
        let v = vec![1.0, -1.0, 1.0, 1.0, -1.0, -1.0, -1.0, 1.0, 1.0];
        let b = binarize(&v);
        assert_eq!(b.len(), 2);
        assert_eq!(b[0], 0b1000_1101);
        assert_eq!(b[1], 0b0000_0001);
    }

    #[test]
    fn hamming_distance_of_self_is_zero() {
        let v = hash_embedding("h", 256);
        let b = binarize(&v);
        assert_eq!(hamming_distance(&b, &b), 0);
    }

    #[tokio::test]
    async fn service_falls_back_without_backend() {
        let svc = EmbeddingService::new(None, 32);
        let v = svc.embed("fallback").await;
        assert_eq!(v.len(), 32);
        assert_eq!(v, hash_embedding("fallback", 32));
    }
}
