//! Relevance search helpers.
//!
//! A free-text query can exceed what one embedding call accepts, so it is
//! split into word chunks sized from the embedder's token budget and each
//! chunk is searched independently. Because one entity owns several
//! vector documents, the neighbor count `k` must be inflated so the top
//! hits can still contain `max_count` distinct entities in the worst
//! case.

use loam_embeddings::Embedder;

/// Split a query into word chunks that fit the embedder's token budget.
///
/// A fifth of the embedder's maximum is used as the per-chunk budget,
/// and tokens-per-word is estimated from the query itself rather than a
/// tokenizer pass. A query with no words produces no chunks.
pub fn query_chunks(query: &str, embedder: &dyn Embedder) -> Vec<String> {
    let words: Vec<&str> = query.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let chunk_token_budget = embedder.max_tokens() / 5;
    let total_token_count = embedder.estimate_token_count(query);
    let tokens_per_word = total_token_count as f64 / words.len() as f64;

    let words_per_chunk = if tokens_per_word > 0.0 {
        ((chunk_token_budget as f64 / tokens_per_word) as usize).max(1)
    } else {
        words.len()
    };

    words
        .chunks(words_per_chunk)
        .map(|chunk| chunk.join(" "))
        .collect()
}

/// Minimum neighbor count that cannot under-return distinct entities.
///
/// Asking for `max_count` raw hits is not enough: a single entity with
/// many vector documents could occupy several top slots. Sorting the
/// candidates by their vector-document count ascending and summing the
/// first `max_count` counts gives the smallest `k` that, in the worst
/// case, still leaves room for `max_count` distinct entities.
pub fn min_vectors_for_max_item_count<T>(
    items: &[T],
    count_item_vectors: impl Fn(&T) -> usize,
    max_items_to_return: usize,
) -> usize {
    let mut counts: Vec<usize> = items.iter().map(count_item_vectors).collect();
    counts.sort_unstable();
    counts.into_iter().take(max_items_to_return).sum()
}
