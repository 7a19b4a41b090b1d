//! The Searcher: lexical queries over the FTS5 shadow table, optional
//! semantic queries over pre-stored embedding vectors, fused by Reciprocal
//! Rank Fusion, with scope/tag/status/type filters applied before ranking.
//!
//! Embedding generation is an external collaborator — this module never
//! calls an embedding provider. Callers that have one pass an
//! already-computed `query_embedding`; when absent, search degrades to
//! lexical-only.

use std::cmp::Ordering;
use std::collections::HashMap;

use rusqlite::params;

use crate::error::KbaseError;
use crate::store::{Entry, EntryId, EntryType, Scope, Status, Store, INACCURACY_THRESHOLD};

/// Reciprocal Rank Fusion constant.
const RRF_K: f64 = 60.0;

/// What to sort by when no query text is given.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sort {
    /// `last_accessed_at` descending (entries never accessed sort last).
    Recent,
    /// `created_at` descending.
    Created,
}

/// Explicit status filter override. `None` in [`SearchParams::status`] means
/// the default: active entries plus anything flagged for revalidation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusFilter {
    Active,
    Deprecated,
    /// Disables the status filter entirely.
    All,
}

/// Search/list parameters.
#[derive(Clone, Debug, Default)]
pub struct SearchParams {
    pub query: Option<String>,
    /// Pre-computed query embedding, if an embedding provider is configured
    /// upstream. `None` runs lexical-only.
    pub query_embedding: Option<Vec<f32>>,
    pub entry_type: Option<EntryType>,
    /// Conjunctive: an entry must carry every tag listed here.
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub scope: Option<Scope>,
    pub status: Option<StatusFilter>,
    pub above_threshold: bool,
    pub sort: Option<Sort>,
    pub limit: usize,
    pub offset: usize,
}

impl SearchParams {
    /// A bare listing with sensible defaults for a list call: no query,
    /// sorted by recency, a `limit` capped at 100.
    #[must_use]
    pub fn list() -> Self {
        Self { sort: Some(Sort::Recent), limit: 100, ..Self::default() }
    }
}

/// Run a search or list query and bump `access_count` for every entry
/// returned, in one batched transaction.
///
/// # Errors
/// Returns [`KbaseError::Store`] on a database error.
pub fn search(store: &Store, params: &SearchParams) -> Result<Vec<Entry>, KbaseError> {
    let max_limit = if params.query.is_some() { 50 } else { 100 };
    let limit = params.limit.clamp(1, max_limit);

    let mut candidates = filtered_candidates(store, params)?;

    let results = match &params.query {
        None => {
            let sort = params.sort.unwrap_or(Sort::Recent);
            candidates.sort_by(|a, b| compare_for_sort(sort, a, b));
            page(candidates, params.offset, limit)
        }
        Some(q) => {
            let ids: Vec<EntryId> = candidates.iter().map(|e| e.id).collect();
            let lexical = lexical_rank(store, q, &ids)?;
            let semantic = match &params.query_embedding {
                Some(qv) => semantic_rank(store, qv, &ids)?,
                None => HashMap::new(),
            };
            let fused = fuse(&lexical, &semantic);
            let by_id: HashMap<EntryId, Entry> = candidates.drain(..).map(|e| (e.id, e)).collect();
            let mut ranked: Vec<(EntryId, f64, usize)> = fused
                .into_iter()
                .filter_map(|(id, score)| lexical.get(&id).map(|&r| (id, score, r)).or(Some((id, score, usize::MAX))))
                .collect();
            ranked.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.2.cmp(&b.2))
                    .then_with(|| a.0.cmp(&b.0))
            });
            let ordered: Vec<Entry> =
                ranked.into_iter().filter_map(|(id, _, _)| by_id.get(&id).cloned()).collect();
            page(ordered, params.offset, limit)
        }
    };

    bump_access(store, results.iter().map(|e| e.id))?;
    Ok(results)
}

fn page(items: Vec<Entry>, offset: usize, limit: usize) -> Vec<Entry> {
    items.into_iter().skip(offset).take(limit).collect()
}

fn compare_for_sort(sort: Sort, a: &Entry, b: &Entry) -> Ordering {
    match sort {
        Sort::Recent => b.last_accessed_at.cmp(&a.last_accessed_at),
        Sort::Created => b.created_at.cmp(&a.created_at),
    }
}

fn filtered_candidates(store: &Store, params: &SearchParams) -> Result<Vec<Entry>, KbaseError> {
    let mut entries = store.all_entries()?;

    if let Some(scope) = params.scope {
        let visible = scope.visible_scopes();
        entries.retain(|e| visible.contains(&e.scope));
    }
    if let Some(t) = params.entry_type {
        entries.retain(|e| e.entry_type == t);
    }
    if let Some(p) = &params.project {
        entries.retain(|e| e.project.as_deref() == Some(p.as_str()));
    }
    if !params.tags.is_empty() {
        entries.retain(|e| params.tags.iter().all(|t| e.tags.contains(t)));
    }

    match params.status {
        None => entries.retain(|e| e.status == Status::Active || e.inaccuracy >= INACCURACY_THRESHOLD),
        Some(StatusFilter::Active) => entries.retain(|e| e.status == Status::Active),
        Some(StatusFilter::Deprecated) => entries.retain(|e| e.status == Status::Deprecated),
        Some(StatusFilter::All) => {}
    }

    if params.above_threshold {
        entries.retain(|e| e.inaccuracy >= INACCURACY_THRESHOLD);
    }

    Ok(entries)
}

/// Query the FTS5 shadow table with prefix terms and OR semantics, returning
/// each matching candidate's 1-based rank (best match first).
fn lexical_rank(store: &Store, query: &str, candidate_ids: &[EntryId]) -> Result<HashMap<EntryId, usize>, KbaseError> {
    let allowed: std::collections::HashSet<EntryId> = candidate_ids.iter().copied().collect();
    let match_expr = build_match_expression(query);
    if match_expr.is_empty() {
        return Ok(HashMap::new());
    }
    let mut stmt = store
        .conn()
        .prepare("SELECT id FROM entries_fts WHERE entries_fts MATCH ?1 ORDER BY bm25(entries_fts)")?;
    let mut ranks = HashMap::new();
    let mut rank = 0usize;
    let mut rows = stmt.query(params![match_expr])?;
    while let Some(row) = rows.next()? {
        let id_str: String = row.get(0)?;
        let Ok(id) = id_str.parse::<EntryId>() else { continue };
        if !allowed.contains(&id) {
            continue;
        }
        rank += 1;
        ranks.insert(id, rank);
    }
    Ok(ranks)
}

/// Build an FTS5 MATCH expression: each whitespace-separated term becomes a
/// prefix term, joined with explicit `OR`.
fn build_match_expression(query: &str) -> String {
    query
        .split_whitespace()
        .map(sanitize_term)
        .filter(|t| !t.is_empty())
        .map(|t| format!("{t}*"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Strip FTS5 syntax characters from a raw query term so user input can
/// never be interpreted as query-language operators.
fn sanitize_term(term: &str) -> String {
    term.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect()
}

fn semantic_rank(
    store: &Store,
    query_vector: &[f32],
    candidate_ids: &[EntryId],
) -> Result<HashMap<EntryId, usize>, KbaseError> {
    let allowed: std::collections::HashSet<EntryId> = candidate_ids.iter().copied().collect();
    let mut stmt = store.conn().prepare("SELECT entry_id, vector, dim FROM embeddings")?;
    let mut scored: Vec<(EntryId, f32)> = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let id_str: String = row.get(0)?;
        let Ok(id) = id_str.parse::<EntryId>() else { continue };
        if !allowed.contains(&id) {
            continue;
        }
        let bytes: Vec<u8> = row.get(1)?;
        let dim: i64 = row.get(2)?;
        let vector = decode_vector(&bytes, dim as usize);
        if let Some(sim) = cosine_similarity(query_vector, &vector) {
            scored.push((id, sim));
        }
    }
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    let top_k = scored.len().min(50);
    Ok(scored.into_iter().take(top_k).enumerate().map(|(i, (id, _))| (id, i + 1)).collect())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}

fn decode_vector(bytes: &[u8], dim: usize) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .take(dim)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Store or replace an entry's embedding vector for semantic search.
///
/// # Errors
/// Returns [`KbaseError::Store`] on a database error.
pub fn set_embedding(store: &Store, id: EntryId, vector: &[f32]) -> Result<(), KbaseError> {
    store.conn().execute(
        "INSERT INTO embeddings (entry_id, vector, dim) VALUES (?1, ?2, ?3)
         ON CONFLICT(entry_id) DO UPDATE SET vector = excluded.vector, dim = excluded.dim",
        params![id.to_string(), encode_vector(vector), i64::try_from(vector.len()).unwrap_or(0)],
    )?;
    Ok(())
}

/// Reciprocal Rank Fusion over two rank lists: `score(e) = Σ
/// 1/(k + rank_i(e))`, summed over whichever lists contain `e`.
fn fuse(lexical: &HashMap<EntryId, usize>, semantic: &HashMap<EntryId, usize>) -> HashMap<EntryId, f64> {
    let mut scores: HashMap<EntryId, f64> = HashMap::new();
    for (id, rank) in lexical {
        *scores.entry(*id).or_insert(0.0) += 1.0 / (RRF_K + *rank as f64);
    }
    for (id, rank) in semantic {
        *scores.entry(*id).or_insert(0.0) += 1.0 / (RRF_K + *rank as f64);
    }
    scores
}

fn bump_access<I: Iterator<Item = EntryId>>(store: &Store, ids: I) -> Result<(), KbaseError> {
    let ids: Vec<EntryId> = ids.collect();
    if ids.is_empty() {
        return Ok(());
    }
    let now = chrono::Utc::now().to_rfc3339();
    let tx = store.conn().unchecked_transaction()?;
    for id in ids {
        tx.execute(
            "UPDATE entries SET access_count = access_count + 1, last_accessed_at = ?1 WHERE id = ?2",
            params![now, id.to_string()],
        )?;
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewEntry;
    use std::collections::BTreeSet;

    fn insert(store: &Store, title: &str, content: &str, scope: Scope) -> Entry {
        store
            .insert(NewEntry {
                entry_type: EntryType::Fact,
                title: title.to_string(),
                content: content.to_string(),
                tags: BTreeSet::new(),
                declaration: None,
                scope,
                project: None,
                parent_page_id: None,
                source: "agent".to_string(),
            })
            .unwrap()
    }

    #[test]
    fn rrf_top_rank_absent_from_other_list_scores_one_over_k_plus_one() {
        let mut lexical = HashMap::new();
        let id = EntryId::new_random();
        lexical.insert(id, 1);
        let semantic = HashMap::new();
        let fused = fuse(&lexical, &semantic);
        assert!((fused[&id] - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn scope_hierarchy_repo_sees_everything() {
        let store = Store::open_in_memory().unwrap();
        insert(&store, "Repo item", "x", Scope::Repo);
        insert(&store, "Project item", "x", Scope::Project);
        insert(&store, "Company item", "x", Scope::Company);

        let mut params = SearchParams::list();
        params.scope = Some(Scope::Repo);
        let results = search(&store, &params).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn scope_hierarchy_company_sees_only_company() {
        let store = Store::open_in_memory().unwrap();
        insert(&store, "Repo item", "x", Scope::Repo);
        insert(&store, "Company item", "x", Scope::Company);

        let mut params = SearchParams::list();
        params.scope = Some(Scope::Company);
        let results = search(&store, &params).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].scope, Scope::Company);
    }

    #[test]
    fn default_status_includes_flagged_entries() {
        let store = Store::open_in_memory().unwrap();
        let flagged = insert(&store, "Flagged", "x", Scope::Repo);
        store.set_inaccuracy(flagged.id, 1.5).unwrap();
        insert(&store, "Deprecated", "y", Scope::Repo);
        let dep = store.get(flagged.id).unwrap().unwrap();
        store.deprecate(dep.id, "old".to_string()).unwrap();

        let params = SearchParams::list();
        let results = search(&store, &params).unwrap();
        // flagged entry is deprecated AND above threshold -> included by the
        // threshold clause even though status != active.
        assert!(results.iter().any(|e| e.id == flagged.id));
    }

    #[test]
    fn status_all_disables_the_filter() {
        let store = Store::open_in_memory().unwrap();
        let e = insert(&store, "Dep", "x", Scope::Repo);
        store.deprecate(e.id, "old".to_string()).unwrap();

        let mut params = SearchParams::list();
        params.status = Some(StatusFilter::All);
        let results = search(&store, &params).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn lexical_search_finds_prefix_match() {
        let store = Store::open_in_memory().unwrap();
        let e = insert(&store, "Error Handling Conventions", "always use Result", Scope::Repo);
        insert(&store, "Unrelated", "nothing in common here", Scope::Repo);

        let mut params = SearchParams::list();
        params.query = Some("conven".to_string());
        let results = search(&store, &params).unwrap();
        assert!(results.iter().any(|r| r.id == e.id));
    }

    #[test]
    fn search_bumps_access_count_of_returned_entries() {
        let store = Store::open_in_memory().unwrap();
        let e = insert(&store, "Title", "content", Scope::Repo);
        assert_eq!(store.get(e.id).unwrap().unwrap().access_count, 0);
        search(&store, &SearchParams::list()).unwrap();
        assert_eq!(store.get(e.id).unwrap().unwrap().access_count, 1);
    }

    #[test]
    fn tags_filter_is_conjunctive() {
        let store = Store::open_in_memory().unwrap();
        let mut tags_both: BTreeSet<String> = BTreeSet::new();
        tags_both.insert("a".to_string());
        tags_both.insert("b".to_string());
        let with_both = store
            .insert(NewEntry {
                entry_type: EntryType::Fact,
                title: "Both".to_string(),
                content: "x".to_string(),
                tags: tags_both,
                declaration: None,
                scope: Scope::Repo,
                project: None,
                parent_page_id: None,
                source: "agent".to_string(),
            })
            .unwrap();
        let mut tags_one: BTreeSet<String> = BTreeSet::new();
        tags_one.insert("a".to_string());
        store
            .insert(NewEntry {
                entry_type: EntryType::Fact,
                title: "One".to_string(),
                content: "x".to_string(),
                tags: tags_one,
                declaration: None,
                scope: Scope::Repo,
                project: None,
                parent_page_id: None,
                source: "agent".to_string(),
            })
            .unwrap();

        let mut params = SearchParams::list();
        params.tags = vec!["a".to_string(), "b".to_string()];
        let results = search(&store, &params).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, with_both.id);
    }

    #[test]
    fn limit_is_clamped_to_max() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..5 {
            insert(&store, &format!("Item {i}"), "x", Scope::Repo);
        }
        let mut params = SearchParams::list();
        params.query = Some("item".to_string());
        params.limit = 1000;
        let results = search(&store, &params).unwrap();
        assert!(results.len() <= 50);
    }
}
