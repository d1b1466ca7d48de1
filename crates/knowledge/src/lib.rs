//! Knowledge-graph collaborator: a triple store of
//! `(subject, predicate, object, confidence, source)` edges with bounded
//! traversal. Only the persistence and dispatch surfaces are owned here;
//! inference and entity extraction belong to external collaborators.

use std::collections::{HashSet, VecDeque};
use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;

use mimo_domain::error::{Error, Result};
use mimo_domain::triple::Triple;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query / traversal shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Optional filters; `None` matches everything on that position.
#[derive(Debug, Clone, Default)]
pub struct TripleFilter {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
}

/// One hop of a traversal result.
#[derive(Debug, Clone, Serialize)]
pub struct TraversalEdge {
    pub depth: usize,
    pub triple: Triple,
}

const MAX_TRAVERSAL_DEPTH: usize = 8;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Graph store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// SQLite-backed directed labelled multigraph.
pub struct KnowledgeGraph {
    conn: Mutex<Connection>,
}

impl KnowledgeGraph {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("open {}: {e}", path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::Storage(format!("journal_mode: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS triples (
                id INTEGER PRIMARY KEY,
                subject TEXT NOT NULL,
                predicate TEXT NOT NULL,
                object TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 1.0,
                source TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (subject, predicate, object)
            );
            CREATE INDEX IF NOT EXISTS idx_triples_subject ON triples(subject);
            CREATE INDEX IF NOT EXISTS idx_triples_object ON triples(object);",
        )
        .map_err(|e| Error::Storage(format!("schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or refresh a triple. Confidence is clamped to [0, 1]; a
    /// re-taught edge keeps the higher confidence.
    pub fn teach(&self, triple: &Triple) -> Result<()> {
        if triple.subject.is_empty() || triple.predicate.is_empty() || triple.object.is_empty() {
            return Err(Error::InvalidArguments(
                "subject, predicate, and object must be non-empty".into(),
            ));
        }
        let confidence = triple.confidence.clamp(0.0, 1.0);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO triples (subject, predicate, object, confidence, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(subject, predicate, object) DO UPDATE SET
                confidence = MAX(confidence, excluded.confidence),
                source = COALESCE(excluded.source, source)",
            params![
                triple.subject,
                triple.predicate,
                triple.object,
                confidence,
                triple.source,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Storage(format!("teach: {e}")))?;
        Ok(())
    }

    /// Triples matching the filter, highest confidence first.
    pub fn query(&self, filter: &TripleFilter, limit: usize) -> Result<Vec<Triple>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT subject, predicate, object, confidence, source FROM triples
                 WHERE (?1 IS NULL OR subject = ?1)
                   AND (?2 IS NULL OR predicate = ?2)
                   AND (?3 IS NULL OR object = ?3)
                 ORDER BY confidence DESC, id DESC LIMIT ?4",
            )
            .map_err(|e| Error::Storage(format!("query: {e}")))?;
        let rows = stmt
            .query_map(
                params![filter.subject, filter.predicate, filter.object, limit as i64],
                row_to_triple,
            )
            .map_err(|e| Error::Storage(format!("query: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Storage(format!("query: {e}")))
    }

    /// Breadth-first traversal outward from `start`, bounded by `max_depth`
    /// (capped at 8) and cycle-safe. Follows edges in both directions.
    pub fn traverse(&self, start: &str, max_depth: usize) -> Result<Vec<TraversalEdge>> {
        let max_depth = max_depth.clamp(1, MAX_TRAVERSAL_DEPTH);
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<(String, usize)> = VecDeque::new();
        let mut edges = Vec::new();

        visited.insert(start.to_string());
        frontier.push_back((start.to_string(), 0));

        while let Some((node, depth)) = frontier.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let outgoing = self.query(
                &TripleFilter {
                    subject: Some(node.clone()),
                    ..Default::default()
                },
                256,
            )?;
            let incoming = self.query(
                &TripleFilter {
                    object: Some(node.clone()),
                    ..Default::default()
                },
                256,
            )?;

            for triple in outgoing.into_iter().chain(incoming) {
                let next = if triple.subject == node {
                    triple.object.clone()
                } else {
                    triple.subject.clone()
                };
                edges.push(TraversalEdge {
                    depth: depth + 1,
                    triple,
                });
                if visited.insert(next.clone()) {
                    frontier.push_back((next, depth + 1));
                }
            }
        }
        Ok(edges)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM triples", [], |row| row.get(0))
            .map_err(|e| Error::Storage(format!("count: {e}")))
    }
}

fn row_to_triple(row: &rusqlite::Row<'_>) -> rusqlite::Result<Triple> {
    Ok(Triple {
        subject: row.get(0)?,
        predicate: row.get(1)?,
        object: row.get(2)?,
        confidence: row.get(3)?,
        source: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> KnowledgeGraph {
        KnowledgeGraph::open(Path::new(":memory:")).unwrap()
    }

    fn triple(s: &str, p: &str, o: &str) -> Triple {
        Triple {
            subject: s.into(),
            predicate: p.into(),
            object: o.into(),
            confidence: 0.9,
            source: None,
        }
    }

    #[test]
    fn teach_and_query_by_subject() {
        let g = graph();
        g.teach(&triple("alice", "works_at", "acme")).unwrap();
        g.teach(&triple("alice", "lives_in", "paris")).unwrap();
        g.teach(&triple("bob", "works_at", "acme")).unwrap();

        let hits = g
            .query(
                &TripleFilter {
                    subject: Some("alice".into()),
                    ..Default::default()
                },
                10,
            )
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn reteach_keeps_highest_confidence() {
        let g = graph();
        let mut t = triple("a", "is", "b");
        t.confidence = 0.4;
        g.teach(&t).unwrap();
        t.confidence = 0.8;
        g.teach(&t).unwrap();
        t.confidence = 0.2;
        g.teach(&t).unwrap();

        let hits = g.query(&TripleFilter::default(), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn confidence_is_clamped() {
        let g = graph();
        let mut t = triple("x", "y", "z");
        t.confidence = 7.0;
        g.teach(&t).unwrap();
        let hits = g.query(&TripleFilter::default(), 10).unwrap();
        assert!((hits[0].confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_positions_are_rejected() {
        let g = graph();
        assert!(g.teach(&triple("", "p", "o")).is_err());
    }

    #[test]
    fn traversal_is_depth_bounded_and_cycle_safe() {
        let g = graph();
        g.teach(&triple("a", "knows", "b")).unwrap();
        g.teach(&triple("b", "knows", "c")).unwrap();
        g.teach(&triple("c", "knows", "a")).unwrap();
        g.teach(&triple("c", "knows", "d")).unwrap();

        let depth1 = g.traverse("a", 1).unwrap();
        let nodes1: HashSet<&str> = depth1
            .iter()
            .flat_map(|e| [e.triple.subject.as_str(), e.triple.object.as_str()])
            .collect();
        assert!(nodes1.contains("b"));
        assert!(!nodes1.contains("d"));

        // Cycle must terminate; depth 3 reaches everything.
        let deep = g.traverse("a", 3).unwrap();
        let nodes: HashSet<&str> = deep
            .iter()
            .flat_map(|e| [e.triple.subject.as_str(), e.triple.object.as_str()])
            .collect();
        assert!(nodes.contains("d"));
    }

    #[test]
    fn count_tracks_inserts() {
        let g = graph();
        assert_eq!(g.count().unwrap(), 0);
        g.teach(&triple("s", "p", "o")).unwrap();
        assert_eq!(g.count().unwrap(), 1);
    }
}
