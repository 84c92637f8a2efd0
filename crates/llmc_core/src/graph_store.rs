//! Symbol/file graph storage: nodes, edges, and neighbor queries over SQLite.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{LlmcError, Result};
use crate::types::{GraphEdge, GraphNode};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    kind TEXT,
    start_line INTEGER,
    end_line INTEGER,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_nodes_name ON nodes(name);
CREATE INDEX IF NOT EXISTS idx_nodes_name_lower ON nodes(lower(name));
CREATE INDEX IF NOT EXISTS idx_nodes_path ON nodes(path);

CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    type TEXT NOT NULL,
    metadata TEXT,
    FOREIGN KEY (source) REFERENCES nodes(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target);
CREATE INDEX IF NOT EXISTS idx_edges_type ON edges(type);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    migrated_at REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS graph_meta (
    key TEXT PRIMARY KEY,
    value REAL NOT NULL
);
"#;

const EDGE_TYPES_FOR_NEIGHBORS: &[&str] = &["CALLS", "IMPORTS", "EXTENDS", "READS", "WRITES"];

/// Handle to a repo's symbol/file graph database.
pub struct GraphStore {
    conn: Connection,
}

impl GraphStore {
    /// Open (creating if absent) the graph database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Open an in-memory graph database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Bulk insert (or replace) nodes in a single transaction.
    pub fn bulk_insert_nodes(&mut self, nodes: &[GraphNode]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO nodes (id, name, path, kind, start_line, end_line, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for node in nodes {
                stmt.execute(params![
                    node.id,
                    node.name,
                    node.path,
                    node.kind,
                    node.start_line,
                    node.end_line,
                    node.metadata.as_ref().map(|v| v.to_string()),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Bulk insert edges in a single transaction.
    pub fn bulk_insert_edges(&mut self, edges: &[GraphEdge]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO edges (source, target, type, metadata) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for edge in edges {
                stmt.execute(params![
                    edge.source,
                    edge.target,
                    edge.edge_type,
                    edge.metadata.as_ref().map(|v| v.to_string()),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Reclaim space after a bulk rebuild.
    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }

    /// Record the span store's mtime at build time, for later [`Self::is_stale`] checks.
    pub fn record_build_mtime(&self, span_store_mtime: f64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO graph_meta (key, value) VALUES ('built_at_span_mtime', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![span_store_mtime],
        )?;
        Ok(())
    }

    /// Whether the graph was built before the span store's current maximum file mtime,
    /// meaning spans have changed since the graph was last derived.
    pub fn is_stale(&self, current_span_store_max_mtime: f64) -> Result<bool> {
        let built_at: Option<f64> = self
            .conn
            .query_row(
                "SELECT value FROM graph_meta WHERE key = 'built_at_span_mtime'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match built_at {
            Some(built) => current_span_store_max_mtime > built,
            None => true,
        })
    }

    /// Total node count.
    pub fn node_count(&self) -> Result<i64> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0))?)
    }

    /// Total edge count.
    pub fn edge_count(&self) -> Result<i64> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0))?)
    }

    /// Look up a node by its exact id.
    pub fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        self.conn
            .query_row(
                "SELECT id, name, path, kind, start_line, end_line, metadata FROM nodes WHERE id = ?1",
                params![id],
                node_from_row,
            )
            .optional()
            .map_err(LlmcError::from)
    }

    /// Case-insensitive lookup of nodes by display name.
    pub fn get_nodes_by_name(&self, name: &str) -> Result<Vec<GraphNode>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, path, kind, start_line, end_line, metadata FROM nodes WHERE lower(name) = lower(?1)",
        )?;
        let rows = stmt.query_map(params![name], node_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(LlmcError::from)
    }

    /// Edges leaving `node_id`, optionally filtered by edge type.
    pub fn get_edges_from(&self, node_id: &str, edge_type: Option<&str>) -> Result<Vec<GraphEdge>> {
        let sql = match edge_type {
            Some(_) => "SELECT source, target, type, metadata FROM edges WHERE source = ?1 AND type = ?2",
            None => "SELECT source, target, type, metadata FROM edges WHERE source = ?1",
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = match edge_type {
            Some(t) => stmt.query_map(params![node_id, t], edge_from_row)?,
            None => stmt.query_map(params![node_id], edge_from_row)?,
        };
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(LlmcError::from)
    }

    /// Edges arriving at `node_id`, optionally filtered by edge type.
    pub fn get_edges_to(&self, node_id: &str, edge_type: Option<&str>) -> Result<Vec<GraphEdge>> {
        let sql = match edge_type {
            Some(_) => "SELECT source, target, type, metadata FROM edges WHERE target = ?1 AND type = ?2",
            None => "SELECT source, target, type, metadata FROM edges WHERE target = ?1",
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = match edge_type {
            Some(t) => stmt.query_map(params![node_id, t], edge_from_row)?,
            None => stmt.query_map(params![node_id], edge_from_row)?,
        };
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(LlmcError::from)
    }

    /// Substring search over node name and path.
    pub fn search_nodes(&self, query: &str) -> Result<Vec<GraphNode>> {
        let pattern = format!("%{query}%");
        let mut stmt = self.conn.prepare(
            "SELECT id, name, path, kind, start_line, end_line, metadata FROM nodes
             WHERE name LIKE ?1 OR path LIKE ?1",
        )?;
        let rows = stmt.query_map(params![pattern], node_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(LlmcError::from)
    }

    /// Paths that have an edge *into* any of `target_names`, matching by exact node name/id
    /// or by a `.name`/`:name` suffix (covers qualified symbols whose container changed),
    /// and also matching directly against dangling edge targets that never became nodes
    /// (external symbols, unresolved imports).
    pub fn get_incoming_neighbors(&self, target_names: &[String], edge_types: Option<&[&str]>) -> Result<Vec<String>> {
        if target_names.is_empty() {
            return Ok(Vec::new());
        }
        let type_filter = edge_types.unwrap_or(EDGE_TYPES_FOR_NEIGHBORS);
        let type_placeholders = join_placeholders(type_filter.len(), 1);
        let name_placeholders_a = join_placeholders(target_names.len(), 1 + type_filter.len());
        let name_placeholders_b =
            join_placeholders(target_names.len(), 1 + type_filter.len() + target_names.len());

        let sql = format!(
            "SELECT DISTINCT n2.path FROM edges e
             JOIN nodes n1 ON e.target = n1.id
             JOIN nodes n2 ON e.source = n2.id
             WHERE e.type IN ({type_placeholders})
               AND (n1.name IN ({name_placeholders_a})
                    OR n1.id IN ({name_placeholders_a})
                    {suffix_a})
             UNION
             SELECT DISTINCT n2.path FROM edges e
             JOIN nodes n2 ON e.source = n2.id
             WHERE e.type IN ({type_placeholders})
               AND (e.target IN ({name_placeholders_b}) {suffix_b})
             LIMIT 100",
            type_placeholders = type_placeholders,
            name_placeholders_a = name_placeholders_a,
            name_placeholders_b = name_placeholders_b,
            suffix_a = suffix_or_clauses("n1.id", target_names.len(), 1 + type_filter.len()),
            suffix_b = suffix_or_clauses("e.target", target_names.len(), 1 + type_filter.len() + target_names.len()),
        );

        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        for t in type_filter {
            params.push(Box::new(t.to_string()));
        }
        for n in target_names {
            params.push(Box::new(n.clone()));
        }
        for n in target_names {
            for suffix in [format!(".{n}"), format!(":{n}")] {
                params.push(Box::new(suffix));
            }
        }
        for n in target_names {
            params.push(Box::new(n.clone()));
        }
        for n in target_names {
            for suffix in [format!(".{n}"), format!(":{n}")] {
                params.push(Box::new(suffix));
            }
        }

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(LlmcError::from)
    }

    /// Paths reachable by an edge *from* any of `source_names`; symmetric to
    /// [`Self::get_incoming_neighbors`] but needs no UNION since sources always exist as nodes.
    pub fn get_outgoing_neighbors(&self, source_names: &[String], edge_types: Option<&[&str]>) -> Result<Vec<String>> {
        if source_names.is_empty() {
            return Ok(Vec::new());
        }
        let type_filter = edge_types.unwrap_or(EDGE_TYPES_FOR_NEIGHBORS);
        let type_placeholders = join_placeholders(type_filter.len(), 1);
        let name_placeholders = join_placeholders(source_names.len(), 1 + type_filter.len());

        let sql = format!(
            "SELECT DISTINCT n2.path FROM edges e
             JOIN nodes n1 ON e.source = n1.id
             JOIN nodes n2 ON e.target = n2.id
             WHERE e.type IN ({type_placeholders})
               AND (n1.name IN ({name_placeholders}) OR n1.id IN ({name_placeholders})
                    {suffix})
             LIMIT 100",
            type_placeholders = type_placeholders,
            name_placeholders = name_placeholders,
            suffix = suffix_or_clauses("n1.id", source_names.len(), 1 + type_filter.len()),
        );

        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        for t in type_filter {
            params.push(Box::new(t.to_string()));
        }
        for n in source_names {
            params.push(Box::new(n.clone()));
        }
        for n in source_names {
            for suffix in [format!(".{n}"), format!(":{n}")] {
                params.push(Box::new(suffix));
            }
        }

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(LlmcError::from)
    }

    /// Files connected to any of `file_paths` via any edge direction, excluding the seed set.
    pub fn get_file_neighbors(&self, file_paths: &[String], limit: usize) -> Result<Vec<String>> {
        if file_paths.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = join_placeholders(file_paths.len(), 1);
        let sql = format!(
            "SELECT DISTINCT
                CASE WHEN n1.path IN ({placeholders}) THEN n2.path ELSE n1.path END AS neighbor
             FROM edges e
             JOIN nodes n1 ON e.source = n1.id
             JOIN nodes n2 ON e.target = n2.id
             WHERE (n1.path IN ({placeholders}) OR n2.path IN ({placeholders}))
             LIMIT ?"
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        for _ in 0..3 {
            for p in file_paths {
                params.push(Box::new(p.clone()));
            }
        }
        params.push(Box::new((limit * 4) as i64));
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))?;
        let seed: HashSet<&String> = file_paths.iter().collect();
        let mut out = Vec::new();
        for row in rows {
            let path = row?;
            if !seed.contains(&path) && !out.contains(&path) {
                out.push(path);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }
}

fn node_from_row(row: &rusqlite::Row) -> rusqlite::Result<GraphNode> {
    let metadata_json: Option<String> = row.get(6)?;
    Ok(GraphNode {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        kind: row.get(3)?,
        start_line: row.get(4)?,
        end_line: row.get(5)?,
        metadata: metadata_json.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

fn edge_from_row(row: &rusqlite::Row) -> rusqlite::Result<GraphEdge> {
    let metadata_json: Option<String> = row.get(3)?;
    Ok(GraphEdge {
        source: row.get(0)?,
        target: row.get(1)?,
        edge_type: row.get(2)?,
        metadata: metadata_json.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

fn join_placeholders(count: usize, start_index: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", start_index + i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn suffix_or_clauses(column: &str, count: usize, start_index: usize) -> String {
    if count == 0 {
        return String::new();
    }
    let clauses: Vec<String> = (0..count * 2)
        .map(|i| format!("{column} LIKE '%' || ?{}", start_index + i))
        .collect();
    format!("OR {}", clauses.join(" OR "))
}

/// Rebuild a graph SQLite database from the JSON artifact produced by the schema/graph
/// builder (`.llmc/rag_graph.json`). Tolerates several field-name conventions found across
/// graph exporters (`nodes`/`vertices`/`entities`, `edges`/`links`/`relations`, etc.) and an
/// optional top-level `schema_graph` wrapper key. Deletes and recreates the target database.
pub fn build_from_json(repo_root: &Path, json_path: &Path, db_path: &Path) -> Result<GraphStore> {
    let text = std::fs::read_to_string(json_path)?;
    let mut value: Value = serde_json::from_str(&text)?;
    if let Some(wrapped) = value.get("schema_graph").cloned() {
        value = wrapped;
    }

    let nodes_value = first_present(&value, &["nodes", "vertices", "entities"]).cloned().unwrap_or(Value::Null);
    let edges_value = first_present(&value, &["edges", "links", "relations"]).cloned().unwrap_or(Value::Null);

    let nodes = parse_nodes(&nodes_value);
    let edges = parse_edges(&edges_value);

    if db_path.exists() {
        std::fs::remove_file(db_path)?;
    }
    let _ = repo_root;
    let mut store = GraphStore::open(db_path)?;
    store.bulk_insert_nodes(&nodes)?;
    store.bulk_insert_edges(&edges)?;
    store.vacuum()?;
    Ok(store)
}

fn first_present<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| value.get(k))
}

fn parse_nodes(value: &Value) -> Vec<GraphNode> {
    let Some(arr) = value.as_array() else { return Vec::new() };
    arr.iter()
        .filter_map(|n| {
            let id = first_present(n, &["id", "nid", "name"])?.as_str()?.to_string();
            let name = first_present(n, &["name", "id", "nid"])
                .and_then(|v| v.as_str())
                .map(short_symbol_name)
                .unwrap_or_else(|| short_symbol_name(&id));
            let path = first_present(n, &["path", "file", "file_path"])
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let kind = first_present(n, &["kind", "type"]).and_then(|v| v.as_str()).map(String::from);
            let start_line = first_present(n, &["start_line", "start"]).and_then(|v| v.as_i64());
            let end_line = first_present(n, &["end_line", "end"]).and_then(|v| v.as_i64());
            Some(GraphNode { id, name, path, kind, start_line, end_line, metadata: None })
        })
        .collect()
}

fn parse_edges(value: &Value) -> Vec<GraphEdge> {
    let Some(arr) = value.as_array() else { return Vec::new() };
    arr.iter()
        .filter_map(|e| {
            let source = first_present(e, &["source", "src", "from"])?.as_str()?.to_string();
            let target = first_present(e, &["target", "dst", "to"])?.as_str()?.to_string();
            let edge_type = first_present(e, &["type", "edge_type", "label"])
                .and_then(|v| v.as_str())
                .unwrap_or("REFERENCES")
                .to_string();
            Some(GraphEdge { source, target, edge_type, metadata: None })
        })
        .collect()
}

/// Extract the short display name from a qualified symbol id, splitting on `:` then `.`.
fn short_symbol_name(qualified: &str) -> String {
    let after_colon = qualified.rsplit(':').next().unwrap_or(qualified);
    after_colon.rsplit('.').next().unwrap_or(after_colon).to_string()
}

/// Path layout helper: where the JSON graph artifact and SQLite graph database live for a repo.
pub fn graph_paths(repo_root: &Path) -> (PathBuf, PathBuf) {
    let dir = repo_root.join(".llmc");
    (dir.join("rag_graph.json"), dir.join("rag_graph.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_symbol_name_strips_qualifiers() {
        assert_eq!(short_symbol_name("module.Class.method"), "method");
        assert_eq!(short_symbol_name("pkg:module.func"), "func");
        assert_eq!(short_symbol_name("bare"), "bare");
    }

    #[test]
    fn bulk_insert_and_neighbor_queries() {
        let mut store = GraphStore::open_in_memory().unwrap();
        store
            .bulk_insert_nodes(&[
                GraphNode { id: "a.py:foo".into(), name: "foo".into(), path: "a.py".into(), kind: Some("function".into()), start_line: Some(1), end_line: Some(5), metadata: None },
                GraphNode { id: "b.py:bar".into(), name: "bar".into(), path: "b.py".into(), kind: Some("function".into()), start_line: Some(1), end_line: Some(5), metadata: None },
            ])
            .unwrap();
        store
            .bulk_insert_edges(&[GraphEdge { source: "b.py:bar".into(), target: "a.py:foo".into(), edge_type: "CALLS".into(), metadata: None }])
            .unwrap();

        let incoming = store.get_incoming_neighbors(&["foo".to_string()], None).unwrap();
        assert_eq!(incoming, vec!["b.py".to_string()]);

        let outgoing = store.get_outgoing_neighbors(&["bar".to_string()], None).unwrap();
        assert_eq!(outgoing, vec!["a.py".to_string()]);
    }

    #[test]
    fn file_neighbors_excludes_seed_paths() {
        let mut store = GraphStore::open_in_memory().unwrap();
        store
            .bulk_insert_nodes(&[
                GraphNode { id: "a.py".into(), name: "a.py".into(), path: "a.py".into(), kind: Some("file".into()), start_line: None, end_line: None, metadata: None },
                GraphNode { id: "b.py".into(), name: "b.py".into(), path: "b.py".into(), kind: Some("file".into()), start_line: None, end_line: None, metadata: None },
            ])
            .unwrap();
        store
            .bulk_insert_edges(&[GraphEdge { source: "a.py".into(), target: "b.py".into(), edge_type: "IMPORTS".into(), metadata: None }])
            .unwrap();
        let neighbors = store.get_file_neighbors(&["a.py".to_string()], 20).unwrap();
        assert_eq!(neighbors, vec!["b.py".to_string()]);
    }
}
