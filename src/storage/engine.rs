//! External Engine Adapter: an optional `tantivy` full-text engine
//! sitting beside the SQL store. A strict performance adjunct — every
//! feature keeps working without it, so absence or failure only degrades
//! retrieval, never correctness.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::model::FileKey;
use crate::model::FileRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub ready: bool,
    pub version: String,
    pub doc_count: u64,
    pub reason: String,
    pub hint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHit {
    pub doc_id: String,
    pub score: f32,
}

/// The engine contract: `upsert_documents`, `delete_documents`,
/// `search`, `status`.
pub trait EngineAdapter: Send + Sync {
    fn upsert_documents(&self, docs: &[FileRecord]) -> CoreResult<()>;
    fn delete_documents(&self, ids: &[FileKey]) -> CoreResult<()>;
    fn search(&self, query: &str, limit: usize) -> CoreResult<(Vec<EngineHit>, EngineStatus)>;
    fn status(&self) -> EngineStatus;
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexVersion {
    schema_version: u32,
    build_timestamp: i64,
    document_count: u64,
    engine_version: String,
    config_hash: String,
}

fn version_path(index_dir: &Path) -> PathBuf {
    index_dir.join("index_version.json")
}

/// Ready iff the metadata file exists, its config hash matches, and the
/// engine version string is populated.
pub fn is_ready(index_dir: &Path, expected_config_hash: &str) -> bool {
    let Ok(bytes) = std::fs::read(version_path(index_dir)) else {
        return false;
    };
    let Ok(meta) = serde_json::from_slice::<IndexVersion>(&bytes) else {
        return false;
    };
    !meta.engine_version.is_empty() && meta.config_hash == expected_config_hash
}

pub fn write_version_file(
    index_dir: &Path,
    document_count: u64,
    engine_version: &str,
    config_hash: &str,
) -> std::io::Result<()> {
    std::fs::create_dir_all(index_dir)?;
    let meta = IndexVersion {
        schema_version: 1,
        build_timestamp: crate::model::now_unix(),
        document_count,
        engine_version: engine_version.to_string(),
        config_hash: config_hash.to_string(),
    };
    let bytes = serde_json::to_vec_pretty(&meta)?;
    std::fs::write(version_path(index_dir), bytes)
}

/// A no-op adapter used whenever the `fts-engine` feature is off or the
/// engine failed to open; every search falls back to SQL FTS/LIKE.
pub struct NullEngine;

impl EngineAdapter for NullEngine {
    fn upsert_documents(&self, _docs: &[FileRecord]) -> CoreResult<()> {
        Ok(())
    }
    fn delete_documents(&self, _ids: &[FileKey]) -> CoreResult<()> {
        Ok(())
    }
    fn search(&self, _query: &str, _limit: usize) -> CoreResult<(Vec<EngineHit>, EngineStatus)> {
        Ok((Vec::new(), self.status()))
    }
    fn status(&self) -> EngineStatus {
        EngineStatus {
            ready: false,
            version: String::new(),
            doc_count: 0,
            reason: "external engine disabled".to_string(),
            hint: "enable the fts-engine feature to use tantivy".to_string(),
        }
    }
}

#[cfg(feature = "fts-engine")]
pub mod tantivy_engine {
    use super::*;
    use parking_lot::RwLock;
    use tantivy::collector::TopDocs;
    use tantivy::query::QueryParser;
    use tantivy::schema::{Schema, STORED, STRING, TEXT, Value};
    use tantivy::{doc, Index, IndexWriter};

    pub struct TantivyEngine {
        index: Index,
        writer: RwLock<IndexWriter>,
        doc_id_field: tantivy::schema::Field,
        path_field: tantivy::schema::Field,
        body_field: tantivy::schema::Field,
        index_dir: PathBuf,
        config_hash: String,
    }

    impl TantivyEngine {
        pub fn open(index_dir: &Path, config_hash: &str) -> tantivy::Result<Self> {
            std::fs::create_dir_all(index_dir)?;
            let mut schema_builder = Schema::builder();
            let doc_id_field = schema_builder.add_text_field("doc_id", STRING | STORED);
            let path_field = schema_builder.add_text_field("path", TEXT | STORED);
            let body_field = schema_builder.add_text_field("body", TEXT);
            let schema = schema_builder.build();

            let dir = tantivy::directory::MmapDirectory::open(index_dir)?;
            let index = Index::open_or_create(dir, schema)?;
            let writer = index.writer(50_000_000)?;

            Ok(Self {
                index,
                writer: RwLock::new(writer),
                doc_id_field,
                path_field,
                body_field,
                index_dir: index_dir.to_path_buf(),
                config_hash: config_hash.to_string(),
            })
        }
    }

    impl EngineAdapter for TantivyEngine {
        fn upsert_documents(&self, docs: &[FileRecord]) -> CoreResult<()> {
            let mut writer = self.writer.write();
            for d in docs {
                let term = tantivy::Term::from_field_text(self.doc_id_field, d.key.as_str());
                writer.delete_term(term);
                let _ = writer.add_document(doc!(
                    self.doc_id_field => d.key.as_str(),
                    self.path_field => d.rel_path.as_str(),
                    self.body_field => d.fts_content.as_str(),
                ));
            }
            writer.commit().map_err(|e| crate::error::CoreError::EngineUnavailable { reason: e.to_string() })?;
            let count = self.index.reader().map(|r| r.searcher().num_docs()).unwrap_or(0);
            let _ = write_version_file(&self.index_dir, count, env!("CARGO_PKG_VERSION"), &self.config_hash);
            Ok(())
        }

        fn delete_documents(&self, ids: &[FileKey]) -> CoreResult<()> {
            let mut writer = self.writer.write();
            for id in ids {
                let term = tantivy::Term::from_field_text(self.doc_id_field, id.as_str());
                writer.delete_term(term);
            }
            writer.commit().map_err(|e| crate::error::CoreError::EngineUnavailable { reason: e.to_string() })?;
            Ok(())
        }

        fn search(&self, query: &str, limit: usize) -> CoreResult<(Vec<EngineHit>, EngineStatus)> {
            let reader = self
                .index
                .reader()
                .map_err(|e| crate::error::CoreError::EngineUnavailable { reason: e.to_string() })?;
            let searcher = reader.searcher();
            let parser = QueryParser::for_index(&self.index, vec![self.body_field, self.path_field]);
            let parsed = parser
                .parse_query(query)
                .map_err(|e| crate::error::CoreError::EngineUnavailable { reason: e.to_string() })?;
            let top = searcher
                .search(&parsed, &TopDocs::with_limit(limit))
                .map_err(|e| crate::error::CoreError::EngineUnavailable { reason: e.to_string() })?;

            let mut hits = Vec::new();
            for (score, addr) in top {
                if let Ok(retrieved) = searcher.doc::<tantivy::TantivyDocument>(addr) {
                    if let Some(v) = retrieved.get_first(self.doc_id_field) {
                        if let Some(s) = v.as_str() {
                            hits.push(EngineHit { doc_id: s.to_string(), score });
                        }
                    }
                }
            }
            Ok((hits, self.status()))
        }

        fn status(&self) -> EngineStatus {
            let count = self.index.reader().map(|r| r.searcher().num_docs()).unwrap_or(0);
            EngineStatus {
                ready: is_ready(&self.index_dir, &self.config_hash),
                version: env!("CARGO_PKG_VERSION").to_string(),
                doc_count: count,
                reason: String::new(),
                hint: String::new(),
            }
        }
    }
}
