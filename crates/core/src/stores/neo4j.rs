use crate::config::Neo4jConfig;
use crate::error::ConfigError;
use crate::models::{Candidate, Chunk, DocumentFingerprint, DuplicatePolicy, RetrievalMode};
use crate::traits::{GraphStore, VECTOR_INDEX_NAME};
use crate::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

pub struct Neo4jStore {
    endpoint: String,
    database: String,
    username: String,
    password: String,
    dimension: usize,
    vector_oversample: usize,
    index_seen: AtomicBool,
    client: Client,
}

struct Statement {
    cypher: String,
    parameters: Value,
}

impl Statement {
    fn new(cypher: impl Into<String>, parameters: Value) -> Self {
        Self {
            cypher: cypher.into(),
            parameters,
        }
    }
}

impl Neo4jStore {
    pub fn new(config: &Neo4jConfig, dimension: usize) -> Result<Self, ConfigError> {
        let password = config
            .password
            .clone()
            .filter(|password| !password.trim().is_empty())
            .ok_or(ConfigError::Missing("NEO4J_PASSWORD"))?;

        Ok(Self {
            endpoint: config.uri.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            username: config.username.clone(),
            password,
            dimension,
            vector_oversample: 4,
            index_seen: AtomicBool::new(false),
            client: Client::new(),
        })
    }

    pub fn with_vector_oversample(mut self, factor: usize) -> Self {
        self.vector_oversample = factor.max(1);
        self
    }

    fn tx_url(&self) -> String {
        format!("{}/db/{}/tx/commit", self.endpoint, self.database)
    }

    pub async fn verify_connectivity(&self) -> Result<(), SearchError> {
        self.run(vec![Statement::new("RETURN 1", json!({}))]).await?;
        info!(endpoint = %self.endpoint, database = %self.database, "connected to neo4j");
        Ok(())
    }

    async fn run(&self, statements: Vec<Statement>) -> Result<Value, SearchError> {
        let statements: Vec<Value> = statements
            .into_iter()
            .map(|statement| {
                json!({
                    "statement": statement.cypher,
                    "parameters": statement.parameters,
                })
            })
            .collect();

        let response = self
            .client
            .post(self.tx_url())
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "statements": statements }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "neo4j".to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        check_errors(&body)?;
        Ok(body)
    }

    async fn chunk_count(&self, filename: &str) -> Result<u64, SearchError> {
        let body = self
            .run(vec![Statement::new(
                "MATCH (:Document {filename: $filename})-[:HAS_CHUNK]->(c:Chunk) RETURN count(c)",
                json!({ "filename": filename }),
            )])
            .await?;
        Ok(first_scalar(&body).and_then(Value::as_u64).unwrap_or(0))
    }

    async fn index_dimension(&self) -> Result<Option<usize>, SearchError> {
        let body = self
            .run(vec![Statement::new(
                "SHOW INDEXES YIELD name, options WHERE name = $name \
                 RETURN options.indexConfig['vector.dimensions'] AS dimensions",
                json!({ "name": VECTOR_INDEX_NAME }),
            )])
            .await?;
        Ok(declared_dimension(&body))
    }

    async fn vector_index_exists(&self) -> Result<bool, SearchError> {
        if self.index_seen.load(Ordering::Acquire) {
            return Ok(true);
        }
        match self.index_dimension().await? {
            Some(existing) if existing != self.dimension => Err(SearchError::DimensionMismatch {
                expected: existing,
                actual: self.dimension,
            }),
            Some(_) => {
                self.index_seen.store(true, Ordering::Release);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn check_dimension(&self, actual: usize) -> Result<(), SearchError> {
        if actual != self.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn ensure_vector_index(&self, dimension: usize) -> Result<(), SearchError> {
        self.check_dimension(dimension)?;

        let schema = [
            "CREATE CONSTRAINT document_filename IF NOT EXISTS FOR (d:Document) REQUIRE d.filename IS UNIQUE".to_string(),
            "CREATE CONSTRAINT entity_name IF NOT EXISTS FOR (e:Entity) REQUIRE e.name IS UNIQUE".to_string(),
            format!(
                "CREATE VECTOR INDEX `{VECTOR_INDEX_NAME}` IF NOT EXISTS \
                 FOR (c:Chunk) ON (c.embedding) \
                 OPTIONS {{ indexConfig: {{ `vector.dimensions`: {dimension}, `vector.similarity_function`: 'cosine' }} }}"
            ),
        ];
        // Neo4j refuses schema and data statements in one transaction.
        for cypher in schema {
            self.run(vec![Statement::new(cypher, json!({}))]).await?;
        }

        match self.index_dimension().await? {
            Some(existing) if existing != dimension => Err(SearchError::DimensionMismatch {
                expected: existing,
                actual: dimension,
            }),
            Some(_) => {
                self.index_seen.store(true, Ordering::Release);
                Ok(())
            }
            None => Err(SearchError::NotReady(format!(
                "vector index {VECTOR_INDEX_NAME} is not visible after creation"
            ))),
        }
    }

    async fn upsert_document(&self, document: &DocumentFingerprint) -> Result<(), SearchError> {
        self.run(vec![Statement::new(
            r#"
            MERGE (d:Document {filename: $filename})
            ON CREATE SET d.created_at = $ingested_at
            SET d.source_path = $source_path,
                d.checksum = $checksum,
                d.ingested_at = $ingested_at
            "#,
            json!({
                "filename": document.filename,
                "source_path": document.source_path,
                "checksum": document.checksum,
                "ingested_at": document.ingested_at.to_rfc3339(),
            }),
        )])
        .await?;
        Ok(())
    }

    async fn document_exists(&self, filename: &str) -> Result<bool, SearchError> {
        let body = self
            .run(vec![Statement::new(
                "MATCH (d:Document {filename: $filename}) RETURN count(d) > 0",
                json!({ "filename": filename }),
            )])
            .await?;
        Ok(first_scalar(&body).and_then(Value::as_bool).unwrap_or(false))
    }

    async fn write_chunks(
        &self,
        filename: &str,
        chunks: &[Chunk],
        policy: DuplicatePolicy,
    ) -> Result<(), SearchError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let rows = chunks
            .iter()
            .map(|chunk| {
                self.check_dimension(chunk.embedding.len())?;
                if chunk.source != filename {
                    return Err(SearchError::Request(format!(
                        "chunk from {} cannot be written under {filename}",
                        chunk.source
                    )));
                }
                Ok(json!({
                    "text": chunk.text,
                    "source": chunk.source,
                    "page_number": chunk.page_number,
                    "position": chunk.position,
                    "embedding": chunk.embedding,
                    "entities": chunk.entities,
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        if policy == DuplicatePolicy::Reject && self.chunk_count(filename).await? > 0 {
            return Err(SearchError::Request(format!("{filename} already has chunks")));
        }

        let mut statements = Vec::new();
        if policy == DuplicatePolicy::Replace {
            statements.push(Statement::new(
                "MATCH (:Document {filename: $filename})-[:HAS_CHUNK]->(old:Chunk) DETACH DELETE old",
                json!({ "filename": filename }),
            ));
        }
        statements.push(Statement::new(
            r#"
            MATCH (d:Document {filename: $filename})
            UNWIND $rows AS row
            CREATE (c:Chunk {
                text: row.text,
                source: row.source,
                page_number: row.page_number,
                position: row.position,
                embedding: row.embedding
            })
            CREATE (d)-[:HAS_CHUNK]->(c)
            FOREACH (entity_name IN row.entities |
                MERGE (e:Entity {name: entity_name})
                MERGE (c)-[:MENTIONS]->(e))
            RETURN count(c) AS written
            "#,
            json!({ "filename": filename, "rows": rows }),
        ));

        let body = self.run(statements).await?;
        let written = last_scalar(&body).and_then(Value::as_u64).unwrap_or(0);
        if written as usize != chunks.len() {
            return Err(SearchError::NotReady(format!(
                "document {filename} must be upserted before its chunks ({written} of {} written)",
                chunks.len()
            )));
        }

        debug!(%filename, written, ?policy, "chunks committed");
        Ok(())
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filename: &str,
    ) -> Result<Vec<Candidate>, SearchError> {
        self.check_dimension(embedding.len())?;
        if top_k == 0 {
            return Ok(Vec::new());
        }
        if !self.vector_index_exists().await? {
            debug!(index = VECTOR_INDEX_NAME, %filename, "vector index missing, no vector hits");
            return Ok(Vec::new());
        }

        let body = self
            .run(vec![Statement::new(
                r#"
                    CALL db.index.vector.queryNodes($index, $neighbours, $embedding) YIELD node, score
                    WHERE node.source = $filename
                    WITH node, score
                    ORDER BY score DESC
                    LIMIT $top_k
                    RETURN node.text AS text, node.page_number AS page_number, node.position AS position,
                           node.source AS source, score,
                           [(node)-[:MENTIONS]->(e:Entity) | e.name] AS entities
                    "#,
                json!({
                    "index": VECTOR_INDEX_NAME,
                    "neighbours": top_k * self.vector_oversample,
                    "embedding": embedding,
                    "filename": filename,
                    "top_k": top_k,
                }),
            )])
            .await?;

        Ok(rows_to_candidates(&body, RetrievalMode::Vector))
    }

    async fn entity_search(
        &self,
        entities: &[String],
        filename: &str,
    ) -> Result<Vec<Candidate>, SearchError> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        let body = self
            .run(vec![Statement::new(
                r#"
                    MATCH (c:Chunk)-[:MENTIONS]->(e:Entity)
                    WHERE e.name IN $entities AND c.source = $filename
                    WITH DISTINCT c
                    ORDER BY c.page_number, c.position
                    RETURN c.text AS text, c.page_number AS page_number, c.position AS position,
                           c.source AS source, null AS score,
                           [(c)-[:MENTIONS]->(m:Entity) | m.name] AS entities
                    "#,
                json!({ "entities": entities, "filename": filename }),
            )])
            .await?;

        Ok(rows_to_candidates(&body, RetrievalMode::Graph))
    }

    async fn list_document_filenames(&self) -> Result<Vec<String>, SearchError> {
        let body = self
            .run(vec![Statement::new(
                "MATCH (d:Document) RETURN d.filename AS filename ORDER BY filename",
                json!({}),
            )])
            .await?;

        Ok(extract_rows(&body, 0)
            .into_iter()
            .filter_map(|row| row.get(0).and_then(Value::as_str).map(str::to_string))
            .collect())
    }
}

fn check_errors(body: &Value) -> Result<(), SearchError> {
    let errors = body
        .pointer("/errors")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if errors.is_empty() {
        return Ok(());
    }

    let details = errors
        .iter()
        .map(|error| {
            format!(
                "{}: {}",
                error.pointer("/code").and_then(Value::as_str).unwrap_or("unknown"),
                error.pointer("/message").and_then(Value::as_str).unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("; ");

    Err(SearchError::BackendResponse {
        backend: "neo4j".to_string(),
        details,
    })
}

fn extract_rows(payload: &Value, result_index: usize) -> Vec<&Value> {
    payload
        .pointer("/results")
        .and_then(Value::as_array)
        .and_then(|results| results.get(result_index))
        .and_then(|result| result.pointer("/data"))
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row_entry| {
                    row_entry
                        .pointer("/row")
                        .or(Some(row_entry))
                        .filter(|candidate| candidate.is_array())
                })
                .collect()
        })
        .unwrap_or_default()
}

fn first_scalar(payload: &Value) -> Option<&Value> {
    extract_rows(payload, 0).first().and_then(|row| row.get(0))
}

fn declared_dimension(payload: &Value) -> Option<usize> {
    first_scalar(payload)
        .and_then(Value::as_u64)
        .map(|dimension| dimension as usize)
}

fn last_scalar(payload: &Value) -> Option<&Value> {
    let last = payload
        .pointer("/results")
        .and_then(Value::as_array)
        .map(|results| results.len())?
        .checked_sub(1)?;
    extract_rows(payload, last).first().and_then(|row| row.get(0))
}

fn rows_to_candidates(payload: &Value, mode: RetrievalMode) -> Vec<Candidate> {
    extract_rows(payload, 0)
        .into_iter()
        .filter_map(|row| {
            let text = row.get(0).and_then(Value::as_str)?.to_string();
            let page_number = row.get(1).and_then(Value::as_u64)? as u32;
            let position = row.get(2).and_then(Value::as_u64)?;
            let source = row.get(3).and_then(Value::as_str)?.to_string();
            let score = row.get(4).and_then(Value::as_f64);
            let entities = row
                .get(5)
                .and_then(Value::as_array)
                .map(|names| {
                    names
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            Some(Candidate {
                chunk: Chunk {
                    source,
                    page_number,
                    position,
                    text,
                    entities,
                    embedding: Vec::new(),
                },
                score,
                mode,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buffer = [0u8; 4096];
        loop {
            let read = stream.read(&mut buffer).await.expect("read request");
            if read == 0 {
                break;
            }
            raw.extend_from_slice(&buffer[..read]);

            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if raw.len() >= header_end + 4 + content_length {
                    return text[header_end + 4..].to_string();
                }
            }
        }
        String::from_utf8_lossy(&raw).to_string()
    }

    async fn stub_neo4j(reply: &'static str) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let body = read_request(&mut stream).await;
                seen.lock().expect("requests").push(body);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    reply.len(),
                    reply
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (format!("http://{address}"), requests)
    }

    fn config() -> Neo4jConfig {
        Neo4jConfig {
            password: Some("secret".to_string()),
            ..Neo4jConfig::default()
        }
    }

    #[test]
    fn missing_password_is_a_config_error() {
        let result = Neo4jStore::new(&Neo4jConfig::default(), 384);
        assert!(matches!(result, Err(ConfigError::Missing("NEO4J_PASSWORD"))));
    }

    #[test]
    fn transaction_url_targets_database() {
        let store = Neo4jStore::new(&config(), 384).expect("config is complete");
        assert_eq!(store.tx_url(), "http://localhost:7474/db/neo4j/tx/commit");
    }

    #[test]
    fn cypher_errors_in_ok_response_are_reported() {
        let body = json!({
            "results": [],
            "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "bad"}]
        });
        let error = check_errors(&body).expect_err("errors must surface");
        assert!(error.to_string().contains("SyntaxError: bad"));
        assert!(check_errors(&json!({"results": [], "errors": []})).is_ok());
    }

    #[test]
    fn candidate_rows_are_parsed() {
        let body = json!({
            "results": [{
                "columns": ["text", "page_number", "position", "source", "score", "entities"],
                "data": [
                    {"row": ["Valve text", 2, 5, "a.pdf", 0.91, ["valve"]]},
                    {"row": ["Graph text", 3, 7, "a.pdf", null, []]},
                    {"row": [null, 3, 8, "a.pdf", null, []]}
                ]
            }],
            "errors": []
        });

        let hits = rows_to_candidates(&body, RetrievalMode::Vector);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.key().position, 5);
        assert_eq!(hits[0].score, Some(0.91));
        assert_eq!(hits[0].chunk.entities, vec!["valve".to_string()]);
        assert_eq!(hits[1].score, None);
    }

    #[test]
    fn last_scalar_reads_final_statement() {
        let body = json!({
            "results": [
                {"columns": [], "data": []},
                {"columns": ["written"], "data": [{"row": [3]}]}
            ],
            "errors": []
        });
        assert_eq!(last_scalar(&body).and_then(Value::as_u64), Some(3));
        assert_eq!(first_scalar(&body), None);
    }

    #[test]
    fn empty_index_listing_means_no_declared_dimension() {
        let missing = json!({"results": [{"columns": ["dimensions"], "data": []}], "errors": []});
        let present = json!({
            "results": [{"columns": ["dimensions"], "data": [{"row": [384]}]}],
            "errors": []
        });
        assert_eq!(declared_dimension(&missing), None);
        assert_eq!(declared_dimension(&present), Some(384));
    }

    #[tokio::test]
    async fn vector_search_without_an_index_returns_no_hits() {
        let (uri, requests) =
            stub_neo4j(r#"{"results":[{"columns":["dimensions"],"data":[]}],"errors":[]}"#).await;
        let store = Neo4jStore::new(&Neo4jConfig { uri, ..config() }, 3).expect("config is complete");

        let hits = store
            .vector_search(&[1.0, 0.0, 0.0], 5, "a.pdf")
            .await
            .expect("a missing index is not an error");

        assert!(hits.is_empty());
        let requests = requests.lock().expect("requests");
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains("SHOW INDEXES"));
        assert!(requests.iter().all(|body| !body.contains("queryNodes")));
    }

    #[tokio::test]
    async fn vector_search_against_an_index_of_another_width_fails() {
        let (uri, _) = stub_neo4j(
            r#"{"results":[{"columns":["dimensions"],"data":[{"row":[768]}]}],"errors":[]}"#,
        )
        .await;
        let store = Neo4jStore::new(&Neo4jConfig { uri, ..config() }, 3).expect("config is complete");

        assert!(matches!(
            store.vector_search(&[1.0, 0.0, 0.0], 5, "a.pdf").await,
            Err(SearchError::DimensionMismatch { expected: 768, actual: 3 })
        ));
    }

    #[test]
    fn embeddings_with_wrong_dimension_are_refused_before_sending() {
        let store = Neo4jStore::new(&config(), 3).expect("config is complete");
        assert!(matches!(
            store.check_dimension(2),
            Err(SearchError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }
}
