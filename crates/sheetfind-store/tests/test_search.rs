//! Integration tests for owner-scoped prefix search.
//!
//! Run with: cargo test -p sheetfind-store --test test_search

use sheetfind_store::schema::migrate;
use sheetfind_store::{
    BatchWriter, Catalog, Connection, FileRecord, PoolConfig, QueryCompiler, RowBatch,
    SearchExecutor, SheetFindError, SnippetConfig, UserId, DEFAULT_RESULT_LIMIT,
};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    conn: Connection,
    catalog: Catalog,
}

/// Helper to open a migrated database in a fresh temp dir
async fn setup() -> Fixture {
    let dir = tempfile::tempdir().expect("temp dir");
    let conn = Connection::open(dir.path().join("search.db"), PoolConfig::default())
        .await
        .expect("open database");
    migrate(&conn).await.expect("migrate");
    let catalog = Catalog::new(conn.clone());
    Fixture {
        _dir: dir,
        conn,
        catalog,
    }
}

impl Fixture {
    /// Creates a user owning one folder holding one file with `rows`.
    async fn user_with_rows(&self, email: &str, rows: &[&[&str]]) -> (UserId, FileRecord) {
        let user = self.catalog.create_user(email).await.unwrap();
        let folder = self.catalog.create_folder(user.id, "Planilhas").await.unwrap();
        let file = self.upload(folder.id, "dados.xlsx", rows).await;
        (user.id, file)
    }

    async fn upload(
        &self,
        folder: sheetfind_store::FolderId,
        name: &str,
        rows: &[&[&str]],
    ) -> FileRecord {
        let file = self.catalog.register_file(folder, name, name).await.unwrap();
        let mut batch = RowBatch::default();
        for row in rows {
            batch.push(*row).unwrap();
        }
        BatchWriter::new(self.conn.clone())
            .write(file.id, &batch)
            .await
            .unwrap();
        file
    }

    fn executor(&self) -> SearchExecutor {
        SearchExecutor::new(self.conn.clone())
    }
}

#[tokio::test]
async fn test_results_are_scoped_to_owner() {
    let fx = setup().await;
    let (ana, ana_file) = fx
        .user_with_rows("ana@example.com", &[&["relatorio mensal"]])
        .await;
    let (bia, bia_file) = fx
        .user_with_rows("bia@example.com", &[&["relatorio anual"], &["outra coisa"]])
        .await;

    let query = QueryCompiler::compile("relat").unwrap();
    assert_eq!(query.as_str(), "relat*");

    let ana_hits = fx.executor().search(ana, Some(&query)).await.unwrap();
    assert_eq!(ana_hits.len(), 1);
    assert_eq!(ana_hits[0].file_id, ana_file.id);

    let bia_hits = fx.executor().search(bia, Some(&query)).await.unwrap();
    assert_eq!(bia_hits.len(), 1);
    assert_eq!(bia_hits[0].file_id, bia_file.id);
    assert_eq!(bia_hits[0].cells().unwrap(), vec!["relatorio anual"]);

    // A user with no folders sees nothing.
    let nobody = fx.catalog.create_user("caio@example.com").await.unwrap();
    assert!(fx
        .executor()
        .search(nobody.id, Some(&query))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_prefix_match_with_highlighted_snippet() {
    let fx = setup().await;
    let (user, file) = fx
        .user_with_rows("ana@example.com", &[&["Financeiro", "Norte"], &["Contabilidade"]])
        .await;

    let hits = fx.executor().search_text(user, "fin").await.unwrap();

    assert_eq!(hits.len(), 1);
    let hit = &hits[0];
    assert_eq!(hit.file_name, file.file_name);
    assert!(hit.snippet.contains("<mark>Financeiro</mark>"), "snippet: {}", hit.snippet);
    assert_eq!(hit.cells().unwrap(), vec!["Financeiro", "Norte"]);
}

#[tokio::test]
async fn test_trailing_wildcard_passes_through() {
    let fx = setup().await;
    let (user, _) = fx
        .user_with_rows("ana@example.com", &[&["Financeiro"], &["Fiscal"]])
        .await;

    let hits = fx.executor().search_text(user, "fi*").await.unwrap();
    assert_eq!(hits.len(), 2);
}

#[tokio::test]
async fn test_quotes_are_stripped_before_matching() {
    let fx = setup().await;
    let (user, _) = fx
        .user_with_rows("ana@example.com", &[&["Contabilidade", "Sul"]])
        .await;

    let hits = fx.executor().search_text(user, "\"contab").await.unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_diacritics_are_folded() {
    let fx = setup().await;
    let (user, _) = fx
        .user_with_rows("ana@example.com", &[&["Relatório", "Março"]])
        .await;

    let hits = fx.executor().search_text(user, "relatorio").await.unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_results_capped_and_ranked() {
    let fx = setup().await;
    let rows: Vec<Vec<String>> = (0..80)
        .map(|i| {
            // Vary how often the term appears so scores differ.
            let mut row = vec!["vendas".to_string(); 1 + i % 4];
            row.push(format!("linha {}", i));
            row
        })
        .collect();
    let user = fx.catalog.create_user("ana@example.com").await.unwrap();
    let folder = fx.catalog.create_folder(user.id, "Vendas").await.unwrap();
    let file = fx.catalog.register_file(folder.id, "v.xlsx", "v").await.unwrap();
    let mut batch = RowBatch::with_capacity(rows.len());
    for row in &rows {
        batch.push(row.as_slice()).unwrap();
    }
    BatchWriter::new(fx.conn.clone())
        .write(file.id, &batch)
        .await
        .unwrap();

    let hits = fx.executor().search_text(user.id, "vend").await.unwrap();

    assert_eq!(hits.len(), DEFAULT_RESULT_LIMIT as usize);
    assert!(
        hits.windows(2).all(|w| w[0].score <= w[1].score),
        "hits are not ordered by relevance"
    );

    let few = fx
        .executor()
        .with_limit(5)
        .search_text(user.id, "vend")
        .await
        .unwrap();
    assert_eq!(few.len(), 5);
}

#[tokio::test]
async fn test_blank_query_returns_nothing() {
    let fx = setup().await;
    let (user, _) = fx.user_with_rows("ana@example.com", &[&["algo"]]).await;

    assert!(fx.executor().search_text(user, "   ").await.unwrap().is_empty());
    assert!(fx.executor().search(user, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_degenerate_query_is_query_error() {
    let fx = setup().await;
    let (user, _) = fx.user_with_rows("ana@example.com", &[&["algo"]]).await;

    // Only quotes: compiles to a bare wildcard, which the index rejects.
    let err = fx.executor().search_text(user, "\"\"").await.unwrap_err();
    assert!(matches!(err, SheetFindError::Query(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_snippet_escapes_cell_markup() {
    let fx = setup().await;
    let (user, _) = fx
        .user_with_rows("ana@example.com", &[&["<b>Fin</b>"]])
        .await;

    let hits = fx.executor().search_text(user, "fin").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].snippet.contains("<mark>Fin</mark>"), "snippet: {}", hits[0].snippet);
    assert!(!hits[0].snippet.contains("<b>"));
    assert_eq!(hits[0].cells().unwrap(), vec!["<b>Fin</b>"]);
}

#[tokio::test]
async fn test_custom_snippet_markers() {
    let fx = setup().await;
    let (user, _) = fx
        .user_with_rows("ana@example.com", &[&["Financeiro", "Norte"]])
        .await;

    let executor = fx.executor().with_snippet_config(SnippetConfig {
        start_marker: "[".to_string(),
        end_marker: "]".to_string(),
        ..SnippetConfig::default()
    });
    let hits = executor.search_text(user, "norte").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].snippet.contains("[Norte]"), "snippet: {}", hits[0].snippet);
}

#[tokio::test]
async fn test_deleted_folder_rows_are_not_found() {
    let fx = setup().await;
    let user = fx.catalog.create_user("ana@example.com").await.unwrap();
    let keep = fx.catalog.create_folder(user.id, "Manter").await.unwrap();
    let gone = fx.catalog.create_folder(user.id, "Apagar").await.unwrap();
    fx.upload(keep.id, "a.xlsx", &[&["orcamento 2024"]]).await;
    fx.upload(gone.id, "b.xlsx", &[&["orcamento 2023"]]).await;

    assert_eq!(fx.executor().search_text(user.id, "orc").await.unwrap().len(), 2);

    fx.catalog.delete_folder(user.id, gone.id).await.unwrap();

    let hits = fx.executor().search_text(user.id, "orc").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file_name, "a.xlsx");
}

#[tokio::test]
async fn test_fullwidth_punctuation_is_searchable() {
    let fx = setup().await;
    let (user, _) = fx
        .user_with_rows("ana@example.com", &[&["Regiao", "norte"], &["Regiao", "sul"]])
        .await;

    for raw in ["\u{FF08}norte\u{FF09}", "regiao\u{FF1A}nor", "nor\u{FF0D}"] {
        let hits = fx.executor().search_text(user, raw).await.unwrap();
        assert_eq!(hits.len(), 1, "query {:?}", raw);
        assert_eq!(hits[0].cells().unwrap(), vec!["Regiao", "norte"]);
    }
}

#[tokio::test]
async fn test_column_filter_syntax_is_query_error() {
    let fx = setup().await;
    let (user, _) = fx
        .user_with_rows("ana@example.com", &[&["Regiao", "norte"]])
        .await;

    let result = fx.executor().search_text(user, "regiao:nor").await;
    match result {
        Err(SheetFindError::Query(msg)) => assert!(msg.contains("no such column"), "{}", msg),
        other => panic!("Expected Query error, got {:?}", other),
    }
}
