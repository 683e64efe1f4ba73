//! Query runtime: executes compiled searches, hydrates result rows through
//! the value codec, and implements the lazy query surface
//! (`all`/`first`/`count`/`page`/`update`/`delete`, streaming iteration,
//! and field projection including deep nested JSON paths).

use std::collections::HashMap;
use std::marker::PhantomData;

use futures::stream::{self, Stream, StreamExt};
use redis::Value as RedisValue;
use serde_json::Value;

use crate::error::{Error, QueryError, Result};
use crate::model::Model;
use crate::query::compile::{def_has_path, QueryCompiler, SearchOptions, SortSpec};
use crate::query::expr::Expr;
use crate::repository::Repository;
use crate::schema::fields::StorageLayout;
use crate::value::{decode_hash, decode_json, decode_projected, extract_path};

/// A lazy query over one model. Build it up with the non-terminal methods,
/// then run one of the terminals.
pub struct Query<'r, M: Model> {
    repo: &'r Repository<M>,
    expr: Expr,
    sort: Option<SortSpec>,
}

impl<'r, M: Model> Query<'r, M> {
    pub(crate) fn new(repo: &'r Repository<M>, expr: Expr) -> Self {
        Self { repo, expr, sort: None }
    }

    /// Sort by a field, `-name` for descending. The field must be declared
    /// sortable; the check runs when the query compiles.
    pub fn sort_by(mut self, spec: &str) -> Self {
        self.sort = Some(SortSpec::parse(spec));
        self
    }

    /// Deterministic ASCII rendering of the (normalized) expression tree.
    pub fn render_tree(&self) -> String {
        self.expr.clone().normalize().render_tree()
    }

    // ── Terminals ───────────────────────────────────────────────────────

    /// Every matching record.
    pub async fn all(&self) -> Result<Vec<M>> {
        let page_size = self.repo.client().config().page_size;
        let mut out = Vec::new();
        let mut offset = 0usize;
        loop {
            let page = self.fetch_page(offset, page_size, &[]).await?;
            let fetched = page.rows.len();
            for row in page.rows {
                out.push(self.hydrate(row)?);
            }
            offset += fetched;
            if fetched < page_size || offset as u64 >= page.total {
                break;
            }
        }
        Ok(out)
    }

    /// The first matching record, or `Error::NotFound`.
    pub async fn first(&self) -> Result<M> {
        let page = self.fetch_page(0, 1, &[]).await?;
        match page.rows.into_iter().next() {
            Some(row) => self.hydrate(row),
            None => Err(Error::NotFound { key: self.repo.schema().model.clone() }),
        }
    }

    /// The hit count; fetches no document bodies.
    pub async fn count(&self) -> Result<u64> {
        let compiler = QueryCompiler::new(self.repo.schema());
        let mut opts = SearchOptions::count();
        opts.sort = self.sort.clone();
        let compiled = compiler.compile(&self.expr, &opts)?;
        let reply = self
            .repo
            .client()
            .ft_search_raw(&compiled.args)
            .await
            .map_err(|e| self.map_search_error(e))?;
        Ok(parse_reply(reply, self.datetime_hint())?.total)
    }

    /// One window of results. Requires an explicit sort: without it the
    /// server's ordering is not stable across inserts.
    pub async fn page(&self, offset: usize, limit: usize) -> Result<Vec<M>> {
        if self.sort.is_none() {
            return Err(QueryError::UnsortedPage.into());
        }
        let page = self.fetch_page(offset, limit, &[]).await?;
        page.rows.into_iter().map(|row| self.hydrate(row)).collect()
    }

    /// Load each match, apply the field patch, save back. Returns the
    /// number of records written.
    pub async fn update<I>(&self, patch: I) -> Result<usize>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let patch: Vec<(String, Value)> = patch.into_iter().collect();
        let def = &self.repo.schema().def;
        for (name, _) in &patch {
            if def.get_field(name).is_none() {
                return Err(QueryError::UnknownField {
                    model: self.repo.schema().model.clone(),
                    field: name.clone(),
                }
                .into());
            }
        }
        let rows = self.collect_rows().await?;
        let mut written = 0usize;
        for row in rows {
            let mut tree = self.decode_tree(&row)?;
            let map = tree
                .as_object_mut()
                .ok_or_else(|| Error::Validation("stored record is not an object".into()))?;
            for (name, value) in &patch {
                map.insert(name.clone(), value.clone());
            }
            let key = row.key.clone();
            match self.repo.schema().layout {
                StorageLayout::Hash => {
                    let pairs = crate::value::encode_hash(def, &tree)?;
                    self.repo.client().hset(&key, &pairs).await?;
                    // A field patched to null was elided from the encoding;
                    // its previous value must not survive the overwrite.
                    let elided = self.repo.elided_fields(&pairs);
                    self.repo.client().hdel(&key, &elided).await?;
                }
                StorageLayout::Json => {
                    let doc = crate::value::encode_json(def, tree)?;
                    self.repo.client().json_set(&key, &doc).await?;
                }
            }
            written += 1;
        }
        tracing::debug!(count = written, "query update applied");
        Ok(written)
    }

    /// Delete every match; returns the number of removed records.
    pub async fn delete(&self) -> Result<usize> {
        let rows = self.collect_rows().await?;
        if rows.is_empty() {
            return Ok(0);
        }
        let mut pipe = redis::pipe();
        for row in &rows {
            match self.repo.schema().layout {
                StorageLayout::Hash => pipe.cmd("DEL").arg(&row.key).ignore(),
                StorageLayout::Json => pipe.cmd("JSON.DEL").arg(&row.key).ignore(),
            };
        }
        self.repo.client().run_pipeline(&pipe).await?;
        tracing::debug!(count = rows.len(), "query delete applied");
        Ok(rows.len())
    }

    /// Restartable paged stream of records; each page is one server round
    /// trip of the configured page size.
    pub fn stream(&self) -> impl Stream<Item = Result<M>> + '_ {
        let page_size = self.repo.client().config().page_size;
        stream::unfold(PageState::default(), move |mut state| async move {
            if state.done {
                return None;
            }
            let page = match self.fetch_page(state.offset, page_size, &[]).await {
                Ok(page) => page,
                Err(e) => {
                    state.done = true;
                    return Some((vec![Err(e)], state));
                }
            };
            let fetched = page.rows.len();
            state.offset += fetched;
            if fetched < page_size || state.offset as u64 >= page.total {
                state.done = true;
            }
            if fetched == 0 {
                return None;
            }
            let items: Vec<Result<M>> =
                page.rows.into_iter().map(|row| self.hydrate(row)).collect();
            Some((items, state))
        })
        .flat_map(stream::iter)
    }

    // ── Projection ──────────────────────────────────────────────────────

    /// Fetch only the given paths, returned as maps keyed by the requested
    /// path. Values keep their declared types. Simple top-level paths are
    /// served by the index (`RETURN`); deep dotted paths fall back to
    /// loading documents and extracting locally.
    pub async fn values(&self, paths: &[&str]) -> Result<Vec<serde_json::Map<String, Value>>> {
        self.validate_paths(paths)?;
        if self.projection_is_shallow(paths) {
            self.values_shallow(paths).await
        } else {
            self.values_deep(paths).await
        }
    }

    /// Like [`Query::values`], but wraps each row in a partial record that
    /// raises on access to any path outside the projection.
    pub async fn only(&self, paths: &[&str]) -> Result<Vec<Partial<M>>> {
        let rows = self.values(paths).await?;
        Ok(rows
            .into_iter()
            .map(|values| Partial {
                values,
                paths: paths.iter().map(|p| p.to_string()).collect(),
                _marker: PhantomData,
            })
            .collect())
    }

    fn validate_paths(&self, paths: &[&str]) -> Result<()> {
        let schema = self.repo.schema();
        for path in paths {
            if !def_has_path(&schema.def, path) {
                return Err(QueryError::UnknownProjectionPath {
                    model: schema.model.clone(),
                    path: path.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Shallow projections can be served by RETURN: every path is a plain
    /// top-level field, and (for documents) carries an index alias the
    /// server knows.
    fn projection_is_shallow(&self, paths: &[&str]) -> bool {
        let schema = self.repo.schema();
        paths.iter().all(|path| {
            !path.contains('.')
                && match schema.layout {
                    StorageLayout::Hash => true,
                    StorageLayout::Json => schema.field(path).is_some(),
                }
        })
    }

    async fn values_shallow(&self, paths: &[&str]) -> Result<Vec<serde_json::Map<String, Value>>> {
        let return_fields: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        let page_size = self.repo.client().config().page_size;
        let def = &self.repo.schema().def;
        let mut out = Vec::new();
        let mut offset = 0usize;
        loop {
            let page = self.fetch_page(offset, page_size, &return_fields).await?;
            let fetched = page.rows.len();
            for row in &page.rows {
                let mut map = serde_json::Map::with_capacity(paths.len());
                for path in paths {
                    let field = def
                        .get_field(path)
                        .ok_or_else(|| QueryError::UnknownProjectionPath {
                            model: self.repo.schema().model.clone(),
                            path: path.to_string(),
                        })?;
                    let value = match row.fields.iter().find(|(name, _)| name == path) {
                        None => Value::Null,
                        Some((_, raw)) => {
                            let text = String::from_utf8_lossy(raw);
                            decode_projected(field, self.repo.schema().layout, &text)?
                        }
                    };
                    map.insert(path.to_string(), value);
                }
                out.push(map);
            }
            offset += fetched;
            if fetched < page_size || offset as u64 >= page.total {
                break;
            }
        }
        Ok(out)
    }

    async fn values_deep(&self, paths: &[&str]) -> Result<Vec<serde_json::Map<String, Value>>> {
        let rows = self.collect_rows().await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let tree = self.decode_tree(&row)?;
            let mut map = serde_json::Map::with_capacity(paths.len());
            for path in paths {
                let value = extract_path(&tree, path).cloned().unwrap_or(Value::Null);
                map.insert(path.to_string(), value);
            }
            out.push(map);
        }
        Ok(out)
    }

    // ── Execution internals ─────────────────────────────────────────────

    async fn fetch_page(
        &self,
        offset: usize,
        limit: usize,
        return_fields: &[String],
    ) -> Result<RawPage> {
        let compiler = QueryCompiler::new(self.repo.schema());
        let mut opts = SearchOptions::page(offset, limit);
        opts.sort = self.sort.clone();
        opts.return_fields = return_fields.to_vec();
        let compiled = compiler.compile(&self.expr, &opts)?;
        let reply = self
            .repo
            .client()
            .ft_search_raw(&compiled.args)
            .await
            .map_err(|e| self.map_search_error(e))?;
        parse_reply(reply, self.datetime_hint())
    }

    /// Server syntax errors on datetime-touching queries usually mean the
    /// index still carries the pre-transition TAG encoding; say so.
    fn map_search_error(&self, err: Error) -> Error {
        if let Error::Redis(ref cause) = err {
            let message = cause.to_string();
            if self.datetime_hint() && message.to_lowercase().contains("syntax") {
                return syntax_diagnostic(message, true);
            }
        }
        err
    }

    /// Every matching row, paged internally.
    async fn collect_rows(&self) -> Result<Vec<RawRow>> {
        let page_size = self.repo.client().config().page_size;
        let mut rows = Vec::new();
        let mut offset = 0usize;
        loop {
            let page = self.fetch_page(offset, page_size, &[]).await?;
            let fetched = page.rows.len();
            rows.extend(page.rows);
            offset += fetched;
            if fetched < page_size || offset as u64 >= page.total {
                break;
            }
        }
        Ok(rows)
    }

    fn decode_tree(&self, row: &RawRow) -> Result<Value> {
        let def = &self.repo.schema().def;
        match self.repo.schema().layout {
            StorageLayout::Hash => {
                let raw: HashMap<String, Vec<u8>> = row.fields.iter().cloned().collect();
                decode_hash(def, &raw)
            }
            StorageLayout::Json => {
                let (_, payload) = row
                    .fields
                    .iter()
                    .find(|(name, _)| name == "$")
                    .ok_or_else(|| Error::Validation("search row carries no document".into()))?;
                let doc: Value = serde_json::from_slice(payload)?;
                decode_json(def, doc)
            }
        }
    }

    fn hydrate(&self, row: RawRow) -> Result<M> {
        let tree = self.decode_tree(&row)?;
        serde_json::from_value(tree).map_err(|e| Error::Validation(e.to_string()))
    }

    /// True when the expression touches a datetime field; used to attach a
    /// drift hint to server syntax errors.
    fn datetime_hint(&self) -> bool {
        fn touches_datetime<M: Model>(repo: &Repository<M>, expr: &Expr) -> bool {
            match expr {
                Expr::Compare { field, .. } => repo
                    .schema()
                    .field(field)
                    .map(|f| {
                        matches!(
                            f.declared,
                            crate::schema::compiler::DeclaredType::DateTime
                                | crate::schema::compiler::DeclaredType::Date
                        )
                    })
                    .unwrap_or(false),
                Expr::And(items) | Expr::Or(items) => {
                    items.iter().any(|e| touches_datetime(repo, e))
                }
                Expr::Not(inner) => touches_datetime(repo, inner),
                _ => false,
            }
        }
        touches_datetime(self.repo, &self.expr)
    }
}

#[derive(Default)]
struct PageState {
    offset: usize,
    done: bool,
}

/// One raw result row: the record key and the returned attribute pairs.
#[derive(Debug, Clone)]
pub(crate) struct RawRow {
    pub key: String,
    pub fields: Vec<(String, Vec<u8>)>,
}

#[derive(Debug)]
pub(crate) struct RawPage {
    pub total: u64,
    pub rows: Vec<RawRow>,
}

fn redis_text(value: &RedisValue) -> Option<String> {
    match value {
        RedisValue::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        RedisValue::Status(s) => Some(s.clone()),
        _ => None,
    }
}

/// Parse an FT.SEARCH reply: `[total, key, fields, key, fields, ...]`.
fn parse_reply(reply: RedisValue, datetime_query: bool) -> Result<RawPage> {
    let items = match reply {
        RedisValue::Bulk(items) => items,
        other => {
            return Err(syntax_diagnostic(
                format!("unexpected FT.SEARCH reply: {other:?}"),
                datetime_query,
            ))
        }
    };
    let mut iter = items.into_iter();
    let total = match iter.next() {
        Some(RedisValue::Int(n)) => n.max(0) as u64,
        other => {
            return Err(syntax_diagnostic(
                format!("FT.SEARCH reply missing total: {other:?}"),
                datetime_query,
            ))
        }
    };
    let mut rows = Vec::new();
    while let Some(key_value) = iter.next() {
        let key = redis_text(&key_value).ok_or_else(|| {
            Error::Validation(format!("unexpected document id in reply: {key_value:?}"))
        })?;
        let mut fields = Vec::new();
        if let Some(RedisValue::Bulk(pairs)) = iter.next() {
            let mut pair_iter = pairs.into_iter();
            while let (Some(name), Some(value)) = (pair_iter.next(), pair_iter.next()) {
                let name = redis_text(&name).unwrap_or_default();
                let bytes = match value {
                    RedisValue::Data(bytes) => bytes,
                    RedisValue::Status(s) => s.into_bytes(),
                    RedisValue::Int(n) => n.to_string().into_bytes(),
                    other => {
                        return Err(Error::Validation(format!(
                            "unexpected attribute value in reply: {other:?}"
                        )))
                    }
                };
                fields.push((name, bytes));
            }
        }
        rows.push(RawRow { key, fields });
    }
    Ok(RawPage { total, rows })
}

/// Wrap a malformed-reply error, pointing datetime queries at the schema
/// drift tooling: a TAG-indexed datetime field makes range queries fail
/// with a syntax error on the server side.
fn syntax_diagnostic(message: String, datetime_query: bool) -> Error {
    if datetime_query {
        Error::Validation(format!(
            "{message}; if this query filters a datetime field, the index may predate the \
             numeric datetime encoding. Run `migrate-data check-schema` and then \
             `migrate-data run`."
        ))
    } else {
        Error::Validation(message)
    }
}

/// A record loaded through `.only(...)`: reads outside the projected paths
/// raise instead of returning defaults.
pub struct Partial<M: Model> {
    values: serde_json::Map<String, Value>,
    paths: Vec<String>,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Model> Partial<M> {
    /// Read a projected path; `QueryError::FieldNotLoaded` for any other.
    pub fn get(&self, path: &str) -> Result<&Value> {
        if !self.paths.iter().any(|p| p == path) {
            return Err(QueryError::FieldNotLoaded { field: path.to_string() }.into());
        }
        Ok(self.values.get(path).unwrap_or(&Value::Null))
    }

    /// Typed read of a projected path.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let value = self.get(path)?.clone();
        serde_json::from_value(value).map_err(|e| Error::Validation(e.to_string()))
    }

    pub fn loaded_paths(&self) -> &[String] {
        &self.paths
    }
}
