//! Query compiler: lowers an expression tree into the server's search
//! grammar and assembles the FT.SEARCH argument vector (LIMIT, SORTBY,
//! RETURN, PARAMS for KNN, DIALECT).

use crate::client::CmdArg;
use crate::error::{QueryError, Result};
use crate::query::expr::{CompareOp, Expr, QueryValue};
use crate::schema::compiler::{CompiledSchema, DeclaredType, FieldKind, IndexedField};
use crate::schema::fields::{FieldType, RecordDef};
use crate::value::{format_float, pack_vector};

/// Alias under which the KNN distance is returned and sorted.
pub const VEC_SCORE_ALIAS: &str = "__vec_score";

/// Name of the KNN blob parameter in PARAMS.
const VEC_PARAM: &str = "vec";

/// Sort direction plus field for SORTBY.
#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub field: String,
    pub ascending: bool,
}

impl SortSpec {
    /// Parse the `name` / `-name` convention.
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(name) => Self { field: name.to_string(), ascending: false },
            None => Self { field: spec.to_string(), ascending: true },
        }
    }
}

/// Pagination, sort, and projection knobs attached to one execution.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub offset: usize,
    pub limit: usize,
    pub sort: Option<SortSpec>,
    /// Query-time aliases to RETURN; empty means full documents.
    pub return_fields: Vec<String>,
    /// When true, no document bodies are fetched (LIMIT 0 0).
    pub count_only: bool,
}

impl SearchOptions {
    pub fn page(offset: usize, limit: usize) -> Self {
        Self { offset, limit, sort: None, return_fields: Vec::new(), count_only: false }
    }

    pub fn count() -> Self {
        Self { offset: 0, limit: 0, sort: None, return_fields: Vec::new(), count_only: true }
    }
}

/// A compiled search: the query string and the full argument vector to pass
/// to FT.SEARCH (index name included).
#[derive(Debug, Clone)]
pub struct CompiledSearch {
    pub query: String,
    pub args: Vec<CmdArg>,
    pub has_knn: bool,
}

/// Escape the characters the search grammar treats specially inside TAG
/// values; spaces are escaped so multi-word tags stay one term.
pub fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(
            c,
            ',' | '.' | '<' | '>' | '{' | '}' | '[' | ']' | '"' | '\'' | ':' | ';' | '!' | '@'
                | '#' | '$' | '%' | '^' | '&' | '*' | '(' | ')' | '-' | '+' | '=' | '~' | '/'
                | ' '
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub struct QueryCompiler<'a> {
    schema: &'a CompiledSchema,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(schema: &'a CompiledSchema) -> Self {
        Self { schema }
    }

    /// Compile a normalized expression plus options into FT.SEARCH argv.
    pub fn compile(&self, expr: &Expr, opts: &SearchOptions) -> Result<CompiledSearch> {
        let (knn, filter) = extract_knn(expr.clone().normalize())?;
        let filter_str = self.lower(&filter)?;

        let (query, knn_blob) = match knn {
            None => (filter_str, None),
            Some(KnnLeaf { field, k, vector }) => {
                let spec = self.resolve(&field)?;
                if spec.kind != FieldKind::Vector {
                    return Err(QueryError::UnsupportedOperator {
                        field: field.clone(),
                        kind: spec.kind.wire_name(),
                        op: "KNN",
                    }
                    .into());
                }
                if k == 0 {
                    return Err(QueryError::MalformedExpression {
                        message: format!("KNN on '{field}' requires k >= 1"),
                    }
                    .into());
                }
                let dtype = spec
                    .vector
                    .as_ref()
                    .map(|v| v.dtype)
                    .unwrap_or(crate::schema::fields::VectorType::Float32);
                let query = format!(
                    "({filter_str})=>[KNN {k} @{} ${VEC_PARAM} AS {VEC_SCORE_ALIAS}]",
                    spec.name
                );
                (query, Some(pack_vector(&vector, dtype)))
            }
        };

        let mut args: Vec<CmdArg> = vec![
            self.schema.key_space.index_name().into(),
            query.clone().into(),
        ];
        if opts.count_only {
            args.push("LIMIT".into());
            args.push("0".into());
            args.push("0".into());
        } else {
            args.push("LIMIT".into());
            args.push(opts.offset.to_string().into());
            args.push(opts.limit.to_string().into());
        }
        match (&opts.sort, knn_blob.is_some()) {
            (Some(sort), _) => {
                let spec = self.resolve(&sort.field)?;
                if !spec.sortable {
                    return Err(QueryError::UnsortableField { field: sort.field.clone() }.into());
                }
                args.push("SORTBY".into());
                args.push(spec.name.clone().into());
                args.push(if sort.ascending { "ASC".into() } else { "DESC".into() });
            }
            // Hybrid ordering: nearest first unless the caller sorts.
            (None, true) => {
                args.push("SORTBY".into());
                args.push(VEC_SCORE_ALIAS.into());
                args.push("ASC".into());
            }
            (None, false) => {}
        }
        if !opts.return_fields.is_empty() && !opts.count_only {
            args.push("RETURN".into());
            args.push(opts.return_fields.len().to_string().into());
            for name in &opts.return_fields {
                args.push(name.clone().into());
            }
        }
        let has_knn = knn_blob.is_some();
        if let Some(blob) = knn_blob {
            args.push("PARAMS".into());
            args.push("2".into());
            args.push(VEC_PARAM.into());
            args.push(CmdArg::Bin(blob));
        }
        args.push("DIALECT".into());
        args.push("2".into());

        Ok(CompiledSearch { query, args, has_knn })
    }

    /// Resolve a field name (alias or dotted path) against the compiled
    /// schema, distinguishing unknown fields from known-but-unindexed ones.
    pub fn resolve(&self, name: &str) -> Result<&IndexedField> {
        if let Some(spec) = self.schema.field(name) {
            return Ok(spec);
        }
        if def_has_path(&self.schema.def, name) {
            return Err(QueryError::FieldNotIndexed {
                model: self.schema.model.clone(),
                field: name.to_string(),
            }
            .into());
        }
        Err(QueryError::UnknownField {
            model: self.schema.model.clone(),
            field: name.to_string(),
        }
        .into())
    }

    fn lower(&self, expr: &Expr) -> Result<String> {
        Ok(match expr {
            Expr::All => "*".to_string(),
            Expr::Compare { field, op, value } => self.lower_compare(field, *op, value)?,
            Expr::ContainsAny { field, values } => {
                let spec = self.expect_list(field)?;
                format!("@{}:{{{}}}", spec.name, join_tags(values))
            }
            Expr::ExcludesAll { field, values } => {
                let spec = self.expect_list(field)?;
                format!("-@{}:{{{}}}", spec.name, join_tags(values))
            }
            Expr::GeoWithin { field, lon, lat, radius, unit } => {
                let spec = self.resolve(field)?;
                if spec.kind != FieldKind::Geo {
                    return Err(QueryError::UnsupportedOperator {
                        field: field.clone(),
                        kind: spec.kind.wire_name(),
                        op: "geo-within",
                    }
                    .into());
                }
                format!(
                    "@{}:[{} {} {} {}]",
                    spec.name,
                    format_float(*lon),
                    format_float(*lat),
                    format_float(*radius),
                    unit.wire_name()
                )
            }
            Expr::Knn { field, .. } => {
                return Err(QueryError::MalformedExpression {
                    message: format!(
                        "KNN on '{field}' must appear at the top level of the query"
                    ),
                }
                .into())
            }
            Expr::And(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    let lowered = self.lower(item)?;
                    // OR members parenthesize themselves; nothing else needs it.
                    parts.push(lowered);
                }
                parts.join(" ")
            }
            Expr::Or(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    let lowered = self.lower(item)?;
                    if matches!(item, Expr::And(_)) {
                        parts.push(format!("({lowered})"));
                    } else {
                        parts.push(lowered);
                    }
                }
                format!("({})", parts.join("|"))
            }
            Expr::Not(inner) => match inner.as_ref() {
                // TAG and NUMERIC negation pushes to the leaf.
                Expr::Compare { field, op: CompareOp::Eq, value } => {
                    let spec = self.resolve(field)?;
                    match spec.kind {
                        FieldKind::Tag | FieldKind::Numeric => {
                            self.lower_compare(field, CompareOp::Ne, value)?
                        }
                        _ => format!("-({})", self.lower(inner)?),
                    }
                }
                Expr::Compare { field, op: CompareOp::Ne, value } => {
                    let spec = self.resolve(field)?;
                    match spec.kind {
                        FieldKind::Tag | FieldKind::Numeric => {
                            self.lower_compare(field, CompareOp::Eq, value)?
                        }
                        _ => format!("-({})", self.lower(inner)?),
                    }
                }
                _ => format!("-({})", self.lower(inner)?),
            },
        })
    }

    fn expect_list(&self, field: &str) -> Result<&IndexedField> {
        let spec = self.resolve(field)?;
        if !spec.is_list {
            return Err(QueryError::NotAList { field: field.to_string() }.into());
        }
        Ok(spec)
    }

    fn lower_compare(&self, field: &str, op: CompareOp, value: &QueryValue) -> Result<String> {
        let spec = self.resolve(field)?;
        if spec.kind == FieldKind::Vector {
            return Err(QueryError::VectorFieldComparison { field: field.to_string() }.into());
        }
        match op {
            CompareOp::Eq => self.lower_eq(spec, value, false),
            CompareOp::Ne => self.lower_eq(spec, value, true),
            CompareOp::Matches => {
                if !spec.full_text {
                    return Err(QueryError::NotFullText { field: field.to_string() }.into());
                }
                Ok(format!("@{}:({})", spec.name, escape_tag(&text_value(value)?.to_lowercase())))
            }
            CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le => {
                if spec.kind != FieldKind::Numeric {
                    return Err(QueryError::UnsupportedOperator {
                        field: field.to_string(),
                        kind: spec.kind.wire_name(),
                        op: op.symbol(),
                    }
                    .into());
                }
                let bound = numeric_value(spec, value).ok_or_else(|| {
                    QueryError::MalformedExpression {
                        message: format!("field '{field}' compares against a non-numeric value"),
                    }
                })?;
                let bound = format_float(bound);
                Ok(match op {
                    CompareOp::Gt => format!("@{}:[({} +inf]", spec.name, bound),
                    CompareOp::Ge => format!("@{}:[{} +inf]", spec.name, bound),
                    CompareOp::Lt => format!("@{}:[-inf ({}]", spec.name, bound),
                    CompareOp::Le => format!("@{}:[-inf {}]", spec.name, bound),
                    _ => unreachable!(),
                })
            }
        }
    }

    fn lower_eq(&self, spec: &IndexedField, value: &QueryValue, negate: bool) -> Result<String> {
        let neg = if negate { "-" } else { "" };
        let clause = match spec.kind {
            FieldKind::Tag => {
                let tag = match value {
                    QueryValue::Bool(b) => if *b { "1".to_string() } else { "0".to_string() },
                    QueryValue::Str(s) => escape_tag(s),
                    QueryValue::Int(i) => i.to_string(),
                    QueryValue::Float(f) | QueryValue::Epoch(f) => format_float(*f),
                };
                format!("@{}:{{{tag}}}", spec.name)
            }
            FieldKind::Text => {
                // Full-text fields support equality, inequality and match only.
                format!("@{}:({})", spec.name, escape_tag(&text_value(value)?.to_lowercase()))
            }
            FieldKind::Numeric => {
                let n = numeric_value(spec, value).ok_or_else(|| {
                    QueryError::MalformedExpression {
                        message: format!(
                            "field '{}' compares against a non-numeric value",
                            spec.name
                        ),
                    }
                })?;
                let n = format_float(n);
                format!("@{}:[{n} {n}]", spec.name)
            }
            FieldKind::Geo => {
                let point = text_value(value)?;
                let (lon, lat) = parse_geo_point(&spec.name, &point)?;
                // Zero-radius query: exact point equality.
                format!("@{}:[{} {} 0 m]", spec.name, format_float(lon), format_float(lat))
            }
            FieldKind::Vector => unreachable!("vector comparisons rejected above"),
        };
        Ok(format!("{neg}{clause}"))
    }
}

struct KnnLeaf {
    field: String,
    k: usize,
    vector: Vec<f64>,
}

/// Pull the (single) KNN leaf out of the top level of the tree, leaving the
/// filter portion behind. KNN anywhere deeper is malformed.
fn extract_knn(expr: Expr) -> Result<(Option<KnnLeaf>, Expr)> {
    match expr {
        Expr::Knn { field, k, vector } => Ok((Some(KnnLeaf { field, k, vector }), Expr::All)),
        Expr::And(items) => {
            let mut knn = None;
            let mut rest = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Expr::Knn { field, k, vector } => {
                        if knn.is_some() {
                            return Err(QueryError::MalformedExpression {
                                message: "a query supports at most one KNN leaf".into(),
                            }
                            .into());
                        }
                        knn = Some(KnnLeaf { field, k, vector });
                    }
                    other => {
                        ensure_no_knn(&other)?;
                        rest.push(other);
                    }
                }
            }
            Ok((knn, Expr::and_all(rest)))
        }
        other => {
            ensure_no_knn(&other)?;
            Ok((None, other))
        }
    }
}

fn ensure_no_knn(expr: &Expr) -> Result<()> {
    match expr {
        Expr::Knn { field, .. } => Err(QueryError::MalformedExpression {
            message: format!("KNN on '{field}' must appear at the top level of the query"),
        }
        .into()),
        Expr::And(items) | Expr::Or(items) => {
            for item in items {
                ensure_no_knn(item)?;
            }
            Ok(())
        }
        Expr::Not(inner) => ensure_no_knn(inner),
        _ => Ok(()),
    }
}

fn join_tags(values: &[String]) -> String {
    values.iter().map(|v| escape_tag(v)).collect::<Vec<_>>().join("|")
}

fn text_value(value: &QueryValue) -> Result<String> {
    match value {
        QueryValue::Str(s) => Ok(s.clone()),
        other => Err(QueryError::MalformedExpression {
            message: format!("expected a string value, got {other:?}"),
        }
        .into()),
    }
}

/// Numeric rendering of a comparison value, honoring the declared type:
/// booleans become 0/1 against numeric-boolean document fields.
fn numeric_value(spec: &IndexedField, value: &QueryValue) -> Option<f64> {
    match value {
        QueryValue::Bool(b) if spec.declared == DeclaredType::Boolean => {
            Some(if *b { 1.0 } else { 0.0 })
        }
        other => other.as_numeric(),
    }
}

fn parse_geo_point(field: &str, point: &str) -> Result<(f64, f64)> {
    let mut parts = point.split(',');
    let lon = parts.next().and_then(|p| p.trim().parse::<f64>().ok());
    let lat = parts.next().and_then(|p| p.trim().parse::<f64>().ok());
    match (lon, lat, parts.next()) {
        (Some(lon), Some(lat), None) => Ok((lon, lat)),
        _ => Err(QueryError::MalformedExpression {
            message: format!("field '{field}' expects a \"lon,lat\" point, got {point:?}"),
        }
        .into()),
    }
}

/// True when the dotted path names a declared field, indexed or not.
pub(crate) fn def_has_path(def: &RecordDef, path: &str) -> bool {
    let mut def = def;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        match def.get_field(segment) {
            None => return false,
            Some(field) => match field.field_type.unwrap_optional() {
                FieldType::Embedded(sub) if segments.peek().is_some() => def = sub,
                _ => return segments.peek().is_none(),
            },
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr::{field, GeoUnit};
    use crate::schema::compiler::CompiledSchema;
    use crate::schema::fields::{
        DistanceMetric, FieldDef, FieldType, RecordDef, VectorOptions, VectorType,
    };

    fn schema() -> CompiledSchema {
        let address = RecordDef::embedded("Address")
            .field(FieldDef::new("city", FieldType::String).indexed())
            .field(FieldDef::new("state", FieldType::String).indexed());
        let def = RecordDef::json("Customer")
            .field(FieldDef::new("pk", FieldType::String).primary_key())
            .field(FieldDef::new("first_name", FieldType::String).indexed())
            .field(FieldDef::new("last_name", FieldType::String).indexed())
            .field(FieldDef::new("bio", FieldType::String).indexed().full_text_search())
            .field(FieldDef::new("age", FieldType::Integer).indexed().sortable())
            .field(FieldDef::new("created_at", FieldType::DateTime).indexed().sortable())
            .field(FieldDef::new("active", FieldType::Boolean).indexed())
            .field(FieldDef::new("location", FieldType::Geo).indexed())
            .field(FieldDef::new("skills", FieldType::List(Box::new(FieldType::String))).indexed())
            .field(FieldDef::new("note", FieldType::String))
            .field(
                FieldDef::new("embedding", FieldType::Vector)
                    .indexed()
                    .vector(VectorOptions::flat(3, VectorType::Float32, DistanceMetric::Cosine)),
            )
            .field(FieldDef::new("address", FieldType::Embedded(Box::new(address))));
        CompiledSchema::compile(def, "app.Customer").unwrap()
    }

    fn lower(expr: Expr) -> String {
        let schema = schema();
        let compiler = QueryCompiler::new(&schema);
        compiler
            .compile(&expr, &SearchOptions::page(0, 10))
            .unwrap()
            .query
    }

    fn lower_err(expr: Expr) -> crate::error::Error {
        let schema = schema();
        let compiler = QueryCompiler::new(&schema);
        compiler
            .compile(&expr, &SearchOptions::page(0, 10))
            .unwrap_err()
    }

    #[test]
    fn tag_equality_and_escaping() {
        assert_eq!(lower(field("last_name").eq("Brookins")), "@last_name:{Brookins}");
        assert_eq!(
            lower(field("last_name").eq("O'Brien-Smith")),
            "@last_name:{O\\'Brien\\-Smith}"
        );
        assert_eq!(
            lower(field("last_name").eq("two words")),
            "@last_name:{two\\ words}"
        );
    }

    #[test]
    fn boolean_equality_follows_kind() {
        // document layout: booleans are numeric 0/1
        assert_eq!(lower(field("active").eq(true)), "@active:[1 1]");
        assert_eq!(lower(!field("active").eq(true)), "-@active:[1 1]");
        assert_eq!(lower(field("active").eq(false)), "@active:[0 0]");
    }

    #[test]
    fn numeric_ranges() {
        assert_eq!(lower(field("age").gt(30)), "@age:[(30 +inf]");
        assert_eq!(lower(field("age").ge(30)), "@age:[30 +inf]");
        assert_eq!(lower(field("age").lt(30)), "@age:[-inf (30]");
        assert_eq!(lower(field("age").le(30)), "@age:[-inf 30]");
        assert_eq!(lower(field("age").eq(38)), "@age:[38 38]");
    }

    #[test]
    fn datetime_compares_as_epoch() {
        let dt = chrono::DateTime::parse_from_rfc3339("2023-10-19T14:30:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert_eq!(lower(field("created_at").gt(dt)), "@created_at:[(1697725800 +inf]");
    }

    #[test]
    fn boolean_combinators() {
        let expr = !(field("first_name").eq("Andrew"))
            & (field("last_name").eq("Brookins") | field("last_name").eq("Smith"));
        assert_eq!(
            lower(expr),
            "-@first_name:{Andrew} (@last_name:{Brookins}|@last_name:{Smith})"
        );
    }

    #[test]
    fn not_pushes_into_tag_and_numeric_leaves() {
        assert_eq!(lower(!field("age").eq(30)), "-@age:[30 30]");
        assert_eq!(lower(!!field("age").eq(30)), "@age:[30 30]");
        // TEXT negation stays a clause-level guard
        assert_eq!(lower(!field("bio").eq("rust")), "-(@bio:(rust))");
    }

    #[test]
    fn full_text_match_is_lowercased() {
        assert_eq!(lower(field("bio").matches("Running")), "@bio:(running)");
        let err = lower_err(field("last_name").matches("x"));
        assert!(matches!(
            err,
            crate::error::Error::Query(QueryError::NotFullText { .. })
        ));
    }

    #[test]
    fn full_text_rejects_ranges() {
        let err = lower_err(field("bio").gt(3));
        assert!(matches!(
            err,
            crate::error::Error::Query(QueryError::UnsupportedOperator { .. })
        ));
    }

    #[test]
    fn containment_requires_list_fields() {
        assert_eq!(
            lower(field("skills").contains_any(["rust", "go"])),
            "@skills:{rust|go}"
        );
        assert_eq!(lower(field("skills").excludes(["cobol"])), "-@skills:{cobol}");
        let err = lower_err(field("last_name").contains("x"));
        assert!(matches!(
            err,
            crate::error::Error::Query(QueryError::NotAList { .. })
        ));
    }

    #[test]
    fn geo_within_and_equality() {
        assert_eq!(
            lower(field("location").within(-122.4, 37.7, 5.0, GeoUnit::Kilometers)),
            "@location:[-122.4 37.7 5 km]"
        );
        assert_eq!(lower(field("location").eq("-122.4,37.7")), "@location:[-122.4 37.7 0 m]");
    }

    #[test]
    fn embedded_fields_accept_dotted_names() {
        let expr = field("address.city").eq("SA") & field("address.state").eq("TX");
        assert_eq!(lower(expr), "@address_city:{SA} @address_state:{TX}");
    }

    #[test]
    fn unknown_vs_unindexed_fields() {
        assert!(matches!(
            lower_err(field("nope").eq(1)),
            crate::error::Error::Query(QueryError::UnknownField { .. })
        ));
        assert!(matches!(
            lower_err(field("note").eq("x")),
            crate::error::Error::Query(QueryError::FieldNotIndexed { .. })
        ));
    }

    #[test]
    fn vector_fields_reject_comparisons() {
        assert!(matches!(
            lower_err(field("embedding").eq("x")),
            crate::error::Error::Query(QueryError::VectorFieldComparison { .. })
        ));
    }

    #[test]
    fn wildcard_when_no_filters() {
        assert_eq!(lower(Expr::All), "*");
    }

    #[test]
    fn knn_wraps_filter_and_passes_params() {
        let schema = schema();
        let compiler = QueryCompiler::new(&schema);
        let expr = field("age").gt(30) & field("embedding").knn(5, vec![0.1, 0.2, 0.3]);
        let compiled = compiler.compile(&expr, &SearchOptions::page(0, 5)).unwrap();
        assert_eq!(
            compiled.query,
            "(@age:[(30 +inf])=>[KNN 5 @embedding $vec AS __vec_score]"
        );
        assert!(compiled.has_knn);
        let rendered: Vec<String> = compiled
            .args
            .iter()
            .map(|a| match a {
                CmdArg::Str(s) => s.clone(),
                CmdArg::Bin(b) => format!("<{} bytes>", b.len()),
            })
            .collect();
        let joined = rendered.join(" ");
        assert!(joined.contains("SORTBY __vec_score ASC"), "{joined}");
        assert!(joined.contains("PARAMS 2 vec <12 bytes>"), "{joined}");
        assert!(joined.ends_with("DIALECT 2"), "{joined}");
    }

    #[test]
    fn bare_knn_searches_everything() {
        let schema = schema();
        let compiler = QueryCompiler::new(&schema);
        let compiled = compiler
            .compile(&field("embedding").knn(3, vec![0.0; 3]), &SearchOptions::page(0, 3))
            .unwrap();
        assert_eq!(compiled.query, "(*)=>[KNN 3 @embedding $vec AS __vec_score]");
    }

    #[test]
    fn nested_knn_is_malformed() {
        let err = lower_err(field("age").gt(1) | field("embedding").knn(3, vec![0.0; 3]));
        assert!(matches!(
            err,
            crate::error::Error::Query(QueryError::MalformedExpression { .. })
        ));
    }

    #[test]
    fn sort_field_must_be_sortable() {
        let schema = schema();
        let compiler = QueryCompiler::new(&schema);
        let mut opts = SearchOptions::page(0, 10);
        opts.sort = Some(SortSpec::parse("-last_name"));
        let err = compiler.compile(&Expr::All, &opts).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Query(QueryError::UnsortableField { .. })
        ));

        opts.sort = Some(SortSpec::parse("-age"));
        let compiled = compiler.compile(&Expr::All, &opts).unwrap();
        let joined = compiled
            .args
            .iter()
            .map(|a| match a {
                CmdArg::Str(s) => s.as_str().to_string(),
                CmdArg::Bin(_) => String::new(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        assert!(joined.contains("SORTBY age DESC"));
    }

    #[test]
    fn count_only_sets_zero_limit() {
        let schema = schema();
        let compiler = QueryCompiler::new(&schema);
        let compiled = compiler.compile(&Expr::All, &SearchOptions::count()).unwrap();
        let joined = compiled
            .args
            .iter()
            .map(|a| match a {
                CmdArg::Str(s) => s.as_str().to_string(),
                CmdArg::Bin(_) => String::new(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        assert!(joined.contains("LIMIT 0 0"));
    }
}
