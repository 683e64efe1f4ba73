use redis_om::query::{QueryCompiler, SearchOptions, SortSpec};
use redis_om::{field, CmdArg, CompiledSchema, FieldDef, FieldType, RecordDef};

fn customer_schema() -> CompiledSchema {
    let address = RecordDef::embedded("Address")
        .field(FieldDef::new("city", FieldType::String).indexed())
        .field(FieldDef::new("state", FieldType::String).indexed());
    let def = RecordDef::json("Customer")
        .field(FieldDef::new("pk", FieldType::String).primary_key())
        .field(FieldDef::new("first_name", FieldType::String).indexed())
        .field(FieldDef::new("last_name", FieldType::String).indexed())
        .field(FieldDef::new("age", FieldType::Integer).indexed().sortable())
        .field(FieldDef::new("created_at", FieldType::DateTime).indexed().sortable())
        .field(FieldDef::new("address", FieldType::Embedded(Box::new(address))));
    CompiledSchema::compile(def, "app.Customer").unwrap()
}

fn argv_text(args: &[CmdArg]) -> String {
    args.iter()
        .map(|a| match a {
            CmdArg::Str(s) => s.clone(),
            CmdArg::Bin(b) => format!("<{} bytes>", b.len()),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn boolean_algebra_compiles_to_one_query() {
    let schema = customer_schema();
    let compiler = QueryCompiler::new(&schema);
    let expr = !(field("first_name").eq("Andrew"))
        & (field("last_name").eq("Brookins") | field("last_name").eq("Smith"));
    let compiled = compiler.compile(&expr, &SearchOptions::page(0, 10)).unwrap();
    assert_eq!(
        compiled.query,
        "-@first_name:{Andrew} (@last_name:{Brookins}|@last_name:{Smith})"
    );
}

#[test]
fn associativity_produces_identical_queries() {
    let schema = customer_schema();
    let compiler = QueryCompiler::new(&schema);
    let a = field("age").gt(30);
    let b = field("last_name").eq("Smith");
    let c = field("first_name").eq("Ann");
    let left = compiler
        .compile(&((a.clone() & b.clone()) & c.clone()), &SearchOptions::page(0, 10))
        .unwrap();
    let right = compiler
        .compile(&(a & (b & c)), &SearchOptions::page(0, 10))
        .unwrap();
    assert_eq!(left.query, right.query);
}

#[test]
fn datetime_range_with_descending_sort() {
    let schema = customer_schema();
    let compiler = QueryCompiler::new(&schema);
    let t0 = chrono::DateTime::parse_from_rfc3339("2023-10-19T00:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let mut opts = SearchOptions::page(0, 10);
    opts.sort = Some(SortSpec::parse("-created_at"));
    let compiled = compiler.compile(&field("created_at").gt(t0), &opts).unwrap();
    assert_eq!(compiled.query, "@created_at:[(1697673600 +inf]");
    let text = argv_text(&compiled.args);
    assert!(text.contains("SORTBY created_at DESC"), "{text}");
    assert!(text.contains("LIMIT 0 10"), "{text}");
    assert!(text.ends_with("DIALECT 2"), "{text}");
}

#[test]
fn embedded_record_fields_query_by_dotted_path() {
    let schema = customer_schema();
    let compiler = QueryCompiler::new(&schema);
    let expr = field("address.city").eq("SA") & field("address.state").eq("TX");
    let compiled = compiler.compile(&expr, &SearchOptions::page(0, 10)).unwrap();
    assert_eq!(compiled.query, "@address_city:{SA} @address_state:{TX}");
}

#[test]
fn argv_starts_with_index_and_query() {
    let schema = customer_schema();
    let compiler = QueryCompiler::new(&schema);
    let compiled = compiler
        .compile(&field("age").eq(38), &SearchOptions::page(5, 25))
        .unwrap();
    let text = argv_text(&compiled.args);
    assert!(text.starts_with("app.Customer:index @age:[38 38] LIMIT 5 25"), "{text}");
}

#[test]
fn escaped_tag_values_survive_compilation() {
    let schema = customer_schema();
    let compiler = QueryCompiler::new(&schema);
    for raw in ["a,b", "x.y:z", "semi;colon", "per%cent", "hy-phen", "(parens)"] {
        let compiled = compiler
            .compile(&field("last_name").eq(raw), &SearchOptions::page(0, 1))
            .unwrap();
        for c in [',', '.', ':', ';', '%', '-', '(', ')'] {
            if raw.contains(c) {
                assert!(
                    compiled.query.contains(&format!("\\{c}")),
                    "{raw:?} -> {}",
                    compiled.query
                );
            }
        }
    }
}
