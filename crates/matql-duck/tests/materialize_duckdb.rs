use duckdb::Connection;
use matql_duck::{DuckSource, DuckStore};
use matql_ir::QueryDocument;
use matql_materialize::{MaterializeError, MaterializeOptions, Materializer};
use matql_registry::TypeRegistry;
use matql_sql::Compiler;

fn source_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE sales (region VARCHAR, amount DOUBLE, sold_on DATE);
         INSERT INTO sales VALUES
           ('EU', 10.0, DATE '2025-11-20'),
           ('EU', 5.5, DATE '2025-11-23'),
           ('US', 7.0, DATE '2025-10-01');
         CREATE TABLE employees (employee_id INTEGER, name VARCHAR, manager_id INTEGER);
         INSERT INTO employees VALUES (1, 'Ada', NULL), (2, 'Grace', 1), (3, 'Linus', 1);",
    )
    .unwrap();
    conn
}

fn sales_doc() -> QueryDocument {
    QueryDocument::from_json(
        r#"{
            "columns": [
                {"schema": "main", "table_name": "sales", "column_name": "region",
                 "data_type": "VARCHAR", "is_selected_column": true},
                {"schema": "main", "table_name": "sales", "column_name": "amount",
                 "data_type": "DOUBLE", "is_selected_column": false},
                {"schema": "main", "table_name": "sales", "column_name": "sold_on",
                 "data_type": "DATE", "is_selected_column": false}
            ],
            "grouping": {
                "aggregate_functions": [
                    {"column": "main.sales.amount", "function": "SUM"},
                    {"column": "main.sales.sold_on", "function": "MAX", "alias": "last_sale"}
                ],
                "group_by_columns": ["main.sales.region"]
            },
            "ordering": [{"column": "main.sales.region"}]
        }"#,
    )
    .unwrap()
}

#[test]
fn materializes_aggregate_query() {
    let registry = TypeRegistry::new();
    let materializer = Materializer::new(&registry, MaterializeOptions::default());
    let mut source = DuckSource::from_connection("uploads", source_db());
    let mut store = DuckStore::open_in_memory("materialized").unwrap();

    let table = materializer
        .materialize(&sales_doc(), &mut source, &mut store)
        .unwrap();

    assert_eq!(table.row_count, 2);
    assert!(table.name.starts_with("mq_"));
    let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["main_sales_region", "sum_amount", "last_sale"]);

    let (region, total, last): (String, f64, String) = store
        .connection()
        .query_row(
            &format!(
                "SELECT main_sales_region, sum_amount, CAST(last_sale AS VARCHAR) FROM materialized.{} \
                 WHERE main_sales_region = 'EU'",
                table.name
            ),
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!(region, "EU");
    assert_eq!(total, 15.5);
    assert_eq!(last, "2025-11-23");

    let records = store.list_materializations().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].table_name, table.name);
    assert_eq!(records[0].source_identity, "uploads");
    assert_eq!(records[0].fingerprint, sales_doc().fingerprint());
    assert_eq!(records[0].ir, sales_doc());
}

#[test]
fn materializes_self_join() {
    let doc = QueryDocument::from_json(
        r#"{
            "columns": [
                {"schema": "main", "table_name": "employees", "column_name": "name",
                 "data_type": "VARCHAR", "is_selected_column": true, "table_alias": "emp"},
                {"schema": "main", "table_name": "employees", "column_name": "name",
                 "data_type": "VARCHAR", "is_selected_column": true, "table_alias": "mgr"}
            ],
            "join_edges": [{
                "left": {"schema": "main", "table_name": "employees", "alias": "emp"},
                "left_column": "manager_id",
                "right": {"schema": "main", "table_name": "employees", "alias": "mgr"},
                "right_column": "employee_id"
            }],
            "filters": [{"column": "emp.name", "operator": "!=", "value": "Linus"}]
        }"#,
    )
    .unwrap();

    let registry = TypeRegistry::new();
    let materializer = Materializer::new(
        &registry,
        MaterializeOptions {
            table_name: Some("reporting_lines".to_string()),
            ..MaterializeOptions::default()
        },
    );
    let mut source = DuckSource::from_connection("hr", source_db());
    let mut store = DuckStore::open_in_memory("materialized").unwrap();

    let table = materializer.materialize(&doc, &mut source, &mut store).unwrap();
    assert_eq!(table.row_count, 1);

    let (emp, mgr): (String, String) = store
        .connection()
        .query_row("SELECT main_emp_name, main_mgr_name FROM materialized.reporting_lines", [], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .unwrap();
    assert_eq!((emp.as_str(), mgr.as_str()), ("Grace", "Ada"));
}

#[test]
fn failed_create_leaves_store_unchanged() {
    let registry = TypeRegistry::new();
    let materializer = Materializer::new(
        &registry,
        MaterializeOptions {
            table_name: Some("totals".to_string()),
            ..MaterializeOptions::default()
        },
    );
    let mut store = DuckStore::open_in_memory("materialized").unwrap();

    let mut source = DuckSource::from_connection("uploads", source_db());
    materializer.materialize(&sales_doc(), &mut source, &mut store).unwrap();

    let mut source = DuckSource::from_connection("uploads", source_db());
    let err = materializer
        .materialize(&sales_doc(), &mut source, &mut store)
        .unwrap_err();
    assert!(matches!(err, MaterializeError::Materialization { .. }));

    let records = store.list_materializations().unwrap();
    assert_eq!(records.len(), 1);
    let rows: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM materialized.totals", [], |r| r.get(0))
        .unwrap();
    assert_eq!(rows, 2);

    store.drop_table("totals").unwrap();
    assert!(store.list_materializations().unwrap().is_empty());
}

#[test]
fn compiled_sql_runs_on_duckdb() {
    let compiled = Compiler::new(matql_ir::Dialect::DuckDb).compile(&sales_doc()).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT main.sales.region AS main_sales_region, SUM(main.sales.amount) AS sum_amount, \
         MAX(main.sales.sold_on) AS last_sale FROM main.sales GROUP BY main.sales.region \
         ORDER BY main_sales_region ASC"
    );

    let conn = source_db();
    let mut stmt = conn.prepare(&compiled.sql).unwrap();
    let regions: Vec<String> = stmt
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(regions, vec!["EU".to_string(), "US".to_string()]);
}

#[test]
fn keyword_alias_into_spaced_schema() {
    let mut doc = sales_doc();
    doc.columns[0].alias_name = Some("Group".to_string());

    let registry = TypeRegistry::new();
    let materializer = Materializer::new(
        &registry,
        MaterializeOptions {
            destination_schema: "Materialized Data".to_string(),
            table_name: Some("by_region".to_string()),
            ..MaterializeOptions::default()
        },
    );
    let mut source = DuckSource::from_connection("uploads", source_db());
    let mut store = DuckStore::open_in_memory("Materialized Data").unwrap();

    let table = materializer.materialize(&doc, &mut source, &mut store).unwrap();
    assert_eq!(table.schema, store.schema());
    assert_eq!(table.columns[0].name, "group");

    let regions: i64 = store
        .connection()
        .query_row(
            r#"SELECT COUNT(DISTINCT "group") FROM materialized_data.by_region"#,
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(regions, 2);
}

#[test]
fn orders_by_aggregated_column() {
    let mut doc = sales_doc();
    doc.columns[1].is_selected_column = true;
    doc.ordering = serde_json::from_str(r#"[{"column": "main.sales.amount", "direction": "DESC"}]"#).unwrap();

    let registry = TypeRegistry::new();
    let materializer = Materializer::new(
        &registry,
        MaterializeOptions {
            table_name: Some("ranked".to_string()),
            ..MaterializeOptions::default()
        },
    );
    let mut source = DuckSource::from_connection("uploads", source_db());
    let mut store = DuckStore::open_in_memory("materialized").unwrap();

    let table = materializer.materialize(&doc, &mut source, &mut store).unwrap();
    assert_eq!(table.row_count, 2);
}
